//! servex-db
//!
//! Persistence boundary. Handlers and jobs talk to [`Store`]; two
//! implementations exist:
//!
//! - [`PgStore`]: Postgres via sqlx, runtime-checked queries, embedded
//!   migrations. Invariants are enforced by constraints and partial unique
//!   indexes (`uq_orders_one_unpaid_per_table`,
//!   `uq_payments_one_pending_per_order`).
//! - [`MemStore`]: one `tokio::sync::RwLock` over in-memory maps; the same
//!   invariants are checked under the write lock. Used for dev and tests.
//!
//! Callers build complete records (ids, timestamps) and pass `now` in, so
//! both stores behave identically for a given input.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use servex_config::{ServiceConfig, StoreBackend};
use servex_schemas::{
    DiningTable, MenuItem, Order, OrderStatus, Payment, PaymentMethod, SessionStatus, TableSession,
    User,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use uuid::Uuid;

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePatch {
    pub table_number: Option<i32>,
    pub capacity: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuFilter {
    pub available_only: bool,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_minor: Option<i64>,
    pub image_url: Option<String>,
    pub is_available: Option<bool>,
    pub preparation_minutes: Option<i32>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 20,
        }
    }
}

impl OrderQuery {
    fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.limit)
    }
}

/// Columns set together with a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub payment_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertTableOutcome {
    Created(DiningTable),
    NumberTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTableOutcome {
    Updated(DiningTable),
    NotFound,
    NumberTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOrderOutcome {
    Created(Order),
    /// The table already has an unpaid order; its id is returned.
    UnpaidExists(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Order),
    /// The order was not in any of the expected source states.
    Conflict(Order),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPaymentOutcome {
    Created(Payment),
    /// A PENDING payment already exists for the order.
    Existing(Payment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertUserOutcome {
    Created(User),
    EmailTaken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopItem {
    pub menu_item_id: Uuid,
    pub name: String,
    pub total_quantity: i64,
    pub total_revenue_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub total_orders: i64,
    pub total_revenue_minor: i64,
    /// Rounded half up.
    pub avg_order_value_minor: i64,
    pub top_items: Vec<TopItem>,
}

pub(crate) fn avg_half_up(total: i64, count: i64) -> i64 {
    if count <= 0 {
        0
    } else {
        (total + count / 2) / count
    }
}

pub(crate) fn revenue_statuses() -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(|s| servex_ordering::counts_as_revenue(*s))
        .collect()
}

pub(crate) fn kitchen_statuses() -> Vec<OrderStatus> {
    OrderStatus::ALL
        .into_iter()
        .filter(|s| servex_ordering::is_kitchen_visible(*s))
        .collect()
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    // --- tables ---
    async fn list_tables(&self) -> Result<Vec<DiningTable>>;
    async fn fetch_table(&self, table_id: Uuid) -> Result<Option<DiningTable>>;
    async fn insert_table(&self, table: &DiningTable) -> Result<InsertTableOutcome>;
    async fn update_table(
        &self,
        table_id: Uuid,
        patch: &TablePatch,
        now: DateTime<Utc>,
    ) -> Result<UpdateTableOutcome>;
    async fn set_table_qr(
        &self,
        table_id: Uuid,
        qr_code_url: &str,
        qr_code_data: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DiningTable>>;
    /// Deletes the table and its session. Orders are kept.
    async fn delete_table(&self, table_id: Uuid) -> Result<bool>;

    // --- sessions ---
    /// Issue a fresh ACTIVE token for the table, replacing any previous one.
    async fn upsert_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TableSession>;
    async fn find_usable_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>>;
    /// Record activity and push the expiry out.
    async fn touch_session(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>>;
    /// Returns the number of sessions changed.
    async fn set_sessions_status(
        &self,
        table_id: Uuid,
        from: Option<SessionStatus>,
        to: SessionStatus,
    ) -> Result<u64>;
    /// ACTIVE sessions past `expires_at` become EXPIRED.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // --- menu ---
    /// Sorted by category, then name.
    async fn list_menu_items(&self, filter: &MenuFilter) -> Result<Vec<MenuItem>>;
    /// Distinct categories over all items, sorted.
    async fn menu_categories(&self) -> Result<Vec<String>>;
    async fn fetch_menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>>;
    /// Unknown ids are skipped; unavailable items are returned.
    async fn fetch_menu_items(&self, ids: &[Uuid]) -> Result<Vec<MenuItem>>;
    async fn insert_menu_item(&self, item: &MenuItem) -> Result<()>;
    async fn update_menu_item(
        &self,
        menu_item_id: Uuid,
        patch: &MenuItemPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>>;
    async fn toggle_menu_item_availability(
        &self,
        menu_item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>>;
    async fn delete_menu_item(&self, menu_item_id: Uuid) -> Result<bool>;

    // --- orders ---
    /// Insert a CREATED order unless the table already has one.
    async fn insert_order(&self, order: &Order) -> Result<InsertOrderOutcome>;
    async fn find_unpaid_order(&self, table_id: Uuid) -> Result<Option<Uuid>>;
    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage>;
    /// PAID, PREPARING and READY orders, oldest first.
    async fn list_kitchen_orders(&self) -> Result<Vec<Order>>;
    /// Compare-and-set on status: applies only when the current status is in `from`.
    async fn transition_order(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;
    /// CREATED orders placed before `cutoff` become CANCELLED. Returns their ids.
    async fn cancel_abandoned_orders(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;
    async fn sales_summary(&self, top_n: usize) -> Result<SalesSummary>;

    // --- payments ---
    async fn insert_pending_payment(&self, payment: &Payment) -> Result<InsertPaymentOutcome>;
    async fn find_pending_payment(&self, order_id: Uuid) -> Result<Option<Payment>>;
    /// Most recent payment opened for the gateway order.
    async fn fetch_payment_by_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>>;
    /// PENDING or FAILED become SUCCESS; an existing SUCCESS is returned untouched.
    async fn mark_payment_succeeded(
        &self,
        payment_id: Uuid,
        gateway_payment_id: &str,
        gateway_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>>;
    /// PENDING becomes FAILED; other states are returned untouched.
    async fn mark_payment_failed(
        &self,
        payment_id: Uuid,
        gateway_payment_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>>;

    // --- users ---
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn insert_user(&self, user: &User) -> Result<InsertUserOutcome>;
    async fn count_users(&self) -> Result<i64>;
}

// ---------------------------------------------------------------------------
// Postgres helpers
// ---------------------------------------------------------------------------

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
    })
}

/// Build the configured store. Postgres stores are migrated before use.
pub async fn connect_from_config(
    cfg: &ServiceConfig,
    database_url: Option<&str>,
) -> Result<Arc<dyn Store>> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Ok(Arc::new(MemStore::new()))
        }
        StoreBackend::Postgres => {
            let Some(url) = database_url else {
                bail!(
                    "store.backend=postgres requires env var '{}'",
                    cfg.store.database_url_env
                );
            };
            let pool = connect(url, cfg.store.max_connections).await?;
            migrate(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}
