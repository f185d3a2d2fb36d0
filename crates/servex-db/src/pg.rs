//! Postgres store.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use servex_schemas::{
    DiningTable, MenuItem, Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus,
    Role, SessionStatus, TableSession, User,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    avg_half_up, kitchen_statuses, revenue_statuses, InsertOrderOutcome, InsertPaymentOutcome,
    InsertTableOutcome, InsertUserOutcome, MenuFilter, MenuItemPatch, OrderPage, OrderPatch,
    OrderQuery, SalesSummary, Store, TablePatch, TopItem, TransitionOutcome, UpdateTableOutcome,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_payment(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("{PAYMENT_SELECT} where payment_id = $1"))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_payment failed")?;
        row.as_ref().map(payment_from_row).transpose()
    }
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn status_texts(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const TABLE_SELECT: &str = r#"
    select table_id, table_number, qr_code_url, qr_code_data, is_active, capacity,
           created_at, updated_at
    from dining_tables
"#;

const SESSION_COLUMNS: &str =
    "session_id, table_id, session_token, status, created_at, expires_at, last_activity_at";

const MENU_SELECT: &str = r#"
    select menu_item_id, name, description, category, price_minor, image_url, is_available,
           preparation_minutes, tags, created_at, updated_at
    from menu_items
"#;

const MENU_COLUMNS: &str = "menu_item_id, name, description, category, price_minor, image_url, \
     is_available, preparation_minutes, tags, created_at, updated_at";

const ORDER_SELECT: &str = r#"
    select o.order_id, o.table_id, t.table_number, o.items, o.subtotal_minor, o.tax_minor,
           o.service_charge_minor, o.total_minor, o.currency, o.status, o.payment_id,
           o.payment_method, o.session_token, o.customer_name, o.customer_phone,
           o.created_at, o.updated_at
    from orders o
    left join dining_tables t on t.table_id = o.table_id
"#;

const PAYMENT_SELECT: &str = r#"
    select payment_id, order_id, gateway, gateway_order_id, gateway_payment_id,
           gateway_signature, amount_minor, currency, status, created_at, updated_at
    from payments
"#;

const USER_SELECT: &str = r#"
    select user_id, email, name, role, password_hash, is_active, created_at
    from users
"#;

fn table_from_row(row: &PgRow) -> Result<DiningTable> {
    Ok(DiningTable {
        table_id: row.try_get("table_id")?,
        table_number: row.try_get("table_number")?,
        qr_code_url: row.try_get("qr_code_url")?,
        qr_code_data: row.try_get("qr_code_data")?,
        is_active: row.try_get("is_active")?,
        capacity: row.try_get("capacity")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<TableSession> {
    Ok(TableSession {
        session_id: row.try_get("session_id")?,
        table_id: row.try_get("table_id")?,
        session_token: row.try_get("session_token")?,
        status: SessionStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
    })
}

fn menu_item_from_row(row: &PgRow) -> Result<MenuItem> {
    let Json(tags): Json<Vec<String>> = row.try_get("tags")?;
    Ok(MenuItem {
        menu_item_id: row.try_get("menu_item_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        price_minor: row.try_get("price_minor")?,
        image_url: row.try_get("image_url")?,
        is_available: row.try_get("is_available")?,
        preparation_minutes: row.try_get("preparation_minutes")?,
        tags,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let Json(items): Json<Vec<OrderItem>> = row.try_get("items")?;
    Ok(Order {
        order_id: row.try_get("order_id")?,
        table_id: row.try_get("table_id")?,
        table_number: row.try_get("table_number")?,
        items,
        subtotal_minor: row.try_get("subtotal_minor")?,
        tax_minor: row.try_get("tax_minor")?,
        service_charge_minor: row.try_get("service_charge_minor")?,
        total_minor: row.try_get("total_minor")?,
        currency: row.try_get("currency")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        payment_id: row.try_get("payment_id")?,
        payment_method: PaymentMethod::parse(&row.try_get::<String, _>("payment_method")?)?,
        session_token: row.try_get("session_token")?,
        customer_name: row.try_get("customer_name")?,
        customer_phone: row.try_get("customer_phone")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        payment_id: row.try_get("payment_id")?,
        order_id: row.try_get("order_id")?,
        gateway: row.try_get("gateway")?,
        gateway_order_id: row.try_get("gateway_order_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        gateway_signature: row.try_get("gateway_signature")?,
        amount_minor: row.try_get("amount_minor")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        role: Role::parse(&row.try_get::<String, _>("role")?)?,
        password_hash: row.try_get("password_hash")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Store impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    // --- tables ---

    async fn list_tables(&self) -> Result<Vec<DiningTable>> {
        let rows = sqlx::query(&format!("{TABLE_SELECT} order by table_number asc"))
            .fetch_all(&self.pool)
            .await
            .context("list_tables failed")?;
        rows.iter().map(table_from_row).collect()
    }

    async fn fetch_table(&self, table_id: Uuid) -> Result<Option<DiningTable>> {
        let row = sqlx::query(&format!("{TABLE_SELECT} where table_id = $1"))
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_table failed")?;
        row.as_ref().map(table_from_row).transpose()
    }

    async fn insert_table(&self, table: &DiningTable) -> Result<InsertTableOutcome> {
        let res = sqlx::query(
            r#"
            insert into dining_tables (
              table_id, table_number, qr_code_url, qr_code_data, is_active, capacity,
              created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(table.table_id)
        .bind(table.table_number)
        .bind(&table.qr_code_url)
        .bind(&table.qr_code_data)
        .bind(table.is_active)
        .bind(table.capacity)
        .bind(table.created_at)
        .bind(table.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(InsertTableOutcome::Created(table.clone())),
            Err(e) if is_unique_constraint_violation(&e, "uq_dining_tables_number") => {
                Ok(InsertTableOutcome::NumberTaken)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert_table failed")),
        }
    }

    async fn update_table(
        &self,
        table_id: Uuid,
        patch: &TablePatch,
        now: DateTime<Utc>,
    ) -> Result<UpdateTableOutcome> {
        let res = sqlx::query(
            r#"
            update dining_tables
            set table_number = coalesce($2, table_number),
                capacity     = coalesce($3, capacity),
                is_active    = coalesce($4, is_active),
                updated_at   = $5
            where table_id = $1
            returning table_id, table_number, qr_code_url, qr_code_data, is_active, capacity,
                      created_at, updated_at
            "#,
        )
        .bind(table_id)
        .bind(patch.table_number)
        .bind(patch.capacity)
        .bind(patch.is_active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(Some(row)) => Ok(UpdateTableOutcome::Updated(table_from_row(&row)?)),
            Ok(None) => Ok(UpdateTableOutcome::NotFound),
            Err(e) if is_unique_constraint_violation(&e, "uq_dining_tables_number") => {
                Ok(UpdateTableOutcome::NumberTaken)
            }
            Err(e) => Err(anyhow::Error::new(e).context("update_table failed")),
        }
    }

    async fn set_table_qr(
        &self,
        table_id: Uuid,
        qr_code_url: &str,
        qr_code_data: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DiningTable>> {
        let row = sqlx::query(
            r#"
            update dining_tables
            set qr_code_url = $2, qr_code_data = $3, updated_at = $4
            where table_id = $1
            returning table_id, table_number, qr_code_url, qr_code_data, is_active, capacity,
                      created_at, updated_at
            "#,
        )
        .bind(table_id)
        .bind(qr_code_url)
        .bind(qr_code_data)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("set_table_qr failed")?;
        row.as_ref().map(table_from_row).transpose()
    }

    async fn delete_table(&self, table_id: Uuid) -> Result<bool> {
        // table_sessions rows go with it (on delete cascade).
        let res = sqlx::query("delete from dining_tables where table_id = $1")
            .bind(table_id)
            .execute(&self.pool)
            .await
            .context("delete_table failed")?;
        Ok(res.rows_affected() > 0)
    }

    // --- sessions ---

    async fn upsert_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TableSession> {
        let row = sqlx::query(&format!(
            r#"
            insert into table_sessions (
              session_id, table_id, session_token, status, created_at, expires_at, last_activity_at
            ) values ($1, $2, $3, 'ACTIVE', $4, $5, $4)
            on conflict (table_id) do update
              set session_token    = excluded.session_token,
                  status           = 'ACTIVE',
                  expires_at       = excluded.expires_at,
                  last_activity_at = excluded.last_activity_at
            returning {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(table_id)
        .bind(session_token)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .context("upsert_session failed")?;
        session_from_row(&row)
    }

    async fn find_usable_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>> {
        let row = sqlx::query(&format!(
            r#"
            select {SESSION_COLUMNS}
            from table_sessions
            where table_id = $1
              and session_token = $2
              and status = 'ACTIVE'
              and expires_at > $3
            "#
        ))
        .bind(table_id)
        .bind(session_token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("find_usable_session failed")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>> {
        let row = sqlx::query(&format!(
            r#"
            update table_sessions
            set expires_at = $2, last_activity_at = $3
            where session_id = $1
            returning {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("touch_session failed")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn set_sessions_status(
        &self,
        table_id: Uuid,
        from: Option<SessionStatus>,
        to: SessionStatus,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
            update table_sessions
            set status = $3
            where table_id = $1
              and ($2::text is null or status = $2)
            "#,
        )
        .bind(table_id)
        .bind(from.map(|s| s.as_str()))
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .context("set_sessions_status failed")?;
        Ok(res.rows_affected())
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            r#"
            update table_sessions
            set status = 'EXPIRED'
            where status = 'ACTIVE' and expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("expire_sessions failed")?;
        Ok(res.rows_affected())
    }

    // --- menu ---

    async fn list_menu_items(&self, filter: &MenuFilter) -> Result<Vec<MenuItem>> {
        let rows = sqlx::query(&format!(
            r#"{MENU_SELECT}
            where ($1 = false or is_available)
              and ($2::text is null or category = $2)
            order by category asc, name asc
            "#
        ))
        .bind(filter.available_only)
        .bind(filter.category.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("list_menu_items failed")?;
        rows.iter().map(menu_item_from_row).collect()
    }

    async fn menu_categories(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select distinct category from menu_items order by category asc")
                .fetch_all(&self.pool)
                .await
                .context("menu_categories failed")?;
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    async fn fetch_menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>> {
        let row = sqlx::query(&format!("{MENU_SELECT} where menu_item_id = $1"))
            .bind(menu_item_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_menu_item failed")?;
        row.as_ref().map(menu_item_from_row).transpose()
    }

    async fn fetch_menu_items(&self, ids: &[Uuid]) -> Result<Vec<MenuItem>> {
        let rows = sqlx::query(&format!(
            "{MENU_SELECT} where menu_item_id = any($1) order by menu_item_id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("fetch_menu_items failed")?;
        rows.iter().map(menu_item_from_row).collect()
    }

    async fn insert_menu_item(&self, item: &MenuItem) -> Result<()> {
        sqlx::query(
            r#"
            insert into menu_items (
              menu_item_id, name, description, category, price_minor, image_url, is_available,
              preparation_minutes, tags, created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(item.menu_item_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.category)
        .bind(item.price_minor)
        .bind(&item.image_url)
        .bind(item.is_available)
        .bind(item.preparation_minutes)
        .bind(Json(item.tags.clone()))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .context("insert_menu_item failed")?;
        Ok(())
    }

    async fn update_menu_item(
        &self,
        menu_item_id: Uuid,
        patch: &MenuItemPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>> {
        let row = sqlx::query(&format!(
            r#"
            update menu_items
            set name                = coalesce($2, name),
                description         = coalesce($3, description),
                category            = coalesce($4, category),
                price_minor         = coalesce($5, price_minor),
                image_url           = coalesce($6, image_url),
                is_available        = coalesce($7, is_available),
                preparation_minutes = coalesce($8, preparation_minutes),
                tags                = coalesce($9, tags),
                updated_at          = $10
            where menu_item_id = $1
            returning {MENU_COLUMNS}
            "#
        ))
        .bind(menu_item_id)
        .bind(patch.name.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.category.as_deref())
        .bind(patch.price_minor)
        .bind(patch.image_url.as_deref())
        .bind(patch.is_available)
        .bind(patch.preparation_minutes)
        .bind(patch.tags.clone().map(Json))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("update_menu_item failed")?;
        row.as_ref().map(menu_item_from_row).transpose()
    }

    async fn toggle_menu_item_availability(
        &self,
        menu_item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>> {
        let row = sqlx::query(&format!(
            r#"
            update menu_items
            set is_available = not is_available, updated_at = $2
            where menu_item_id = $1
            returning {MENU_COLUMNS}
            "#
        ))
        .bind(menu_item_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("toggle_menu_item_availability failed")?;
        row.as_ref().map(menu_item_from_row).transpose()
    }

    async fn delete_menu_item(&self, menu_item_id: Uuid) -> Result<bool> {
        let res = sqlx::query("delete from menu_items where menu_item_id = $1")
            .bind(menu_item_id)
            .execute(&self.pool)
            .await
            .context("delete_menu_item failed")?;
        Ok(res.rows_affected() > 0)
    }

    // --- orders ---

    async fn insert_order(&self, order: &Order) -> Result<InsertOrderOutcome> {
        let res = sqlx::query(
            r#"
            insert into orders (
              order_id, table_id, items, subtotal_minor, tax_minor, service_charge_minor,
              total_minor, currency, status, payment_id, payment_method, session_token,
              customer_name, customer_phone, created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.order_id)
        .bind(order.table_id)
        .bind(Json(order.items.clone()))
        .bind(order.subtotal_minor)
        .bind(order.tax_minor)
        .bind(order.service_charge_minor)
        .bind(order.total_minor)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(order.payment_id)
        .bind(order.payment_method.as_str())
        .bind(&order.session_token)
        .bind(&order.customer_name)
        .bind(&order.customer_phone)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {
                let created = self
                    .fetch_order(order.order_id)
                    .await?
                    .ok_or_else(|| anyhow!("insert_order: row {} missing after insert", order.order_id))?;
                Ok(InsertOrderOutcome::Created(created))
            }
            Err(e) if is_unique_constraint_violation(&e, "uq_orders_one_unpaid_per_table") => {
                // The competing order may have been paid in the meantime.
                match self.find_unpaid_order(order.table_id).await? {
                    Some(existing) => Ok(InsertOrderOutcome::UnpaidExists(existing)),
                    None => Err(anyhow!(
                        "insert_order: unpaid order for table {} settled during insert; retry",
                        order.table_id
                    )),
                }
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert_order failed")),
        }
    }

    async fn find_unpaid_order(&self, table_id: Uuid) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("select order_id from orders where table_id = $1 and status = 'CREATED'")
                .bind(table_id)
                .fetch_optional(&self.pool)
                .await
                .context("find_unpaid_order failed")?;
        Ok(row.map(|(id,)| id))
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{ORDER_SELECT} where o.order_id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_order failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let status = query.status.map(|s| s.as_str());

        let rows = sqlx::query(&format!(
            r#"{ORDER_SELECT}
            where ($1::text is null or o.status = $1)
            order by o.created_at desc, o.order_id desc
            limit $2 offset $3
            "#
        ))
        .bind(status)
        .bind(i64::from(query.limit))
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await
        .context("list_orders failed")?;

        let (total,): (i64,) = sqlx::query_as(
            "select count(*)::bigint from orders where ($1::text is null or status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .context("list_orders count failed")?;

        Ok(OrderPage {
            orders: rows.iter().map(order_from_row).collect::<Result<_>>()?,
            total,
        })
    }

    async fn list_kitchen_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{ORDER_SELECT} where o.status = any($1) order by o.created_at asc, o.order_id asc"
        ))
        .bind(status_texts(&kitchen_statuses()))
        .fetch_all(&self.pool)
        .await
        .context("list_kitchen_orders failed")?;
        rows.iter().map(order_from_row).collect()
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let res = sqlx::query(
            r#"
            update orders
            set status         = $2,
                payment_id     = coalesce($3, payment_id),
                payment_method = coalesce($4, payment_method),
                updated_at     = $5
            where order_id = $1
              and status = any($6)
            "#,
        )
        .bind(order_id)
        .bind(to.as_str())
        .bind(patch.payment_id)
        .bind(patch.payment_method.map(|m| m.as_str()))
        .bind(now)
        .bind(status_texts(from))
        .execute(&self.pool)
        .await;

        let applied = match res {
            Ok(r) => r.rows_affected() > 0,
            Err(e) if is_unique_constraint_violation(&e, "uq_orders_one_unpaid_per_table") => false,
            Err(e) => return Err(anyhow::Error::new(e).context("transition_order failed")),
        };

        match self.fetch_order(order_id).await? {
            None => Ok(TransitionOutcome::NotFound),
            Some(order) if applied => Ok(TransitionOutcome::Applied(order)),
            Some(order) => Ok(TransitionOutcome::Conflict(order)),
        }
    }

    async fn cancel_abandoned_orders(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            update orders
            set status = 'CANCELLED', updated_at = $2
            where status = 'CREATED' and created_at < $1
            returning order_id
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("cancel_abandoned_orders failed")?;
        let mut ids: Vec<Uuid> = rows.into_iter().map(|(id,)| id).collect();
        ids.sort();
        Ok(ids)
    }

    async fn sales_summary(&self, top_n: usize) -> Result<SalesSummary> {
        let statuses = status_texts(&revenue_statuses());

        let (total_orders, total_revenue_minor): (i64, i64) = sqlx::query_as(
            r#"
            select count(*)::bigint, coalesce(sum(total_minor), 0)::bigint
            from orders
            where status = any($1)
            "#,
        )
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await
        .context("sales_summary totals failed")?;

        let rows = sqlx::query(
            r#"
            select (item->>'menu_item_id')::uuid as menu_item_id,
                   min(item->>'name') as name,
                   sum((item->>'quantity')::bigint)::bigint as total_quantity,
                   sum((item->>'quantity')::bigint * (item->>'unit_price_minor')::bigint)::bigint
                     as total_revenue_minor
            from orders o
            cross join lateral jsonb_array_elements(o.items) as item
            where o.status = any($1)
            group by 1
            order by total_quantity desc, name asc
            limit $2
            "#,
        )
        .bind(&statuses)
        .bind(i64::try_from(top_n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("sales_summary top items failed")?;

        let top_items = rows
            .iter()
            .map(|r| -> Result<TopItem> {
                Ok(TopItem {
                    menu_item_id: r.try_get("menu_item_id")?,
                    name: r.try_get("name")?,
                    total_quantity: r.try_get("total_quantity")?,
                    total_revenue_minor: r.try_get("total_revenue_minor")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SalesSummary {
            total_orders,
            total_revenue_minor,
            avg_order_value_minor: avg_half_up(total_revenue_minor, total_orders),
            top_items,
        })
    }

    // --- payments ---

    async fn insert_pending_payment(&self, payment: &Payment) -> Result<InsertPaymentOutcome> {
        let res = sqlx::query(
            r#"
            insert into payments (
              payment_id, order_id, gateway, gateway_order_id, gateway_payment_id,
              gateway_signature, amount_minor, currency, status, created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9, $10)
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.order_id)
        .bind(&payment.gateway)
        .bind(&payment.gateway_order_id)
        .bind(payment.gateway_payment_id.as_deref())
        .bind(payment.gateway_signature.as_deref())
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {
                let mut created = payment.clone();
                created.status = PaymentStatus::Pending;
                Ok(InsertPaymentOutcome::Created(created))
            }
            Err(e) if is_unique_constraint_violation(&e, "uq_payments_one_pending_per_order") => {
                match self.find_pending_payment(payment.order_id).await? {
                    Some(existing) => Ok(InsertPaymentOutcome::Existing(existing)),
                    None => Err(anyhow!(
                        "insert_pending_payment: pending payment for order {} settled during insert; retry",
                        payment.order_id
                    )),
                }
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert_pending_payment failed")),
        }
    }

    async fn find_pending_payment(&self, order_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "{PAYMENT_SELECT} where order_id = $1 and status = 'PENDING'"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .context("find_pending_payment failed")?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn fetch_payment_by_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "{PAYMENT_SELECT} where gateway_order_id = $1 order by created_at desc limit 1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_payment_by_gateway_order failed")?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn mark_payment_succeeded(
        &self,
        payment_id: Uuid,
        gateway_payment_id: &str,
        gateway_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        sqlx::query(
            r#"
            update payments
            set status = 'SUCCESS',
                gateway_payment_id = $2,
                gateway_signature = $3,
                updated_at = $4
            where payment_id = $1 and status <> 'SUCCESS'
            "#,
        )
        .bind(payment_id)
        .bind(gateway_payment_id)
        .bind(gateway_signature)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("mark_payment_succeeded failed")?;
        self.fetch_payment(payment_id).await
    }

    async fn mark_payment_failed(
        &self,
        payment_id: Uuid,
        gateway_payment_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        sqlx::query(
            r#"
            update payments
            set status = 'FAILED',
                gateway_payment_id = coalesce($2, gateway_payment_id),
                updated_at = $3
            where payment_id = $1 and status = 'PENDING'
            "#,
        )
        .bind(payment_id)
        .bind(gateway_payment_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("mark_payment_failed failed")?;
        self.fetch_payment(payment_id).await
    }

    // --- users ---

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} where email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("find_user_by_email failed")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} where user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_user failed")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<InsertUserOutcome> {
        let res = sqlx::query(
            r#"
            insert into users (user_id, email, name, role, password_hash, is_active, created_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(InsertUserOutcome::Created(user.clone())),
            Err(e) if is_unique_constraint_violation(&e, "uq_users_email") => {
                Ok(InsertUserOutcome::EmailTaken)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert_user failed")),
        }
    }

    async fn count_users(&self) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from users")
            .fetch_one(&self.pool)
            .await
            .context("count_users failed")?;
        Ok(n)
    }
}
