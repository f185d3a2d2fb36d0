//! In-memory store.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use servex_schemas::{
    DiningTable, MenuItem, Order, OrderStatus, Payment, PaymentStatus, SessionStatus,
    TableSession, User,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    avg_half_up, kitchen_statuses, revenue_statuses, InsertOrderOutcome, InsertPaymentOutcome,
    InsertTableOutcome, InsertUserOutcome, MenuFilter, MenuItemPatch, OrderPage, OrderPatch,
    OrderQuery, SalesSummary, Store, TablePatch, TopItem, TransitionOutcome, UpdateTableOutcome,
};

#[derive(Debug, Default)]
struct MemState {
    tables: HashMap<Uuid, DiningTable>,
    /// Keyed by table id: one session row per table.
    sessions: HashMap<Uuid, TableSession>,
    menu: HashMap<Uuid, MenuItem>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    users: HashMap<Uuid, User>,
}

impl MemState {
    fn joined(&self, order: &Order) -> Order {
        let mut o = order.clone();
        o.table_number = self.tables.get(&o.table_id).map(|t| t.table_number);
        o
    }

    fn number_taken(&self, table_number: i32, except: Option<Uuid>) -> bool {
        self.tables
            .values()
            .any(|t| t.table_number == table_number && Some(t.table_id) != except)
    }
}

#[derive(Debug, Default)]
pub struct MemStore {
    state: RwLock<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_orders_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.order_id.cmp(&a.order_id))
    });
}

#[async_trait::async_trait]
impl Store for MemStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    // --- tables ---

    async fn list_tables(&self) -> Result<Vec<DiningTable>> {
        let st = self.state.read().await;
        let mut out: Vec<DiningTable> = st.tables.values().cloned().collect();
        out.sort_by_key(|t| t.table_number);
        Ok(out)
    }

    async fn fetch_table(&self, table_id: Uuid) -> Result<Option<DiningTable>> {
        Ok(self.state.read().await.tables.get(&table_id).cloned())
    }

    async fn insert_table(&self, table: &DiningTable) -> Result<InsertTableOutcome> {
        let mut st = self.state.write().await;
        if st.number_taken(table.table_number, None) {
            return Ok(InsertTableOutcome::NumberTaken);
        }
        st.tables.insert(table.table_id, table.clone());
        Ok(InsertTableOutcome::Created(table.clone()))
    }

    async fn update_table(
        &self,
        table_id: Uuid,
        patch: &TablePatch,
        now: DateTime<Utc>,
    ) -> Result<UpdateTableOutcome> {
        let mut st = self.state.write().await;
        if let Some(n) = patch.table_number {
            if st.number_taken(n, Some(table_id)) {
                return Ok(UpdateTableOutcome::NumberTaken);
            }
        }
        let Some(t) = st.tables.get_mut(&table_id) else {
            return Ok(UpdateTableOutcome::NotFound);
        };
        if let Some(n) = patch.table_number {
            t.table_number = n;
        }
        if let Some(c) = patch.capacity {
            t.capacity = c;
        }
        if let Some(a) = patch.is_active {
            t.is_active = a;
        }
        t.updated_at = now;
        Ok(UpdateTableOutcome::Updated(t.clone()))
    }

    async fn set_table_qr(
        &self,
        table_id: Uuid,
        qr_code_url: &str,
        qr_code_data: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DiningTable>> {
        let mut st = self.state.write().await;
        Ok(st.tables.get_mut(&table_id).map(|t| {
            t.qr_code_url = qr_code_url.to_string();
            t.qr_code_data = qr_code_data.to_string();
            t.updated_at = now;
            t.clone()
        }))
    }

    async fn delete_table(&self, table_id: Uuid) -> Result<bool> {
        let mut st = self.state.write().await;
        st.sessions.remove(&table_id);
        Ok(st.tables.remove(&table_id).is_some())
    }

    // --- sessions ---

    async fn upsert_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TableSession> {
        let mut st = self.state.write().await;
        let session = st
            .sessions
            .entry(table_id)
            .and_modify(|s| {
                s.session_token = session_token.to_string();
                s.status = SessionStatus::Active;
                s.expires_at = expires_at;
                s.last_activity_at = now;
            })
            .or_insert_with(|| TableSession {
                session_id: Uuid::new_v4(),
                table_id,
                session_token: session_token.to_string(),
                status: SessionStatus::Active,
                created_at: now,
                expires_at,
                last_activity_at: now,
            });
        Ok(session.clone())
    }

    async fn find_usable_session(
        &self,
        table_id: Uuid,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>> {
        let st = self.state.read().await;
        Ok(st
            .sessions
            .get(&table_id)
            .filter(|s| servex_ordering::session::is_usable(s, session_token, now))
            .cloned())
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>> {
        let mut st = self.state.write().await;
        Ok(st
            .sessions
            .values_mut()
            .find(|s| s.session_id == session_id)
            .map(|s| {
                s.expires_at = expires_at;
                s.last_activity_at = now;
                s.clone()
            }))
    }

    async fn set_sessions_status(
        &self,
        table_id: Uuid,
        from: Option<SessionStatus>,
        to: SessionStatus,
    ) -> Result<u64> {
        let mut st = self.state.write().await;
        match st.sessions.get_mut(&table_id) {
            Some(s) if from.map_or(true, |f| s.status == f) => {
                s.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut st = self.state.write().await;
        let mut n = 0;
        for s in st.sessions.values_mut() {
            if s.status == SessionStatus::Active && s.expires_at < now {
                s.status = SessionStatus::Expired;
                n += 1;
            }
        }
        Ok(n)
    }

    // --- menu ---

    async fn list_menu_items(&self, filter: &MenuFilter) -> Result<Vec<MenuItem>> {
        let st = self.state.read().await;
        let mut out: Vec<MenuItem> = st
            .menu
            .values()
            .filter(|m| !filter.available_only || m.is_available)
            .filter(|m| filter.category.as_ref().map_or(true, |c| &m.category == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(out)
    }

    async fn menu_categories(&self) -> Result<Vec<String>> {
        let st = self.state.read().await;
        let set: BTreeSet<String> = st.menu.values().map(|m| m.category.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn fetch_menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>> {
        Ok(self.state.read().await.menu.get(&menu_item_id).cloned())
    }

    async fn fetch_menu_items(&self, ids: &[Uuid]) -> Result<Vec<MenuItem>> {
        let st = self.state.read().await;
        let unique: BTreeSet<Uuid> = ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| st.menu.get(&id).cloned())
            .collect())
    }

    async fn insert_menu_item(&self, item: &MenuItem) -> Result<()> {
        let mut st = self.state.write().await;
        st.menu.insert(item.menu_item_id, item.clone());
        Ok(())
    }

    async fn update_menu_item(
        &self,
        menu_item_id: Uuid,
        patch: &MenuItemPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>> {
        let mut st = self.state.write().await;
        let Some(m) = st.menu.get_mut(&menu_item_id) else {
            return Ok(None);
        };
        if let Some(v) = &patch.name {
            m.name = v.clone();
        }
        if let Some(v) = &patch.description {
            m.description = v.clone();
        }
        if let Some(v) = &patch.category {
            m.category = v.clone();
        }
        if let Some(v) = patch.price_minor {
            m.price_minor = v;
        }
        if let Some(v) = &patch.image_url {
            m.image_url = v.clone();
        }
        if let Some(v) = patch.is_available {
            m.is_available = v;
        }
        if let Some(v) = patch.preparation_minutes {
            m.preparation_minutes = v;
        }
        if let Some(v) = &patch.tags {
            m.tags = v.clone();
        }
        m.updated_at = now;
        Ok(Some(m.clone()))
    }

    async fn toggle_menu_item_availability(
        &self,
        menu_item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MenuItem>> {
        let mut st = self.state.write().await;
        Ok(st.menu.get_mut(&menu_item_id).map(|m| {
            m.is_available = !m.is_available;
            m.updated_at = now;
            m.clone()
        }))
    }

    async fn delete_menu_item(&self, menu_item_id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.menu.remove(&menu_item_id).is_some())
    }

    // --- orders ---

    async fn insert_order(&self, order: &Order) -> Result<InsertOrderOutcome> {
        let mut st = self.state.write().await;
        if order.status == OrderStatus::Created {
            if let Some(existing) = st
                .orders
                .values()
                .find(|o| o.table_id == order.table_id && o.status == OrderStatus::Created)
            {
                return Ok(InsertOrderOutcome::UnpaidExists(existing.order_id));
            }
        }
        st.orders.insert(order.order_id, order.clone());
        Ok(InsertOrderOutcome::Created(st.joined(order)))
    }

    async fn find_unpaid_order(&self, table_id: Uuid) -> Result<Option<Uuid>> {
        let st = self.state.read().await;
        Ok(st
            .orders
            .values()
            .find(|o| o.table_id == table_id && o.status == OrderStatus::Created)
            .map(|o| o.order_id))
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let st = self.state.read().await;
        Ok(st.orders.get(&order_id).map(|o| st.joined(o)))
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let st = self.state.read().await;
        let mut all: Vec<Order> = st
            .orders
            .values()
            .filter(|o| query.status.map_or(true, |s| o.status == s))
            .map(|o| st.joined(o))
            .collect();
        sort_orders_newest_first(&mut all);
        let total = all.len() as i64;
        let orders = all
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();
        Ok(OrderPage { orders, total })
    }

    async fn list_kitchen_orders(&self) -> Result<Vec<Order>> {
        let st = self.state.read().await;
        let visible = kitchen_statuses();
        let mut out: Vec<Order> = st
            .orders
            .values()
            .filter(|o| visible.contains(&o.status))
            .map(|o| st.joined(o))
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(out)
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut st = self.state.write().await;
        let Some(current) = st.orders.get(&order_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !from.contains(&current.status) {
            return Ok(TransitionOutcome::Conflict(st.joined(current)));
        }
        // Mirrors uq_orders_one_unpaid_per_table.
        if to == OrderStatus::Created
            && st.orders.values().any(|o| {
                o.order_id != order_id
                    && o.table_id == current.table_id
                    && o.status == OrderStatus::Created
            })
        {
            return Ok(TransitionOutcome::Conflict(st.joined(current)));
        }
        let Some(o) = st.orders.get_mut(&order_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        o.status = to;
        if let Some(pid) = patch.payment_id {
            o.payment_id = Some(pid);
        }
        if let Some(m) = patch.payment_method {
            o.payment_method = m;
        }
        o.updated_at = now;
        let updated = o.clone();
        Ok(TransitionOutcome::Applied(st.joined(&updated)))
    }

    async fn cancel_abandoned_orders(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut st = self.state.write().await;
        let mut ids = Vec::new();
        for o in st.orders.values_mut() {
            if o.status == OrderStatus::Created && o.created_at < cutoff {
                o.status = OrderStatus::Cancelled;
                o.updated_at = now;
                ids.push(o.order_id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn sales_summary(&self, top_n: usize) -> Result<SalesSummary> {
        let st = self.state.read().await;
        let revenue = revenue_statuses();
        let counted: Vec<&Order> = st
            .orders
            .values()
            .filter(|o| revenue.contains(&o.status))
            .collect();

        let total_orders = counted.len() as i64;
        let total_revenue_minor: i64 = counted.iter().map(|o| o.total_minor).sum();

        let mut by_item: HashMap<Uuid, TopItem> = HashMap::new();
        for line in counted.iter().flat_map(|o| o.items.iter()) {
            let e = by_item.entry(line.menu_item_id).or_insert_with(|| TopItem {
                menu_item_id: line.menu_item_id,
                name: line.name.clone(),
                total_quantity: 0,
                total_revenue_minor: 0,
            });
            e.total_quantity += i64::from(line.quantity);
            e.total_revenue_minor += line.line_total_minor();
        }
        let mut top_items: Vec<TopItem> = by_item.into_values().collect();
        top_items.sort_by(|a, b| {
            b.total_quantity
                .cmp(&a.total_quantity)
                .then_with(|| a.name.cmp(&b.name))
        });
        top_items.truncate(top_n);

        Ok(SalesSummary {
            total_orders,
            total_revenue_minor,
            avg_order_value_minor: avg_half_up(total_revenue_minor, total_orders),
            top_items,
        })
    }

    // --- payments ---

    async fn insert_pending_payment(&self, payment: &Payment) -> Result<InsertPaymentOutcome> {
        let mut st = self.state.write().await;
        if let Some(existing) = st
            .payments
            .values()
            .find(|p| p.order_id == payment.order_id && p.status == PaymentStatus::Pending)
        {
            return Ok(InsertPaymentOutcome::Existing(existing.clone()));
        }
        st.payments.insert(payment.payment_id, payment.clone());
        Ok(InsertPaymentOutcome::Created(payment.clone()))
    }

    async fn find_pending_payment(&self, order_id: Uuid) -> Result<Option<Payment>> {
        let st = self.state.read().await;
        Ok(st
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.status == PaymentStatus::Pending)
            .cloned())
    }

    async fn fetch_payment_by_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>> {
        let st = self.state.read().await;
        Ok(st
            .payments
            .values()
            .filter(|p| p.gateway_order_id == gateway_order_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn mark_payment_succeeded(
        &self,
        payment_id: Uuid,
        gateway_payment_id: &str,
        gateway_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let mut st = self.state.write().await;
        Ok(st.payments.get_mut(&payment_id).map(|p| {
            if p.status != PaymentStatus::Success {
                p.status = PaymentStatus::Success;
                p.gateway_payment_id = Some(gateway_payment_id.to_string());
                p.gateway_signature = gateway_signature.map(str::to_string);
                p.updated_at = now;
            }
            p.clone()
        }))
    }

    async fn mark_payment_failed(
        &self,
        payment_id: Uuid,
        gateway_payment_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let mut st = self.state.write().await;
        Ok(st.payments.get_mut(&payment_id).map(|p| {
            if p.status == PaymentStatus::Pending {
                p.status = PaymentStatus::Failed;
                if let Some(id) = gateway_payment_id {
                    p.gateway_payment_id = Some(id.to_string());
                }
                p.updated_at = now;
            }
            p.clone()
        }))
    }

    // --- users ---

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let st = self.state.read().await;
        Ok(st.users.values().find(|u| u.email == email).cloned())
    }

    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<InsertUserOutcome> {
        let mut st = self.state.write().await;
        if st.users.values().any(|u| u.email == user.email) {
            return Ok(InsertUserOutcome::EmailTaken);
        }
        st.users.insert(user.user_id, user.clone());
        Ok(InsertUserOutcome::Created(user.clone()))
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.state.read().await.users.len() as i64)
    }
}
