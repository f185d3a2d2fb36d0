//! Shared runtime state for servex-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The store and the
//! payment gateway sit behind trait objects so tests can swap in
//! `MemStore` and `PaperGateway`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use servex_config::ServiceConfig;
use servex_db::Store;
use servex_ordering::TableAttemptLimiter;
use servex_payments::PaymentGateway;
use servex_schemas::{Order, OrderStatus};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::{auth::JwtKeys, rate_limit::RateLimiter, workflow};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    /// An order reached PAID; kitchen room only.
    OrderNew { order: Order },
    /// Kitchen room and the room of `order_id`.
    StatusUpdate { order_id: Uuid, status: OrderStatus },
}

impl BusMsg {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::OrderNew { .. } => "order_new",
            BusMsg::StatusUpdate { .. } => "status_update",
        }
    }

    /// Whether a subscriber to one order's room should see this message.
    pub fn visible_to_order(&self, order_id: Uuid) -> bool {
        match self {
            BusMsg::Heartbeat { .. } => true,
            BusMsg::OrderNew { .. } => false,
            BusMsg::StatusUpdate { order_id: id, .. } => *id == order_id,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub config: ServiceConfig,
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub jwt: JwtKeys,
    /// Per-client request buckets (api, orders, auth, payments).
    pub limiter: RateLimiter,
    /// Per-table order attempt windows.
    pub table_attempts: Mutex<TableAttemptLimiter>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        jwt_secret: &str,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let attempts = config.orders.table_attempts;

        Self {
            bus,
            build: BuildInfo {
                service: "servex-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            jwt: JwtKeys::new(jwt_secret, config.auth.token_ttl_hours),
            limiter: RateLimiter::new(config.rate_limits.clone()),
            table_attempts: Mutex::new(TableAttemptLimiter::new(
                attempts.max,
                attempts.window_secs,
            )),
            config,
            store,
            gateway,
        }
    }

    /// Fan a message out to every subscriber. No subscribers is not an error.
    pub fn publish(&self, msg: BusMsg) {
        let _ = self.bus.send(msg);
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn the cleanup job. The first tick fires immediately, so one pass runs
/// at boot; afterwards every `orders.cleanup_interval_secs`.
pub fn spawn_cleanup(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.orders.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match workflow::run_cleanup(&state, chrono::Utc::now()).await {
                Ok(report) if report.is_empty() => {}
                Ok(report) => tracing::info!(
                    expired_sessions = report.expired_sessions,
                    cancelled_orders = report.cancelled_orders.len(),
                    "cleanup pass"
                ),
                Err(err) => tracing::error!(error = ?err, "cleanup pass failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_messages_are_tagged_snake_case() {
        let id = Uuid::nil();
        let v = serde_json::to_value(BusMsg::StatusUpdate {
            order_id: id,
            status: OrderStatus::Preparing,
        })
        .unwrap();
        assert_eq!(v["type"], "status_update");
        assert_eq!(v["status"], "PREPARING");

        let hb = serde_json::to_value(BusMsg::Heartbeat { ts_millis: 7 }).unwrap();
        assert_eq!(hb["type"], "heartbeat");
    }

    #[test]
    fn order_room_sees_only_its_own_updates() {
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let update = |order_id| BusMsg::StatusUpdate {
            order_id,
            status: OrderStatus::Ready,
        };
        assert!(update(mine).visible_to_order(mine));
        assert!(!update(other).visible_to_order(mine));
        assert!(BusMsg::Heartbeat { ts_millis: 0 }.visible_to_order(mine));
    }
}
