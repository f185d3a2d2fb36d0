//! Order, session and payment workflow.
//!
//! Every function takes `now` so behaviour is reproducible in tests. Store
//! writes that guard an invariant are compare-and-set (`transition_order`,
//! `insert_order`, `insert_pending_payment`); a lost race is reported, never
//! overwritten.
//!
//! Fan-out rules:
//! - an order reaching PAID is announced to the kitchen (`order_new`) and
//!   to its own room (`status_update`);
//! - every other status change is a `status_update`;
//! - repeating an already applied confirmation publishes nothing.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use servex_db::{InsertOrderOutcome, InsertPaymentOutcome, OrderPatch, TransitionOutcome};
use servex_ordering::{
    check_transition, quote, sanitize_contact, sanitize_lines, session, staff_settable, CartError,
    PricingError, Transition, TransitionError,
};
use servex_payments::{parse_event, CheckoutProof, CreateGatewayOrder, GatewayError, WebhookEvent};
use servex_schemas::{
    DiningTable, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus, SessionStatus,
    TableSession,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{PaymentIntent, PlaceOrderRequest, VerifyPaymentRequest},
    error::ApiError,
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum WorkflowError {
    TableNotFound,
    /// Unknown or inactive table named by an order.
    TableUnavailable,
    SessionRequired,
    SessionInvalid,
    TooManyAttempts,
    /// The table already has an order waiting for payment.
    UnpaidOrderExists(Uuid),
    Cart(CartError),
    Pricing(PricingError),
    OrderNotFound,
    /// Payment actions need a CREATED order.
    NotAwaitingPayment(OrderStatus),
    /// A zero total cannot go through the online gateway.
    NothingToPay,
    /// The order moved on before this payment could settle it.
    OrderConflict(OrderStatus),
    BadSignature,
    InvalidWebhook(String),
    PaymentNotFound,
    PaymentOrderMismatch,
    StatusNotSettable(OrderStatus),
    IllegalTransition(TransitionError),
    Gateway(GatewayError),
    Internal(anyhow::Error),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::TableNotFound => f.write_str("table not found"),
            WorkflowError::TableUnavailable => f.write_str("invalid or inactive table"),
            WorkflowError::SessionRequired => {
                f.write_str("session token required; please scan the QR code again")
            }
            WorkflowError::SessionInvalid => {
                f.write_str("session expired or invalid; please scan the QR code again")
            }
            WorkflowError::TooManyAttempts => {
                f.write_str("too many order attempts; please wait before trying again")
            }
            WorkflowError::UnpaidOrderExists(_) => {
                f.write_str("this table has a pending order; please complete payment first")
            }
            WorkflowError::Cart(err) => write!(f, "{err}"),
            WorkflowError::Pricing(err) => write!(f, "{err}"),
            WorkflowError::OrderNotFound => f.write_str("order not found"),
            WorkflowError::NotAwaitingPayment(status) => {
                write!(f, "order is not awaiting payment (status {status})")
            }
            WorkflowError::NothingToPay => {
                f.write_str("order total is zero; nothing to pay online, use cash")
            }
            WorkflowError::OrderConflict(status) => {
                write!(f, "order can no longer be paid (status {status})")
            }
            WorkflowError::BadSignature => f.write_str("invalid signature"),
            WorkflowError::InvalidWebhook(msg) => write!(f, "invalid webhook payload: {msg}"),
            WorkflowError::PaymentNotFound => f.write_str("payment not found"),
            WorkflowError::PaymentOrderMismatch => {
                f.write_str("payment does not belong to this order")
            }
            WorkflowError::StatusNotSettable(status) => {
                write!(f, "status {status} cannot be set by staff")
            }
            WorkflowError::IllegalTransition(err) => write!(f, "{err}"),
            WorkflowError::Gateway(err) => write!(f, "{err}"),
            WorkflowError::Internal(err) => write!(f, "internal error: {err:#}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        WorkflowError::Internal(err)
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::TableUnavailable
            | WorkflowError::Cart(_)
            | WorkflowError::Pricing(_)
            | WorkflowError::NotAwaitingPayment(_)
            | WorkflowError::NothingToPay
            | WorkflowError::BadSignature
            | WorkflowError::InvalidWebhook(_)
            | WorkflowError::PaymentOrderMismatch
            | WorkflowError::StatusNotSettable(_) => ApiError::bad_request(message),
            WorkflowError::SessionRequired | WorkflowError::SessionInvalid => {
                ApiError::unauthorized(message)
            }
            WorkflowError::TooManyAttempts => ApiError::too_many_requests(message),
            WorkflowError::UnpaidOrderExists(order_id) => {
                ApiError::conflict(message).with_field("order_id", order_id.to_string())
            }
            WorkflowError::OrderConflict(_) | WorkflowError::IllegalTransition(_) => {
                ApiError::conflict(message)
            }
            WorkflowError::TableNotFound
            | WorkflowError::OrderNotFound
            | WorkflowError::PaymentNotFound => ApiError::not_found(message),
            WorkflowError::Gateway(err) => {
                warn!(error = %err, "payment gateway call failed");
                ApiError::bad_gateway("payment gateway unavailable")
            }
            WorkflowError::Internal(err) => ApiError::from(err),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

// ---------------------------------------------------------------------------
// Table sessions
// ---------------------------------------------------------------------------

/// QR scan: rotate the table's session token.
pub async fn open_session(
    st: &AppState,
    table_id: Uuid,
    now: DateTime<Utc>,
) -> WorkflowResult<(DiningTable, TableSession)> {
    let Some(table) = st.store.fetch_table(table_id).await? else {
        return Err(WorkflowError::TableNotFound);
    };
    if !table.is_active {
        return Err(WorkflowError::TableUnavailable);
    }
    let token = session::new_session_token();
    let expires_at = session::expiry_from(now, st.config.sessions.ttl_minutes);
    let sess = st
        .store
        .upsert_session(table_id, &token, expires_at, now)
        .await?;
    info!(table_id = %table_id, table_number = table.table_number, "table session issued");
    Ok((table, sess))
}

/// Check a diner's token and push its expiry out.
pub async fn refresh_session(
    st: &AppState,
    table_id: Uuid,
    token: Option<&str>,
    now: DateTime<Utc>,
) -> WorkflowResult<TableSession> {
    let token = token.map(str::trim).unwrap_or_default();
    if token.is_empty() {
        return Err(WorkflowError::SessionRequired);
    }
    let Some(sess) = st.store.find_usable_session(table_id, token, now).await? else {
        return Err(WorkflowError::SessionInvalid);
    };
    let expires_at = session::expiry_from(now, st.config.sessions.ttl_minutes);
    st.store
        .touch_session(sess.session_id, expires_at, now)
        .await?
        .ok_or(WorkflowError::SessionInvalid)
}

// ---------------------------------------------------------------------------
// Order placement
// ---------------------------------------------------------------------------

pub async fn place_order(
    st: &AppState,
    req: PlaceOrderRequest,
    now: DateTime<Utc>,
) -> WorkflowResult<Order> {
    let table = match st.store.fetch_table(req.table_id).await? {
        Some(t) if t.is_active => t,
        _ => return Err(WorkflowError::TableUnavailable),
    };

    let token = req
        .session_token
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(WorkflowError::SessionRequired);
    }
    let Some(sess) = st
        .store
        .find_usable_session(table.table_id, token, now)
        .await?
    else {
        return Err(WorkflowError::SessionInvalid);
    };

    if !st.table_attempts.lock().await.check(table.table_id, now) {
        warn!(table_id = %table.table_id, "order attempts exhausted for table");
        return Err(WorkflowError::TooManyAttempts);
    }

    if let Some(existing) = st.store.find_unpaid_order(table.table_id).await? {
        return Err(WorkflowError::UnpaidOrderExists(existing));
    }

    let ids: Vec<Uuid> = req.items.iter().map(|l| l.menu_item_id).collect();
    let catalog = st.store.fetch_menu_items(&ids).await?;
    let lines = sanitize_lines(&req.items, &catalog, st.config.orders.max_lines)
        .map_err(WorkflowError::Cart)?;
    let totals = quote(&lines, &st.config.pricing).map_err(WorkflowError::Pricing)?;
    let (customer_name, customer_phone) =
        sanitize_contact(req.customer_name.as_deref(), req.customer_phone.as_deref());

    let order = Order {
        order_id: Uuid::new_v4(),
        table_id: table.table_id,
        table_number: Some(table.table_number),
        items: lines,
        subtotal_minor: totals.subtotal_minor,
        tax_minor: totals.tax_minor,
        service_charge_minor: totals.service_charge_minor,
        total_minor: totals.total_minor,
        currency: totals.currency,
        status: OrderStatus::Created,
        payment_id: None,
        payment_method: PaymentMethod::Online,
        session_token: sess.session_token.clone(),
        customer_name,
        customer_phone,
        created_at: now,
        updated_at: now,
    };

    let order = match st.store.insert_order(&order).await? {
        InsertOrderOutcome::Created(order) => order,
        InsertOrderOutcome::UnpaidExists(existing) => {
            return Err(WorkflowError::UnpaidOrderExists(existing));
        }
    };

    let expires_at = session::expiry_from(now, st.config.sessions.ttl_minutes);
    st.store
        .touch_session(sess.session_id, expires_at, now)
        .await?;

    info!(
        order_id = %order.order_id,
        table_number = table.table_number,
        total_minor = order.total_minor,
        lines = order.items.len(),
        "order placed"
    );
    Ok(order)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

async fn order_awaiting_payment(st: &AppState, order_id: Uuid) -> WorkflowResult<Order> {
    let Some(order) = st.store.fetch_order(order_id).await? else {
        return Err(WorkflowError::OrderNotFound);
    };
    if order.status != OrderStatus::Created {
        return Err(WorkflowError::NotAwaitingPayment(order.status));
    }
    Ok(order)
}

fn intent_for(st: &AppState, payment: &Payment) -> PaymentIntent {
    PaymentIntent {
        gateway_order_id: payment.gateway_order_id.clone(),
        amount_minor: payment.amount_minor,
        currency: payment.currency.clone(),
        key_id: st.gateway.public_key_id().to_string(),
    }
}

/// Open (or reuse) the checkout attempt for an unpaid order.
pub async fn create_payment(
    st: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> WorkflowResult<PaymentIntent> {
    let order = order_awaiting_payment(st, order_id).await?;

    if let Some(pending) = st.store.find_pending_payment(order_id).await? {
        info!(order_id = %order_id, gateway_order_id = %pending.gateway_order_id, "reusing pending payment");
        return Ok(intent_for(st, &pending));
    }
    if order.total_minor <= 0 {
        return Err(WorkflowError::NothingToPay);
    }

    let gw_order = st
        .gateway
        .create_order(CreateGatewayOrder {
            amount_minor: order.total_minor,
            currency: order.currency.clone(),
            receipt: order.order_id.to_string(),
        })
        .await
        .map_err(WorkflowError::Gateway)?;

    let payment = Payment {
        payment_id: Uuid::new_v4(),
        order_id,
        gateway: st.gateway.name().to_string(),
        gateway_order_id: gw_order.id,
        gateway_payment_id: None,
        gateway_signature: None,
        amount_minor: order.total_minor,
        currency: order.currency,
        status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let payment = match st.store.insert_pending_payment(&payment).await? {
        InsertPaymentOutcome::Created(p) => {
            info!(order_id = %order_id, gateway_order_id = %p.gateway_order_id, "payment opened");
            p
        }
        InsertPaymentOutcome::Existing(p) => p,
    };
    Ok(intent_for(st, &payment))
}

fn announce_paid(st: &AppState, order: &Order) {
    st.publish(BusMsg::OrderNew {
        order: order.clone(),
    });
    st.publish(BusMsg::StatusUpdate {
        order_id: order.order_id,
        status: OrderStatus::Paid,
    });
}

/// Settle `payment` and move its order CREATED -> PAID.
///
/// An order already paid by this same payment is returned as is.
async fn confirm_payment(
    st: &AppState,
    payment: &Payment,
    gateway_payment_id: &str,
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> WorkflowResult<Order> {
    st.store
        .mark_payment_succeeded(payment.payment_id, gateway_payment_id, signature, now)
        .await?
        .ok_or(WorkflowError::PaymentNotFound)?;

    let patch = OrderPatch {
        payment_id: Some(payment.payment_id),
        payment_method: Some(PaymentMethod::Online),
    };
    match st
        .store
        .transition_order(
            payment.order_id,
            &[OrderStatus::Created],
            OrderStatus::Paid,
            &patch,
            now,
        )
        .await?
    {
        TransitionOutcome::Applied(order) => {
            info!(order_id = %order.order_id, payment_id = %payment.payment_id, "order paid online");
            announce_paid(st, &order);
            Ok(order)
        }
        TransitionOutcome::Conflict(order) if order.payment_id == Some(payment.payment_id) => {
            Ok(order)
        }
        TransitionOutcome::Conflict(order) => {
            warn!(
                order_id = %order.order_id,
                status = %order.status,
                payment_id = %payment.payment_id,
                "payment captured for an order that can no longer be paid"
            );
            Err(WorkflowError::OrderConflict(order.status))
        }
        TransitionOutcome::NotFound => Err(WorkflowError::OrderNotFound),
    }
}

/// Browser callback after a hosted checkout.
pub async fn verify_payment(
    st: &AppState,
    req: VerifyPaymentRequest,
    now: DateTime<Utc>,
) -> WorkflowResult<Order> {
    let proof = CheckoutProof {
        gateway_order_id: req.gateway_order_id.clone(),
        gateway_payment_id: req.gateway_payment_id.clone(),
        signature: req.signature.clone(),
    };
    if !st.gateway.verify_checkout(&proof) {
        warn!(order_id = %req.order_id, "checkout signature mismatch");
        return Err(WorkflowError::BadSignature);
    }

    let Some(payment) = st
        .store
        .fetch_payment_by_gateway_order(&req.gateway_order_id)
        .await?
    else {
        return Err(WorkflowError::PaymentNotFound);
    };
    if payment.order_id != req.order_id {
        return Err(WorkflowError::PaymentOrderMismatch);
    }

    confirm_payment(
        st,
        &payment,
        &req.gateway_payment_id,
        Some(&req.signature),
        now,
    )
    .await
}

/// Diner chose to pay at the counter.
pub async fn pay_cash(st: &AppState, order_id: Uuid, now: DateTime<Utc>) -> WorkflowResult<Order> {
    order_awaiting_payment(st, order_id).await?;

    let target = if st.config.orders.cash_requires_confirmation {
        OrderStatus::PendingCash
    } else {
        OrderStatus::Paid
    };
    let patch = OrderPatch {
        payment_id: None,
        payment_method: Some(PaymentMethod::Cash),
    };
    match st
        .store
        .transition_order(order_id, &[OrderStatus::Created], target, &patch, now)
        .await?
    {
        TransitionOutcome::Applied(order) => {
            info!(order_id = %order_id, status = %order.status, "cash payment selected");
            if order.status == OrderStatus::Paid {
                announce_paid(st, &order);
            } else {
                st.publish(BusMsg::StatusUpdate {
                    order_id,
                    status: order.status,
                });
            }
            Ok(order)
        }
        TransitionOutcome::Conflict(order) => Err(WorkflowError::NotAwaitingPayment(order.status)),
        TransitionOutcome::NotFound => Err(WorkflowError::OrderNotFound),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Confirmed(Uuid),
    Failed(Uuid),
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Confirmed(_) => "confirmed",
            WebhookOutcome::Failed(_) => "failed",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Server-to-server delivery from the gateway. Only a bad signature or an
/// undecodable body is an error; anything else is acknowledged so the
/// gateway stops retrying.
pub async fn handle_webhook(
    st: &AppState,
    body: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> WorkflowResult<WebhookOutcome> {
    let Some(sig) = signature.filter(|s| !s.trim().is_empty()) else {
        return Err(WorkflowError::BadSignature);
    };
    if !st.gateway.verify_webhook(body, sig) {
        warn!("webhook signature mismatch");
        return Err(WorkflowError::BadSignature);
    }
    let event = parse_event(body).map_err(|e| WorkflowError::InvalidWebhook(e.to_string()))?;

    if let Some((gateway_order_id, gateway_payment_id)) = event.confirmation() {
        let Some(payment) = st
            .store
            .fetch_payment_by_gateway_order(gateway_order_id)
            .await?
        else {
            warn!(gateway_order_id, "webhook for unknown gateway order");
            return Ok(WebhookOutcome::Ignored);
        };
        // order.paid may omit the payment entity.
        let gateway_payment_id = gateway_payment_id
            .map(str::to_string)
            .or_else(|| payment.gateway_payment_id.clone())
            .unwrap_or_default();
        return match confirm_payment(st, &payment, &gateway_payment_id, None, now).await {
            Ok(order) => Ok(WebhookOutcome::Confirmed(order.order_id)),
            Err(WorkflowError::Internal(err)) => Err(WorkflowError::Internal(err)),
            Err(err) => {
                warn!(gateway_order_id, error = %err, "webhook confirmation not applied");
                Ok(WebhookOutcome::Ignored)
            }
        };
    }

    match event {
        WebhookEvent::PaymentFailed {
            gateway_order_id,
            gateway_payment_id,
        } => {
            let Some(payment) = st
                .store
                .fetch_payment_by_gateway_order(&gateway_order_id)
                .await?
            else {
                warn!(gateway_order_id = %gateway_order_id, "payment.failed for unknown gateway order");
                return Ok(WebhookOutcome::Ignored);
            };
            st.store
                .mark_payment_failed(payment.payment_id, Some(&gateway_payment_id), now)
                .await?;
            info!(order_id = %payment.order_id, gateway_order_id = %gateway_order_id, "payment failed");
            Ok(WebhookOutcome::Failed(payment.payment_id))
        }
        WebhookEvent::Ignored { event } => {
            info!(event = %event, "webhook event ignored");
            Ok(WebhookOutcome::Ignored)
        }
        _ => Ok(WebhookOutcome::Ignored),
    }
}

// ---------------------------------------------------------------------------
// Staff status changes
// ---------------------------------------------------------------------------

pub async fn update_status(
    st: &AppState,
    order_id: Uuid,
    target: OrderStatus,
    now: DateTime<Utc>,
) -> WorkflowResult<Order> {
    if !staff_settable(target) {
        return Err(WorkflowError::StatusNotSettable(target));
    }
    let Some(order) = st.store.fetch_order(order_id).await? else {
        return Err(WorkflowError::OrderNotFound);
    };

    let from = match check_transition(order.status, target) {
        Ok(Transition::Unchanged(_)) => return Ok(order),
        Ok(Transition::Changed { from, .. }) => from,
        Err(err) => return Err(WorkflowError::IllegalTransition(err)),
    };

    let order = match st
        .store
        .transition_order(order_id, &[from], target, &OrderPatch::default(), now)
        .await?
    {
        TransitionOutcome::Applied(order) => order,
        TransitionOutcome::Conflict(current) => {
            return Err(WorkflowError::IllegalTransition(TransitionError {
                from: current.status,
                to: target,
            }));
        }
        TransitionOutcome::NotFound => return Err(WorkflowError::OrderNotFound),
    };

    info!(order_id = %order_id, from = %from, to = %target, "order status changed");
    if target == OrderStatus::Paid {
        announce_paid(st, &order);
    } else {
        st.publish(BusMsg::StatusUpdate {
            order_id,
            status: target,
        });
    }

    if target == OrderStatus::Served {
        let completed = st
            .store
            .set_sessions_status(
                order.table_id,
                Some(SessionStatus::Active),
                SessionStatus::Completed,
            )
            .await?;
        info!(table_id = %order.table_id, completed, "table sessions completed");
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: u64,
    pub cancelled_orders: Vec<Uuid>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.expired_sessions == 0 && self.cancelled_orders.is_empty()
    }
}

/// Expire stale sessions and cancel abandoned unpaid orders.
pub async fn run_cleanup(st: &Arc<AppState>, now: DateTime<Utc>) -> anyhow::Result<CleanupReport> {
    let expired_sessions = st.store.expire_sessions(now).await?;

    let cutoff = now - Duration::minutes(st.config.orders.abandon_after_minutes);
    let cancelled_orders = st.store.cancel_abandoned_orders(cutoff, now).await?;
    for order_id in &cancelled_orders {
        info!(order_id = %order_id, "abandoned order cancelled");
        st.publish(BusMsg::StatusUpdate {
            order_id: *order_id,
            status: OrderStatus::Cancelled,
        });
    }

    st.table_attempts.lock().await.prune(now);
    st.limiter.prune(std::time::Instant::now()).await;

    Ok(CleanupReport {
        expired_sessions,
        cancelled_orders,
    })
}
