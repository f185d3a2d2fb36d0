//! `/api/payments`: checkout, confirmation, cash and gateway webhooks.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use servex_schemas::OrderStatus;

use crate::{
    api_types::{
        OrderIdRequest, OrderResponse, PaymentIntent, PaymentKeyResponse, VerifyPaymentRequest,
        WebhookAck,
    },
    error::{ApiJson, ApiResult},
    rate_limit::{ClientIp, LimitClass},
    state::AppState,
    workflow,
};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/payments/key", get(key))
        .route("/api/payments/create", post(create))
        .route("/api/payments/verify", post(verify))
        .route("/api/payments/cash", post(cash))
}

/// Gateway deliveries arrive from a few shared addresses, so this route is
/// mounted outside the per-client `api` limit.
pub(crate) fn webhook_router() -> Router<Arc<AppState>> {
    Router::new().route("/api/payments/webhook", post(webhook))
}

pub(crate) async fn key(State(st): State<Arc<AppState>>) -> Json<PaymentKeyResponse> {
    Json(PaymentKeyResponse {
        key_id: st.gateway.public_key_id().to_string(),
        gateway: st.gateway.name().to_string(),
    })
}

pub(crate) async fn create(
    State(st): State<Arc<AppState>>,
    client: ClientIp,
    ApiJson(req): ApiJson<OrderIdRequest>,
) -> ApiResult<Json<PaymentIntent>> {
    st.limiter.check(LimitClass::Payments, &client).await?;
    Ok(Json(
        workflow::create_payment(&st, req.order_id, Utc::now()).await?,
    ))
}

pub(crate) async fn verify(
    State(st): State<Arc<AppState>>,
    ApiJson(req): ApiJson<VerifyPaymentRequest>,
) -> ApiResult<Json<OrderResponse>> {
    let order = workflow::verify_payment(&st, req, Utc::now()).await?;
    Ok(Json(OrderResponse {
        message: "payment verified".to_string(),
        order,
    }))
}

pub(crate) async fn cash(
    State(st): State<Arc<AppState>>,
    ApiJson(req): ApiJson<OrderIdRequest>,
) -> ApiResult<Json<OrderResponse>> {
    let order = workflow::pay_cash(&st, req.order_id, Utc::now()).await?;
    let message = if order.status == OrderStatus::Paid {
        "order confirmed for cash payment"
    } else {
        "cash payment awaiting staff confirmation"
    };
    Ok(Json(OrderResponse {
        message: message.to_string(),
        order,
    }))
}

/// The signature covers the raw bytes, so the body is taken unparsed.
pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = workflow::handle_webhook(&st, &body, signature, Utc::now()).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str().to_string(),
    }))
}
