//! servex-payments
//!
//! Boundary to the online payment gateway.
//!
//! The daemon only talks to [`PaymentGateway`]. Two implementations exist:
//! - [`RazorpayGateway`]: HTTP adapter for the hosted checkout.
//! - [`PaperGateway`]: deterministic, offline; used in dev and tests.
//!
//! Checkout proofs and webhook bodies are authenticated with HMAC-SHA256
//! (see [`signature`]). Secrets are passed in by the caller and never logged.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use servex_config::{secrets::ResolvedSecrets, GatewayKind, PaymentsConfig};

mod paper;
mod razorpay;
pub mod signature;
pub mod webhook;

pub use paper::PaperGateway;
pub use razorpay::RazorpayGateway;
pub use webhook::{parse_event, WebhookEvent};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request to open one checkout attempt at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGatewayOrder {
    pub amount_minor: i64,
    pub currency: String,
    /// Our order id; echoed back by the gateway as the receipt.
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// What the browser checkout hands back after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutProof {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum GatewayError {
    /// Network or transport failure.
    Transport(String),
    /// The gateway answered with a non-success status.
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// A response payload could not be decoded.
    Decode(String),
    /// The request was rejected before reaching the gateway.
    InvalidRequest(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "gateway transport error: {msg}"),
            GatewayError::Api {
                status,
                code: Some(code),
                message,
            } => write!(f, "gateway api error status={status} code={code}: {message}"),
            GatewayError::Api {
                status,
                code: None,
                message,
            } => write!(f, "gateway api error status={status}: {message}"),
            GatewayError::Decode(msg) => write!(f, "gateway decode error: {msg}"),
            GatewayError::InvalidRequest(msg) => write!(f, "gateway request rejected: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Stored on payment rows (`razorpay`, `paper`).
    fn name(&self) -> &'static str;

    /// Public checkout key handed to browsers.
    fn public_key_id(&self) -> &str;

    async fn create_order(&self, req: CreateGatewayOrder) -> Result<GatewayOrder, GatewayError>;

    /// Check the signature the checkout returned for a payment.
    fn verify_checkout(&self, proof: &CheckoutProof) -> bool;

    /// Check a webhook delivery against its signature header.
    /// Returns `false` when no webhook secret is configured.
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;
}

fn check_order_request(req: &CreateGatewayOrder) -> Result<(), GatewayError> {
    if req.amount_minor <= 0 {
        return Err(GatewayError::InvalidRequest(format!(
            "amount_minor must be positive, got {}",
            req.amount_minor
        )));
    }
    if req.receipt.is_empty() || req.receipt.len() > 40 {
        return Err(GatewayError::InvalidRequest(
            "receipt must be 1..=40 characters".to_string(),
        ));
    }
    Ok(())
}

/// Build the configured gateway.
///
/// The paper gateway signs with the configured key secret when present and
/// falls back to the JWT secret, so a dev setup needs no gateway credentials.
pub fn build_gateway(
    cfg: &PaymentsConfig,
    secrets: &ResolvedSecrets,
) -> Result<Arc<dyn PaymentGateway>> {
    match cfg.gateway {
        GatewayKind::Razorpay => {
            let key_id = secrets
                .gateway_key_id
                .clone()
                .ok_or_else(|| anyhow!("razorpay gateway requires a key id"))?;
            let key_secret = secrets
                .gateway_key_secret
                .clone()
                .ok_or_else(|| anyhow!("razorpay gateway requires a key secret"))?;
            if secrets.gateway_webhook_secret.is_none() {
                tracing::warn!("no webhook secret configured; webhook deliveries will be refused");
            }
            Ok(Arc::new(RazorpayGateway::new_with_base_url(
                key_id,
                key_secret,
                secrets.gateway_webhook_secret.clone(),
                cfg.api_base_url.clone(),
            )))
        }
        GatewayKind::Paper => {
            let secret = secrets
                .gateway_key_secret
                .clone()
                .unwrap_or_else(|| secrets.jwt_secret.clone());
            Ok(Arc::new(PaperGateway::new(secret)))
        }
    }
}
