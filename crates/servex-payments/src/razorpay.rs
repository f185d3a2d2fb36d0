use serde::{Deserialize, Serialize};

use crate::{
    check_order_request, signature, CheckoutProof, CreateGatewayOrder, GatewayError, GatewayOrder,
    PaymentGateway,
};

/// Razorpay Orders API adapter.
///
/// Credentials are read by the caller and passed in; do not log them.
#[derive(Clone)]
pub struct RazorpayGateway {
    key_id: String,
    key_secret: String,
    webhook_secret: Option<String>,
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for RazorpayGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayGateway")
            .field("key_id", &self.key_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String, webhook_secret: Option<String>) -> Self {
        Self::new_with_base_url(
            key_id,
            key_secret,
            webhook_secret,
            "https://api.razorpay.com".to_string(),
        )
    }

    pub fn new_with_base_url(
        key_id: String,
        key_secret: String,
        webhook_secret: Option<String>,
        base_url: String,
    ) -> Self {
        Self {
            key_id,
            key_secret,
            webhook_secret,
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn orders_url(&self) -> String {
        format!("{}/v1/orders", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct OrderNotes<'a> {
    order_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: OrderNotes<'a>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    description: Option<String>,
}

#[async_trait::async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    fn public_key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(&self, req: CreateGatewayOrder) -> Result<GatewayOrder, GatewayError> {
        check_order_request(&req)?;

        let body = CreateOrderBody {
            amount: req.amount_minor,
            currency: &req.currency,
            receipt: &req.receipt,
            notes: OrderNotes {
                order_id: &req.receipt,
            },
        };

        let resp = self
            .http
            .post(self.orders_url())
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&raw) {
                Ok(env) => (
                    env.error.code,
                    env.error
                        .description
                        .unwrap_or_else(|| "no description".to_string()),
                ),
                Err(_) => (None, raw.chars().take(200).collect()),
            };
            tracing::warn!(status = status.as_u16(), code = ?code, "razorpay order create failed");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let order: OrderResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(GatewayOrder {
            id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
        })
    }

    fn verify_checkout(&self, proof: &CheckoutProof) -> bool {
        signature::verify_checkout(
            &self.key_secret,
            &proof.gateway_order_id,
            &proof.gateway_payment_id,
            &proof.signature,
        )
    }

    fn verify_webhook(&self, body: &[u8], signature_hex: &str) -> bool {
        match &self.webhook_secret {
            Some(secret) => signature::verify(secret, body, signature_hex),
            None => false,
        }
    }
}
