//! Gateway webhook decoding.
//!
//! Only the fields needed to settle a payment are read:
//!
//! ```json
//! { "event": "payment.captured",
//!   "payload": { "payment": { "entity": { "id": "pay_..", "order_id": "order_.." } },
//!                "order":   { "entity": { "id": "order_.." } } } }
//! ```
//!
//! The signature must be verified on the raw body before calling
//! [`parse_event`].

use serde::Deserialize;

use crate::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentCaptured {
        gateway_order_id: String,
        gateway_payment_id: String,
    },
    OrderPaid {
        gateway_order_id: String,
        gateway_payment_id: Option<String>,
    },
    PaymentFailed {
        gateway_order_id: String,
        gateway_payment_id: String,
    },
    Ignored {
        event: String,
    },
}

impl WebhookEvent {
    /// `(gateway_order_id, gateway_payment_id)` when the event confirms a payment.
    pub fn confirmation(&self) -> Option<(&str, Option<&str>)> {
        match self {
            WebhookEvent::PaymentCaptured {
                gateway_order_id,
                gateway_payment_id,
            } => Some((gateway_order_id.as_str(), Some(gateway_payment_id.as_str()))),
            WebhookEvent::OrderPaid {
                gateway_order_id,
                gateway_payment_id,
            } => Some((gateway_order_id.as_str(), gateway_payment_id.as_deref())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    payment: Option<Wrapped<PaymentEntity>>,
    order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
}

fn missing(event: &str, what: &str) -> GatewayError {
    GatewayError::Decode(format!("{event}: missing {what}"))
}

pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, GatewayError> {
    let env: Envelope =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let payment = env.payload.payment.map(|w| w.entity);
    let order = env.payload.order.map(|w| w.entity);

    match env.event.as_str() {
        "payment.captured" | "payment.failed" => {
            let p = payment.ok_or_else(|| missing(&env.event, "payment entity"))?;
            let gateway_order_id = p
                .order_id
                .or(order.map(|o| o.id))
                .ok_or_else(|| missing(&env.event, "order id"))?;
            if env.event == "payment.captured" {
                Ok(WebhookEvent::PaymentCaptured {
                    gateway_order_id,
                    gateway_payment_id: p.id,
                })
            } else {
                Ok(WebhookEvent::PaymentFailed {
                    gateway_order_id,
                    gateway_payment_id: p.id,
                })
            }
        }
        "order.paid" => {
            let gateway_order_id = order
                .map(|o| o.id)
                .or_else(|| payment.as_ref().and_then(|p| p.order_id.clone()))
                .ok_or_else(|| missing(&env.event, "order entity"))?;
            Ok(WebhookEvent::OrderPaid {
                gateway_order_id,
                gateway_payment_id: payment.map(|p| p.id),
            })
        }
        _ => Ok(WebhookEvent::Ignored { event: env.event }),
    }
}
