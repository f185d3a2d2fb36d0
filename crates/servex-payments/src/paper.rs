use crate::{
    check_order_request, signature, CheckoutProof, CreateGatewayOrder, GatewayError, GatewayOrder,
    PaymentGateway,
};

pub const PAPER_KEY_ID: &str = "paper_key";

/// Offline gateway with deterministic ids.
///
/// `create_order` never touches the network and returns
/// `paper_order_{receipt}`, so retries for the same order yield the same id.
/// Checkout and webhook signatures use the same secret.
#[derive(Clone)]
pub struct PaperGateway {
    secret: String,
}

impl std::fmt::Debug for PaperGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperGateway").finish_non_exhaustive()
    }
}

impl PaperGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn gateway_order_id(receipt: &str) -> String {
        format!("paper_order_{receipt}")
    }

    /// Produce the signature a real checkout would return.
    pub fn sign_checkout(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        signature::sign_checkout(&self.secret, gateway_order_id, gateway_payment_id)
    }

    pub fn sign_webhook(&self, body: &[u8]) -> String {
        signature::sign(&self.secret, body)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for PaperGateway {
    fn name(&self) -> &'static str {
        "paper"
    }

    fn public_key_id(&self) -> &str {
        PAPER_KEY_ID
    }

    async fn create_order(&self, req: CreateGatewayOrder) -> Result<GatewayOrder, GatewayError> {
        check_order_request(&req)?;
        Ok(GatewayOrder {
            id: Self::gateway_order_id(&req.receipt),
            amount_minor: req.amount_minor,
            currency: req.currency,
        })
    }

    fn verify_checkout(&self, proof: &CheckoutProof) -> bool {
        signature::verify_checkout(
            &self.secret,
            &proof.gateway_order_id,
            &proof.gateway_payment_id,
            &proof.signature,
        )
    }

    fn verify_webhook(&self, body: &[u8], signature_hex: &str) -> bool {
        signature::verify(&self.secret, body, signature_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(receipt: &str) -> CreateGatewayOrder {
        CreateGatewayOrder {
            amount_minor: 68_200,
            currency: "INR".to_string(),
            receipt: receipt.to_string(),
        }
    }

    #[tokio::test]
    async fn order_ids_are_deterministic() {
        let gw = PaperGateway::new("paper-secret");
        let a = gw.create_order(req("ord-1")).await.unwrap();
        let b = gw.create_order(req("ord-1")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, "paper_order_ord-1");
        assert_eq!(a.amount_minor, 68_200);
    }

    #[test]
    fn signed_checkout_verifies() {
        let gw = PaperGateway::new("paper-secret");
        let proof = CheckoutProof {
            gateway_order_id: "paper_order_ord-1".to_string(),
            gateway_payment_id: "pay_1".to_string(),
            signature: gw.sign_checkout("paper_order_ord-1", "pay_1"),
        };
        assert!(gw.verify_checkout(&proof));

        let other = PaperGateway::new("different");
        assert!(!other.verify_checkout(&proof));
    }

    #[test]
    fn signed_webhook_verifies() {
        let gw = PaperGateway::new("paper-secret");
        let body = br#"{"event":"payment.captured"}"#;
        assert!(gw.verify_webhook(body, &gw.sign_webhook(body)));
        assert!(!gw.verify_webhook(b"tampered", &gw.sign_webhook(body)));
    }
}
