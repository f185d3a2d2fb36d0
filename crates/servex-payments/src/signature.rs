//! HMAC-SHA256 signatures in the gateway's format (lower-case hex).
//!
//! - checkout: `hmac(key_secret, "{gateway_order_id}|{gateway_payment_id}")`
//! - webhook:  `hmac(webhook_secret, raw_body)`

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts any key length"),
    }
}

pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. Malformed hex is a mismatch.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn checkout_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{gateway_order_id}|{gateway_payment_id}")
}

pub fn sign_checkout(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    sign(
        secret,
        checkout_payload(gateway_order_id, gateway_payment_id).as_bytes(),
    )
}

pub fn verify_checkout(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature_hex: &str,
) -> bool {
    verify(
        secret,
        checkout_payload(gateway_order_id, gateway_payment_id).as_bytes(),
        signature_hex,
    )
}
