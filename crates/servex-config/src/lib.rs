//! servex-config
//!
//! Layered YAML configuration for the ServeX services.
//!
//! - Documents are merged in order: earlier docs are the base, later docs
//!   override (objects merge key by key, everything else is replaced).
//! - Literal secrets are refused. Config stores env var NAMES only; values are
//!   read once at startup by [`secrets::resolve_secrets`].
//! - The merged document is serialized to canonical JSON and hashed so an
//!   operator can tell two deployments apart at a glance.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod secrets;
mod service;

pub use service::{
    AuthConfig, GatewayKind, OrdersConfig, PaymentsConfig, PricingConfig, RateLimitsConfig,
    ServerConfig, ServiceConfig, SessionsConfig, StoreBackend, StoreConfig, WindowLimit,
};

/// Env var holding a comma separated list of config paths (merge order).
pub const ENV_CONFIG_PATHS: &str = "SERVEX_CONFIG";

/// Known secret-like prefixes. A leaf string starting with one of these
/// aborts loading with `CONFIG_SECRET_DETECTED`.
const SECRET_PREFIXES: &[&str] = &[
    "rzp_live_",  // Razorpay live key id
    "rzp_test_",  // Razorpay test key id
    "whsec_",     // webhook signing secrets
    "sk_live",    // Stripe-style live key
    "sk_test",    // Stripe-style test key
    "postgres://", // connection strings carry passwords
    "postgresql://",
    "-----BEGIN", // PEM private keys
    "eyJ",        // serialized JWTs
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document.
    pub fn service(&self) -> Result<ServiceConfig> {
        ServiceConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as "no overrides".
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Load the paths named by `SERVEX_CONFIG`, or fall back to built-in defaults
/// when the variable is unset.
pub fn load_from_env() -> Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            tracing::info!(paths = ?paths, "loading layered config");
            load_layered_yaml(&paths)
        }
        _ => {
            tracing::info!("{ENV_CONFIG_PATHS} not set; using built-in config defaults");
            load_layered_yaml_from_strings(&[])
        }
    }
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is a BTreeMap, so keys serialize sorted.
    let s = serde_json::to_string(v).context("canonical json serialize failed")?;
    Ok(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            // The root itself is addressed by the empty pointer.
            out.push(prefix.to_string());
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_documents_override_earlier_ones() {
        let base = "pricing:\n  tax_bps: 500\n  currency: INR\n";
        let over = "pricing:\n  tax_bps: 1200\n";
        let loaded = load_layered_yaml_from_strings(&[base, over]).unwrap();
        assert_eq!(loaded.config_json["pricing"]["tax_bps"], 1200);
        assert_eq!(loaded.config_json["pricing"]["currency"], "INR");
    }

    #[test]
    fn empty_document_is_no_override() {
        let loaded = load_layered_yaml_from_strings(&["sessions:\n  ttl_minutes: 45\n", ""]).unwrap();
        assert_eq!(loaded.config_json["sessions"]["ttl_minutes"], 45);
    }

    #[test]
    fn short_strings_are_not_secrets() {
        assert!(!looks_like_secret("eyJ"));
        assert!(looks_like_secret("rzp_live_abcdef123"));
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        assert_eq!(escape_pointer_token("a/b~c"), "a~1b~0c");
    }
}
