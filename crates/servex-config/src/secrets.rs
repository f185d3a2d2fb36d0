//! Runtime secret resolution.
//!
//! Config stores env var NAMES (e.g. `auth.jwt_secret_env: SERVEX_JWT_SECRET`).
//! [`resolve_secrets`] is called once at startup and the returned
//! [`ResolvedSecrets`] is handed to constructors; nothing else in the
//! workspace reads secret env vars.
//!
//! # Enforcement
//! | Condition                     | Required                              |
//! |-------------------------------|---------------------------------------|
//! | always                        | JWT signing secret                    |
//! | `payments.gateway: razorpay`  | gateway key id, gateway key secret    |
//! | `store.backend: postgres`     | database URL                          |
//!
//! The webhook secret is optional; without it webhook deliveries are refused.
//! Errors name the missing variable, never a value. `Debug` output is redacted.

use anyhow::{bail, Result};

use crate::{GatewayKind, ServiceConfig, StoreBackend};

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub jwt_secret: String,
    /// Public checkout key id. `None` for the paper gateway.
    pub gateway_key_id: Option<String>,
    pub gateway_key_secret: Option<String>,
    pub gateway_webhook_secret: Option<String>,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("jwt_secret", &"<REDACTED>")
            // The key id is shown to browsers anyway.
            .field("gateway_key_id", &self.gateway_key_id)
            .field(
                "gateway_key_secret",
                &self.gateway_key_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "gateway_webhook_secret",
                &self.gateway_webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve a named environment variable; blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets from the process environment.
pub fn resolve_secrets(cfg: &ServiceConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, resolve_env)
}

/// Resolve secrets through an explicit lookup function.
///
/// `lookup` receives env var names and returns the value when present.
pub fn resolve_secrets_with<F>(cfg: &ServiceConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let Some(jwt_secret) = get(&cfg.auth.jwt_secret_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (jwt signing secret) is not set or empty",
            cfg.auth.jwt_secret_env
        );
    };

    let gateway_key_id = get(&cfg.payments.key_id_env);
    let gateway_key_secret = get(&cfg.payments.key_secret_env);
    let gateway_webhook_secret = get(&cfg.payments.webhook_secret_env);

    if cfg.payments.gateway == GatewayKind::Razorpay {
        if gateway_key_id.is_none() {
            bail!(
                "SECRETS_MISSING gateway=razorpay: required env var '{}' (key id) is not set or empty",
                cfg.payments.key_id_env
            );
        }
        if gateway_key_secret.is_none() {
            bail!(
                "SECRETS_MISSING gateway=razorpay: required env var '{}' (key secret) is not set or empty",
                cfg.payments.key_secret_env
            );
        }
    }

    let database_url = get(&cfg.store.database_url_env);
    if cfg.store.backend == StoreBackend::Postgres && database_url.is_none() {
        bail!(
            "SECRETS_MISSING store=postgres: required env var '{}' (database url) is not set or empty",
            cfg.store.database_url_env
        );
    }

    Ok(ResolvedSecrets {
        jwt_secret,
        gateway_key_id,
        gateway_key_secret,
        gateway_webhook_secret,
        database_url,
    })
}
