//! Typed view over the merged config document.
//!
//! Every key has a default so an empty document yields a runnable dev
//! configuration (in-memory store, paper gateway).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One week.
pub const MAX_SESSION_TTL_MINUTES: i64 = 7 * 24 * 60;
/// One week.
pub const MAX_ABANDON_AFTER_MINUTES: i64 = 7 * 24 * 60;
/// One year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 365 * 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub pricing: PricingConfig,
    pub sessions: SessionsConfig,
    pub orders: OrdersConfig,
    pub rate_limits: RateLimitsConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
}

impl ServiceConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: ServiceConfig =
            serde_json::from_value(v.clone()).context("config does not match ServiceConfig")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the workflow misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.pricing.currency.trim().len() != 3 {
            bail!("CONFIG_INVALID pricing.currency must be a 3-letter code");
        }
        if self.pricing.tax_bps > 10_000 || self.pricing.service_charge_bps > 10_000 {
            bail!("CONFIG_INVALID pricing rates are basis points and must be <= 10000");
        }
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.sessions.ttl_minutes) {
            bail!("CONFIG_INVALID sessions.ttl_minutes must be in 1..={MAX_SESSION_TTL_MINUTES}");
        }
        if !(1..=MAX_ABANDON_AFTER_MINUTES).contains(&self.orders.abandon_after_minutes) {
            bail!(
                "CONFIG_INVALID orders.abandon_after_minutes must be in 1..={MAX_ABANDON_AFTER_MINUTES}"
            );
        }
        if self.orders.cleanup_interval_secs == 0 {
            bail!("CONFIG_INVALID orders.cleanup_interval_secs must be > 0");
        }
        if self.orders.max_lines == 0 {
            bail!("CONFIG_INVALID orders.max_lines must be > 0");
        }
        for (name, lim) in [
            ("orders.table_attempts", &self.orders.table_attempts),
            ("rate_limits.api", &self.rate_limits.api),
            ("rate_limits.orders", &self.rate_limits.orders),
            ("rate_limits.auth", &self.rate_limits.auth),
            ("rate_limits.payments", &self.rate_limits.payments),
        ] {
            if lim.max == 0 || lim.window_secs == 0 {
                bail!("CONFIG_INVALID {name} needs max > 0 and window_secs > 0");
            }
        }
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&self.auth.token_ttl_hours) {
            bail!("CONFIG_INVALID auth.token_ttl_hours must be in 1..={MAX_TOKEN_TTL_HOURS}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Browser origin allowed by CORS in addition to localhost dev servers.
    pub frontend_url: Option<String>,
    /// Base URL encoded into table QR codes (`{base}/t/{table_id}`).
    pub public_base_url: String,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            frontend_url: None,
            public_base_url: "http://localhost:5173".to_string(),
            body_limit_bytes: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url_env: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url_env: "SERVEX_DATABASE_URL".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub currency: String,
    /// Tax rate in basis points (500 = 5%).
    pub tax_bps: u32,
    /// Service charge rate in basis points.
    pub service_charge_bps: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tax_bps: 500,
            service_charge_bps: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub ttl_minutes: i64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { ttl_minutes: 30 }
    }
}

/// `max` events per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub max: u32,
    pub window_secs: u64,
}

impl WindowLimit {
    pub const fn new(max: u32, window_secs: u64) -> Self {
        Self { max, window_secs }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub abandon_after_minutes: i64,
    pub cleanup_interval_secs: u64,
    pub max_lines: usize,
    pub table_attempts: WindowLimit,
    /// When true, cash orders wait in PENDING_CASH until staff confirm.
    pub cash_requires_confirmation: bool,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            abandon_after_minutes: 15,
            cleanup_interval_secs: 300,
            max_lines: 50,
            table_attempts: WindowLimit::new(5, 600),
            cash_requires_confirmation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub api: WindowLimit,
    pub orders: WindowLimit,
    pub auth: WindowLimit,
    pub payments: WindowLimit,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            api: WindowLimit::new(100, 900),
            orders: WindowLimit::new(5, 60),
            auth: WindowLimit::new(5, 900),
            payments: WindowLimit::new(10, 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret_env: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: "SERVEX_JWT_SECRET".to_string(),
            token_ttl_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Razorpay,
    Paper,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    pub gateway: GatewayKind,
    pub key_id_env: String,
    pub key_secret_env: String,
    pub webhook_secret_env: String,
    pub api_base_url: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayKind::Paper,
            key_id_env: "SERVEX_RAZORPAY_KEY_ID".to_string(),
            key_secret_env: "SERVEX_RAZORPAY_KEY_SECRET".to_string(),
            webhook_secret_env: "SERVEX_RAZORPAY_WEBHOOK_SECRET".to_string(),
            api_base_url: "https://api.razorpay.com".to_string(),
        }
    }
}
