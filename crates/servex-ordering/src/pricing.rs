//! Server-side order totals.
//!
//! All amounts are `i64` minor units. Rates are basis points, so
//! `tax = round_half_up(subtotal * tax_bps / 10_000)`. Any overflow is an
//! error rather than a wrapped total.

use servex_config::PricingConfig;
use servex_schemas::OrderItem;
use serde::Serialize;

pub const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// A line carried a negative unit price or a non-positive quantity.
    InvalidLine { menu_item_id: uuid::Uuid },
    /// Some intermediate value did not fit in `i64`.
    Overflow,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::InvalidLine { menu_item_id } => {
                write!(f, "pricing: invalid line for menu item {menu_item_id}")
            }
            PricingError::Overflow => write!(f, "pricing: amount out of i64 range"),
        }
    }
}

impl std::error::Error for PricingError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub subtotal_minor: i64,
    pub tax_minor: i64,
    pub service_charge_minor: i64,
    pub total_minor: i64,
    pub currency: String,
}

/// Price `lines` with the configured rates.
pub fn quote(lines: &[OrderItem], cfg: &PricingConfig) -> Result<Quote, PricingError> {
    let mut subtotal: i64 = 0;
    for line in lines {
        if line.unit_price_minor < 0 || line.quantity <= 0 {
            return Err(PricingError::InvalidLine {
                menu_item_id: line.menu_item_id,
            });
        }
        let line_total = line
            .unit_price_minor
            .checked_mul(i64::from(line.quantity))
            .ok_or(PricingError::Overflow)?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or(PricingError::Overflow)?;
    }

    let tax = apply_bps(subtotal, cfg.tax_bps)?;
    let service = apply_bps(subtotal, cfg.service_charge_bps)?;
    let total = subtotal
        .checked_add(tax)
        .and_then(|t| t.checked_add(service))
        .ok_or(PricingError::Overflow)?;

    Ok(Quote {
        subtotal_minor: subtotal,
        tax_minor: tax,
        service_charge_minor: service,
        total_minor: total,
        currency: cfg.currency.trim().to_ascii_uppercase(),
    })
}

/// `amount * bps / 10_000`, rounded half up. `amount` must be non-negative.
pub fn apply_bps(amount: i64, bps: u32) -> Result<i64, PricingError> {
    let scaled = amount
        .checked_mul(i64::from(bps))
        .ok_or(PricingError::Overflow)?;
    let rounded = scaled
        .checked_add(BPS_DENOMINATOR / 2)
        .ok_or(PricingError::Overflow)?;
    Ok(rounded / BPS_DENOMINATOR)
}
