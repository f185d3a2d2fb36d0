//! Cart sanitisation.
//!
//! The client only names menu items and quantities. Names and prices are
//! always copied from the catalog.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use servex_schemas::{MenuItem, OrderItem};
use uuid::Uuid;

pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 99;
pub const MAX_INSTRUCTIONS_CHARS: usize = 500;
pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_PHONE_CHARS: usize = 20;

/// One requested line as sent by the diner.
///
/// `quantity` is kept loose: clients send integers, floats and numeric
/// strings, and all of them are clamped rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CartLine {
    pub menu_item_id: Uuid,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    EmptyCart,
    TooManyLines { max: usize, got: usize },
    /// Requested ids that are unknown or currently unavailable.
    UnavailableItems(Vec<Uuid>),
}

impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartError::EmptyCart => write!(f, "order must have at least one item"),
            CartError::TooManyLines { max, got } => {
                write!(f, "order has {got} lines; at most {max} are allowed")
            }
            CartError::UnavailableItems(ids) => {
                write!(f, "{} item(s) are unavailable or invalid", ids.len())
            }
        }
    }
}

impl std::error::Error for CartError {}

/// Resolve `requested` against `catalog` and build priced order lines.
///
/// `catalog` may contain unavailable items; they are treated like unknown ids.
/// The same menu item may appear on several lines (different instructions).
pub fn sanitize_lines(
    requested: &[CartLine],
    catalog: &[MenuItem],
    max_lines: usize,
) -> Result<Vec<OrderItem>, CartError> {
    if requested.is_empty() {
        return Err(CartError::EmptyCart);
    }
    if requested.len() > max_lines {
        return Err(CartError::TooManyLines {
            max: max_lines,
            got: requested.len(),
        });
    }

    let by_id: HashMap<Uuid, &MenuItem> = catalog
        .iter()
        .filter(|m| m.is_available)
        .map(|m| (m.menu_item_id, m))
        .collect();

    let mut missing: Vec<Uuid> = requested
        .iter()
        .map(|l| l.menu_item_id)
        .filter(|id| !by_id.contains_key(id))
        .collect();
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(CartError::UnavailableItems(missing));
    }

    let mut out = Vec::with_capacity(requested.len());
    for line in requested {
        let Some(item) = by_id.get(&line.menu_item_id) else {
            continue;
        };
        out.push(OrderItem {
            menu_item_id: item.menu_item_id,
            name: item.name.clone(),
            quantity: clamp_quantity(line.quantity.as_ref().and_then(requested_quantity)),
            unit_price_minor: item.price_minor,
            special_instructions: clean_instructions(line.special_instructions.as_deref()),
        });
    }
    Ok(out)
}

/// Integer reading of a loose quantity.
///
/// Floats are truncated, out-of-range numbers saturate and strings are read
/// by their leading integer (`"3"`, `" 2 plates"`). Anything else is `None`.
pub fn requested_quantity(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let magnitude = rest[..digits].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

/// Missing or zero means one; anything else is clamped into `1..=99`.
pub fn clamp_quantity(q: Option<i64>) -> i32 {
    let q = q
        .filter(|q| *q != 0)
        .unwrap_or(MIN_QUANTITY)
        .clamp(MIN_QUANTITY, MAX_QUANTITY);
    // Clamped above, always fits.
    q as i32
}

fn clean_instructions(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_chars(trimmed, MAX_INSTRUCTIONS_CHARS))
}

/// Trim and cut diner contact details. Missing values become empty strings.
pub fn sanitize_contact(name: Option<&str>, phone: Option<&str>) -> (String, String) {
    (
        truncate_chars(name.unwrap_or_default().trim(), MAX_NAME_CHARS),
        truncate_chars(phone.unwrap_or_default().trim(), MAX_PHONE_CHARS),
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn menu_item(name: &str, price_minor: i64, available: bool) -> MenuItem {
        MenuItem {
            menu_item_id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            category: "Mains".to_string(),
            price_minor,
            image_url: String::new(),
            is_available: available,
            preparation_minutes: 15,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn req(id: Uuid, qty: Option<i64>) -> CartLine {
        CartLine {
            menu_item_id: id,
            quantity: qty.map(Value::from),
            special_instructions: None,
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert_eq!(sanitize_lines(&[], &[], 50), Err(CartError::EmptyCart));
    }

    #[test]
    fn too_many_lines_is_rejected_before_catalog_lookup() {
        let lines: Vec<CartLine> = (0..3).map(|_| req(Uuid::new_v4(), None)).collect();
        assert_eq!(
            sanitize_lines(&lines, &[], 2),
            Err(CartError::TooManyLines { max: 2, got: 3 })
        );
    }

    #[test]
    fn catalog_price_and_name_win() {
        let paneer = menu_item("Paneer Tikka", 28_000, true);
        let out = sanitize_lines(&[req(paneer.menu_item_id, Some(2))], &[paneer.clone()], 50)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Paneer Tikka");
        assert_eq!(out[0].unit_price_minor, 28_000);
        assert_eq!(out[0].quantity, 2);
    }

    #[test]
    fn unavailable_and_unknown_ids_are_reported() {
        let sold_out = menu_item("Biryani", 30_000, false);
        let ghost = Uuid::new_v4();
        let err = sanitize_lines(
            &[req(sold_out.menu_item_id, None), req(ghost, None)],
            &[sold_out.clone()],
            50,
        )
        .unwrap_err();
        let CartError::UnavailableItems(ids) = err else {
            panic!("expected UnavailableItems");
        };
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&sold_out.menu_item_id));
        assert!(ids.contains(&ghost));
    }

    #[test]
    fn quantity_is_clamped() {
        assert_eq!(clamp_quantity(None), 1);
        assert_eq!(clamp_quantity(Some(0)), 1);
        assert_eq!(clamp_quantity(Some(-7)), 1);
        assert_eq!(clamp_quantity(Some(150)), 99);
        assert_eq!(clamp_quantity(Some(i64::MAX)), 99);
    }

    #[test]
    fn loose_quantities_are_read_like_integers() {
        let q = |raw: Value| clamp_quantity(requested_quantity(&raw));
        assert_eq!(q(serde_json::json!(2.0)), 2);
        assert_eq!(q(serde_json::json!(2.9)), 2);
        assert_eq!(q(serde_json::json!("3")), 3);
        assert_eq!(q(serde_json::json!(" 4 plates")), 4);
        assert_eq!(q(serde_json::json!("-3")), 1);
        assert_eq!(q(serde_json::json!("many")), 1);
        assert_eq!(q(serde_json::json!(true)), 1);
        assert_eq!(q(serde_json::json!(null)), 1);
        assert_eq!(q(serde_json::json!(0.4)), 1);
        assert_eq!(q(serde_json::json!(u64::MAX)), 99);
        assert_eq!(q(serde_json::json!("99999999999999999999999")), 99);
    }

    #[test]
    fn oversized_quantity_in_json_is_clamped_not_rejected() {
        let item = menu_item("Chai", 4_000, true);
        let body = format!(
            r#"[{{"menu_item_id":"{}","quantity":100000000000000000000}}]"#,
            item.menu_item_id
        );
        let lines: Vec<CartLine> = serde_json::from_str(&body).unwrap();
        let out = sanitize_lines(&lines, &[item], 50).unwrap();
        assert_eq!(out[0].quantity, 99);
    }

    #[test]
    fn instructions_are_trimmed_cut_and_blank_dropped() {
        let item = menu_item("Dal", 15_000, true);
        let long = "x".repeat(600);
        let lines = vec![
            CartLine {
                menu_item_id: item.menu_item_id,
                quantity: None,
                special_instructions: Some("  no onion  ".to_string()),
            },
            CartLine {
                menu_item_id: item.menu_item_id,
                quantity: None,
                special_instructions: Some("   ".to_string()),
            },
            CartLine {
                menu_item_id: item.menu_item_id,
                quantity: None,
                special_instructions: Some(long),
            },
        ];
        let out = sanitize_lines(&lines, &[item], 50).unwrap();
        assert_eq!(out[0].special_instructions.as_deref(), Some("no onion"));
        assert_eq!(out[1].special_instructions, None);
        assert_eq!(out[2].special_instructions.as_ref().map(|s| s.len()), Some(500));
    }

    #[test]
    fn contact_is_cut_by_characters() {
        let (name, phone) = sanitize_contact(Some("é".repeat(120).as_str()), Some("+91 98765 43210 ext 99"));
        assert_eq!(name.chars().count(), 100);
        assert_eq!(phone.chars().count(), 20);

        let (name, phone) = sanitize_contact(None, None);
        assert!(name.is_empty() && phone.is_empty());
    }
}
