//! servex-schemas
//!
//! Domain records shared by the store, the workflow rules and the HTTP layer.
//! Money is always an `i64` count of minor currency units (paise for INR).
//!
//! Status enums serialize as the same upper-case strings that are stored in
//! the database text columns, so `as_str` / `parse` and serde agree.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Tables and sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiningTable {
    pub table_id: Uuid,
    pub table_number: i32,
    /// Rendered QR image as a data URL.
    pub qr_code_url: String,
    /// The URL encoded in the QR image.
    pub qr_code_data: String,
    pub is_active: bool,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Expired,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "EXPIRED" => Ok(SessionStatus::Expired),
            "COMPLETED" => Ok(SessionStatus::Completed),
            other => Err(anyhow!("invalid session status: {}", other)),
        }
    }
}

/// Anti-replay token issued when a table QR code is scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSession {
    pub session_id: Uuid,
    pub table_id: Uuid,
    pub session_token: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub menu_item_id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_minor: i64,
    pub image_url: String,
    pub is_available: bool,
    pub preparation_minutes: i32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order lifecycle state. Legal moves live in `servex_ordering::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, not yet paid. At most one per table.
    Created,
    /// Diner chose cash; waiting for staff to confirm receipt.
    PendingCash,
    Paid,
    Preparing,
    Ready,
    Served,
    /// Abandoned before payment.
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Created,
        OrderStatus::PendingCash,
        OrderStatus::Paid,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Served,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::PendingCash => "PENDING_CASH",
            OrderStatus::Paid => "PAID",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::Ready => "READY",
            OrderStatus::Served => "SERVED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| anyhow!("invalid order status: {}", s))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Online,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "ONLINE",
            PaymentMethod::Cash => "CASH",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(PaymentMethod::Online),
            "CASH" => Ok(PaymentMethod::Cash),
            other => Err(anyhow!("invalid payment method: {}", other)),
        }
    }
}

/// One priced line of an order. Name and unit price are copied from the
/// catalog at order time and never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub menu_item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price_minor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

impl OrderItem {
    pub fn line_total_minor(&self) -> i64 {
        self.unit_price_minor * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub table_id: Uuid,
    /// Joined from the table row when it still exists.
    pub table_number: Option<i32>,
    pub items: Vec<OrderItem>,
    pub subtotal_minor: i64,
    pub tax_minor: i64,
    pub service_charge_minor: i64,
    pub total_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    pub session_token: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(anyhow!("invalid payment status: {}", other)),
        }
    }
}

/// One online checkout attempt against the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub gateway: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Staff users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Kitchen,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Kitchen => "kitchen",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "kitchen" => Ok(Role::Kitchen),
            other => Err(anyhow!("invalid role: {}", other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("password_hash", &"<REDACTED>")
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_db_text() {
        for st in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(st.as_str()).unwrap(), st);
        }
        assert!(OrderStatus::parse("created").is_err(), "db text is upper-case only");
    }

    #[test]
    fn order_status_serializes_like_db_text() {
        let json = serde_json::to_string(&OrderStatus::PendingCash).unwrap();
        assert_eq!(json, "\"PENDING_CASH\"");
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" Admin ").unwrap(), Role::Admin);
        assert_eq!(Role::parse("KITCHEN").unwrap(), Role::Kitchen);
        assert!(Role::parse("waiter").is_err());
    }

    #[test]
    fn user_never_serializes_password_hash() {
        let user = User {
            user_id: Uuid::new_v4(),
            email: "admin@servex.test".to_string(),
            name: "Admin".to_string(),
            role: Role::Admin,
            password_hash: "$argon2id$secret".to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(!format!("{user:?}").contains("argon2"));
    }

    #[test]
    fn line_total_multiplies_unit_price() {
        let line = OrderItem {
            menu_item_id: Uuid::new_v4(),
            name: "Latte".to_string(),
            quantity: 3,
            unit_price_minor: 20_000,
            special_instructions: None,
        };
        assert_eq!(line.line_total_minor(), 60_000);
    }
}
