//! A diner cart goes through sanitisation and pricing the way the order
//! endpoint drives it: client-sent prices never exist, catalog prices win.

use chrono::Utc;
use servex_config::PricingConfig;
use servex_ordering::{check_transition, quote, sanitize_lines, CartLine, Transition};
use servex_schemas::{MenuItem, OrderStatus};
use uuid::Uuid;

fn item(name: &str, price_minor: i64) -> MenuItem {
    MenuItem {
        menu_item_id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        category: "Starters".to_string(),
        price_minor,
        image_url: String::new(),
        is_available: true,
        preparation_minutes: 10,
        tags: vec!["veg".to_string()],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn json_cart_is_priced_from_catalog() {
    let samosa = item("Samosa", 6_000);
    let chai = item("Masala Chai", 4_050);

    let body = serde_json::json!([
        { "menu_item_id": samosa.menu_item_id, "quantity": 3, "price": 1 },
        { "menu_item_id": chai.menu_item_id, "special_instructions": " less sugar " }
    ]);
    let cart: Vec<CartLine> = serde_json::from_value(body).unwrap();

    let lines = sanitize_lines(&cart, &[samosa, chai], 50).unwrap();
    let q = quote(&lines, &PricingConfig::default()).unwrap();

    // 3 x 60.00 + 1 x 40.50 = 220.50; 5% of 22050 = 1102.5 -> 1103
    assert_eq!(q.subtotal_minor, 22_050);
    assert_eq!(q.tax_minor, 1_103);
    assert_eq!(q.service_charge_minor, 1_103);
    assert_eq!(q.total_minor, 24_256);
    assert_eq!(lines[1].special_instructions.as_deref(), Some("less sugar"));
}

#[test]
fn new_order_starts_unpaid_and_only_payment_unlocks_kitchen() {
    assert!(check_transition(OrderStatus::Created, OrderStatus::Preparing).is_err());
    assert_eq!(
        check_transition(OrderStatus::Created, OrderStatus::Paid).unwrap(),
        Transition::Changed {
            from: OrderStatus::Created,
            to: OrderStatus::Paid
        }
    );
}
