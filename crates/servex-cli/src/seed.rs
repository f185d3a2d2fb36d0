//! Demo data: two staff accounts, eight tables with QR codes, a café menu.
//!
//! Re-running is safe. Existing users (by email) and tables (by number) are
//! kept as they are; the menu is only loaded into an empty catalog.

use anyhow::Result;
use chrono::Utc;
use servex_daemon::{auth, qr};
use servex_db::{InsertTableOutcome, InsertUserOutcome, Store};
use servex_schemas::{DiningTable, MenuItem, Role, User};
use tracing::info;
use uuid::Uuid;

pub const TABLE_COUNT: i32 = 8;

const STAFF: &[(&str, &str, &str, Role)] = &[
    ("admin@servex.com", "admin123", "Admin User", Role::Admin),
    ("kitchen@servex.com", "kitchen123", "Kitchen Staff", Role::Kitchen),
];

/// (name, description, category, price in paise, prep minutes, tags)
type Dish = (&'static str, &'static str, &'static str, i64, i32, &'static [&'static str]);

const MENU: &[Dish] = &[
    ("Espresso", "Concentrated shot with thick crema", "Hot Coffee", 14_000, 5, &["veg"]),
    ("Americano", "Warm water over espresso", "Hot Coffee", 16_000, 5, &["veg"]),
    ("Cappuccino", "Equal parts espresso, milk and foam", "Hot Coffee", 19_000, 7, &["special", "veg"]),
    ("Latte", "Espresso with steamed milk and microfoam", "Hot Coffee", 20_000, 7, &["veg"]),
    ("Mocha", "Espresso, steamed milk and rich chocolate", "Hot Coffee", 24_000, 8, &["veg"]),
    ("Espresso Tonic", "Espresso over tonic water", "Cold Coffee", 24_000, 5, &["veg"]),
    ("Classic Pancakes", "Fresh fruit, whipped cream, maple syrup", "Breakfast", 22_000, 12, &["egg"]),
    ("Eggs Benedict", "Poached eggs and hollandaise on a buttered bun", "Breakfast", 30_000, 15, &["egg"]),
    ("Caesar Salad", "Croutons and parmesan", "Salads & Soups", 30_000, 10, &["veg"]),
    ("Cream of Chicken Soup", "Classic creamy chicken soup", "Salads & Soups", 26_000, 10, &["nonveg"]),
    ("Shroom Melt", "Creamy mushrooms, caramelized onions, rocket", "Sandwiches", 36_000, 12, &["veg"]),
    ("Katsu Chicken Sando", "Fried chicken, mustard coleslaw, milk bread", "Sandwiches", 38_000, 15, &["nonveg", "special"]),
    ("House Fresh Arrabbiata", "Chilli flakes, ripe tomatoes, garlic", "Mains", 38_000, 15, &["veg", "spicy"]),
    ("Truffle Mac & Cheese", "Elbow macaroni, cheese, truffle oil", "Mains", 48_000, 15, &["veg", "special"]),
    ("Parmigiana Chicken", "Breaded chicken breast, pomodoro, mozzarella", "Mains", 53_000, 20, &["nonveg"]),
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub users_created: usize,
    pub tables_created: usize,
    pub menu_items_created: usize,
}

pub fn table_capacity(number: i32) -> i32 {
    if number <= 4 {
        2
    } else {
        4
    }
}

pub async fn seed(store: &dyn Store, public_base_url: &str) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let now = Utc::now();

    for (email, password, name, role) in STAFF {
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            role: *role,
            password_hash: auth::hash_password(password)?,
            is_active: true,
            created_at: now,
        };
        match store.insert_user(&user).await? {
            InsertUserOutcome::Created(_) => {
                info!(email, role = role.as_str(), "seeded staff user");
                report.users_created += 1;
            }
            InsertUserOutcome::EmailTaken => info!(email, "staff user exists; skipped"),
        }
    }

    for number in 1..=TABLE_COUNT {
        let table_id = Uuid::new_v4();
        let code = qr::generate_table_qr(public_base_url, table_id)?;
        let table = DiningTable {
            table_id,
            table_number: number,
            qr_code_url: code.image_url,
            qr_code_data: code.target,
            is_active: true,
            capacity: table_capacity(number),
            created_at: now,
            updated_at: now,
        };
        match store.insert_table(&table).await? {
            InsertTableOutcome::Created(_) => report.tables_created += 1,
            InsertTableOutcome::NumberTaken => info!(table_number = number, "table exists; skipped"),
        }
    }

    if store.menu_categories().await?.is_empty() {
        for (name, description, category, price_minor, minutes, tags) in MENU {
            let item = MenuItem {
                menu_item_id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
                category: category.to_string(),
                price_minor: *price_minor,
                image_url: String::new(),
                is_available: true,
                preparation_minutes: *minutes,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                created_at: now,
                updated_at: now,
            };
            store.insert_menu_item(&item).await?;
            report.menu_items_created += 1;
        }
    } else {
        info!("menu already has items; skipped");
    }

    Ok(report)
}
