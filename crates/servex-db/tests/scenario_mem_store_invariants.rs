//! Workflow invariants held by the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use servex_db::{
    InsertOrderOutcome, InsertPaymentOutcome, InsertTableOutcome, MemStore, MenuFilter,
    OrderPatch, OrderQuery, Store, TablePatch, TransitionOutcome, UpdateTableOutcome,
};
use servex_schemas::{
    DiningTable, MenuItem, Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus,
    SessionStatus,
};
use tokio::task::JoinSet;
use uuid::Uuid;

fn table(number: i32) -> DiningTable {
    let now = Utc::now();
    DiningTable {
        table_id: Uuid::new_v4(),
        table_number: number,
        qr_code_url: String::new(),
        qr_code_data: String::new(),
        is_active: true,
        capacity: 4,
        created_at: now,
        updated_at: now,
    }
}

fn menu_item(name: &str, category: &str, price_minor: i64, available: bool) -> MenuItem {
    let now = Utc::now();
    MenuItem {
        menu_item_id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        price_minor,
        image_url: String::new(),
        is_available: available,
        preparation_minutes: 15,
        tags: vec![],
        created_at: now,
        updated_at: now,
    }
}

fn order(table_id: Uuid, item: &MenuItem, qty: i32, status: OrderStatus) -> Order {
    let now = Utc::now();
    let subtotal = item.price_minor * i64::from(qty);
    Order {
        order_id: Uuid::new_v4(),
        table_id,
        table_number: None,
        items: vec![OrderItem {
            menu_item_id: item.menu_item_id,
            name: item.name.clone(),
            quantity: qty,
            unit_price_minor: item.price_minor,
            special_instructions: None,
        }],
        subtotal_minor: subtotal,
        tax_minor: 0,
        service_charge_minor: 0,
        total_minor: subtotal,
        currency: "INR".to_string(),
        status,
        payment_id: None,
        payment_method: PaymentMethod::Online,
        session_token: "tok".to_string(),
        customer_name: String::new(),
        customer_phone: String::new(),
        created_at: now,
        updated_at: now,
    }
}

fn pending_payment(order_id: Uuid, gateway_order_id: &str) -> Payment {
    let now = Utc::now();
    Payment {
        payment_id: Uuid::new_v4(),
        order_id,
        gateway: "paper".to_string(),
        gateway_order_id: gateway_order_id.to_string(),
        gateway_payment_id: None,
        gateway_signature: None,
        amount_minor: 10_000,
        currency: "INR".to_string(),
        status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn second_unpaid_order_for_table_is_refused() {
    let store = MemStore::new();
    let t = table(1);
    store.insert_table(&t).await.unwrap();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);

    let first = order(t.table_id, &dosa, 1, OrderStatus::Created);
    let InsertOrderOutcome::Created(created) = store.insert_order(&first).await.unwrap() else {
        panic!("first order must be created");
    };
    assert_eq!(created.table_number, Some(1), "table number is joined on read");

    let second = order(t.table_id, &dosa, 2, OrderStatus::Created);
    assert_eq!(
        store.insert_order(&second).await.unwrap(),
        InsertOrderOutcome::UnpaidExists(first.order_id)
    );

    // Once paid, the table may order again.
    let out = store
        .transition_order(
            first.order_id,
            &[OrderStatus::Created],
            OrderStatus::Paid,
            &OrderPatch::default(),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(out, TransitionOutcome::Applied(_)));
    assert!(matches!(
        store.insert_order(&second).await.unwrap(),
        InsertOrderOutcome::Created(_)
    ));
}

/// Concurrent placements for one table: exactly one wins, the rest see it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unpaid_orders_for_table_admit_exactly_one() {
    const RACERS: usize = 16;

    let store = Arc::new(MemStore::new());
    let t = table(1);
    store.insert_table(&t).await.unwrap();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);

    let mut set = JoinSet::new();
    for _ in 0..RACERS {
        let store = Arc::clone(&store);
        let candidate = order(t.table_id, &dosa, 1, OrderStatus::Created);
        set.spawn(async move { store.insert_order(&candidate).await.unwrap() });
    }

    let mut winners = Vec::new();
    let mut blocked_by = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined.unwrap() {
            InsertOrderOutcome::Created(o) => winners.push(o.order_id),
            InsertOrderOutcome::UnpaidExists(id) => blocked_by.push(id),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(blocked_by.len(), RACERS - 1);
    assert!(blocked_by.iter().all(|id| *id == winners[0]));
    assert_eq!(store.find_unpaid_order(t.table_id).await.unwrap(), Some(winners[0]));
}

#[tokio::test]
async fn transition_is_compare_and_set() {
    let store = MemStore::new();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);
    let o = order(Uuid::new_v4(), &dosa, 1, OrderStatus::Created);
    store.insert_order(&o).await.unwrap();

    let pid = Uuid::new_v4();
    let patch = OrderPatch {
        payment_id: Some(pid),
        payment_method: Some(PaymentMethod::Online),
    };
    let TransitionOutcome::Applied(paid) = store
        .transition_order(o.order_id, &[OrderStatus::Created], OrderStatus::Paid, &patch, Utc::now())
        .await
        .unwrap()
    else {
        panic!("expected Applied");
    };
    assert_eq!(paid.payment_id, Some(pid));

    // Replaying the same move conflicts and reports the current state.
    let TransitionOutcome::Conflict(cur) = store
        .transition_order(o.order_id, &[OrderStatus::Created], OrderStatus::Paid, &patch, Utc::now())
        .await
        .unwrap()
    else {
        panic!("expected Conflict");
    };
    assert_eq!(cur.status, OrderStatus::Paid);

    assert_eq!(
        store
            .transition_order(Uuid::new_v4(), &[OrderStatus::Created], OrderStatus::Paid, &patch, Utc::now())
            .await
            .unwrap(),
        TransitionOutcome::NotFound
    );
}

#[tokio::test]
async fn abandoned_orders_are_cancelled_after_cutoff() {
    let store = MemStore::new();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);
    let now = Utc::now();

    let mut stale = order(Uuid::new_v4(), &dosa, 1, OrderStatus::Created);
    stale.created_at = now - Duration::minutes(20);
    let fresh = order(Uuid::new_v4(), &dosa, 1, OrderStatus::Created);
    let mut paid = order(Uuid::new_v4(), &dosa, 1, OrderStatus::Paid);
    paid.created_at = now - Duration::minutes(60);
    for o in [&stale, &fresh, &paid] {
        store.insert_order(o).await.unwrap();
    }

    let ids = store
        .cancel_abandoned_orders(now - Duration::minutes(15), now)
        .await
        .unwrap();
    assert_eq!(ids, vec![stale.order_id]);
    let got = store.fetch_order(stale.order_id).await.unwrap().unwrap();
    assert_eq!(got.status, OrderStatus::Cancelled);
    assert_eq!(
        store.find_unpaid_order(fresh.table_id).await.unwrap(),
        Some(fresh.order_id)
    );
}

#[tokio::test]
async fn session_rotates_and_expires() {
    let store = MemStore::new();
    let t = table(3);
    store.insert_table(&t).await.unwrap();
    let now = Utc::now();

    let s1 = store
        .upsert_session(t.table_id, "aaa", now + Duration::minutes(30), now)
        .await
        .unwrap();
    let s2 = store
        .upsert_session(t.table_id, "bbb", now + Duration::minutes(30), now)
        .await
        .unwrap();
    assert_eq!(s1.session_id, s2.session_id, "one session row per table");
    assert!(store
        .find_usable_session(t.table_id, "aaa", now)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .find_usable_session(t.table_id, "bbb", now)
        .await
        .unwrap()
        .is_some());

    let later = now + Duration::minutes(31);
    assert_eq!(store.expire_sessions(later).await.unwrap(), 1);
    assert!(store
        .find_usable_session(t.table_id, "bbb", now)
        .await
        .unwrap()
        .is_none());

    // Only ACTIVE sessions are completed.
    assert_eq!(
        store
            .set_sessions_status(t.table_id, Some(SessionStatus::Active), SessionStatus::Completed)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn table_numbers_are_unique() {
    let store = MemStore::new();
    let a = table(5);
    let b = table(6);
    store.insert_table(&a).await.unwrap();
    store.insert_table(&b).await.unwrap();

    assert_eq!(
        store.insert_table(&table(5)).await.unwrap(),
        InsertTableOutcome::NumberTaken
    );
    let patch = TablePatch {
        table_number: Some(5),
        ..TablePatch::default()
    };
    assert_eq!(
        store.update_table(b.table_id, &patch, Utc::now()).await.unwrap(),
        UpdateTableOutcome::NumberTaken
    );
    // Renumbering to its own number is fine.
    assert!(matches!(
        store.update_table(a.table_id, &patch, Utc::now()).await.unwrap(),
        UpdateTableOutcome::Updated(_)
    ));
}

#[tokio::test]
async fn one_pending_payment_per_order() {
    let store = MemStore::new();
    let order_id = Uuid::new_v4();
    let first = pending_payment(order_id, "paper_order_1");
    assert!(matches!(
        store.insert_pending_payment(&first).await.unwrap(),
        InsertPaymentOutcome::Created(_)
    ));
    let InsertPaymentOutcome::Existing(existing) = store
        .insert_pending_payment(&pending_payment(order_id, "paper_order_2"))
        .await
        .unwrap()
    else {
        panic!("expected Existing");
    };
    assert_eq!(existing.payment_id, first.payment_id);

    // A failed attempt frees the slot.
    store
        .mark_payment_failed(first.payment_id, Some("pay_x"), Utc::now())
        .await
        .unwrap();
    assert!(store.find_pending_payment(order_id).await.unwrap().is_none());

    // Success is sticky.
    let ok = store
        .mark_payment_succeeded(first.payment_id, "pay_y", Some("sig"), Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ok.status, PaymentStatus::Success);
    let again = store
        .mark_payment_succeeded(first.payment_id, "pay_z", None, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.gateway_payment_id.as_deref(), Some("pay_y"));
}

#[tokio::test]
async fn menu_listing_filters_and_sorts() {
    let store = MemStore::new();
    for m in [
        menu_item("Lassi", "Drinks", 8_000, true),
        menu_item("Chai", "Drinks", 4_000, false),
        menu_item("Biryani", "Mains", 30_000, true),
        menu_item("Aloo Gobi", "Mains", 18_000, true),
    ] {
        store.insert_menu_item(&m).await.unwrap();
    }

    let all = store.list_menu_items(&MenuFilter::default()).await.unwrap();
    let names: Vec<&str> = all.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Chai", "Lassi", "Aloo Gobi", "Biryani"]);

    let avail_mains = store
        .list_menu_items(&MenuFilter {
            available_only: true,
            category: Some("Mains".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(avail_mains.len(), 2);

    let drinks_available = store
        .list_menu_items(&MenuFilter {
            available_only: true,
            category: Some("Drinks".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(drinks_available.len(), 1);

    assert_eq!(
        store.menu_categories().await.unwrap(),
        vec!["Drinks".to_string(), "Mains".to_string()]
    );
}

#[tokio::test]
async fn sales_summary_counts_paid_orders_only() {
    let store = MemStore::new();
    let lassi = menu_item("Lassi", "Drinks", 8_000, true);
    let biryani = menu_item("Biryani", "Mains", 30_000, true);

    store
        .insert_order(&order(Uuid::new_v4(), &lassi, 3, OrderStatus::Served))
        .await
        .unwrap();
    store
        .insert_order(&order(Uuid::new_v4(), &biryani, 1, OrderStatus::Paid))
        .await
        .unwrap();
    store
        .insert_order(&order(Uuid::new_v4(), &biryani, 5, OrderStatus::Created))
        .await
        .unwrap();
    store
        .insert_order(&order(Uuid::new_v4(), &biryani, 5, OrderStatus::Cancelled))
        .await
        .unwrap();

    let s = store.sales_summary(10).await.unwrap();
    assert_eq!(s.total_orders, 2);
    assert_eq!(s.total_revenue_minor, 54_000);
    assert_eq!(s.avg_order_value_minor, 27_000);
    assert_eq!(s.top_items[0].name, "Lassi");
    assert_eq!(s.top_items[0].total_quantity, 3);
    assert_eq!(s.top_items[1].total_revenue_minor, 30_000);
}

#[tokio::test]
async fn order_listing_paginates_newest_first() {
    let store = MemStore::new();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);
    let base = Utc::now();
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut o = order(Uuid::new_v4(), &dosa, 1, OrderStatus::Paid);
        o.created_at = base + Duration::seconds(i);
        ids.push(o.order_id);
        store.insert_order(&o).await.unwrap();
    }

    let page = store
        .list_orders(&OrderQuery {
            status: Some(OrderStatus::Paid),
            page: 2,
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    let got: Vec<Uuid> = page.orders.iter().map(|o| o.order_id).collect();
    assert_eq!(got, vec![ids[2], ids[1]]);

    let kitchen = store.list_kitchen_orders().await.unwrap();
    assert_eq!(kitchen.first().map(|o| o.order_id), Some(ids[0]), "oldest first");
}

#[tokio::test]
async fn deleting_table_drops_its_session_but_keeps_orders() {
    let store = MemStore::new();
    let t = table(9);
    store.insert_table(&t).await.unwrap();
    let now = Utc::now();
    store
        .upsert_session(t.table_id, "tok", now + Duration::minutes(30), now)
        .await
        .unwrap();
    let dosa = menu_item("Dosa", "Mains", 12_000, true);
    let o = order(t.table_id, &dosa, 1, OrderStatus::Paid);
    store.insert_order(&o).await.unwrap();

    assert!(store.delete_table(t.table_id).await.unwrap());
    assert!(!store.delete_table(t.table_id).await.unwrap());
    assert!(store
        .find_usable_session(t.table_id, "tok", now)
        .await
        .unwrap()
        .is_none());
    let kept = store.fetch_order(o.order_id).await.unwrap().unwrap();
    assert_eq!(kept.table_number, None);
}
