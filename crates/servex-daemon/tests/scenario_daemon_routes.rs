//! In-process scenario tests for servex-daemon HTTP endpoints.
//!
//! The Axum router is driven through `tower::ServiceExt::oneshot` against a
//! `MemStore` and a `PaperGateway`; no socket is bound.

use std::sync::Arc;

use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use servex_config::{RateLimitsConfig, ServiceConfig, WindowLimit};
use servex_daemon::{auth, routes, state::AppState};
use servex_db::{InsertTableOutcome, InsertUserOutcome, MemStore, Store};
use servex_payments::PaperGateway;
use servex_schemas::{DiningTable, MenuItem, Role, User};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

const JWT_SECRET: &str = "route-test-jwt-secret";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config() -> ServiceConfig {
    let mut cfg = ServiceConfig::default();
    cfg.rate_limits = RateLimitsConfig {
        api: WindowLimit::new(1_000, 60),
        orders: WindowLimit::new(1_000, 60),
        auth: WindowLimit::new(1_000, 60),
        payments: WindowLimit::new(1_000, 60),
    };
    cfg
}

fn make_state(cfg: ServiceConfig) -> Arc<AppState> {
    Arc::new(AppState::new(
        cfg,
        Arc::new(MemStore::new()),
        Arc::new(PaperGateway::new("paper-secret")),
        JWT_SECRET,
    ))
}

/// Drive a fresh router over `st` with one request; return (status, json body).
async fn call(st: &Arc<AppState>, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let router = routes::build_router(Arc::clone(st));
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

fn get(uri: &str, token: Option<&str>) -> Request<axum::body::Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    b.body(axum::body::Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<axum::body::Body> {
    let mut b = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    b.body(axum::body::Body::from(body.to_string())).unwrap()
}

/// Insert a staff user with `password` and return (user, bearer token).
async fn seed_user(st: &Arc<AppState>, email: &str, password: &str, role: Role) -> (User, String) {
    let user = User {
        user_id: Uuid::new_v4(),
        email: email.to_string(),
        name: format!("{} user", role.as_str()),
        role,
        password_hash: auth::hash_password(password).unwrap(),
        is_active: true,
        created_at: Utc::now(),
    };
    let user = match st.store.insert_user(&user).await.unwrap() {
        InsertUserOutcome::Created(u) => u,
        InsertUserOutcome::EmailTaken => panic!("duplicate seed user"),
    };
    let token = st.jwt.issue(&user, Utc::now()).unwrap();
    (user, token)
}

async fn seed_table(st: &Arc<AppState>, number: i32, active: bool) -> DiningTable {
    let now = Utc::now();
    let table = DiningTable {
        table_id: Uuid::new_v4(),
        table_number: number,
        qr_code_url: String::new(),
        qr_code_data: String::new(),
        is_active: active,
        capacity: 4,
        created_at: now,
        updated_at: now,
    };
    match st.store.insert_table(&table).await.unwrap() {
        InsertTableOutcome::Created(t) => t,
        InsertTableOutcome::NumberTaken => panic!("duplicate table number"),
    }
}

async fn seed_item(st: &Arc<AppState>, name: &str, category: &str, available: bool) -> MenuItem {
    let now = Utc::now();
    let item = MenuItem {
        menu_item_id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        price_minor: 14_000,
        image_url: String::new(),
        is_available: available,
        preparation_minutes: 10,
        tags: vec![],
        created_at: now,
        updated_at: now,
    };
    st.store.insert_menu_item(&item).await.unwrap();
    item
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_service_and_store() {
    let st = make_state(test_config());
    let (status, json) = call(&st, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "servex-daemon");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let st = make_state(test_config());
    let (status, _) = call(&st, get("/api/does-not-exist", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// /api/auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_issues_token_that_opens_me() {
    let st = make_state(test_config());
    seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;

    let (status, json) = call(
        &st,
        send_json(
            "POST",
            "/api/auth/login",
            json!({"email": "  Admin@Servex.TEST ", "password": "admin123"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["user"]["role"], "admin");
    assert!(json["user"].get("password_hash").is_none());
    let token = json["token"].as_str().unwrap().to_string();

    let (status, me) = call(&st, get("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "admin@servex.test");
}

#[tokio::test]
async fn login_with_wrong_password_is_401() {
    let st = make_state(test_config());
    seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;

    let (status, json) = call(
        &st,
        send_json(
            "POST",
            "/api/auth/login",
            json!({"email": "admin@servex.test", "password": "nope-nope"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn me_without_token_is_401() {
    let st = make_state(test_config());
    let (status, _) = call(&st, get("/api/auth/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&st, get("/api/auth/me", Some("not.a.jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_is_admin_only_and_rejects_duplicates() {
    let st = make_state(test_config());
    let (_, admin) = seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;
    let (_, cook) = seed_user(&st, "cook@servex.test", "kitchen123", Role::Kitchen).await;
    let body = json!({
        "email": "new@servex.test",
        "password": "secret1",
        "name": "New Cook",
        "role": "kitchen"
    });

    let (status, _) = call(&st, send_json("POST", "/api/auth/register", body.clone(), Some(&cook))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = call(&st, send_json("POST", "/api/auth/register", body.clone(), Some(&admin))).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");

    let (status, _) = call(&st, send_json("POST", "/api/auth/register", body, Some(&admin))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn deactivated_user_token_stops_working() {
    let st = make_state(test_config());
    let mut user = User {
        user_id: Uuid::new_v4(),
        email: "gone@servex.test".to_string(),
        name: "Gone".to_string(),
        role: Role::Admin,
        password_hash: auth::hash_password("admin123").unwrap(),
        is_active: false,
        created_at: Utc::now(),
    };
    st.store.insert_user(&user).await.unwrap();
    user.is_active = true;
    let token = st.jwt.issue(&user, Utc::now()).unwrap();

    let (status, json) = call(&st, get("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "user not found or inactive");
}

// ---------------------------------------------------------------------------
// /api/tables
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_issues_session_and_rotates_token() {
    let st = make_state(test_config());
    let table = seed_table(&st, 3, true).await;
    let uri = format!("/api/tables/{}", table.table_id);

    let (status, first) = call(&st, get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["table_number"], 3);
    let first_token = first["session_token"].as_str().unwrap().to_string();
    assert_eq!(first_token.len(), 64);

    let (_, second) = call(&st, get(&uri, None)).await;
    assert_ne!(second["session_token"], first["session_token"]);

    // The rotated-out token no longer validates.
    let validate = format!("/api/tables/{}/validate-session", table.table_id);
    let (status, _) = call(
        &st,
        send_json("POST", &validate, json!({"session_token": first_token}), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = call(
        &st,
        send_json("POST", &validate, json!({"session_token": second["session_token"]}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
}

#[tokio::test]
async fn scan_of_unknown_or_inactive_table_fails() {
    let st = make_state(test_config());
    let (status, _) = call(&st, get(&format!("/api/tables/{}", Uuid::new_v4()), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let table = seed_table(&st, 9, false).await;
    let (status, json) = call(&st, get(&format!("/api/tables/{}", table.table_id), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "table is currently inactive");

    let (status, _) = call(&st, get("/api/tables/not-a-uuid", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validate_session_without_token_is_400() {
    let st = make_state(test_config());
    let table = seed_table(&st, 1, true).await;
    let (status, _) = call(
        &st,
        send_json(
            "POST",
            &format!("/api/tables/{}/validate-session", table.table_id),
            json!({}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_creates_table_with_qr_and_duplicate_number_conflicts() {
    let st = make_state(test_config());
    let (_, admin) = seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;

    let (status, table) = call(
        &st,
        send_json("POST", "/api/tables", json!({"table_number": 12}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{table}");
    assert_eq!(table["capacity"], 4);
    assert!(table["qr_code_url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/svg+xml;base64,"));
    let id = table["table_id"].as_str().unwrap();
    assert_eq!(
        table["qr_code_data"],
        format!("http://localhost:5173/t/{id}")
    );

    let (status, _) = call(
        &st,
        send_json("POST", "/api/tables", json!({"table_number": 12}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &st,
        send_json("POST", "/api/tables", json!({"table_number": 0}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn regenerate_qr_expires_open_sessions() {
    let st = make_state(test_config());
    let (_, admin) = seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;
    let table = seed_table(&st, 5, true).await;

    let (_, scan) = call(&st, get(&format!("/api/tables/{}", table.table_id), None)).await;

    let (status, qr) = call(
        &st,
        send_json(
            "POST",
            &format!("/api/tables/{}/regenerate-qr", table.table_id),
            json!({}),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(qr["qr_code_data"].as_str().unwrap().ends_with(&table.table_id.to_string()));

    let (status, _) = call(
        &st,
        send_json(
            "POST",
            &format!("/api/tables/{}/validate-session", table.table_id),
            json!({"session_token": scan["session_token"]}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn table_admin_routes_need_admin_role() {
    let st = make_state(test_config());
    let (_, cook) = seed_user(&st, "cook@servex.test", "kitchen123", Role::Kitchen).await;

    let (status, _) = call(&st, get("/api/tables", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&st, get("/api/tables", Some(&cook))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// /api/menu
// ---------------------------------------------------------------------------

#[tokio::test]
async fn public_menu_lists_available_items_only() {
    let st = make_state(test_config());
    seed_item(&st, "Masala Dosa", "Mains", true).await;
    seed_item(&st, "Filter Coffee", "Drinks", true).await;
    seed_item(&st, "Seasonal Soup", "Starters", false).await;

    let (status, json) = call(&st, get("/api/menu", None)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Filter Coffee", "Masala Dosa"]);

    let (_, drinks) = call(&st, get("/api/menu?category=Drinks", None)).await;
    assert_eq!(drinks.as_array().unwrap().len(), 1);

    let (_, cats) = call(&st, get("/api/menu/categories", None)).await;
    assert_eq!(cats, json!(["Drinks", "Mains", "Starters"]));
}

#[tokio::test]
async fn admin_menu_edits_round_trip() {
    let st = make_state(test_config());
    let (_, admin) = seed_user(&st, "admin@servex.test", "admin123", Role::Admin).await;

    let (status, item) = call(
        &st,
        send_json(
            "POST",
            "/api/menu",
            json!({
                "name": "Paneer Tikka",
                "category": "Starters",
                "price_minor": 22_000,
                "tags": [" Veg ", "SPICY"]
            }),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{item}");
    assert_eq!(item["tags"], json!(["veg", "spicy"]));
    assert_eq!(item["is_available"], true);
    let id = item["menu_item_id"].as_str().unwrap().to_string();

    let (status, toggled) = call(
        &st,
        send_json("PATCH", &format!("/api/menu/{id}/availability"), json!({}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["is_available"], false);

    let (status, updated) = call(
        &st,
        send_json("PATCH", &format!("/api/menu/{id}"), json!({"price_minor": 24_000}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["price_minor"], 24_000);
    assert_eq!(updated["name"], "Paneer Tikka");

    let (status, _) = call(
        &st,
        send_json("PATCH", &format!("/api/menu/{id}"), json!({"price_minor": -1}), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/menu/{id}"))
        .header(header::AUTHORIZATION, format!("Bearer {admin}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(&st, delete).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&st, get(&format!("/api/menu/{id}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_body_is_413() {
    let st = make_state(test_config());
    let big = "x".repeat(20 * 1024);
    let (status, _) = call(
        &st,
        send_json(
            "POST",
            "/api/orders",
            json!({"table_id": Uuid::new_v4(), "items": [], "customer_name": big}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn api_rate_limit_answers_429_with_error_body() {
    let mut cfg = test_config();
    cfg.rate_limits.api = WindowLimit::new(2, 60);
    let st = make_state(cfg);

    for _ in 0..2 {
        let (status, _) = call(&st, get("/api/menu", None)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, json) = call(&st, get("/api/menu", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(json["error"].is_string());

    // /health sits outside the api limiter.
    let (status, _) = call(&st, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}
