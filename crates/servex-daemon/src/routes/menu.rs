//! `/api/menu`: public catalog and admin edits.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use servex_db::{MenuFilter, MenuItemPatch};
use servex_schemas::{MenuItem, Role};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{CreateMenuItemRequest, MenuQuery, MessageResponse, UpdateMenuItemRequest},
    auth::Staff,
    error::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResult},
    state::AppState,
};

const MAX_TAGS: usize = 20;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/menu", get(list_menu).post(create_item))
        .route("/api/menu/categories", get(categories))
        .route(
            "/api/menu/:id",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/api/menu/:id/availability", patch(toggle_availability))
}

fn required_text(field: &str, value: &str) -> ApiResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn check_price(price_minor: i64) -> ApiResult<i64> {
    if price_minor < 0 {
        return Err(ApiError::bad_request("price_minor must not be negative"));
    }
    Ok(price_minor)
}

fn check_minutes(minutes: i32) -> ApiResult<i32> {
    if minutes < 0 {
        return Err(ApiError::bad_request("preparation_minutes must not be negative"));
    }
    Ok(minutes)
}

fn clean_tags(tags: Vec<String>) -> ApiResult<Vec<String>> {
    if tags.len() > MAX_TAGS {
        return Err(ApiError::bad_request(format!("at most {MAX_TAGS} tags")));
    }
    Ok(tags
        .into_iter()
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Public
// ---------------------------------------------------------------------------

/// Available items only, sorted by category then name.
pub(crate) async fn list_menu(
    State(st): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<MenuQuery>,
) -> ApiResult<Json<Vec<MenuItem>>> {
    let filter = MenuFilter {
        available_only: true,
        category: q
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
    };
    Ok(Json(st.store.list_menu_items(&filter).await?))
}

pub(crate) async fn categories(State(st): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(st.store.menu_categories().await?))
}

pub(crate) async fn get_item(
    State(st): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MenuItem>> {
    st.store
        .fetch_menu_item(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("item not found"))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

pub(crate) async fn create_item(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiJson(req): ApiJson<CreateMenuItemRequest>,
) -> ApiResult<(StatusCode, Json<MenuItem>)> {
    staff.require(&[Role::Admin])?;
    let now = Utc::now();
    let item = MenuItem {
        menu_item_id: Uuid::new_v4(),
        name: required_text("name", &req.name)?,
        description: req.description.trim().to_string(),
        category: required_text("category", &req.category)?,
        price_minor: check_price(req.price_minor)?,
        image_url: req.image_url.trim().to_string(),
        is_available: req.is_available,
        preparation_minutes: check_minutes(req.preparation_minutes)?,
        tags: clean_tags(req.tags)?,
        created_at: now,
        updated_at: now,
    };
    st.store.insert_menu_item(&item).await?;
    info!(menu_item_id = %item.menu_item_id, name = %item.name, "menu item created");
    Ok((StatusCode::CREATED, Json(item)))
}

pub(crate) async fn update_item(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateMenuItemRequest>,
) -> ApiResult<Json<MenuItem>> {
    staff.require(&[Role::Admin])?;
    let patch = MenuItemPatch {
        name: req.name.map(|n| required_text("name", &n)).transpose()?,
        description: req.description.map(|d| d.trim().to_string()),
        category: req
            .category
            .map(|c| required_text("category", &c))
            .transpose()?,
        price_minor: req.price_minor.map(check_price).transpose()?,
        image_url: req.image_url.map(|u| u.trim().to_string()),
        is_available: req.is_available,
        preparation_minutes: req.preparation_minutes.map(check_minutes).transpose()?,
        tags: req.tags.map(clean_tags).transpose()?,
    };
    let item = st
        .store
        .update_menu_item(id, &patch, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("item not found"))?;
    info!(menu_item_id = %id, "menu item updated");
    Ok(Json(item))
}

pub(crate) async fn toggle_availability(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MenuItem>> {
    staff.require(&[Role::Admin])?;
    let item = st
        .store
        .toggle_menu_item_availability(id, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("item not found"))?;
    info!(menu_item_id = %id, is_available = item.is_available, "menu item availability toggled");
    Ok(Json(item))
}

pub(crate) async fn delete_item(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    staff.require(&[Role::Admin])?;
    if !st.store.delete_menu_item(id).await? {
        return Err(ApiError::not_found("item not found"));
    }
    info!(menu_item_id = %id, "menu item deleted");
    Ok(Json(MessageResponse::new("item deleted")))
}
