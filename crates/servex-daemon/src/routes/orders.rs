//! `/api/orders`: placement and tracking for diners, board and reports for staff.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use servex_db::OrderQuery;
use servex_schemas::{Order, OrderStatus, Role};
use uuid::Uuid;

use crate::{
    api_types::{
        AnalyticsResponse, OrderListQuery, OrderListResponse, OrderResponse, Pagination,
        PlaceOrderRequest, StatusUpdateRequest, SummaryTotals,
    },
    auth::Staff,
    error::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResult},
    rate_limit::{ClientIp, LimitClass},
    state::AppState,
    workflow,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const TOP_ITEMS: usize = 10;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/orders", get(list_orders).post(place_order))
        .route("/api/orders/kitchen/active", get(kitchen_active))
        .route("/api/orders/analytics/summary", get(analytics_summary))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/status", patch(update_status))
}

fn parse_status(raw: &str) -> ApiResult<OrderStatus> {
    OrderStatus::parse(raw.trim()).map_err(|_| ApiError::bad_request("invalid status"))
}

// ---------------------------------------------------------------------------
// Diner endpoints
// ---------------------------------------------------------------------------

pub(crate) async fn place_order(
    State(st): State<Arc<AppState>>,
    client: ClientIp,
    ApiJson(req): ApiJson<PlaceOrderRequest>,
) -> ApiResult<(StatusCode, Json<OrderResponse>)> {
    st.limiter.check(LimitClass::Orders, &client).await?;
    let order = workflow::place_order(&st, req, Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            message: "order created; proceed to payment".to_string(),
            order,
        }),
    ))
}

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    ApiPath(order_id): ApiPath<Uuid>,
) -> ApiResult<Json<Order>> {
    st.store
        .fetch_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("order not found"))
}

// ---------------------------------------------------------------------------
// Staff endpoints
// ---------------------------------------------------------------------------

pub(crate) async fn kitchen_active(
    State(st): State<Arc<AppState>>,
    staff: Staff,
) -> ApiResult<Json<Vec<Order>>> {
    staff.require(&[Role::Admin, Role::Kitchen])?;
    Ok(Json(st.store.list_kitchen_orders().await?))
}

pub(crate) async fn update_status(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(order_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<StatusUpdateRequest>,
) -> ApiResult<Json<Order>> {
    let user = staff.require(&[Role::Admin, Role::Kitchen])?;
    let target = parse_status(&req.status)?;
    tracing::debug!(order_id = %order_id, user_id = %user.user_id, to = %target, "status change requested");
    let order = workflow::update_status(&st, order_id, target, Utc::now()).await?;
    Ok(Json(order))
}

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiQuery(q): ApiQuery<OrderListQuery>,
) -> ApiResult<Json<OrderListResponse>> {
    staff.require(&[Role::Admin])?;
    let query = OrderQuery {
        status: q
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_status)
            .transpose()?,
        page: q.page.unwrap_or(1).max(1),
        limit: q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    };
    let page = st.store.list_orders(&query).await?;
    let limit = i64::from(query.limit);
    Ok(Json(OrderListResponse {
        orders: page.orders,
        pagination: Pagination {
            page: query.page,
            limit: query.limit,
            total: page.total,
            pages: (page.total + limit - 1) / limit,
        },
    }))
}

pub(crate) async fn analytics_summary(
    State(st): State<Arc<AppState>>,
    staff: Staff,
) -> ApiResult<Json<AnalyticsResponse>> {
    staff.require(&[Role::Admin])?;
    let summary = st.store.sales_summary(TOP_ITEMS).await?;
    Ok(Json(AnalyticsResponse {
        summary: SummaryTotals {
            total_orders: summary.total_orders,
            total_revenue_minor: summary.total_revenue_minor,
            avg_order_value_minor: summary.avg_order_value_minor,
        },
        top_items: summary.top_items,
    }))
}
