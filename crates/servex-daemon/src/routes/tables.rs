//! `/api/tables`: QR scan and session refresh for diners, table admin for staff.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use servex_db::{InsertTableOutcome, TablePatch, UpdateTableOutcome};
use servex_schemas::{DiningTable, Role, SessionStatus};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{
        CreateTableRequest, MessageResponse, QrResponse, TableScanResponse, UpdateTableRequest,
        ValidateSessionRequest, ValidateSessionResponse,
    },
    auth::Staff,
    error::{ApiError, ApiJson, ApiPath, ApiResult},
    qr,
    state::AppState,
    workflow::{self, WorkflowError},
};

const DEFAULT_CAPACITY: i32 = 4;

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tables", get(list_tables).post(create_table))
        .route(
            "/api/tables/:id",
            get(scan_table).patch(update_table).delete(delete_table),
        )
        .route("/api/tables/:id/validate-session", post(validate_session))
        .route("/api/tables/:id/regenerate-qr", post(regenerate_qr))
}

/// Positive and within `i32`.
fn positive(field: &str, value: i64) -> ApiResult<i32> {
    i32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ApiError::bad_request(format!("{field} must be a positive integer")))
}

// ---------------------------------------------------------------------------
// Diner endpoints
// ---------------------------------------------------------------------------

pub(crate) async fn scan_table(
    State(st): State<Arc<AppState>>,
    ApiPath(table_id): ApiPath<Uuid>,
) -> ApiResult<Json<TableScanResponse>> {
    let (table, session) = workflow::open_session(&st, table_id, Utc::now())
        .await
        .map_err(|err| match err {
            WorkflowError::TableUnavailable => ApiError::bad_request("table is currently inactive"),
            other => other.into(),
        })?;
    Ok(Json(TableScanResponse {
        table_id: table.table_id,
        table_number: table.table_number,
        is_active: table.is_active,
        capacity: table.capacity,
        session_token: session.session_token,
        expires_at: session.expires_at,
    }))
}

pub(crate) async fn validate_session(
    State(st): State<Arc<AppState>>,
    ApiPath(table_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ValidateSessionRequest>,
) -> ApiResult<Json<ValidateSessionResponse>> {
    let token = req.session_token.as_deref().map(str::trim).unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::bad_request("session token required"));
    }
    let session = workflow::refresh_session(&st, table_id, Some(token), Utc::now()).await?;
    Ok(Json(ValidateSessionResponse {
        valid: true,
        expires_at: session.expires_at,
    }))
}

// ---------------------------------------------------------------------------
// Admin endpoints
// ---------------------------------------------------------------------------

pub(crate) async fn list_tables(
    State(st): State<Arc<AppState>>,
    staff: Staff,
) -> ApiResult<Json<Vec<DiningTable>>> {
    staff.require(&[Role::Admin])?;
    Ok(Json(st.store.list_tables().await?))
}

pub(crate) async fn create_table(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiJson(req): ApiJson<CreateTableRequest>,
) -> ApiResult<(StatusCode, Json<DiningTable>)> {
    staff.require(&[Role::Admin])?;
    let table_number = positive("table_number", req.table_number)?;
    let capacity = match req.capacity {
        Some(c) => positive("capacity", c)?,
        None => DEFAULT_CAPACITY,
    };

    let table_id = Uuid::new_v4();
    let code = qr::generate_table_qr(&st.config.server.public_base_url, table_id)?;
    let now = Utc::now();
    let table = DiningTable {
        table_id,
        table_number,
        qr_code_url: code.image_url,
        qr_code_data: code.target,
        is_active: true,
        capacity,
        created_at: now,
        updated_at: now,
    };

    match st.store.insert_table(&table).await? {
        InsertTableOutcome::Created(table) => {
            info!(table_id = %table.table_id, table_number, "table created");
            Ok((StatusCode::CREATED, Json(table)))
        }
        InsertTableOutcome::NumberTaken => Err(ApiError::conflict("table number already exists")),
    }
}

pub(crate) async fn update_table(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(table_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateTableRequest>,
) -> ApiResult<Json<DiningTable>> {
    staff.require(&[Role::Admin])?;
    let patch = TablePatch {
        table_number: req
            .table_number
            .map(|n| positive("table_number", n))
            .transpose()?,
        capacity: req.capacity.map(|c| positive("capacity", c)).transpose()?,
        is_active: req.is_active,
    };

    match st.store.update_table(table_id, &patch, Utc::now()).await? {
        UpdateTableOutcome::Updated(table) => {
            info!(table_id = %table_id, is_active = table.is_active, "table updated");
            Ok(Json(table))
        }
        UpdateTableOutcome::NotFound => Err(ApiError::not_found("table not found")),
        UpdateTableOutcome::NumberTaken => Err(ApiError::conflict("table number already exists")),
    }
}

pub(crate) async fn delete_table(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(table_id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    staff.require(&[Role::Admin])?;
    if !st.store.delete_table(table_id).await? {
        return Err(ApiError::not_found("table not found"));
    }
    info!(table_id = %table_id, "table deleted");
    Ok(Json(MessageResponse::new("table deleted")))
}

/// New image, same target; every session of the table is expired.
pub(crate) async fn regenerate_qr(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiPath(table_id): ApiPath<Uuid>,
) -> ApiResult<Json<QrResponse>> {
    staff.require(&[Role::Admin])?;
    let code = qr::generate_table_qr(&st.config.server.public_base_url, table_id)?;
    let Some(table) = st
        .store
        .set_table_qr(table_id, &code.image_url, &code.target, Utc::now())
        .await?
    else {
        return Err(ApiError::not_found("table not found"));
    };
    let expired = st
        .store
        .set_sessions_status(table_id, None, SessionStatus::Expired)
        .await?;
    info!(table_id = %table_id, expired, "table qr regenerated");
    Ok(Json(QrResponse {
        qr_code_url: table.qr_code_url,
        qr_code_data: table.qr_code_data,
    }))
}
