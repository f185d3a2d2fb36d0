//! `/api/auth`: staff login, identity and account creation.

use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use servex_db::InsertUserOutcome;
use servex_schemas::{Role, User};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{LoginRequest, LoginResponse, RegisterRequest},
    auth::{hash_password, normalize_email, verify_password, Staff, MIN_PASSWORD_CHARS},
    error::{ApiError, ApiJson, ApiResult},
    rate_limit::{ClientIp, LimitClass},
    state::AppState,
};

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/register", post(register))
}

async fn check_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::from(anyhow!("password check task failed: {e}")))
}

pub(crate) async fn login(
    State(st): State<Arc<AppState>>,
    client: ClientIp,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    st.limiter.check(LimitClass::Auth, &client).await?;

    let invalid = || ApiError::unauthorized("invalid credentials");
    let email = normalize_email(&req.email).ok_or_else(invalid)?;
    let user = st.store.find_user_by_email(&email).await?.ok_or_else(invalid)?;
    if !check_password(req.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(ApiError::unauthorized("account deactivated"));
    }

    let token = st.jwt.issue(&user, Utc::now())?;
    info!(user_id = %user.user_id, role = user.role.as_str(), "staff login");
    Ok(Json(LoginResponse { token, user }))
}

pub(crate) async fn me(staff: Staff) -> Json<User> {
    Json(staff.0)
}

pub(crate) async fn register(
    State(st): State<Arc<AppState>>,
    staff: Staff,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let admin = staff.require(&[Role::Admin])?;

    let email = normalize_email(&req.email).ok_or_else(|| ApiError::bad_request("invalid email"))?;
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow!("password hash task failed: {e}"))??;

    let user = User {
        user_id: Uuid::new_v4(),
        email,
        name,
        role: req.role,
        password_hash,
        is_active: true,
        created_at: Utc::now(),
    };
    match st.store.insert_user(&user).await? {
        InsertUserOutcome::Created(user) => {
            info!(user_id = %user.user_id, created_by = %admin.user_id, role = user.role.as_str(), "staff user created");
            Ok((StatusCode::CREATED, Json(user)))
        }
        InsertUserOutcome::EmailTaken => Err(ApiError::conflict("user already exists")),
    }
}
