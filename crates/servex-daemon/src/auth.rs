//! Staff authentication.
//!
//! - Passwords are stored as argon2id PHC strings.
//! - Sessions are HS256 JWTs (`header.payload.signature`, base64url without
//!   padding) signed with the configured secret. The token names the user;
//!   role and active flag are re-read from the store on every request so a
//!   deactivated account loses access immediately.
//! - Tokens are taken from `Authorization: Bearer` or, for SSE clients that
//!   cannot set headers, a `token` query parameter.

use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use servex_schemas::{Role, User};
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

pub const MIN_PASSWORD_CHARS: usize = 6;

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Trimmed, lower-cased email. `None` when it cannot be an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }
    if email.chars().any(char::is_whitespace) {
        return None;
    }
    Some(email)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => f.write_str("malformed token"),
            TokenError::BadSignature => f.write_str("bad token signature"),
            TokenError::Expired => f.write_str("token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct JwtKeys {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("secret", &"<REDACTED>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    fn mac(&self) -> HmacSha256 {
        match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac accepts any key length"),
        }
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.user_id,
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let payload = serde_json::to_vec(&claims)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(JWT_HEADER.as_bytes()),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{sig}"))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: serde_json::Value = URL_SAFE_NO_PAD
            .decode(header_b64)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(TokenError::Malformed)?;
        if header["alg"] != "HS256" {
            return Err(TokenError::Malformed);
        }

        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(TokenError::Malformed)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// An authenticated, active staff member.
#[derive(Debug, Clone)]
pub struct Staff(pub User);

impl Staff {
    /// 403 unless the user holds one of `roles`.
    pub fn require(&self, roles: &[Role]) -> ApiResult<&User> {
        if roles.contains(&self.0.role) {
            Ok(&self.0)
        } else {
            Err(ApiError::forbidden("not authorized for this action"))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Staff {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| query_token(parts.uri.query()))
            .ok_or_else(|| ApiError::unauthorized("not authorized"))?;

        let claims = state.jwt.verify(&token, Utc::now()).map_err(|err| {
            tracing::debug!(error = %err, "staff token rejected");
            ApiError::unauthorized("not authorized")
        })?;

        match state.store.fetch_user(claims.sub).await? {
            Some(user) if user.is_active => Ok(Staff(user)),
            _ => Err(ApiError::unauthorized("user not found or inactive")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            user_id: Uuid::new_v4(),
            email: "cook@servex.test".to_string(),
            name: "Cook".to_string(),
            role,
            password_hash: String::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_verifies_and_carries_claims() {
        let keys = JwtKeys::new("test-secret", 1);
        let now = Utc::now();
        let u = user(Role::Kitchen);
        let token = keys.issue(&u, now).unwrap();

        let claims = keys.verify(&token, now).unwrap();
        assert_eq!(claims.sub, u.user_id);
        assert_eq!(claims.role, Role::Kitchen);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_expires_after_ttl() {
        let keys = JwtKeys::new("test-secret", 1);
        let now = Utc::now();
        let token = keys.issue(&user(Role::Admin), now).unwrap();
        assert_eq!(
            keys.verify(&token, now + Duration::hours(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let now = Utc::now();
        let token = JwtKeys::new("secret-a", 1)
            .issue(&user(Role::Admin), now)
            .unwrap();
        assert_eq!(
            JwtKeys::new("secret-b", 1).verify(&token, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let keys = JwtKeys::new("test-secret", 1);
        let now = Utc::now();
        let token = keys.issue(&user(Role::Kitchen), now).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let mut claims: Claims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims.role = Role::Admin;
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
            parts[2]
        );
        assert_eq!(keys.verify(&forged, now), Err(TokenError::BadSignature));
        assert_eq!(keys.verify("a.b", now), Err(TokenError::Malformed));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("kitchen123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("kitchen123", &hash));
        assert!(!verify_password("kitchen124", &hash));
        assert!(!verify_password("kitchen123", "not-a-phc-string"));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(
            normalize_email("  Admin@ServeX.com "),
            Some("admin@servex.com".to_string())
        );
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("a@localhost"), None);
        assert_eq!(normalize_email("a b@x.com"), None);
    }

    #[test]
    fn token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi".to_string()));
        assert_eq!(
            query_token(Some("x=1&token=abc.def.ghi")),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(query_token(Some("token=")), None);
        assert_eq!(query_token(None), None);
    }
}
