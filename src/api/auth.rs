//! Admin login sessions.
//!
//! A successful login issues an opaque `{unix_seconds}_{8 hex}` token in the
//! `admin_session` cookie. Tokens live in memory until they expire or the
//! admin logs out.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use super::extract::ApiJson;
use super::state::AppState;
use crate::utils::now_utc;

pub const SESSION_COOKIE: &str = "admin_session";

/// `now + ttl`, saturating at the latest representable instant.
fn expiry_after(now: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Live admin sessions keyed by token.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, OffsetDateTime>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token valid for `ttl`.
    pub fn create(&self, ttl: Duration) -> String {
        let now = now_utc();
        let suffix = Uuid::new_v4().simple().to_string();
        let token = format!("{}_{}", now.unix_timestamp(), &suffix[..8]);
        self.sessions.insert(token.clone(), expiry_after(now, ttl));
        token
    }

    /// Whether `token` names a live session. Expired sessions are dropped.
    pub fn is_valid(&self, token: &str) -> bool {
        let now = now_utc();
        match self.sessions.get(token).map(|expiry| *expiry) {
            Some(expiry) if expiry > now => true,
            Some(_) => {
                self.sessions.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now_utc();
        let before = self.sessions.len();
        self.sessions.retain(|_, expiry| *expiry > now);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Value of the session cookie, if the request carries one.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthRequest {
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

fn with_cookie(body: AuthResponse, cookie: String) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::Internal(format!("invalid cookie header: {e}")))?;
    let mut response = Json(body).into_response();
    response.headers_mut().insert(SET_COOKIE, value);
    Ok(response)
}

/// Log in with the shared admin password.
#[utoipa::path(
    post,
    path = "/api/v1/admin/auth",
    tag = "admin",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = AuthResponse),
        (status = 401, description = "Invalid password", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AuthRequest>,
) -> Result<Response, ApiError> {
    let settings = &state.settings;
    if request.password != settings.admin_password {
        warn!("Rejected admin login");
        return Err(ApiError::Unauthorized("Invalid password".to_string()));
    }

    let token = state.sessions.create(settings.session_ttl);
    info!("Admin logged in");
    with_cookie(
        AuthResponse {
            success: true,
            message: "Login successful".to_string(),
        },
        session_cookie(&token, settings.session_ttl.as_secs(), settings.cookie_secure),
    )
}

/// Log out and clear the session cookie.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/auth",
    tag = "admin",
    responses((status = 200, description = "Logged out", body = AuthResponse))
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.sessions.revoke(&token);
    }
    with_cookie(
        AuthResponse {
            success: true,
            message: "Logged out".to_string(),
        },
        session_cookie("", 0, state.settings.cookie_secure),
    )
}

/// Reject requests without a live admin session.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.settings.admin_auth_required {
        let authenticated = session_token(request.headers())
            .is_some_and(|token| state.sessions.is_valid(&token));
        if !authenticated {
            return Err(ApiError::Unauthorized("Not authenticated".to_string()));
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_timestamp_and_hex_suffix() {
        let sessions = SessionStore::new();
        let token = sessions.create(Duration::from_secs(60));
        let (secs, suffix) = token.split_once('_').unwrap();
        assert!(secs.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(sessions.is_valid(&token));
    }

    #[test]
    fn expired_and_revoked_sessions_are_invalid() {
        let sessions = SessionStore::new();
        let expired = sessions.create(Duration::ZERO);
        assert!(!sessions.is_valid(&expired));
        assert!(sessions.is_empty());

        let live = sessions.create(Duration::from_secs(60));
        assert!(sessions.revoke(&live));
        assert!(!sessions.is_valid(&live));
    }

    #[test]
    fn oversized_ttl_saturates() {
        let sessions = SessionStore::new();
        let token = sessions.create(Duration::MAX);
        assert!(sessions.is_valid(&token));
        assert_eq!(
            expiry_after(now_utc(), Duration::from_secs(u64::MAX)),
            PrimitiveDateTime::MAX.assume_utc()
        );
    }

    #[test]
    fn purge_drops_only_expired() {
        let sessions = SessionStore::new();
        sessions.create(Duration::ZERO);
        sessions.create(Duration::from_secs(60));
        assert_eq!(sessions.purge_expired(), 1);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn finds_session_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; admin_session=1700000000_deadbeef; x=1"),
        );
        assert_eq!(
            session_token(&headers).as_deref(),
            Some("1700000000_deadbeef")
        );
        assert!(session_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn cookie_attributes() {
        assert_eq!(
            session_cookie("t", 86400, false),
            "admin_session=t; HttpOnly; SameSite=Lax; Path=/; Max-Age=86400"
        );
        assert!(session_cookie("t", 10, true).ends_with("; Secure"));
    }
}
