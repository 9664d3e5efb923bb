use crate::db;
use crate::domain::permissions::Principal;
use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap, HeaderValue},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "session";

#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub user_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

pub fn sign_session(user_id: Uuid, key: &[u8], ttl_hours: i64) -> Result<String, SessionError> {
    let exp = Utc::now() + Duration::hours(ttl_hours);
    let payload = format!("{}|{}", user_id, exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes).map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let (user_id, exp) = payload.split_once('|').ok_or(SessionError::Invalid)?;
    let user_id = Uuid::parse_str(user_id).map_err(|_| SessionError::Invalid)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims { user_id })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|pair| pair.trim().strip_prefix("session="))
                .map(str::to_string)
        })
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str, ttl_hours: i64, secure: bool) -> Result<HeaderValue, AppError> {
    let secure_flag = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{COOKIE_NAME}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure_flag}",
        ttl_hours * 3600
    ))
    .map_err(|e| AppError::Internal(e.into()))
}

pub fn expired_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; Secure")
    } else {
        HeaderValue::from_static("session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
    }
}

/// Loads the caller, with role and permissions, behind a valid session.
///
/// ```ignore
/// async fn handler(UserSession(principal): UserSession) -> AppResult<...> {
///     principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
/// }
/// ```
pub struct UserSession(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    crate::state::SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared_state = crate::state::SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(AppError::Unauthenticated)?;
        let claims = verify_session(&token, &shared_state.session_key).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            AppError::Unauthenticated
        })?;

        let user = db::find_user_by_id(&shared_state.pool, claims.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::Unauthenticated)?;

        let role = match user.role_id {
            Some(role_id) => db::load_role_grant(&shared_state.pool, role_id).await?,
            None => None,
        };

        Ok(UserSession(Principal {
            user_id: user.id,
            email: user.email,
            full_name: user.full_name,
            role,
        }))
    }
}
