use crate::db;
use crate::domain::permissions::ROLE_MEMBER;
use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::client_key;
use crate::services::codes::CodePurpose;
use crate::state::SharedState;
use crate::web::session;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub email_verified: bool,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub full_name: String,
    pub email_verified: bool,
    pub role: Option<String>,
    pub permissions: Vec<String>,
    pub token: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/verify-email", post(verify_email))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .with_state(state)
}

pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !valid {
        return Err(AppError::validation("a valid email address is required"));
    }
    Ok(email)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();
    Ok(hash)
}

pub fn password_matches(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash could not be parsed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

async fn throttle(state: &SharedState, scope: &str, addr: Option<&ConnectInfo<SocketAddr>>) -> AppResult<()> {
    let key = client_key(scope, addr);
    if !state.auth_limiter.check(&key).await {
        tracing::warn!("Rate limit exceeded for {}", key);
        return Err(AppError::RateLimited);
    }
    Ok(())
}

async fn send_code(state: &SharedState, purpose: CodePurpose, email: &str) {
    let code = state.codes.issue(purpose, email).await;
    let (subject, body) = match purpose {
        CodePurpose::VerifyEmail => (
            "Confirm your email",
            format!("Your verification code is {code}. It expires soon."),
        ),
        CodePurpose::ResetPassword => (
            "Reset your password",
            format!("Your password reset code is {code}. Ignore this message if you did not ask for it."),
        ),
    };
    if let Err(e) = state.mailer.send(email, subject, &body).await {
        tracing::error!("Failed to send {:?} code to {}: {}", purpose, email, e);
    }
}

async fn register(
    addr: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    throttle(&state, "register", addr.as_ref()).await?;

    let email = normalize_email(&payload.email)?;
    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::validation("full_name is required"));
    }
    let hash = hash_password(&payload.password)?;

    if db::find_user_by_email(&state.pool, &email).await?.is_some() {
        return Err(AppError::Conflict("email is already registered".to_string()));
    }
    let member_role = db::find_role_by_name(&state.pool, ROLE_MEMBER).await?.map(|r| r.id);
    if member_role.is_none() {
        tracing::warn!("Default role {} is missing; registering user without a role", ROLE_MEMBER);
    }

    let user_id = db::insert_user(&state.pool, &email, &hash, full_name, member_role).await?;
    send_code(&state, CodePurpose::VerifyEmail, &email).await;

    tracing::info!("Registered user {}", user_id);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            email_verified: false,
        }),
    ))
}

async fn verify_email(
    addr: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AppResult<StatusCode> {
    throttle(&state, "verify", addr.as_ref()).await?;

    let email = normalize_email(&payload.email)?;
    if !state.codes.consume(CodePurpose::VerifyEmail, &email, payload.code.trim()).await {
        return Err(AppError::validation("invalid or expired code"));
    }
    let user = db::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    db::mark_email_verified(&state.pool, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn login(
    addr: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    throttle(&state, "login", addr.as_ref()).await?;

    let email = payload.email.trim().to_lowercase();
    let user = db::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or(AppError::Unauthenticated)?;
    if !password_matches(&payload.password, &user.hash) {
        return Err(AppError::Unauthenticated);
    }
    if !user.is_active {
        return Err(AppError::Forbidden("account is deactivated".to_string()));
    }

    let role = match user.role_id {
        Some(role_id) => db::load_role_grant(&state.pool, role_id).await?,
        None => None,
    };
    let mut permissions: Vec<String> = role
        .as_ref()
        .map(|r| r.permissions.iter().cloned().collect())
        .unwrap_or_default();
    permissions.sort();

    let token = session::sign_session(user.id, &state.session_key, state.session_ttl_hours)
        .map_err(|e| AppError::Internal(e.into()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        session::session_cookie(&token, state.session_ttl_hours, state.secure_cookies)?,
    );

    tracing::info!("User {} logged in", user.id);
    Ok((
        headers,
        Json(LoginResponse {
            user_id: user.id,
            full_name: user.full_name,
            email_verified: user.email_verified,
            role: role.map(|r| r.name),
            permissions,
            token,
        }),
    ))
}

async fn logout(State(state): State<SharedState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session::expired_cookie(state.secure_cookies));
    (StatusCode::NO_CONTENT, headers)
}

async fn forgot_password(
    addr: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<StatusCode> {
    throttle(&state, "forgot", addr.as_ref()).await?;

    // Unknown addresses get the same answer so accounts cannot be probed.
    let email = payload.email.trim().to_lowercase();
    if let Some(user) = db::find_user_by_email(&state.pool, &email).await? {
        if user.is_active {
            send_code(&state, CodePurpose::ResetPassword, &email).await;
        }
    }
    Ok(StatusCode::ACCEPTED)
}

async fn reset_password(
    addr: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    throttle(&state, "reset", addr.as_ref()).await?;

    let email = normalize_email(&payload.email)?;
    let hash = hash_password(&payload.new_password)?;
    if !state.codes.consume(CodePurpose::ResetPassword, &email, payload.code.trim()).await {
        return Err(AppError::validation("invalid or expired code"));
    }
    let user = db::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    db::update_password_hash(&state.pool, user.id, &hash).await?;

    tracing::info!("Password reset for user {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ana@Example.COM ").unwrap(), "ana@example.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("ana@localhost").is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(password_matches("correct horse", &hash));
        assert!(!password_matches("wrong horse", &hash));
        assert!(!password_matches("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(matches!(hash_password("short"), Err(AppError::Validation(_))));
    }
}
