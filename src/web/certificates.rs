use crate::db::{self, certificates::DbCertificate};
use crate::domain::permissions::{Requirement, CERTIFICATE_ISSUE};
use crate::error::{AppError, AppResult};
use crate::services::enrollments;
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct IssueRequest {
    pub enrollment_id: i64,
}

/// Public view of a certificate; no internal ids.
#[derive(Serialize)]
pub struct CertificateVerification {
    pub valid: bool,
    pub holder_name: String,
    pub course_title: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_mine))
        .route("/issue", post(issue))
        .route("/verify/:code", get(verify))
        .with_state(state)
}

async fn list_mine(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbCertificate>>> {
    Ok(Json(
        db::certificates::list_for_user(&state.pool, principal.user_id).await?,
    ))
}

async fn verify(
    State(state): State<SharedState>,
    Path(code): Path<Uuid>,
) -> AppResult<Json<CertificateVerification>> {
    let certificate = db::certificates::find_by_code(&state.pool, code)
        .await?
        .ok_or_else(|| AppError::not_found("certificate"))?;
    Ok(Json(CertificateVerification {
        valid: true,
        holder_name: certificate.holder_name,
        course_title: certificate.course_title,
        issued_at: certificate.issued_at,
    }))
}

async fn issue(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<IssueRequest>,
) -> AppResult<Json<DbCertificate>> {
    principal.authorize(&Requirement::permission(CERTIFICATE_ISSUE))?;
    let certificate = enrollments::issue_certificate(&state.pool, payload.enrollment_id).await?;
    tracing::info!(
        "Certificate {} issued manually by {}",
        certificate.id,
        principal.user_id
    );
    Ok(Json(certificate))
}
