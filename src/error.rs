use crate::domain::appointments::AppointmentError;
use crate::domain::permissions::AccessDenied;
use crate::domain::scoring::ScoringError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Data(String),
    #[error("too many requests, try again later")]
    RateLimited,
    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Data(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Data(_) => "data_error",
            AppError::RateLimited => "rate_limited",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: self.code(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

fn classify_database(e: &sqlx::Error) -> Option<AppError> {
    let code = e.as_database_error()?.code()?;
    match code.as_ref() {
        UNIQUE_VIOLATION => Some(AppError::Conflict("record already exists".to_string())),
        FOREIGN_KEY_VIOLATION => Some(AppError::Conflict(
            "record is still referenced or references a missing record".to_string(),
        )),
        _ => None,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        classify_database(&e).unwrap_or_else(|| AppError::Internal(e.into()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(mapped) = e.downcast_ref::<sqlx::Error>().and_then(classify_database) {
            return mapped;
        }
        AppError::Internal(e)
    }
}

impl From<ScoringError> for AppError {
    fn from(e: ScoringError) -> Self {
        match e {
            ScoringError::NotFound(what) => AppError::NotFound(what),
            ScoringError::Validation(msg) => AppError::Validation(msg),
            ScoringError::Data(msg) => AppError::Data(msg),
        }
    }
}

impl From<AccessDenied> for AppError {
    fn from(e: AccessDenied) -> Self {
        AppError::Forbidden(e.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotAllowed(_) => AppError::Forbidden(e.to_string()),
            other => AppError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(AppError::not_found("response 4").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::validation("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("no".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Data("thresholds".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn scoring_errors_keep_their_kind() {
        let e: AppError = ScoringError::NotFound("option 9".into()).into();
        assert!(matches!(e, AppError::NotFound(ref w) if w == "option 9"));
        assert_eq!(e.to_string(), "option 9 not found");

        let e: AppError = ScoringError::Data("missing 'low' tier".into()).into();
        assert!(matches!(e, AppError::Data(_)));

        let e: AppError = ScoringError::Validation("x".into()).into();
        assert!(matches!(e, AppError::Validation(_)));
    }

    #[test]
    fn access_denied_is_forbidden() {
        let e: AppError = AccessDenied {
            required: "role 'Admin'".into(),
        }
        .into();
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn non_database_sqlx_errors_are_internal() {
        let e: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(e, AppError::Internal(_)));
        let e: AppError = anyhow::Error::new(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(e, AppError::Internal(_)));
    }
}
