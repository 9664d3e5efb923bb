pub mod appointments;
pub mod auth;
pub mod certificates;
pub mod courses;
pub mod enrollments;
pub mod notifications;
pub mod roles;
pub mod session;
pub mod surveys;
pub mod users;

use crate::state::SharedState;
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/users", users::router(state.clone()))
        .nest("/roles", roles::router(state.clone()))
        .nest("/courses", courses::router(state.clone()))
        .nest("/enrollments", enrollments::router(state.clone()))
        .nest("/appointments", appointments::router(state.clone()))
        .nest("/surveys", surveys::router(state.clone()))
        .nest("/notifications", notifications::router(state.clone()))
        .nest("/certificates", certificates::router(state))
}

/// `*` allows any origin without credentials; an explicit list allows cookies.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {}: {}", origin, e);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;
    use crate::middleware::RateLimiter;
    use crate::services::codes::CodeStore;
    use crate::services::mailer::testing::RecordingMailer;
    use crate::state::AppState;
    use axum::{body::Body, http::Request, http::StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    // Requests exercised here are all answered before any query runs, so the
    // pool never has to connect.
    fn test_state(auth_limit: usize) -> SharedState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        Arc::new(AppState {
            pool,
            crypto: Arc::new(Crypto::new(&[9u8; 32]).unwrap()),
            session_key: b"router-test-session-key".to_vec(),
            session_ttl_hours: 1,
            secure_cookies: false,
            codes: CodeStore::new(600),
            mailer: Arc::new(RecordingMailer::default()),
            auth_limiter: RateLimiter::new(auth_limit, 60),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = routes(test_state(5));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_a_session() {
        let app = routes(test_state(5));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "unauthenticated");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/surveys/responses/mine")
                    .header(header::AUTHORIZATION, "Bearer forged.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_rejects_short_passwords() {
        let app = routes(test_state(5));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"email":"new@example.com","password":"short","full_name":"New User"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn auth_endpoints_are_rate_limited() {
        let app = routes(test_state(0));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":"a@example.com","password":"whatever1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn certificate_codes_must_be_uuids() {
        let app = routes(test_state(5));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/certificates/verify/not-a-code")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cors_accepts_wildcard_or_list() {
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&["https://app.example.com".to_string(), "bad\nvalue".to_string()]);
    }
}
