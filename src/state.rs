use crate::crypto::Crypto;
use crate::middleware::RateLimiter;
use crate::services::codes::CodeStore;
use crate::services::mailer::Mailer;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub crypto: Arc<Crypto>,
    pub session_key: Vec<u8>,
    pub session_ttl_hours: i64,
    pub secure_cookies: bool,
    pub codes: CodeStore,
    pub mailer: Arc<dyn Mailer>,
    pub auth_limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;
