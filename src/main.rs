mod config;
mod crypto;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod time_utils;
mod web;

use crate::config::Config;
use crate::middleware::RateLimiter;
use crate::services::codes::CodeStore;
use crate::services::mailer::LogMailer;
use crate::state::SharedState;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Login, registration and code requests allowed per IP per window.
const AUTH_ATTEMPTS: usize = 5;
const AUTH_WINDOW_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    let shared: SharedState = Arc::new(state::AppState {
        pool,
        crypto: Arc::new(crypto::Crypto::new(&config.enc_key)?),
        session_key: config.session_key.clone(),
        session_ttl_hours: config.session_ttl_hours,
        secure_cookies: config.secure_cookies,
        codes: CodeStore::new(config.verification_code_ttl_secs),
        mailer: Arc::new(LogMailer),
        auth_limiter: RateLimiter::new(AUTH_ATTEMPTS, AUTH_WINDOW_SECS),
    });

    let scheduler = JobScheduler::new().await?;

    // Appointment reminders - every 15 minutes
    let shared_for_reminders = shared.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let state = shared_for_reminders.clone();
            Box::pin(async move {
                match services::appointments::send_reminders(&state.pool).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!("Sent reminders for {} appointments", count),
                    Err(e) => tracing::error!("Failed to send appointment reminders: {}", e),
                }
            })
        })?)
        .await?;

    // Expired codes and rate limiter history - hourly
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                let purged = state.codes.purge_expired().await;
                if purged > 0 {
                    tracing::info!("Purged {} expired verification codes", purged);
                }
                state.auth_limiter.cleanup().await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Appointment reminders: every 15 min");
    tracing::info!("  - Code and rate limiter cleanup: hourly");

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .layer(web::cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
