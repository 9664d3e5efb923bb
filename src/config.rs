use base64::{engine::general_purpose, Engine as _};
use std::{env, fmt::Display, str::FromStr};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub session_ttl_hours: i64,
    pub enc_key: Vec<u8>,
    pub verification_code_ttl_secs: u64,
    pub cors_origins: Vec<String>,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| {
            let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
            format!("0.0.0.0:{port}")
        });

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            bind_addr,
            session_key: base64_var("SESSION_KEY")?,
            session_ttl_hours: parsed("SESSION_TTL_HOURS", 24)?,
            enc_key: base64_var("APP_ENC_KEY")?,
            verification_code_ttl_secs: parsed("VERIFICATION_CODE_TTL_SECS", 600)?,
            cors_origins: parse_origins(&env::var("CORS_ORIGINS").unwrap_or_default()),
            secure_cookies: is_production(),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn base64_var(key: &'static str) -> Result<Vec<u8>, ConfigError> {
    let raw = required(key)?;
    general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("must be base64 ({e})"),
        })
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

/// Secure cookies are only sent over HTTPS, so enable them on hosted platforms only.
fn is_production() -> bool {
    ["PRODUCTION", "RAILWAY_ENVIRONMENT", "RENDER", "FLY_APP_NAME"]
        .iter()
        .any(|key| env::var(key).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_trimmed() {
        assert_eq!(
            parse_origins(" https://a.example, https://b.example ,,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn defaults_apply_when_unset() {
        let value: u64 = parsed("MINDPATH_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn missing_required_is_reported() {
        let err = required("MINDPATH_TEST_MISSING_KEY").unwrap_err();
        assert_eq!(err.to_string(), "MINDPATH_TEST_MISSING_KEY missing");
    }
}
