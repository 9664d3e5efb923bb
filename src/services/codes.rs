//! Short-lived verification codes (email confirmation, password reset).
//!
//! Codes live in memory with a fixed TTL and are single use. A restart drops
//! all outstanding codes, which only forces users to request a new one.
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePurpose {
    VerifyEmail,
    ResetPassword,
}

#[derive(Debug, Clone)]
struct Entry {
    code: String,
    issued_at: Instant,
}

#[derive(Clone)]
pub struct CodeStore {
    entries: Arc<RwLock<HashMap<(CodePurpose, String), Entry>>>,
    ttl: Duration,
}

impl CodeStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Issues a fresh 6-digit code, replacing any outstanding one for the same key.
    pub async fn issue(&self, purpose: CodePurpose, email: &str) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let mut entries = self.entries.write().await;
        entries.insert(
            (purpose, email.to_string()),
            Entry {
                code: code.clone(),
                issued_at: Instant::now(),
            },
        );
        code
    }

    /// Consumes the code if it matches and has not expired.
    /// A wrong guess leaves the outstanding code in place.
    pub async fn consume(&self, purpose: CodePurpose, email: &str, code: &str) -> bool {
        let key = (purpose, email.to_string());
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get(&key) else {
            return false;
        };
        if entry.issued_at.elapsed() >= self.ttl {
            entries.remove(&key);
            return false;
        }
        if entry.code != code.trim() {
            return false;
        }
        entries.remove(&key);
        true
    }

    /// Drops expired codes; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.issued_at.elapsed() < self.ttl);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn codes_are_single_use() {
        let store = CodeStore::new(60);
        let code = store.issue(CodePurpose::VerifyEmail, "a@example.com").await;
        assert_eq!(code.len(), 6);

        assert!(store.consume(CodePurpose::VerifyEmail, "a@example.com", &code).await);
        assert!(!store.consume(CodePurpose::VerifyEmail, "a@example.com", &code).await);
    }

    #[tokio::test]
    async fn purpose_and_email_scope_the_code() {
        let store = CodeStore::new(60);
        let code = store.issue(CodePurpose::ResetPassword, "a@example.com").await;

        assert!(!store.consume(CodePurpose::VerifyEmail, "a@example.com", &code).await);
        assert!(!store.consume(CodePurpose::ResetPassword, "b@example.com", &code).await);
        assert!(store.consume(CodePurpose::ResetPassword, "a@example.com", &code).await);
    }

    #[tokio::test]
    async fn wrong_guess_keeps_code_alive() {
        let store = CodeStore::new(60);
        let code = store.issue(CodePurpose::VerifyEmail, "a@example.com").await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert!(!store.consume(CodePurpose::VerifyEmail, "a@example.com", wrong).await);
        assert!(store.consume(CodePurpose::VerifyEmail, "a@example.com", &code).await);
    }

    #[tokio::test]
    async fn reissue_replaces_previous_code() {
        let store = CodeStore::new(60);
        let first = store.issue(CodePurpose::VerifyEmail, "a@example.com").await;
        let second = store.issue(CodePurpose::VerifyEmail, "a@example.com").await;
        if first != second {
            assert!(!store.consume(CodePurpose::VerifyEmail, "a@example.com", &first).await);
        }
        assert!(store.consume(CodePurpose::VerifyEmail, "a@example.com", &second).await);
    }

    #[tokio::test]
    async fn expired_codes_are_rejected_and_purged() {
        let store = CodeStore::new(1);
        let code = store.issue(CodePurpose::VerifyEmail, "a@example.com").await;
        store.issue(CodePurpose::ResetPassword, "b@example.com").await;

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!store.consume(CodePurpose::VerifyEmail, "a@example.com", &code).await);
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.entries.read().await.len(), 0);
    }
}
