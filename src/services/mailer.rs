use async_trait::async_trait;

/// Outbound mail seam. Delivery itself belongs to whatever transport is plugged in.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(%to, %subject, "Outbound mail: {}", body);
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Captures sent messages for assertions.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn recording_mailer_keeps_messages() {
        let mailer = RecordingMailer::default();
        mailer.send("a@example.com", "Hi", "Body").await.unwrap();
        assert_eq!(mailer.sent.lock().await.len(), 1);
        assert!(LogMailer.send("a@example.com", "Hi", "Body").await.is_ok());
    }
}
