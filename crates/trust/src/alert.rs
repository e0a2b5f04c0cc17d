use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::fraud::Severity;

pub use crate::fraud::Severity as AlertSeverity;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// One outbound alert channel (email, chat webhook, ...). Failures are
/// retried by [`AlertNotifier`]; a channel only reports success/failure of a
/// single attempt.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, subject: &str, body: &str) -> Result<(), String>;
}

/// Severity-routed outbound alerting with retry+backoff.
///
/// Routing: `critical` reaches every enabled channel; `high` reaches the
/// chat channel only; `medium`/`low` are logged and never paged.
pub struct AlertNotifier {
    chat_channels: Vec<Box<dyn AlertChannel>>,
    email_channels: Vec<Box<dyn AlertChannel>>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl AlertNotifier {
    pub fn new(
        chat_channels: Vec<Box<dyn AlertChannel>>,
        email_channels: Vec<Box<dyn AlertChannel>>,
    ) -> Self {
        Self {
            chat_channels,
            email_channels,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    pub fn with_retry_policy(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = base_delay;
        self
    }

    /// Route `subject`/`body` by `severity`. Never propagates a failure:
    /// every channel exhausts its retries independently and logs on final
    /// failure.
    pub async fn notify(&self, severity: Severity, subject: &str, body: &str) {
        match severity {
            Severity::Critical => {
                for channel in self.chat_channels.iter().chain(self.email_channels.iter()) {
                    self.send_with_retry(channel.as_ref(), subject, body).await;
                }
            }
            Severity::High => {
                for channel in &self.chat_channels {
                    self.send_with_retry(channel.as_ref(), subject, body).await;
                }
            }
            Severity::Medium | Severity::Low => {
                info!(severity = severity.as_str(), subject, "alert (log only)");
            }
        }
    }

    async fn send_with_retry(&self, channel: &dyn AlertChannel, subject: &str, body: &str) {
        for attempt in 0..self.retry_attempts {
            match channel.send(subject, body).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(channel = channel.name(), attempt, %err, "alert delivery failed");
                    if attempt + 1 < self.retry_attempts {
                        let delay = self.retry_delay * 2u32.pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        error!(channel = channel.name(), subject, "alert delivery exhausted retries");
    }
}

/// An [`AlertChannel`] that only logs; used where no webhook/email is
/// configured, or in tests.
pub struct NullAlertNotifier;

#[async_trait]
impl AlertChannel for NullAlertNotifier {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn send(&self, subject: &str, _body: &str) -> Result<(), String> {
        info!(subject, "alert (null channel)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyChannel {
        name: &'static str,
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AlertChannel for FlakyChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, _subject: &str, _body: &str) -> Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err("simulated failure".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn critical_reaches_chat_and_email() {
        let chat_calls = Arc::new(AtomicU32::new(0));
        let email_calls = Arc::new(AtomicU32::new(0));
        let notifier = AlertNotifier::new(
            vec![Box::new(FlakyChannel {
                name: "chat",
                fail_times: 0,
                calls: chat_calls.clone(),
            })],
            vec![Box::new(FlakyChannel {
                name: "email",
                fail_times: 0,
                calls: email_calls.clone(),
            })],
        )
        .with_retry_policy(1, Duration::from_millis(1));

        notifier.notify(Severity::Critical, "subject", "body").await;
        assert_eq!(chat_calls.load(Ordering::SeqCst), 1);
        assert_eq!(email_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn high_reaches_chat_only() {
        let chat_calls = Arc::new(AtomicU32::new(0));
        let email_calls = Arc::new(AtomicU32::new(0));
        let notifier = AlertNotifier::new(
            vec![Box::new(FlakyChannel {
                name: "chat",
                fail_times: 0,
                calls: chat_calls.clone(),
            })],
            vec![Box::new(FlakyChannel {
                name: "email",
                fail_times: 0,
                calls: email_calls.clone(),
            })],
        )
        .with_retry_policy(1, Duration::from_millis(1));

        notifier.notify(Severity::High, "subject", "body").await;
        assert_eq!(chat_calls.load(Ordering::SeqCst), 1);
        assert_eq!(email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let notifier = AlertNotifier::new(
            vec![Box::new(FlakyChannel {
                name: "chat",
                fail_times: 2,
                calls: calls.clone(),
            })],
            vec![],
        )
        .with_retry_policy(3, Duration::from_millis(1));

        notifier.notify(Severity::Critical, "subject", "body").await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
