//! Outbound-messaging abstraction.

pub mod twilio;

use async_trait::async_trait;

pub use twilio::TwilioNotifier;

/// Result of a delivery attempt. Notifiers never return `Err` or panic;
/// failures come back here and the caller decides whether to count them.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Abstraction over the outbound messaging channel (SMS today).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to `to` (a channel address, e.g. an E.164 phone number).
    async fn send(&self, to: &str, body: &str) -> DeliveryOutcome;
}

/// Notifier that logs instead of sending. Used when no SMS provider is
/// configured (local development) and as a test double base.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, body: &str) -> DeliveryOutcome {
        tracing::info!(to, body, "Notification (log only)");
        DeliveryOutcome::ok()
    }
}
