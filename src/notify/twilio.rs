//! Twilio SMS notifier.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{DeliveryOutcome, Notifier};

/// Sends SMS through the Twilio Messages API.
pub struct TwilioNotifier {
    client: reqwest::Client,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
}

impl TwilioNotifier {
    pub fn new(account_sid: String, auth_token: SecretString, from_number: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            from_number,
        }
    }

    /// Build from `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` /
    /// `TWILIO_PHONE_NUMBER`. Returns `None` when any is unset, so callers
    /// fall back to the log notifier.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        let from_number = std::env::var("TWILIO_PHONE_NUMBER").ok()?;
        Some(Self::new(
            account_sid,
            SecretString::from(auth_token),
            from_number,
        ))
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, to: &str, body: &str) -> DeliveryOutcome {
        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(to, "SMS sent");
                DeliveryOutcome::ok()
            }
            Ok(resp) => {
                let status = resp.status();
                let detail = resp.text().await.unwrap_or_default();
                tracing::warn!(to, %status, "Twilio rejected message: {detail}");
                DeliveryOutcome::failed(format!("Twilio returned {status}"))
            }
            Err(e) => {
                tracing::warn!(to, "Twilio request failed: {e}");
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }
}
