use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

const MAX_SEND_ATTEMPTS: u32 = 3;
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Outbound messages to the chat platform. Unreachable users are tolerated;
/// implementations must never fail a transaction because a message could not
/// be delivered.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error>;
}

pub struct TelegramNotifier {
    api_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(api_url: String, bot_token: String) -> Self {
        Self {
            api_url,
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn retry_after(body: &str) -> u64 {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.pointer("/parameters/retry_after").and_then(|n| n.as_u64()))
            .unwrap_or(1)
            .min(MAX_RETRY_AFTER_SECS)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let payload = json!({"chat_id": user_id, "text": text});

        // Bounded retry loop; rate limits honour the indicated delay instead
        // of resending recursively.
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            let response = self.client.post(&url).json(&payload).send().await?;
            let status = response.status();

            match status {
                s if s.is_success() => return Ok(()),
                StatusCode::TOO_MANY_REQUESTS => {
                    let body = response.text().await.unwrap_or_default();
                    let delay = Self::retry_after(&body);
                    log::warn!(
                        "Rate limited sending to user {}; retrying in {}s (attempt {}/{})",
                        user_id,
                        delay,
                        attempt,
                        MAX_SEND_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                    // Blocked bot or deactivated account; non-fatal.
                    log::warn!("User {} unreachable: {}", user_id, status);
                    return Ok(());
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Chat platform error for user {}: {} {}", user_id, status, body)
                }
            }
        }

        anyhow::bail!("Gave up sending to user {} after {} attempts", user_id, MAX_SEND_ATTEMPTS)
    }
}

/// Notifier that drops everything; used where delivery is irrelevant.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _user_id: i64, _text: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
