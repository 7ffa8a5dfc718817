//! Best-effort admin notifications to a Slack-compatible incoming webhook.
//!
//! Delivery runs on a spawned task; failures are logged and dropped and never
//! reach the request that triggered them.

use std::time::Duration;

use serde_json::json;
use verse_core::{Tier, UserId};

/// Events worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    TipSucceeded {
        character_key: String,
        amount_cents: i64,
        message: Option<String>,
    },
    SubscriptionStarted {
        user_id: UserId,
        character_key: String,
        tier: Tier,
        provider: &'static str,
    },
    FounderClaimed {
        user_id: UserId,
        character_key: String,
        seat_number: u32,
        seats_total: u32,
    },
}

impl AdminEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AdminEvent::TipSucceeded { .. } => "tip_succeeded",
            AdminEvent::SubscriptionStarted { .. } => "subscription_started",
            AdminEvent::FounderClaimed { .. } => "founder_claimed",
        }
    }

    /// Message text posted to the channel.
    pub fn text(&self) -> String {
        match self {
            AdminEvent::TipSucceeded {
                character_key,
                amount_cents,
                message,
            } => {
                let dollars = format!("${}.{:02}", amount_cents / 100, amount_cents % 100);
                match message {
                    Some(m) => format!(":gift: {} tip for {}: \"{}\"", dollars, character_key, m),
                    None => format!(":gift: {} tip for {}", dollars, character_key),
                }
            }
            AdminEvent::SubscriptionStarted {
                user_id,
                character_key,
                tier,
                provider,
            } => format!(
                ":tada: New {} subscriber for {} via {} ({})",
                tier.as_str(),
                character_key,
                provider,
                user_id
            ),
            AdminEvent::FounderClaimed {
                user_id,
                character_key,
                seat_number,
                seats_total,
            } => format!(
                ":star: Founder seat {}/{} for {} claimed by {}",
                seat_number, seats_total, character_key, user_id
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Queue a notification. Never blocks and never fails.
    fn notify(&self, event: AdminEvent);
}

/// Posts to a Slack incoming webhook; a no-op when no URL is configured.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for notifications");
                reqwest::Client::new()
            });
        Self {
            client,
            webhook_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, event: AdminEvent) {
        let Some(url) = self.webhook_url.clone() else {
            tracing::debug!(kind = event.kind(), "Admin notifications disabled");
            return;
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&json!({ "text": event.text() }))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(kind = event.kind(), "Admin notification delivered");
                }
                Ok(response) => {
                    tracing::warn!(
                        kind = event.kind(),
                        status = %response.status(),
                        "Admin notification rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(kind = event.kind(), error = %e, "Admin notification failed");
                }
            }
        });
    }
}
