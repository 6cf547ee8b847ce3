//! # Discord Webhook Integration
//!
//! This module reports scrape runs to a Discord channel. Every time the run
//! controller publishes its [`RunState`] the notifier turns it into a single
//! embed: one when a session starts, one when it ends.
//!
//! ## Embed Structure
//!
//! - **Title**: run started / finished / aborted
//! - **Description**: the run outcome, or the session id for a starting run
//! - **Color**: blue while working, green after a clean finish, red on abort
//! - **Fields**: result counters (processed, succeeded, failed, ...)
//! - **Timestamp**: when the message was built
//!
//! ## Rate Limits
//!
//! Discord webhooks accept 30 requests per minute. A run publishes twice, so
//! even a tight cron schedule stays well below that.
//!
//! ## Environment Configuration
//!
//! Set `DISCORD_WEBHOOK_URL` to enable notifications. If it is not set the
//! notifier logs a warning once and every publish becomes a no-op.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::models::{DiscordEmbed, DiscordField, DiscordMessage, RunState, RunStatus};
use crate::traits::StatusSink;

const COLOR_WORKING: u32 = 0x0058_65F2; // Discord blue
const COLOR_FINISHED: u32 = 0x0057_F287;
const COLOR_ABORTED: u32 = 0x00ED_4245;

/// Discord webhook client publishing run summaries.
///
/// ## Fields
///
/// - `client`: Reusable HTTP client for webhook requests
/// - `webhook_url`: Optional webhook URL; `None` disables the notifier
///
/// ## Thread Safety
///
/// The notifier is `Clone` and `Send + Sync`; it is shared with the run
/// controller as an `Arc<dyn StatusSink>`.
pub struct DiscordNotifier {
    /// Reusable HTTP client for making webhook requests to Discord's API.
    client: Client,

    /// Webhook URL, usually taken from `DISCORD_WEBHOOK_URL`.
    /// If `None`, all publish calls are skipped.
    webhook_url: Option<String>,
}

impl DiscordNotifier {
    /// Creates a notifier for the given webhook.
    ///
    /// ## Parameters
    ///
    /// - `webhook_url`: Full webhook URL from the Discord channel settings
    ///   (`https://discord.com/api/webhooks/{id}/{token}`), or `None` to
    ///   disable notifications
    ///
    /// ## Example
    ///
    /// ```rust
    /// use advert_harvester::discord::DiscordNotifier;
    ///
    /// // Disabled notifier, publishing is a no-op
    /// let notifier = DiscordNotifier::new(None);
    /// assert!(!notifier.is_enabled());
    /// ```
    pub fn new(webhook_url: Option<String>) -> Self {
        if webhook_url.is_none() {
            warn!("DISCORD_WEBHOOK_URL not set - Discord notifications will be disabled");
        }

        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Builds the embed describing `state`.
    ///
    /// A `Working` state announces the session; a `Stopped` state summarizes
    /// how the run ended and what it produced.
    pub fn build_embed(state: &RunState) -> DiscordEmbed {
        let session = state
            .session_id
            .map_or_else(|| "-".to_string(), |id| id.to_rfc3339());

        let (title, description, color) = match (&state.status, &state.last_outcome) {
            (RunStatus::Working, _) => (
                "🔎 Advert scrape started".to_string(),
                format!("Session {session}"),
                COLOR_WORKING,
            ),
            (RunStatus::Stopped, Some(outcome)) if outcome.is_fatal() => (
                "⛔ Advert scrape aborted".to_string(),
                outcome.to_string(),
                COLOR_ABORTED,
            ),
            (RunStatus::Stopped, outcome) => (
                "✅ Advert scrape finished".to_string(),
                outcome
                    .as_ref()
                    .map_or_else(|| "no outcome recorded".to_string(), ToString::to_string),
                COLOR_FINISHED,
            ),
        };

        let counter = |name: &str, value: u64| DiscordField {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        };

        let fields = if state.status == RunStatus::Working {
            Vec::new()
        } else {
            vec![
                counter("Results", state.total_results),
                counter("Processed", state.processed),
                counter("Succeeded", state.succeeded),
                counter("Failed", state.failed),
                counter("Not applicable", state.not_applicable),
                counter("Duplicates", state.duplicate_skipped),
                DiscordField {
                    name: "Session".to_string(),
                    value: session,
                    inline: false,
                },
            ]
        };

        DiscordEmbed {
            title,
            description,
            color,
            timestamp: Utc::now().to_rfc3339(),
            fields,
        }
    }
}

#[async_trait]
impl StatusSink for DiscordNotifier {
    /// Sends the run summary to the webhook.
    ///
    /// ## Error Handling
    ///
    /// - **Missing webhook URL**: returns `Ok(())` without a request
    /// - **Network failures**: propagated as `anyhow::Error`
    /// - **HTTP errors**: logged with the status code, not propagated
    async fn publish(&self, state: &RunState) -> Result<()> {
        if let Some(webhook_url) = &self.webhook_url {
            let message = DiscordMessage {
                embeds: vec![Self::build_embed(state)],
            };

            let response = self.client.post(webhook_url).json(&message).send().await?;

            if response.status().is_success() {
                info!("Discord notification sent for {} run", state.status);
            } else {
                error!("Failed to send Discord notification: {}", response.status());
            }
        }

        Ok(())
    }
}

/// Manual implementation of `Clone` for `DiscordNotifier`.
///
/// The `reqwest::Client` shares its connection pool between clones.
impl Clone for DiscordNotifier {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            webhook_url: self.webhook_url.clone(),
        }
    }
}
