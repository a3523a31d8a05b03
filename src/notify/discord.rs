// src/notify/discord.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{NotificationChannel, NotificationId};
use crate::error::ChannelError;
use crate::listing::ListingRecord;

const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const EMBED_COLOR: u32 = 0x00FF00;

/// Upper bound accepted for `DiscordSettings::retries`.
pub const MAX_RETRIES: u8 = 8;

/// Pause before retry number `attempt` (1-based): 500ms, 1s, 2s, ...
pub fn retry_backoff(attempt: u8) -> Duration {
    Duration::from_millis(500u64 << attempt.saturating_sub(1).min(MAX_RETRIES))
}

pub const DEFAULT_ICON_URL: &str = "https://static.fab.com/static/builds/web/dist/frontend/assets/images/common/favicon/55950a2ddbbaa3937c5a48b0bd460965-v1.png";

/// Presentation knobs for the webhook messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub username: String,
    pub avatar_url: Option<String>,
    pub footer: String,
    /// Base used to build the listing link in the embed title.
    pub listing_base_url: String,
    pub retries: u8,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            username: "Fab Tracker".into(),
            avatar_url: Some(DEFAULT_ICON_URL.into()),
            footer: "Fab Tracker".into(),
            listing_base_url: "https://www.fab.com/".into(),
            retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct DiscordChannel {
    webhook: Url,
    client: Client,
    timeout: Duration,
    settings: DiscordSettings,
}

impl DiscordChannel {
    pub fn new(webhook: &str, settings: DiscordSettings) -> Result<Self, ChannelError> {
        let webhook = Url::parse(webhook.trim())
            .map_err(|e| ChannelError::Http(format!("invalid webhook url: {e}")))?;
        if webhook.cannot_be_a_base() {
            return Err(ChannelError::Http("webhook url cannot be a base".into()));
        }
        Ok(Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            settings,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.settings.retries = retries;
        self
    }

    fn create_url(&self) -> Url {
        let mut url = self.webhook.clone();
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }

    fn message_url(&self, id: &NotificationId) -> Url {
        let mut url = self.webhook.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty().push("messages").push(id.as_str());
        }
        url
    }

    /// Send with bounded retries and exponential backoff. 429 is always
    /// retried. Network errors and 5xx are retried only for `RetryPolicy::Any`;
    /// a POST that may have reached Discord is never sent twice.
    async fn send_with_retry<F>(
        &self,
        policy: RetryPolicy,
        build: F,
    ) -> Result<Response, ChannelError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.settings.retries.clamp(1, MAX_RETRIES);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = build().timeout(self.timeout).send().await;

            let retryable = match &res {
                Ok(rsp) if rsp.status() == StatusCode::TOO_MANY_REQUESTS => true,
                Ok(rsp) => policy == RetryPolicy::Any && rsp.status().is_server_error(),
                // A failed connect means nothing was sent.
                Err(e) => policy == RetryPolicy::Any || e.is_connect(),
            };

            if retryable && attempt < max_attempts {
                tracing::debug!(target: "discord", attempt, "webhook call failed, backing off");
                tokio::time::sleep(retry_backoff(attempt)).await;
                continue;
            }

            return match res {
                Ok(rsp) => Ok(rsp),
                Err(e) if e.is_timeout() => Err(ChannelError::Timeout(self.timeout)),
                Err(e) => Err(ChannelError::Http(e.to_string())),
            };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    /// Safe to repeat (GET, DELETE).
    Any,
    /// Only repeat when the request provably did not reach the server.
    UnsentOnly,
}

async fn status_error(rsp: Response) -> ChannelError {
    let status = rsp.status().as_u16();
    let body = rsp.text().await.unwrap_or_default();
    ChannelError::Status { status, body }
}

#[derive(Deserialize)]
struct WebhookMessage {
    id: String,
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    async fn create(&self, listing: &ListingRecord) -> Result<NotificationId, ChannelError> {
        let payload = DiscordWebhookPayload::for_listing(listing, &self.settings);
        let url = self.create_url();

        let rsp = self
            .send_with_retry(RetryPolicy::UnsentOnly, || {
                self.client.post(url.clone()).json(&payload)
            })
            .await?;
        if !rsp.status().is_success() {
            counter!("discord_http_errors_total").increment(1);
            return Err(status_error(rsp).await);
        }

        let msg: WebhookMessage = rsp
            .json()
            .await
            .map_err(|e| ChannelError::Decode(e.to_string()))?;
        Ok(NotificationId::from(msg.id))
    }

    async fn fetch(&self, id: &NotificationId) -> Result<bool, ChannelError> {
        let url = self.message_url(id);
        let rsp = self
            .send_with_retry(RetryPolicy::Any, || self.client.request(Method::GET, url.clone()))
            .await?;
        match rsp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(rsp).await),
        }
    }

    async fn delete(&self, id: &NotificationId) -> Result<(), ChannelError> {
        let url = self.message_url(id);
        let rsp = self
            .send_with_retry(RetryPolicy::Any, || self.client.request(Method::DELETE, url.clone()))
            .await?;
        match rsp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ChannelError::NotFound(id.to_string())),
            _ => {
                counter!("discord_http_errors_total").increment(1);
                Err(status_error(rsp).await)
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize)]
struct EmbedAuthor {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    url: String,
    color: u32,
    author: EmbedAuthor,
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<EmbedImage>,
    footer: EmbedFooter,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn for_listing(listing: &ListingRecord, settings: &DiscordSettings) -> Self {
        let field = |name: &str, value: String| EmbedField {
            name: name.to_string(),
            value,
            inline: true,
        };

        let embed = DiscordEmbed {
            title: truncate(&listing.title, TITLE_LIMIT),
            description: truncate(&listing.description, DESCRIPTION_LIMIT),
            url: listing.listing_url(&settings.listing_base_url),
            color: EMBED_COLOR,
            author: EmbedAuthor {
                name: listing.seller_name.clone(),
                icon_url: listing.seller_avatar_url.clone(),
            },
            fields: vec![
                field(
                    "Price",
                    format!(
                        "~~${}~~ ${}",
                        format_amount(listing.price),
                        format_amount(listing.discounted_price)
                    ),
                ),
                field("Discount Starts", discord_timestamp(listing.discount_start)),
                field("Discount Ends", discord_timestamp(listing.discount_end)),
                field("Type", listing.category.label()),
            ],
            thumbnail: listing
                .thumbnail_url
                .clone()
                .map(|url| EmbedImage { url }),
            footer: EmbedFooter {
                text: settings.footer.clone(),
                icon_url: settings.avatar_url.clone(),
            },
        };

        Self {
            username: settings.username.clone(),
            avatar_url: settings.avatar_url.clone(),
            embeds: vec![embed],
        }
    }
}

/// Cap to `limit` chars, ending with "..." when cut.
fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn format_amount(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

/// Relative Discord timestamp plus a plain date.
fn discord_timestamp(ts: DateTime<Utc>) -> String {
    format!("<t:{}:R> ({})", ts.timestamp(), ts.format("%m/%d/%Y"))
}
