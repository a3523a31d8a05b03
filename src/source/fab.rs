// src/source/fab.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{normalize_description, ListingSource};
use crate::error::SourceError;
use crate::listing::{ListingCategory, ListingRecord};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36";
const PREFETCH_SCRIPT: &str = r#"script[id="js-json-data-prefetched-data"]"#;
const HOMEPAGE_KEY: &str = "/i/layouts/homepage";

#[derive(Debug, Deserialize)]
struct Blade {
    /// Null or missing on some promo blades.
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tiles: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    uid: String,
    title: String,
    #[serde(default)]
    description: String,
    listing_type: String,
    starting_price: RawPrice,
    user: RawUser,
    #[serde(default)]
    thumbnails: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrice {
    price: f64,
    discounted_price: f64,
    discount_start_date: Option<DateTime<Utc>>,
    discount_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    seller_name: String,
    profile_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMedia {
    media_url: String,
}

impl RawListing {
    fn into_record(self) -> Option<ListingRecord> {
        let (Some(start), Some(end)) = (
            self.starting_price.discount_start_date,
            self.starting_price.discount_end_date,
        ) else {
            tracing::warn!(target: "source", listing_id = %self.uid, "listing has no discount window, skipping");
            return None;
        };

        Some(ListingRecord {
            id: self.uid,
            title: self.title.trim().to_string(),
            description: normalize_description(&self.description),
            category: ListingCategory::from(self.listing_type),
            price: self.starting_price.price,
            discounted_price: self.starting_price.discounted_price,
            discount_start: start,
            discount_end: end,
            seller_name: self.user.seller_name,
            seller_avatar_url: self.user.profile_image_url,
            thumbnail_url: self.thumbnails.into_iter().next().map(|m| m.media_url),
        })
    }
}

/// Reads the "Limited-Time Free" section of the Fab homepage.
pub struct FabListingSource {
    mode: Mode,
    section_prefix: String,
}

enum Mode {
    // Owned copy so tests can pass any &str.
    Fixture(String),
    Http {
        url: String,
        client: Client,
        timeout: Duration,
    },
}

impl FabListingSource {
    pub fn from_url(
        url: impl Into<String>,
        section_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self {
            mode: Mode::Http {
                url: url.into(),
                client,
                timeout,
            },
            section_prefix: section_prefix.into(),
        })
    }

    pub fn from_fixture(html: &str, section_prefix: impl Into<String>) -> Self {
        Self {
            mode: Mode::Fixture(html.to_string()),
            section_prefix: section_prefix.into(),
        }
    }

    async fn fetch_html(url: &str, client: &Client, timeout: Duration) -> Result<String, SourceError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                SourceError::Timeout(timeout)
            } else {
                SourceError::Http(e.to_string())
            }
        };

        let rsp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(SourceError::Http(format!("GET {url} returned {status}")));
        }
        rsp.text().await.map_err(map_err)
    }

    /// Extract listings from a homepage document.
    pub fn parse_page(&self, html: &str) -> Result<Vec<ListingRecord>, SourceError> {
        let t0 = std::time::Instant::now();

        let data = extract_prefetched_json(html)?;
        let blades: Vec<Blade> = data
            .get(HOMEPAGE_KEY)
            .and_then(|h| h.get("blades"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| SourceError::Parse(format!("blades: {e}")))?
            .ok_or_else(|| SourceError::MissingSection(format!("{HOMEPAGE_KEY}.blades")))?;

        let blade = blades
            .into_iter()
            .find(|b| {
                b.title
                    .as_deref()
                    .is_some_and(|t| t.starts_with(&self.section_prefix))
            })
            .ok_or_else(|| SourceError::MissingSection(format!("blade '{}'", self.section_prefix)))?;

        let tiles = blade.tiles.unwrap_or_default();
        let mut out = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let Some(raw) = tile.get("listing").cloned() else {
                continue;
            };
            let raw: RawListing = match serde_json::from_value(raw) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "source", error = %e, "malformed listing tile, skipping");
                    continue;
                }
            };
            let Some(record) = raw.into_record() else {
                continue;
            };
            if let Err(e) = record.validate() {
                tracing::warn!(target: "source", error = %e, "invalid listing, skipping");
                continue;
            }
            out.push(record);
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_parse_ms").record(ms);
        counter!("source_listings_total").increment(out.len() as u64);
        Ok(out)
    }
}

fn extract_prefetched_json(html: &str) -> Result<Value, SourceError> {
    let document = Html::parse_document(html);
    let selector =
        Selector::parse(PREFETCH_SCRIPT).map_err(|e| SourceError::Parse(e.to_string()))?;

    let element = document
        .select(&selector)
        .next()
        .ok_or_else(|| SourceError::MissingSection("prefetched data script".into()))?;
    let json_text: String = element.text().collect();

    serde_json::from_str(json_text.trim()).map_err(|e| SourceError::Parse(e.to_string()))
}

#[async_trait]
impl ListingSource for FabListingSource {
    async fn fetch_current(&self) -> Result<Vec<ListingRecord>, SourceError> {
        match &self.mode {
            Mode::Fixture(html) => self.parse_page(html),
            Mode::Http {
                url,
                client,
                timeout,
            } => {
                let body = Self::fetch_html(url, client, *timeout).await?;
                self.parse_page(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "fab"
    }
}
