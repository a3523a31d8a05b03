// src/listing.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ListingError;

/// Listing type as advertised by the marketplace. Unknown types are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ListingCategory {
    Model3d,
    Material,
    Audio,
    Animation,
    ToolAndPlugin,
    Environment,
    Vfx,
    Other(String),
}

impl ListingCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ListingCategory::Model3d => "3d-model",
            ListingCategory::Material => "material",
            ListingCategory::Audio => "audio",
            ListingCategory::Animation => "animation",
            ListingCategory::ToolAndPlugin => "tool-and-plugin",
            ListingCategory::Environment => "environment",
            ListingCategory::Vfx => "vfx",
            ListingCategory::Other(s) => s.as_str(),
        }
    }

    /// Human label: raw type with the first letter upper-cased.
    pub fn label(&self) -> String {
        let raw = self.as_str();
        let mut chars = raw.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl From<String> for ListingCategory {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "3d-model" => ListingCategory::Model3d,
            "material" => ListingCategory::Material,
            "audio" => ListingCategory::Audio,
            "animation" => ListingCategory::Animation,
            "tool-and-plugin" => ListingCategory::ToolAndPlugin,
            "environment" => ListingCategory::Environment,
            "vfx" => ListingCategory::Vfx,
            _ => ListingCategory::Other(s),
        }
    }
}

impl From<ListingCategory> for String {
    fn from(c: ListingCategory) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for ListingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one promotional listing as currently advertised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    /// Already normalized plain text.
    pub description: String,
    pub category: ListingCategory,
    pub price: f64,
    pub discounted_price: f64,
    pub discount_start: DateTime<Utc>,
    pub discount_end: DateTime<Utc>,
    pub seller_name: String,
    #[serde(default)]
    pub seller_avatar_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl ListingRecord {
    /// Check the record-level invariants (non-empty id, sane prices, ordered window).
    pub fn validate(&self) -> Result<(), ListingError> {
        if self.id.trim().is_empty() {
            return Err(ListingError::EmptyId);
        }
        let price_ok = |p: f64| p.is_finite() && p >= 0.0;
        if !price_ok(self.price) || !price_ok(self.discounted_price) {
            return Err(ListingError::InvalidPrice {
                id: self.id.clone(),
            });
        }
        if self.discounted_price > self.price {
            return Err(ListingError::DiscountAbovePrice {
                id: self.id.clone(),
                price: self.price,
                discounted: self.discounted_price,
            });
        }
        if self.discount_start >= self.discount_end {
            return Err(ListingError::InvalidWindow {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// `now < discount_end`.
    pub fn is_discount_open(&self, now: DateTime<Utc>) -> bool {
        now < self.discount_end
    }

    pub fn listing_url(&self, base_url: &str) -> String {
        format!("{}/listings/{}", base_url.trim_end_matches('/'), self.id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;

    pub fn listing(id: &str, discount_end: DateTime<Utc>) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: format!("Listing {id}"),
            description: "A free asset".into(),
            category: ListingCategory::Model3d,
            price: 19.99,
            discounted_price: 0.0,
            discount_start: discount_end - Duration::days(14),
            discount_end,
            seller_name: "Seller".into(),
            seller_avatar_url: None,
            thumbnail_url: Some("https://media.example/thumb.png".into()),
        }
    }
}
