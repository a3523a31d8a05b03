// src/notify/mod.rs
pub mod discord;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChannelError;
use crate::listing::ListingRecord;

/// Opaque id of a message living in the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NotificationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where announcements are posted and later retracted.
///
/// `create` is at-least-once from the caller's side: a pass that crashes
/// before commit will post the same listing again on the next run.
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn create(&self, listing: &ListingRecord) -> Result<NotificationId, ChannelError>;

    /// `Ok(false)` when the message no longer exists.
    async fn fetch(&self, id: &NotificationId) -> Result<bool, ChannelError>;

    async fn delete(&self, id: &NotificationId) -> Result<(), ChannelError>;

    fn name(&self) -> &'static str;
}
