// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fab_tracker::{
    ChannelError, ListingCategory, ListingRecord, ListingSource, NotificationChannel,
    NotificationId, SourceError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub fn listing(id: &str, discount_end: DateTime<Utc>) -> ListingRecord {
    ListingRecord {
        id: id.to_string(),
        title: format!("Free asset {id}"),
        description: "Limited-time free".into(),
        category: ListingCategory::Model3d,
        price: 24.99,
        discounted_price: 0.0,
        discount_start: discount_end - Duration::days(14),
        discount_end,
        seller_name: "Studio".into(),
        seller_avatar_url: Some("https://media.example/avatar.png".into()),
        thumbnail_url: Some("https://media.example/thumb.png".into()),
    }
}

/// Source whose answer can be swapped between passes.
#[derive(Default)]
pub struct FakeSource {
    listings: Mutex<Vec<ListingRecord>>,
    fail: AtomicBool,
}

impl FakeSource {
    pub fn with(listings: Vec<ListingRecord>) -> Self {
        Self {
            listings: Mutex::new(listings),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, listings: Vec<ListingRecord>) {
        *self.listings.lock().unwrap() = listings;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    async fn fetch_current(&self) -> Result<Vec<ListingRecord>, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::MissingSection("blade 'Limited-Time Free'".into()));
        }
        Ok(self.listings.lock().unwrap().clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Fetch(String),
    Delete(String),
}

/// In-memory channel that records every call and keeps a set of live messages.
#[derive(Default)]
pub struct FakeChannel {
    pub calls: Mutex<Vec<Call>>,
    live: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    fail_create_for: Mutex<HashSet<String>>,
    fail_deletes: AtomicBool,
}

impl FakeChannel {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete(_)))
            .count()
    }

    pub fn live_messages(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn fail_create_for(&self, listing_id: &str) {
        self.fail_create_for
            .lock()
            .unwrap()
            .insert(listing_id.to_string());
    }

    pub fn heal_creates(&self) {
        self.fail_create_for.lock().unwrap().clear();
    }

    pub fn set_failing_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Simulate someone removing the message by hand.
    pub fn drop_message(&self, id: &str) {
        self.live.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    async fn create(&self, listing: &ListingRecord) -> Result<NotificationId, ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create(listing.id.clone()));
        if self.fail_create_for.lock().unwrap().contains(&listing.id) {
            return Err(ChannelError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{n}");
        self.live.lock().unwrap().insert(id.clone());
        Ok(NotificationId::from(id))
    }

    async fn fetch(&self, id: &NotificationId) -> Result<bool, ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Fetch(id.to_string()));
        Ok(self.live.lock().unwrap().contains(id.as_str()))
    }

    async fn delete(&self, id: &NotificationId) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Delete(id.to_string()));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ChannelError::Timeout(std::time::Duration::from_secs(1)));
        }
        if self.live.lock().unwrap().remove(id.as_str()) {
            Ok(())
        } else {
            Err(ChannelError::NotFound(id.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
