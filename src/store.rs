// src/store.rs
//! Durable map of listing id -> notification lifecycle.
//!
//! `get`/`put` only touch memory; `commit` rewrites the whole snapshot via a
//! temp file and an atomic rename, so a crash leaves either the previous or the
//! new snapshot on disk. Entries are never removed: a retracted entry is a
//! tombstone that keeps the id from being announced again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::listing::ListingRecord;
use crate::notify::NotificationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Retracted,
}

/// Persisted lifecycle of one listing. `notification_id` is present iff `Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntry {
    listing: ListingRecord,
    notification_id: Option<NotificationId>,
    status: EntryStatus,
}

impl TrackedEntry {
    pub fn active(listing: ListingRecord, notification_id: NotificationId) -> Self {
        Self {
            listing,
            notification_id: Some(notification_id),
            status: EntryStatus::Active,
        }
    }

    pub fn retracted(listing: ListingRecord) -> Self {
        Self {
            listing,
            notification_id: None,
            status: EntryStatus::Retracted,
        }
    }

    pub fn listing(&self) -> &ListingRecord {
        &self.listing
    }

    pub fn notification_id(&self) -> Option<&NotificationId> {
        self.notification_id.as_ref()
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Same lifecycle, refreshed listing fields (e.g. an extended discount window).
    pub fn with_listing(&self, listing: ListingRecord) -> Self {
        Self {
            listing,
            notification_id: self.notification_id.clone(),
            status: self.status,
        }
    }

    /// Active -> Retracted. The notification id is dropped for good.
    pub fn into_retracted(self, listing: ListingRecord) -> Self {
        Self::retracted(listing)
    }

    fn check(&self, key: &str) -> Result<(), String> {
        if self.listing.id != key {
            return Err(format!(
                "entry key {key} does not match listing id {}",
                self.listing.id
            ));
        }
        match (self.status, &self.notification_id) {
            (EntryStatus::Active, Some(_)) | (EntryStatus::Retracted, None) => Ok(()),
            (EntryStatus::Active, None) => Err(format!("active entry {key} has no notification id")),
            (EntryStatus::Retracted, Some(_)) => {
                Err(format!("retracted entry {key} still holds a notification id"))
            }
        }
    }
}

#[derive(Debug)]
pub struct ListingStateStore {
    path: PathBuf,
    entries: BTreeMap<String, TrackedEntry>,
    dirty: bool,
}

impl ListingStateStore {
    /// Load the committed snapshot at `path`. A missing file yields an empty
    /// store; anything unreadable is `StoreError::Corruption`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => decode_snapshot(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "store", path = %path.display(), "no state file yet, starting empty");
                BTreeMap::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::info!(
            target: "store",
            path = %path.display(),
            entries = entries.len(),
            "state loaded"
        );

        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&TrackedEntry> {
        self.entries.get(id)
    }

    /// Insert or replace. A tombstone is final: putting an `Active` entry over
    /// a `Retracted` one is refused and logged. Returns whether the entry was
    /// accepted.
    pub fn put(&mut self, id: impl Into<String>, entry: TrackedEntry) -> bool {
        let id = id.into();
        debug_assert_eq!(id, entry.listing.id, "store key must match listing id");
        let current = self.entries.get(&id);
        if current.is_some_and(|e| !e.is_active()) && entry.is_active() {
            tracing::warn!(target: "store", listing_id = %id, "refusing to revive a retracted entry");
            return false;
        }
        if current != Some(&entry) {
            self.entries.insert(id, entry);
            self.dirty = true;
        }
        true
    }

    pub fn load_all(&self) -> &BTreeMap<String, TrackedEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_active()).count()
    }

    /// Whether there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist the full mapping atomically. No-op when nothing changed.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }

        let payload = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        write_atomic(&self.path, &payload).await?;
        self.dirty = false;

        tracing::debug!(
            target: "store",
            path = %self.path.display(),
            entries = self.entries.len(),
            "state committed"
        );
        Ok(())
    }
}

fn decode_snapshot(path: &Path, bytes: &[u8]) -> Result<BTreeMap<String, TrackedEntry>, StoreError> {
    let corrupt = |reason: String| StoreError::Corruption {
        path: path.to_path_buf(),
        reason,
    };

    let entries: BTreeMap<String, TrackedEntry> =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    for (key, entry) in &entries {
        entry.check(key).map_err(corrupt)?;
    }
    Ok(entries)
}

async fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    let io_err = |p: &Path, source: std::io::Error| StoreError::Io {
        path: p.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);
    if let Some(dir) = &parent {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err(dir, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{:016x}.tmp", rand::random::<u64>()));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path, e));
    }

    // Make the rename itself durable where the platform allows opening directories.
    #[cfg(unix)]
    if let Some(dir) = &parent {
        if let Ok(d) = tokio::fs::File::open(dir).await {
            let _ = d.sync_all().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::fixtures::listing;
    use chrono::{TimeZone, Utc};

    fn end() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 16, 14, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ListingStateStore::open(dir.path().join("cache.json"))
            .await
            .unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn commit_then_reopen_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let mut store = ListingStateStore::open(&path).await.unwrap();
        store.put(
            "L1",
            TrackedEntry::active(listing("L1", end()), NotificationId::from("111")),
        );
        store.put("L2", TrackedEntry::retracted(listing("L2", end())));
        assert!(store.is_dirty());
        store.commit().await.unwrap();
        assert!(!store.is_dirty());

        let reopened = ListingStateStore::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.active_count(), 1);
        let l1 = reopened.get("L1").unwrap();
        assert_eq!(l1.notification_id().map(|n| n.as_str()), Some("111"));
        assert_eq!(reopened.get("L2").unwrap().status(), EntryStatus::Retracted);
    }

    #[tokio::test]
    async fn commit_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = ListingStateStore::open(&path).await.unwrap();
        store.put("L1", TrackedEntry::retracted(listing("L1", end())));
        store.commit().await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cache.json".to_string()]);
    }

    #[tokio::test]
    async fn clean_store_does_not_rewrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = ListingStateStore::open(&path).await.unwrap();
        store.commit().await.unwrap();
        assert!(!path.exists());

        // Putting an identical entry is not a change either.
        store.put("L1", TrackedEntry::retracted(listing("L1", end())));
        store.commit().await.unwrap();
        store.put("L1", TrackedEntry::retracted(listing("L1", end())));
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn garbage_file_is_corruption_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = ListingStateStore::open(&path).await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn active_entry_without_id_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut raw = serde_json::to_value(BTreeMap::from([(
            "L1".to_string(),
            TrackedEntry::active(listing("L1", end()), NotificationId::from("1")),
        )]))
        .unwrap();
        raw["L1"]["notification_id"] = serde_json::Value::Null;
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let err = ListingStateStore::open(&path).await.unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[test]
    fn with_listing_keeps_notification() {
        let e = TrackedEntry::active(listing("L1", end()), NotificationId::from("9"));
        let mut newer = listing("L1", end() + chrono::Duration::days(2));
        newer.title = "Renamed".into();
        let updated = e.with_listing(newer.clone());
        assert_eq!(updated.listing(), &newer);
        assert_eq!(updated.notification_id(), e.notification_id());
        assert!(updated.is_active());

        let gone = updated.into_retracted(newer);
        assert!(gone.notification_id().is_none());
        assert_eq!(gone.status(), EntryStatus::Retracted);
    }

    #[tokio::test]
    async fn tombstone_cannot_be_revived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = ListingStateStore::open(&path).await.unwrap();
        let l = listing("L1", end());

        assert!(store.put("L1", TrackedEntry::retracted(l.clone())));
        store.commit().await.unwrap();

        assert!(!store.put("L1", TrackedEntry::active(l.clone(), NotificationId::from("7"))));
        assert!(!store.is_dirty());
        assert_eq!(store.get("L1").unwrap().status(), EntryStatus::Retracted);

        // Refreshing the tombstone itself is still allowed.
        let mut renamed = l;
        renamed.title = "Renamed".into();
        assert!(store.put("L1", TrackedEntry::retracted(renamed.clone())));
        assert_eq!(store.get("L1").unwrap().listing(), &renamed);
    }
}
