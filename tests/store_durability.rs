// tests/store_durability.rs
mod common;

use chrono::{Duration, TimeZone, Utc};
use fab_tracker::{ListingStateStore, NotificationId, StoreError, TrackedEntry};
use std::fs;

#[tokio::test]
async fn snapshot_format_is_keyed_by_listing_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let end = Utc.with_ymd_and_hms(2025, 9, 16, 13, 59, 0).unwrap();

    let mut store = ListingStateStore::open(&path).await.unwrap();
    store.put(
        "L1",
        TrackedEntry::active(common::listing("L1", end), NotificationId::from("1234")),
    );
    store.put("L0", TrackedEntry::retracted(common::listing("L0", end - Duration::days(20))));
    store.commit().await.unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["L1"]["status"], "active");
    assert_eq!(raw["L1"]["notification_id"], "1234");
    assert_eq!(raw["L1"]["listing"]["id"], "L1");
    assert_eq!(raw["L1"]["listing"]["category"], "3d-model");
    assert_eq!(raw["L0"]["status"], "retracted");
    assert!(raw["L0"]["notification_id"].is_null());
}

#[tokio::test]
async fn corrupt_state_is_reported_not_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    fs::write(&path, b"").unwrap();

    let err = ListingStateStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }), "{err}");
    // The bad file is left for the operator to inspect.
    assert!(path.exists());
}

#[tokio::test]
async fn mismatched_key_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let end = Utc.with_ymd_and_hms(2025, 9, 16, 13, 59, 0).unwrap();

    let mut store = ListingStateStore::open(&path).await.unwrap();
    store.put("L1", TrackedEntry::retracted(common::listing("L1", end)));
    store.commit().await.unwrap();

    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replacen("\"L1\": {", "\"other\": {", 1)).unwrap();

    let err = ListingStateStore::open(&path).await.unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[tokio::test]
async fn directory_in_place_of_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    fs::create_dir(&path).unwrap();

    let err = ListingStateStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }), "{err}");
}
