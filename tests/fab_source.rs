// tests/fab_source.rs
use chrono::{TimeZone, Utc};
use fab_tracker::source::fab::FabListingSource;
use fab_tracker::{ListingCategory, ListingSource, SourceError};
use std::fs;

#[tokio::test]
async fn fixture_page_yields_free_listings() {
    let html = fs::read_to_string("tests/fixtures/fab_homepage.html")
        .expect("missing tests/fixtures/fab_homepage.html");
    let source = FabListingSource::from_fixture(&html, "Limited-Time Free");

    let items = source.fetch_current().await.expect("fixture parses");
    assert_eq!(items.len(), 3, "only the Limited-Time Free blade is read");
    assert!(items.iter().all(|l| l.discounted_price == 0.0));
    assert!(items.iter().all(|l| l.validate().is_ok()));

    let village = &items[0];
    assert_eq!(village.id, "8f1d0b2c-5a44-4f7e-9b7a-1c2d3e4f5a6b");
    assert_eq!(village.category, ListingCategory::Model3d);
    assert_eq!(
        village.description,
        "Modular houses, props & materials.\n120 meshes\nNanite ready"
    );
    assert_eq!(
        village.discount_end,
        Utc.with_ymd_and_hms(2025, 9, 16, 13, 59, 0).unwrap()
    );
    assert_eq!(village.seller_name, "Stonecraft Studio");

    assert_eq!(items[1].description, "Animated water\nwith foam");
    assert_eq!(items[2].category, ListingCategory::Audio);
    assert!(items[2].seller_avatar_url.is_none());
}

#[tokio::test]
async fn other_section_prefix_is_missing() {
    let html = fs::read_to_string("tests/fixtures/fab_homepage.html").unwrap();
    let source = FabListingSource::from_fixture(&html, "Weekly Free");
    let err = source.fetch_current().await.unwrap_err();
    assert!(matches!(err, SourceError::MissingSection(_)), "{err}");
}

#[tokio::test]
async fn challenge_page_is_source_unavailable() {
    // What an anti-bot interstitial looks like: no prefetched data at all.
    let html = "<html><body><h1>Just a moment...</h1></body></html>";
    let source = FabListingSource::from_fixture(html, "Limited-Time Free");
    assert!(source.fetch_current().await.is_err());
}
