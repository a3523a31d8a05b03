//! Fetch the promotions once and print what the next pass would do, without
//! touching the channel or the state file.
//!
//! Usage: `dry_run [page.html]` (reads the live page when no file is given).
//! Uses the same config as the tracker; a broken config is an error here too.

use anyhow::{Context, Result};
use chrono::Utc;
use fab_tracker::config::TrackerConfig;
use fab_tracker::reconcile::plan;
use fab_tracker::source::fab::FabListingSource;
use fab_tracker::{ListingSource, ListingStateStore};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = TrackerConfig::load_default().context("loading tracker config")?;
    let source = match std::env::args().nth(1) {
        Some(path) => {
            let html = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            FabListingSource::from_fixture(&html, cfg.section_prefix.clone())
        }
        None => FabListingSource::from_url(
            cfg.source_url.clone(),
            cfg.section_prefix.clone(),
            cfg.call_timeout(),
        )?,
    };

    let store = ListingStateStore::open(&cfg.state_path).await?;
    let listings = source.fetch_current().await?;
    let now = Utc::now();

    for (id, action) in plan(&store, &listings, now, cfg.retract_vanished) {
        let listing = listings
            .iter()
            .find(|l| l.id == id)
            .or_else(|| store.get(&id).map(|e| e.listing()));
        match listing {
            Some(l) => println!("{:<20} {} {:?} (ends {})", action.label(), id, l.title, l.discount_end),
            None => println!("{:<20} {}", action.label(), id),
        }
    }

    println!("dry-run done: {} listings", listings.len());
    Ok(())
}
