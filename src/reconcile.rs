// src/reconcile.rs
//! One reconciliation pass: fetch the advertised listings, compare them with
//! the stored lifecycle, announce new ones, retract closed ones, commit once.
//!
//! Outcomes per listing id:
//! - unseen                    -> create; stays unseen if the create fails
//! - active, discount open     -> nothing (listing fields refreshed in place)
//! - active, discount closed   -> delete, then retracted even if delete failed
//! - retracted                 -> nothing, ever

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ChannelError, ReconcileError, SourceError};
use crate::listing::ListingRecord;
use crate::notify::NotificationChannel;
use crate::source::ListingSource;
use crate::store::{ListingStateStore, TrackedEntry};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tracker_runs_total", "Completed reconciliation passes.");
        describe_counter!("tracker_announced_total", "Listings announced to the channel.");
        describe_counter!("tracker_retracted_total", "Announcements retracted.");
        describe_counter!(
            "tracker_channel_errors_total",
            "Failed create/delete calls against the channel."
        );
        describe_counter!(
            "tracker_source_errors_total",
            "Passes aborted because the listing source was unavailable."
        );
        describe_gauge!("tracker_active_listings", "Entries currently announced.");
        describe_gauge!("tracker_last_run_ts", "Unix ts of the last completed pass.");
    });
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Upper bound for every source and channel call.
    pub call_timeout: Duration,
    /// Pause after each successful announcement.
    pub send_delay: Duration,
    /// Ask the channel whether the message still exists before deleting it.
    pub verify_before_delete: bool,
    /// Also retract expired active entries that dropped out of the feed.
    pub retract_vanished: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            send_delay: Duration::ZERO,
            verify_before_delete: false,
            retract_vanished: false,
        }
    }
}

/// Decision for one listing id, taken before any channel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    /// Unseen id: create a message.
    Announce,
    /// Active, discount open, listing fields changed.
    Refresh,
    /// Active, discount open, nothing changed.
    Keep,
    /// Active, discount closed.
    Retract,
    /// Tombstoned id still advertised.
    IgnoreRetracted,
    /// Active, discount closed, no longer in the feed.
    RetractVanished,
}

impl PlannedAction {
    /// Classifies an advertised listing against its stored entry.
    pub fn classify(
        entry: Option<&TrackedEntry>,
        listing: &ListingRecord,
        now: DateTime<Utc>,
    ) -> Self {
        match entry {
            None => Self::Announce,
            Some(e) if !e.is_active() => Self::IgnoreRetracted,
            Some(_) if !listing.is_discount_open(now) => Self::Retract,
            Some(e) if e.listing() != listing => Self::Refresh,
            Some(_) => Self::Keep,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Announce => "announce",
            Self::Refresh => "refresh",
            Self::Keep => "keep",
            Self::Retract => "retract",
            Self::IgnoreRetracted => "ignore (retracted)",
            Self::RetractVanished => "retract (left feed)",
        }
    }
}

/// Active entries whose discount closed and whose id is not in `current`.
fn vanished<'a>(
    store: &'a ListingStateStore,
    current: &'a HashSet<String>,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a TrackedEntry> + 'a {
    store
        .load_all()
        .iter()
        .filter(move |(id, e)| {
            e.is_active() && !current.contains(*id) && !e.listing().is_discount_open(now)
        })
        .map(|(_, e)| e)
}

/// Everything a pass at `now` would do, in the order it would do it.
/// Side-effect free; used for previews.
pub fn plan(
    store: &ListingStateStore,
    listings: &[ListingRecord],
    now: DateTime<Utc>,
    retract_vanished: bool,
) -> Vec<(String, PlannedAction)> {
    let mut out: Vec<(String, PlannedAction)> = listings
        .iter()
        .map(|l| (l.id.clone(), PlannedAction::classify(store.get(&l.id), l, now)))
        .collect();
    if retract_vanished {
        let current: HashSet<String> = listings.iter().map(|l| l.id.clone()).collect();
        out.extend(
            vanished(store, &current, now)
                .map(|e| (e.listing().id.clone(), PlannedAction::RetractVanished)),
        );
    }
    out
}

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub fetched: usize,
    pub announced: usize,
    pub announce_failures: usize,
    pub updated: usize,
    pub skipped: usize,
    pub retracted: usize,
    pub retract_failures: usize,
    pub tombstones_seen: usize,
    pub cancelled: bool,
}

impl RunReport {
    /// Number of create + delete calls that reached the channel.
    pub fn channel_actions(&self) -> usize {
        self.announced + self.announce_failures + self.retracted + self.retract_failures
    }
}

pub struct LifecycleReconciler {
    source: Arc<dyn ListingSource>,
    channel: Arc<dyn NotificationChannel>,
    store: ListingStateStore,
    opts: ReconcilerOptions,
    cancel: CancellationToken,
}

impl LifecycleReconciler {
    pub fn new(
        source: Arc<dyn ListingSource>,
        channel: Arc<dyn NotificationChannel>,
        store: ListingStateStore,
        opts: ReconcilerOptions,
    ) -> Self {
        Self {
            source,
            channel,
            store,
            opts,
            cancel: CancellationToken::new(),
        }
    }

    /// Checked between per-listing steps; remaining listings wait for the next pass.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &ListingStateStore {
        &self.store
    }

    pub fn into_store(self) -> ListingStateStore {
        self.store
    }

    pub async fn run(&mut self) -> Result<RunReport, ReconcileError> {
        self.run_at(Utc::now()).await
    }

    /// One pass evaluated against the given clock reading.
    pub async fn run_at(&mut self, now: DateTime<Utc>) -> Result<RunReport, ReconcileError> {
        ensure_metrics_described();

        let listings = match tokio::time::timeout(
            self.opts.call_timeout,
            self.source.fetch_current(),
        )
        .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(self.source_failed(e)),
            Err(_) => return Err(self.source_failed(SourceError::Timeout(self.opts.call_timeout))),
        };

        let mut report = RunReport {
            fetched: listings.len(),
            ..RunReport::default()
        };
        let current: HashSet<String> = listings.iter().map(|l| l.id.clone()).collect();

        for listing in listings {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.reconcile_listing(listing, now, &mut report).await;
        }

        if self.opts.retract_vanished && !report.cancelled {
            self.retract_vanished(&current, now, &mut report).await;
        }

        self.store.commit().await?;

        counter!("tracker_runs_total").increment(1);
        gauge!("tracker_active_listings").set(self.store.active_count() as f64);
        gauge!("tracker_last_run_ts").set(now.timestamp() as f64);

        tracing::info!(
            target: "reconcile",
            fetched = report.fetched,
            announced = report.announced,
            retracted = report.retracted,
            updated = report.updated,
            skipped = report.skipped,
            failures = report.announce_failures + report.retract_failures,
            cancelled = report.cancelled,
            "pass complete"
        );
        Ok(report)
    }

    fn source_failed(&self, e: SourceError) -> ReconcileError {
        counter!("tracker_source_errors_total").increment(1);
        tracing::warn!(target: "reconcile", source = self.source.name(), error = %e, "listing source unavailable, pass aborted");
        ReconcileError::SourceUnavailable(e)
    }

    async fn reconcile_listing(
        &mut self,
        listing: ListingRecord,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        let entry = self.store.get(&listing.id).cloned();
        match (PlannedAction::classify(entry.as_ref(), &listing, now), entry) {
            (PlannedAction::Announce, _) => self.announce(listing, report).await,
            (PlannedAction::IgnoreRetracted, _) => {
                tracing::debug!(target: "reconcile", listing_id = %listing.id, "retracted listing still advertised, ignoring");
                report.tombstones_seen += 1;
            }
            (PlannedAction::Keep, _) => {
                tracing::trace!(target: "reconcile", listing_id = %listing.id, "already announced");
                report.skipped += 1;
            }
            (PlannedAction::Refresh, Some(entry)) => {
                tracing::debug!(target: "reconcile", listing_id = %listing.id, "listing changed, refreshing stored copy");
                let id = listing.id.clone();
                self.store.put(id, entry.with_listing(listing));
                report.updated += 1;
            }
            (PlannedAction::Retract, Some(entry)) => self.retract(entry, listing, report).await,
            // classify only answers Refresh/Retract for stored entries and
            // never RetractVanished for an advertised listing.
            (PlannedAction::Refresh | PlannedAction::Retract | PlannedAction::RetractVanished, _) => {}
        }
    }

    async fn announce(&mut self, listing: ListingRecord, report: &mut RunReport) {
        let created = bounded(self.opts.call_timeout, self.channel.create(&listing)).await;
        match created {
            Ok(notification_id) => {
                tracing::info!(
                    target: "reconcile",
                    listing_id = %listing.id,
                    notification_id = %notification_id,
                    "announced new listing"
                );
                counter!("tracker_announced_total").increment(1);
                report.announced += 1;
                let id = listing.id.clone();
                self.store.put(id, TrackedEntry::active(listing, notification_id));

                if !self.opts.send_delay.is_zero() {
                    tokio::time::sleep(self.opts.send_delay).await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "reconcile",
                    listing_id = %listing.id,
                    channel = self.channel.name(),
                    error = %e,
                    "announce failed, will retry next pass"
                );
                counter!("tracker_channel_errors_total").increment(1);
                report.announce_failures += 1;
            }
        }
    }

    /// Delete the live message and tombstone the entry. The tombstone is written
    /// whatever the delete outcome.
    async fn retract(&mut self, entry: TrackedEntry, listing: ListingRecord, report: &mut RunReport) {
        let id = listing.id.clone();
        let Some(notification_id) = entry.notification_id().cloned() else {
            self.store.put(id, entry.into_retracted(listing));
            return;
        };

        if self.opts.verify_before_delete {
            match bounded(self.opts.call_timeout, self.channel.fetch(&notification_id)).await {
                Ok(false) => {
                    tracing::info!(
                        target: "reconcile",
                        listing_id = %id,
                        notification_id = %notification_id,
                        "message already gone, marking retracted"
                    );
                    counter!("tracker_retracted_total").increment(1);
                    report.retracted += 1;
                    self.store.put(id, entry.into_retracted(listing));
                    return;
                }
                Ok(true) => {}
                Err(e) => {
                    tracing::debug!(target: "reconcile", listing_id = %id, error = %e, "could not verify message, deleting anyway");
                }
            }
        }

        match bounded(self.opts.call_timeout, self.channel.delete(&notification_id)).await {
            Ok(()) => {
                tracing::info!(
                    target: "reconcile",
                    listing_id = %id,
                    notification_id = %notification_id,
                    "discount ended, announcement retracted"
                );
                counter!("tracker_retracted_total").increment(1);
                report.retracted += 1;
            }
            Err(e) => {
                tracing::warn!(
                    target: "reconcile",
                    listing_id = %id,
                    notification_id = %notification_id,
                    channel = self.channel.name(),
                    error = %e,
                    "delete failed, marking retracted without retry"
                );
                counter!("tracker_channel_errors_total").increment(1);
                report.retract_failures += 1;
            }
        }

        self.store.put(id, entry.into_retracted(listing));
    }

    async fn retract_vanished(
        &mut self,
        current: &HashSet<String>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        let expired: Vec<TrackedEntry> = vanished(&self.store, current, now).cloned().collect();

        for entry in expired {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            tracing::debug!(target: "reconcile", listing_id = %entry.listing().id, "expired listing left the feed");
            let listing = entry.listing().clone();
            self.retract(entry, listing, report).await;
        }
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(ChannelError::Timeout(limit)),
    }
}
