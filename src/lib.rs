// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod listing;
pub mod metrics;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod source;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::error::{ChannelError, ListingError, ReconcileError, SourceError, StoreError};
pub use crate::listing::{ListingCategory, ListingRecord};
pub use crate::notify::{NotificationChannel, NotificationId};
pub use crate::reconcile::{LifecycleReconciler, PlannedAction, ReconcilerOptions, RunReport};
pub use crate::source::ListingSource;
pub use crate::store::{EntryStatus, ListingStateStore, TrackedEntry};
