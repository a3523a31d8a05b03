// src/error.rs
use std::path::PathBuf;

/// The listing source could not be fetched or parsed. Aborts the whole pass.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("listing source request failed: {0}")]
    Http(String),

    #[error("listing source timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("expected section not found: {0}")]
    MissingSection(String),

    #[error("listing source payload could not be parsed: {0}")]
    Parse(String),
}

/// A single create/fetch/delete call against the notification channel failed.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Http(String),

    #[error("channel call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("channel returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("message {0} not found")]
    NotFound(String),

    #[error("channel response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Persisted state exists but cannot be trusted. Never reset silently.
    #[error("store {path} is corrupt: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("store I/O on {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store snapshot could not be encoded: {0}")]
    Encode(String),
}

impl StoreError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}

/// Validation failure for a single listing record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListingError {
    #[error("listing id is empty")]
    EmptyId,

    #[error("listing {id}: discounted price {discounted} exceeds price {price}")]
    DiscountAbovePrice {
        id: String,
        price: f64,
        discounted: f64,
    },

    #[error("listing {id}: negative or non-finite price")]
    InvalidPrice { id: String },

    #[error("listing {id}: discount window does not end after it starts")]
    InvalidWindow { id: String },
}

/// Failure of a whole reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the scheduler may simply try again on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::SourceUnavailable(_))
    }
}
