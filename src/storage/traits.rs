//! Storage traits and error types
//!
//! This module defines the persistence boundary of a crawl and its error type.

use crate::state::CrawlSnapshot;
use crate::storage::RunStatus;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt snapshot for {domain}: {reason}")]
    Corrupt { domain: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persists and restores crawl ledgers
///
/// Called only from the coordinator: once at start, on each checkpoint and
/// once at the end. The stored format is the implementation's business.
pub trait StorageAdapter: Send {
    // ===== Snapshots =====

    /// Returns the last saved snapshot of `domain`, if any
    fn load(&mut self, domain: &str) -> StorageResult<Option<CrawlSnapshot>>;

    /// Replaces the saved snapshot of `snapshot.domain`
    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()>;

    /// Forgets everything saved for `domain`
    fn clear(&mut self, domain: &str) -> StorageResult<()>;

    // ===== Runs =====

    /// Records how the current crawl of `domain` ended
    fn finish(&mut self, _domain: &str, _status: RunStatus) -> StorageResult<()> {
        Ok(())
    }
}
