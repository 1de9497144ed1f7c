//! Storage abstractions for listing and score persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── appartements/                   # Raw scraped records, one per listing
//! │   └── {id}.json
//! ├── scores/
//! │   ├── apartment_{id}_score.json   # Score records, one per listing
//! │   └── all_apartments_scores.json  # Aggregate, rebuilt from the above
//! ├── scraped_apartments.json         # Optional raw record collection
//! └── all_apartment_urls_merged.json  # Output of the URL merge
//! .watch_cache.txt                    # Watcher state, removed on clean exit
//! ```

pub mod local;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{ListingId, ScoreRecord};

// Re-export for convenience
pub use local::LocalStorage;

/// Trait for listing and score storage backends.
///
/// Every write is atomic: readers observe either the previous or the new
/// file, never a partial one.
#[async_trait]
pub trait ScoreStorage: Send + Sync {
    /// Ids of every persisted score record, sorted.
    async fn list_score_ids(&self) -> Result<Vec<ListingId>>;

    /// Load one score record.
    ///
    /// `Ok(None)` when the listing has not been scored yet; a file that does
    /// not parse as a JSON object is `AppError::CorruptPersisted`.
    async fn load_score(&self, id: &ListingId) -> Result<Option<ScoreRecord>>;

    /// Persist one score record.
    async fn save_score(&self, id: &ListingId, record: &ScoreRecord) -> Result<()>;

    /// Ids of every raw listing record, sorted.
    async fn list_listing_ids(&self) -> Result<Vec<ListingId>>;

    /// Load one raw listing record; unparseable files are `MalformedInput`.
    async fn load_listing(&self, id: &ListingId) -> Result<Option<Value>>;

    /// Load the aggregate file, if present.
    async fn load_aggregate(&self) -> Result<Option<Vec<ScoreRecord>>>;

    /// Write the aggregate. Returns false when the file already held
    /// exactly these bytes and was left untouched.
    async fn write_aggregate(&self, records: &[ScoreRecord]) -> Result<bool>;
}
