//! Aggregate rebuild from the per-listing score records.
//!
//! The aggregate holds no state of its own: it is recomputed from scratch on
//! every run, sorted by listing id, one entry per id.

use std::collections::BTreeMap;

use crate::error::{AppError, Result};
use crate::models::{ListingId, ScoreRecord};
use crate::storage::ScoreStorage;

/// Summary of an aggregate rebuild.
#[derive(Debug, Default)]
pub struct RebuildSummary {
    /// Entries in the rebuilt aggregate
    pub count: usize,
    /// Score files skipped because they did not parse
    pub corrupt: Vec<(ListingId, AppError)>,
    /// Records dropped because their id was already present
    pub duplicates: Vec<ListingId>,
    /// False when the aggregate on disk was already identical
    pub written: bool,
}

/// Assemble the aggregate from every persisted score record.
///
/// A record's own `id` field decides its position; files whose record has
/// no usable id fall back to the id in the file name.
pub async fn collect(storage: &dyn ScoreStorage) -> Result<(Vec<ScoreRecord>, RebuildSummary)> {
    let mut summary = RebuildSummary::default();
    let mut by_id: BTreeMap<ListingId, ScoreRecord> = BTreeMap::new();

    for file_id in storage.list_score_ids().await? {
        let record = match storage.load_score(&file_id).await {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Skipping score {}: {}", file_id, e);
                summary.corrupt.push((file_id, e));
                continue;
            }
        };

        let id = record.id().unwrap_or_else(|| file_id.clone());
        if id != file_id {
            log::debug!("Score file for {} holds id {}", file_id, id);
        }
        if by_id.contains_key(&id) {
            log::warn!("Duplicate score record for id {} (file {}), keeping the first", id, file_id);
            summary.duplicates.push(id);
            continue;
        }
        by_id.insert(id, record);
    }

    let records: Vec<ScoreRecord> = by_id.into_values().collect();
    summary.count = records.len();
    Ok((records, summary))
}

/// Rebuild and atomically persist the aggregate.
pub async fn rebuild(storage: &dyn ScoreStorage) -> Result<RebuildSummary> {
    let (records, mut summary) = collect(storage).await?;
    summary.written = storage.write_aggregate(&records).await?;

    if summary.written {
        log::info!("Aggregate rebuilt with {} records", summary.count);
    } else {
        log::info!("Aggregate unchanged ({} records)", summary.count);
    }
    if !summary.corrupt.is_empty() {
        log::warn!("{} score files could not be read", summary.corrupt.len());
    }

    Ok(summary)
}
