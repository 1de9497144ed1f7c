//! Field sync from freshly scraped listings into persisted score records.
//!
//! Only the configured field paths are copied; everything else in the score
//! record is left as it was. A listing that has not been scored yet is
//! skipped, and a corrupt score file aborts that listing alone.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{FieldPath, ListingId, ScoreRecord};
use crate::storage::ScoreStorage;

/// Record produced by [`sync_fields`], with what was written.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedRecord {
    pub record: ScoreRecord,
    /// Paths copied from the fresh record
    pub written: Vec<FieldPath>,
    /// Paths present in the fresh record that could not be set
    pub partial: Vec<FieldPath>,
}

/// Copy the configured field paths present in `fresh` into `existing`.
///
/// A path counts as present when every segment resolves in `fresh`, even if
/// the final value is `null`. `updated_at` is always stamped with `now`.
pub fn sync_fields(
    existing: ScoreRecord,
    fresh: &Value,
    fields: &[FieldPath],
    now: DateTime<Utc>,
) -> SyncedRecord {
    let mut record = existing;
    let mut written = Vec::new();
    let mut partial = Vec::new();

    for field in fields {
        let Some(value) = fresh.pointer(&field.pointer()) else {
            continue;
        };
        match record.set_path(field, value.clone()) {
            Ok(()) => written.push(field.clone()),
            Err(e) => {
                log::warn!("{}", e);
                partial.push(field.clone());
            }
        }
    }

    record.touch(now);
    SyncedRecord {
        record,
        written,
        partial,
    }
}

/// Where fresh listing records come from.
#[derive(Debug, Clone)]
pub enum ListingInput {
    /// Per-listing files in the storage's listings directory
    Directory,
    /// Records already loaded from a collection file
    Collection(Vec<Value>),
}

impl ListingInput {
    /// Load a collection file: a JSON array of records carrying `id`.
    pub async fn from_collection_file(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::MissingFile(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let records: Vec<Value> = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::malformed(path.display().to_string(), e))?;
        Ok(Self::Collection(records))
    }
}

/// Outcome of syncing one listing.
#[derive(Debug)]
pub enum SyncOutcome {
    Updated {
        written: Vec<FieldPath>,
        partial: Vec<FieldPath>,
    },
    /// The listing has no score record yet
    NotYetScored,
    Failed(AppError),
}

/// Summary of a sync run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub outcomes: Vec<(ListingId, SyncOutcome)>,
    /// Collection records without a usable id
    pub malformed: usize,
}

impl SyncSummary {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Updated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::NotYetScored))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Syncs fresh listing records into the score store.
pub struct FieldSyncer<'a> {
    storage: &'a dyn ScoreStorage,
    fields: &'a [FieldPath],
}

impl<'a> FieldSyncer<'a> {
    pub fn new(storage: &'a dyn ScoreStorage, fields: &'a [FieldPath]) -> Self {
        Self { storage, fields }
    }

    /// Sync every listing from the given input.
    pub async fn run(&self, input: ListingInput) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        match input {
            ListingInput::Directory => {
                for id in self.storage.list_listing_ids().await? {
                    let outcome = match self.storage.load_listing(&id).await {
                        Ok(Some(fresh)) => self.sync_one(&id, &fresh, Utc::now()).await,
                        Ok(None) => SyncOutcome::Failed(AppError::MissingFile(
                            format!("{id}.json").into(),
                        )),
                        Err(e) => SyncOutcome::Failed(e),
                    };
                    Self::log_outcome(&id, &outcome);
                    summary.outcomes.push((id, outcome));
                }
            }
            ListingInput::Collection(records) => {
                let mut by_id: BTreeMap<ListingId, Value> = BTreeMap::new();
                for record in records {
                    match ScoreRecord::from_value(record.clone()).ok().and_then(|r| r.id()) {
                        Some(id) => {
                            if by_id.insert(id.clone(), record).is_some() {
                                log::debug!("Listing {} appears more than once; keeping the last", id);
                            }
                        }
                        None => summary.malformed += 1,
                    }
                }
                if summary.malformed > 0 {
                    log::warn!("{} collection records have no usable id", summary.malformed);
                }
                for (id, fresh) in by_id {
                    let outcome = self.sync_one(&id, &fresh, Utc::now()).await;
                    Self::log_outcome(&id, &outcome);
                    summary.outcomes.push((id, outcome));
                }
            }
        }

        log::info!(
            "Sync: {} updated, {} not yet scored, {} failed",
            summary.updated(),
            summary.skipped(),
            summary.failed()
        );
        Ok(summary)
    }

    /// Sync a single listing. Nothing is written unless the whole update
    /// succeeds.
    pub async fn sync_one(&self, id: &ListingId, fresh: &Value, now: DateTime<Utc>) -> SyncOutcome {
        if !fresh.is_object() {
            return SyncOutcome::Failed(AppError::malformed(
                format!("listing {id}"),
                "raw record is not a JSON object",
            ));
        }

        let existing = match self.storage.load_score(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return SyncOutcome::NotYetScored,
            Err(e) => return SyncOutcome::Failed(e),
        };

        let synced = sync_fields(existing, fresh, self.fields, now);
        match self.storage.save_score(id, &synced.record).await {
            Ok(()) => SyncOutcome::Updated {
                written: synced.written,
                partial: synced.partial,
            },
            Err(e) => SyncOutcome::Failed(e),
        }
    }

    fn log_outcome(id: &ListingId, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Updated { written, .. } if written.is_empty() => {
                log::debug!("Listing {}: no synced fields present, timestamp refreshed", id)
            }
            SyncOutcome::Updated { written, .. } => {
                let names: Vec<String> = written.iter().map(ToString::to_string).collect();
                log::debug!("Listing {}: updated {}", id, names.join(", "))
            }
            SyncOutcome::NotYetScored => log::debug!("Listing {}: skipped, not yet scored", id),
            SyncOutcome::Failed(e) => log::warn!("Listing {}: {}", id, e),
        }
    }
}
