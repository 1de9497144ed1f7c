//! Batch orchestration and the summaries printed after each run.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::aggregate::{self, RebuildSummary};
use crate::pipeline::merge::{MergeSummary, SourceStatus};
use crate::pipeline::sync::{FieldSyncer, ListingInput, SyncOutcome, SyncSummary};
use crate::storage::{LocalStorage, ScoreStorage};

/// Result of a sync run, with the rebuild that followed it if any.
#[derive(Debug)]
pub struct SyncReport {
    pub sync: SyncSummary,
    pub rebuild: Option<RebuildSummary>,
}

/// Sync fresh listings into the score store, then rebuild the aggregate
/// when configured to.
///
/// `from` names a collection file; without it the per-listing files of the
/// listings directory are used.
pub async fn run_sync(
    config: &Config,
    storage: &LocalStorage,
    from: Option<&Path>,
) -> Result<SyncReport> {
    let input = match from {
        Some(path) => {
            log::info!("Syncing from collection {}", path.display());
            ListingInput::from_collection_file(&storage.path(path)).await?
        }
        None => {
            log::info!("Syncing from {}", config.paths.listings_dir.display());
            ListingInput::Directory
        }
    };

    let sync = FieldSyncer::new(storage, &config.sync.fields)
        .run(input)
        .await?;

    let rebuild = if config.sync.rebuild_after_sync && sync.updated() > 0 {
        Some(aggregate::rebuild(storage).await?)
    } else {
        None
    };

    Ok(SyncReport { sync, rebuild })
}

pub fn log_merge(summary: &MergeSummary) {
    log::info!("--- Merge summary ---");
    for source in &summary.result.sources {
        match source.status {
            SourceStatus::Loaded => log::info!(
                "  {:<12} {} entries, {} accepted, {} duplicates, {} malformed",
                source.name,
                source.entries,
                source.accepted,
                source.duplicates,
                source.malformed
            ),
            SourceStatus::Missing => log::info!("  {:<12} missing", source.name),
            SourceStatus::Unreadable => log::info!("  {:<12} unreadable", source.name),
        }
    }
    log::info!(
        "  unique listings: {} ({})",
        summary.result.urls.len(),
        if summary.written { "written" } else { "unchanged" }
    );
}

pub fn log_sync(summary: &SyncSummary) {
    log::info!("--- Sync summary ---");
    log::info!("  updated:         {}", summary.updated());
    log::info!("  not yet scored:  {}", summary.skipped());
    log::info!("  failed:          {}", summary.failed());
    if summary.malformed > 0 {
        log::info!("  malformed input: {}", summary.malformed);
    }
    for (id, outcome) in &summary.outcomes {
        match outcome {
            SyncOutcome::Updated { partial, .. } if !partial.is_empty() => {
                let names: Vec<String> = partial.iter().map(ToString::to_string).collect();
                log::warn!("  {}: could not set {}", id, names.join(", "));
            }
            SyncOutcome::Failed(e) => log::warn!("  {}: {}", id, e),
            _ => {}
        }
    }
}

pub fn log_rebuild(summary: &RebuildSummary) {
    log::info!("--- Rebuild summary ---");
    log::info!(
        "  records: {} ({})",
        summary.count,
        if summary.written { "written" } else { "unchanged" }
    );
    for (id, e) in &summary.corrupt {
        log::warn!("  skipped {}: {}", id, e);
    }
    if !summary.duplicates.is_empty() {
        log::warn!("  duplicate ids dropped: {}", summary.duplicates.len());
    }
}

/// Snapshot of what is on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub score_files: usize,
    pub listing_files: usize,
    /// `None` when the merged list has not been written yet
    pub merged_urls: Option<usize>,
    /// `None` when the aggregate has not been built yet
    pub aggregate_entries: Option<usize>,
    pub watch_cache_present: bool,
}

/// Gather counts for the `info` command.
pub async fn info(storage: &LocalStorage) -> Result<StoreInfo> {
    let merged_urls = match storage.read_bytes(&storage.merged_urls_path()).await? {
        Some(bytes) => serde_json::from_slice::<Vec<String>>(&bytes)
            .ok()
            .map(|urls| urls.len()),
        None => None,
    };
    let aggregate_entries = match storage.load_aggregate().await {
        Ok(aggregate) => aggregate.map(|records| records.len()),
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    };

    Ok(StoreInfo {
        score_files: storage.list_score_ids().await?.len(),
        listing_files: storage.list_listing_ids().await?.len(),
        merged_urls,
        aggregate_entries,
        watch_cache_present: tokio::fs::try_exists(storage.watch_cache_path()).await?,
    })
}

pub fn log_info(storage: &LocalStorage, info: &StoreInfo) {
    let or_missing = |count: Option<usize>| match count {
        Some(n) => n.to_string(),
        None => "not found".to_string(),
    };
    log::info!("Data root: {}", storage.path("").display());
    log::info!("Score files: {}", info.score_files);
    log::info!("Listing files: {}", info.listing_files);
    log::info!("Merged URLs: {}", or_missing(info.merged_urls));
    log::info!("Aggregate entries: {}", or_missing(info.aggregate_entries));
    log::info!(
        "Watch cache: {}",
        if info.watch_cache_present {
            "present (watcher running or not shut down cleanly)"
        } else {
            "absent"
        }
    );
}
