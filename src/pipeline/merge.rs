//! Merge of raw URL sources into one deduplicated listing map.
//!
//! Sources are applied in their declared order and the first source that
//! mentions an id owns it: later entries for the same id are dropped even if
//! their URL text differs. Entries that cannot be normalized or carry no id
//! are counted and skipped.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{Config, ListingId, RawCollection, RawEntry, UrlRecord};
use crate::pipeline::IdentityResolver;
use crate::storage::LocalStorage;

/// How a source was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Loaded,
    /// File absent
    Missing,
    /// File present but not one of the accepted JSON shapes
    Unreadable,
}

/// Per-source merge counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub name: String,
    pub status: SourceStatus,
    /// Entries found in the source
    pub entries: usize,
    /// Entries that introduced a new id
    pub accepted: usize,
    /// Entries whose id was already owned by an earlier entry
    pub duplicates: usize,
    /// Entries that failed normalization or id extraction
    pub malformed: usize,
}

impl SourceReport {
    fn new(name: &str, status: SourceStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            entries: 0,
            accepted: 0,
            duplicates: 0,
            malformed: 0,
        }
    }
}

/// A named source, ready to merge.
#[derive(Debug, Clone)]
pub struct NamedSource {
    pub name: String,
    /// `None` when the source could not be read
    pub entries: Option<Vec<RawEntry>>,
    pub status: SourceStatus,
}

impl NamedSource {
    pub fn loaded(name: impl Into<String>, collection: RawCollection) -> Self {
        Self {
            name: name.into(),
            entries: Some(collection.into_entries()),
            status: SourceStatus::Loaded,
        }
    }
}

/// Result of a merge.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub urls: BTreeMap<ListingId, String>,
    pub sources: Vec<SourceReport>,
}

impl MergeResult {
    pub fn malformed(&self) -> usize {
        self.sources.iter().map(|s| s.malformed).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.duplicates).sum()
    }

    /// Records in id order.
    pub fn records(&self) -> Vec<UrlRecord> {
        self.urls
            .iter()
            .map(|(id, url)| UrlRecord {
                id: id.clone(),
                canonical_url: url.clone(),
            })
            .collect()
    }

    /// Canonical URLs in id order; the persisted form.
    pub fn url_list(&self) -> Vec<String> {
        self.urls.values().cloned().collect()
    }
}

/// Merge sources, highest priority first.
pub fn merge(resolver: &IdentityResolver, sources: &[NamedSource]) -> MergeResult {
    let mut result = MergeResult::default();

    for source in sources {
        let mut report = SourceReport::new(&source.name, source.status);

        let Some(entries) = source.entries.as_ref().filter(|e| !e.is_empty()) else {
            log::warn!("Source '{}' contributes no entries", source.name);
            result.sources.push(report);
            continue;
        };

        report.entries = entries.len();
        for entry in entries {
            let resolved = entry
                .candidate()
                .and_then(|raw| resolver.resolve(&raw));

            let Some((id, url)) = resolved else {
                log::debug!("Source '{}': skipping malformed entry {:?}", source.name, entry);
                report.malformed += 1;
                continue;
            };

            match result.urls.get(&id) {
                Some(kept) => {
                    if kept != &url {
                        log::debug!(
                            "Source '{}': id {} already mapped to {}, dropping {}",
                            source.name,
                            id,
                            kept,
                            url
                        );
                    }
                    report.duplicates += 1;
                }
                None => {
                    result.urls.insert(id, url);
                    report.accepted += 1;
                }
            }
        }

        log::info!(
            "Source '{}': {} entries, {} new, {} duplicates, {} malformed",
            report.name,
            report.entries,
            report.accepted,
            report.duplicates,
            report.malformed
        );
        result.sources.push(report);
    }

    result
}

/// Read every configured source from storage, in priority order.
pub async fn load_sources(config: &Config, storage: &LocalStorage) -> Result<Vec<NamedSource>> {
    let mut sources = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        let named = match storage.read_source(&source.path).await? {
            None => {
                log::warn!(
                    "Source '{}': file not found ({})",
                    source.name,
                    source.path.display()
                );
                NamedSource {
                    name: source.name.clone(),
                    entries: None,
                    status: SourceStatus::Missing,
                }
            }
            Some(bytes) => match RawCollection::parse(&bytes) {
                Ok(collection) => NamedSource::loaded(source.name.clone(), collection),
                Err(e) => {
                    log::warn!(
                        "Source '{}': unreadable ({}): {}",
                        source.name,
                        source.path.display(),
                        e
                    );
                    NamedSource {
                        name: source.name.clone(),
                        entries: None,
                        status: SourceStatus::Unreadable,
                    }
                }
            },
        };
        sources.push(named);
    }

    Ok(sources)
}

/// Summary of a merge run.
#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub result: MergeResult,
    /// False when the merged file already held the same list
    pub written: bool,
}

/// Load sources, merge them and persist the merged URL list.
pub async fn run_merge(config: &Config, storage: &LocalStorage) -> Result<MergeSummary> {
    let resolver = IdentityResolver::new(&config.identity)?;
    let sources = load_sources(config, storage).await?;
    let result = merge(&resolver, &sources);

    let written = storage.write_merged_urls(&result.url_list()).await?;
    if written {
        log::info!(
            "Merged {} unique listings into {}",
            result.urls.len(),
            storage.merged_urls_path().display()
        );
    } else {
        log::info!(
            "Merged {} unique listings; {} unchanged",
            result.urls.len(),
            storage.merged_urls_path().display()
        );
    }

    Ok(MergeSummary { result, written })
}
