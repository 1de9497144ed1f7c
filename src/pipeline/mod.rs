//! Reconciliation stages.
//!
//! - `merge`: Combine URL sources into one canonical list
//! - `sync`: Copy fresh listing fields into score records
//! - `aggregate`: Rebuild the consolidated score file
//! - `watch`: Regenerate the report when watched files change
//! - `regenerate` / `invalidate`: The external steps run after a change

pub mod aggregate;
pub mod identity;
pub mod invalidate;
pub mod merge;
pub mod reconcile;
pub mod regenerate;
pub mod sync;
pub mod watch;

pub use aggregate::{RebuildSummary, rebuild};
pub use identity::IdentityResolver;
pub use invalidate::{CacheInvalidator, InvalidationOutcome};
pub use merge::{MergeResult, MergeSummary, NamedSource, SourceStatus, merge, run_merge};
pub use reconcile::{StoreInfo, SyncReport, info, run_sync};
pub use regenerate::{CommandRegenerator, Regenerate, RegenerationOutcome};
pub use sync::{FieldSyncer, ListingInput, SyncOutcome, SyncSummary, sync_fields};
pub use watch::{ChangeDetector, ChangeWatcher, Decision, WatchReport};
