// src/models/mod.rs

//! Domain models for the reconciler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod score;
mod source;
mod watch;

// Re-export all public types
pub use config::{
    CacheConfig, Config, IdentityConfig, PathsConfig, RegenerateConfig, SourceConfig, SyncConfig,
    WatchConfig, WatchStrategy,
};
pub use listing::{ListingId, UrlRecord};
pub use score::{FieldPath, ID_KEY, ScoreRecord, UPDATED_AT_KEY};
pub use source::{RawCollection, RawEntry, UrlObject};
pub use watch::{Mtime, TargetState, WatchState, mtime_of};
