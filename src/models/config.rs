//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FieldPath;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File and directory locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Listing URL recognition and canonical forms
    #[serde(default)]
    pub identity: IdentityConfig,

    /// URL sources, highest priority first
    #[serde(default = "defaults::sources")]
    pub sources: Vec<SourceConfig>,

    /// Fields copied from scraped records into score records
    #[serde(default)]
    pub sync: SyncConfig,

    /// Change detection settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// External report builder
    #[serde(default)]
    pub regenerate: RegenerateConfig,

    /// Backend cache invalidation
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::validation("source name is empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        if !self.identity.listing_template.contains("{id}") {
            return Err(AppError::validation(
                "identity.listing_template must contain {id}",
            ));
        }
        url::Url::parse(&self.identity.base_url)?;
        if self.identity.id_param.trim().is_empty() {
            return Err(AppError::validation("identity.id_param is empty"));
        }
        if self.sync.fields.is_empty() {
            return Err(AppError::validation("sync.fields is empty"));
        }
        if self.watch.targets.is_empty() {
            return Err(AppError::validation("No watch targets defined"));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(AppError::validation("watch.poll_interval_ms must be > 0"));
        }
        if self.regenerate.program.trim().is_empty() {
            return Err(AppError::validation("regenerate.program is empty"));
        }
        if self.regenerate.timeout_secs == 0 {
            return Err(AppError::validation("regenerate.timeout_secs must be > 0"));
        }
        if self.cache.timeout_secs == 0 {
            return Err(AppError::validation("cache.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.cache.url)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            identity: IdentityConfig::default(),
            sources: defaults::sources(),
            sync: SyncConfig::default(),
            watch: WatchConfig::default(),
            regenerate: RegenerateConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// File and directory locations, relative to the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of per-listing score files (`apartment_{id}_score.json`)
    #[serde(default = "defaults::scores_dir")]
    pub scores_dir: PathBuf,

    /// Directory of raw scraped listing records (`{id}.json`)
    #[serde(default = "defaults::listings_dir")]
    pub listings_dir: PathBuf,

    /// Aggregate of every score record
    #[serde(default = "defaults::aggregate_file")]
    pub aggregate_file: PathBuf,

    /// Output of the URL merge
    #[serde(default = "defaults::merged_urls_file")]
    pub merged_urls_file: PathBuf,

    /// Transient watch cache
    #[serde(default = "defaults::watch_cache_file")]
    pub watch_cache_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scores_dir: defaults::scores_dir(),
            listings_dir: defaults::listings_dir(),
            aggregate_file: defaults::aggregate_file(),
            merged_urls_file: defaults::merged_urls_file(),
            watch_cache_file: defaults::watch_cache_file(),
        }
    }
}

/// How listing URLs are recognized and rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Site root used to absolutize relative paths
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Query parameter carrying the listing id
    #[serde(default = "defaults::id_param")]
    pub id_param: String,

    /// Canonical URL for a bare id; `{id}` and `{token}` are substituted
    #[serde(default = "defaults::listing_template")]
    pub listing_template: String,

    /// Alert token substituted into the template
    #[serde(default)]
    pub token: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            id_param: defaults::id_param(),
            listing_template: defaults::listing_template(),
            token: String::new(),
        }
    }
}

/// A named URL source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Field sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Dotted field paths copied from scraped records
    #[serde(default = "defaults::sync_fields")]
    pub fields: Vec<FieldPath>,

    /// Rebuild the aggregate after a sync run
    #[serde(default = "defaults::enabled")]
    pub rebuild_after_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fields: defaults::sync_fields(),
            rebuild_after_sync: true,
        }
    }
}

/// How change detection observes the filesystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchStrategy {
    /// Filesystem notifications, falling back to polling
    #[default]
    Native,
    /// Fixed-interval polling
    Poll,
}

/// Change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Files whose modification triggers a regeneration
    #[serde(default = "defaults::watch_targets")]
    pub targets: Vec<PathBuf>,

    /// Minimum delay between two regenerations in milliseconds
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,

    /// Polling period in milliseconds
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub strategy: WatchStrategy,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            targets: defaults::watch_targets(),
            debounce_ms: defaults::debounce_ms(),
            poll_interval_ms: defaults::poll_interval_ms(),
            strategy: WatchStrategy::default(),
        }
    }
}

/// External report builder invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateConfig {
    #[serde(default = "defaults::program")]
    pub program: String,

    #[serde(default = "defaults::args")]
    pub args: Vec<String>,

    /// Working directory of the child; inherits ours when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Child timeout in seconds
    #[serde(default = "defaults::regenerate_timeout")]
    pub timeout_secs: u64,
}

impl RegenerateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RegenerateConfig {
    fn default() -> Self {
        Self {
            program: defaults::program(),
            args: defaults::args(),
            working_dir: None,
            timeout_secs: defaults::regenerate_timeout(),
        }
    }
}

/// Backend cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Endpoint receiving the invalidation POST
    #[serde(default = "defaults::cache_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::cache_timeout")]
    pub timeout_secs: u64,

    /// Call the endpoint after each successful regeneration
    #[serde(default)]
    pub invalidate_after_regenerate: bool,
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: defaults::cache_url(),
            timeout_secs: defaults::cache_timeout(),
            invalidate_after_regenerate: false,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::{FieldPath, SourceConfig};

    pub fn enabled() -> bool {
        true
    }

    // Path defaults
    pub fn scores_dir() -> PathBuf {
        "data/scores".into()
    }
    pub fn listings_dir() -> PathBuf {
        "data/appartements".into()
    }
    pub fn aggregate_file() -> PathBuf {
        "data/scores/all_apartments_scores.json".into()
    }
    pub fn merged_urls_file() -> PathBuf {
        "data/all_apartment_urls_merged.json".into()
    }
    pub fn watch_cache_file() -> PathBuf {
        ".watch_cache.txt".into()
    }

    // Identity defaults
    pub fn base_url() -> String {
        "https://www.jinka.fr".into()
    }
    pub fn id_param() -> String {
        "ad".into()
    }
    pub fn listing_template() -> String {
        "https://www.jinka.fr/alert_result?token={token}&ad={id}&from=dashboard_card&from_alert_filter=all&from_alert_page=1".into()
    }

    // Sources, highest priority first
    pub fn sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig::new("emails", "data/all_apartment_urls_from_email.json"),
            SourceConfig::new("dashboard", "data/apartment_urls_page1.json"),
            SourceConfig::new("scores", "data/scores/all_apartments_scores.json"),
        ]
    }

    // Sync defaults
    pub fn sync_fields() -> Vec<FieldPath> {
        [
            "map_info",
            "transports",
            "localisation",
            "etage",
            "exposition.details.brightness_value",
            "exposition.details.image_brightness",
            "exposition.exposition",
        ]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
    }

    // Watch defaults
    pub fn watch_targets() -> Vec<PathBuf> {
        vec![
            "data/scores/all_apartments_scores.json".into(),
            "data/scraped_apartments.json".into(),
            "generate_scorecard_html.py".into(),
        ]
    }
    pub fn debounce_ms() -> u64 {
        2_000
    }
    pub fn poll_interval_ms() -> u64 {
        2_000
    }

    // Regeneration defaults
    pub fn program() -> String {
        "python3".into()
    }
    pub fn args() -> Vec<String> {
        vec!["generate_scorecard_html.py".into()]
    }
    pub fn regenerate_timeout() -> u64 {
        60
    }

    // Cache defaults
    pub fn cache_url() -> String {
        "http://localhost:8000/api/apartments/invalidate-cache".into()
    }
    pub fn cache_timeout() -> u64 {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_sync_fields_cover_nested_exposition() {
        let fields: Vec<String> = Config::default()
            .sync
            .fields
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(fields.len(), 7);
        assert!(fields.contains(&"exposition.details.brightness_value".to_string()));
    }

    #[test]
    fn validate_rejects_duplicate_source_names() {
        let mut config = Config::default();
        config
            .sources
            .push(SourceConfig::new("emails", "data/other.json"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_template_without_id() {
        let mut config = Config::default();
        config.identity.listing_template = "https://www.jinka.fr/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.regenerate.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [watch]
            debounce_ms = 500
            strategy = "poll"

            [[sources]]
            name = "only"
            path = "data/only.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.watch.debounce(), Duration::from_millis(500));
        assert_eq!(config.watch.strategy, WatchStrategy::Poll);
        assert_eq!(config.sources, vec![SourceConfig::new("only", "data/only.json")]);
        assert_eq!(config.regenerate.timeout_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_config_survives_toml_round_trip() {
        let text = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sources, Config::default().sources);
        assert_eq!(parsed.sync.fields, Config::default().sync.fields);
    }
}
