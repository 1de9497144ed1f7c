//! Local filesystem storage implementation.
//!
//! All paths from [`PathsConfig`] are resolved against a root directory, so
//! the same configuration works from any working directory and in tests.
//!
//! ## Features
//!
//! - **Atomic writes**: every file is written to a sibling `.tmp` and renamed
//! - **Unchanged-write skipping**: the aggregate and merged URL list are only
//!   rewritten when their bytes change, so their mtimes stay meaningful
//! - **Watch cache**: load, save and remove the watcher's `path:mtime` file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{ListingId, PathsConfig, ScoreRecord, WatchState};
use crate::storage::ScoreStorage;

const SCORE_PREFIX: &str = "apartment_";
const SCORE_SUFFIX: &str = "_score.json";
const JSON_SUFFIX: &str = ".json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    paths: PathsConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, paths: &PathsConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            paths: paths.clone(),
        }
    }

    /// Resolve a configured path against the root directory.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root_dir.join(relative)
    }

    pub fn score_path(&self, id: &ListingId) -> PathBuf {
        self.path(&self.paths.scores_dir)
            .join(format!("{SCORE_PREFIX}{id}{SCORE_SUFFIX}"))
    }

    pub fn listing_path(&self, id: &ListingId) -> PathBuf {
        self.path(&self.paths.listings_dir)
            .join(format!("{id}{JSON_SUFFIX}"))
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.path(&self.paths.aggregate_file)
    }

    pub fn merged_urls_path(&self) -> PathBuf {
        self.path(&self.paths.merged_urls_file)
    }

    pub fn watch_cache_path(&self) -> PathBuf {
        self.path(&self.paths.watch_cache_file)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    pub async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write bytes atomically unless the file already holds them.
    ///
    /// Returns whether a write happened.
    pub async fn write_bytes_if_changed(&self, path: &Path, bytes: &[u8]) -> Result<bool> {
        if let Some(existing) = self.read_bytes(path).await? {
            if existing == bytes {
                return Ok(false);
            }
        }
        self.write_bytes(path, bytes).await?;
        Ok(true)
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    pub async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data, mapping parse failures to `CorruptPersisted`.
    async fn read_persisted<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match self.read_bytes(path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::corrupt(path, e)),
            None => Ok(None),
        }
    }

    /// List file names in a directory that match a prefix/suffix pair,
    /// returning the part in between as a listing id.
    async fn list_ids(&self, dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<ListingId>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Directory not found: {}", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let id = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .filter(|id| !id.is_empty() && !id.contains('.'));
            if let Some(id) = id {
                ids.push(ListingId::from(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Write the merged URL list. Returns whether the file changed.
    pub async fn write_merged_urls(&self, urls: &[String]) -> Result<bool> {
        let bytes = serde_json::to_vec_pretty(urls)?;
        self.write_bytes_if_changed(&self.merged_urls_path(), &bytes)
            .await
    }

    /// Read a source file; a missing file is `Ok(None)`.
    pub async fn read_source(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        self.read_bytes(&self.path(path)).await
    }

    /// Load the watch cache, if a previous run left one behind.
    pub async fn load_watch_state(&self) -> Result<Option<WatchState>> {
        match self.read_bytes(&self.watch_cache_path()).await? {
            Some(bytes) => Ok(Some(WatchState::parse(&String::from_utf8_lossy(&bytes)))),
            None => Ok(None),
        }
    }

    pub async fn save_watch_state(&self, state: &WatchState) -> Result<()> {
        self.write_bytes(&self.watch_cache_path(), state.render().as_bytes())
            .await
    }

    /// Remove the watch cache along with a temp file left by an interrupted
    /// write. Missing files are not an error.
    pub async fn remove_watch_state(&self) -> Result<()> {
        let path = self.watch_cache_path();
        remove_if_exists(&path.with_extension("tmp")).await?;
        remove_if_exists(&path).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[async_trait]
impl ScoreStorage for LocalStorage {
    async fn list_score_ids(&self) -> Result<Vec<ListingId>> {
        let dir = self.path(&self.paths.scores_dir);
        self.list_ids(&dir, SCORE_PREFIX, SCORE_SUFFIX).await
    }

    async fn load_score(&self, id: &ListingId) -> Result<Option<ScoreRecord>> {
        let path = self.score_path(id);
        match self.read_persisted::<Value>(&path).await? {
            Some(value) => ScoreRecord::from_value(value)
                .map(Some)
                .map_err(|e| AppError::corrupt(&path, e)),
            None => Ok(None),
        }
    }

    async fn save_score(&self, id: &ListingId, record: &ScoreRecord) -> Result<()> {
        self.write_json(&self.score_path(id), record).await
    }

    async fn list_listing_ids(&self) -> Result<Vec<ListingId>> {
        let dir = self.path(&self.paths.listings_dir);
        self.list_ids(&dir, "", JSON_SUFFIX).await
    }

    async fn load_listing(&self, id: &ListingId) -> Result<Option<Value>> {
        let path = self.listing_path(id);
        match self.read_bytes(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::malformed(path.display().to_string(), e)),
            None => Ok(None),
        }
    }

    async fn load_aggregate(&self) -> Result<Option<Vec<ScoreRecord>>> {
        self.read_persisted(&self.aggregate_path()).await
    }

    async fn write_aggregate(&self, records: &[ScoreRecord]) -> Result<bool> {
        let bytes = serde_json::to_vec_pretty(records)?;
        self.write_bytes_if_changed(&self.aggregate_path(), &bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn storage(tmp: &TempDir) -> LocalStorage {
        LocalStorage::new(tmp.path(), &PathsConfig::default())
    }

    fn record(value: Value) -> ScoreRecord {
        ScoreRecord::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let path = tmp.path().join("nested/test.txt");

        storage.write_bytes(&path, b"hello").await.unwrap();
        let data = storage.read_bytes(&path).await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let data = storage.read_bytes(&tmp.path().join("nope.txt")).await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_score_save_load_and_list() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        for id in ["20", "3", "100"] {
            let id = ListingId::from(id);
            storage
                .save_score(&id, &record(json!({"id": id.as_str(), "score": 1})))
                .await
                .unwrap();
        }
        // The aggregate shares the directory but is not a score record
        storage.write_aggregate(&[]).await.unwrap();

        let ids = storage.list_score_ids().await.unwrap();
        let ids: Vec<&str> = ids.iter().map(ListingId::as_str).collect();
        assert_eq!(ids, vec!["3", "20", "100"]);

        let loaded = storage.load_score(&ListingId::from("3")).await.unwrap().unwrap();
        assert_eq!(loaded.get("score"), Some(&json!(1)));
        assert!(storage.load_score(&ListingId::from("4")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_score_is_reported() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let id = ListingId::from("9");
        let path = storage.score_path(&id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = storage.load_score(&id).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptPersisted { .. }));

        std::fs::write(&path, "[1, 2]").unwrap();
        let err = storage.load_score(&id).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptPersisted { .. }));
    }

    #[tokio::test]
    async fn test_missing_directories_list_nothing() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        assert!(storage.list_score_ids().await.unwrap().is_empty());
        assert!(storage.list_listing_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_aggregate_is_not_rewritten() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let records = vec![record(json!({"id": "1"}))];

        assert!(storage.write_aggregate(&records).await.unwrap());
        assert!(!storage.write_aggregate(&records).await.unwrap());

        let loaded = storage.load_aggregate().await.unwrap().unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_watch_state_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        assert!(storage.load_watch_state().await.unwrap().is_none());

        let mut state = WatchState::new();
        state.record(Path::new("data/scraped_apartments.json"), 12.5);
        storage.save_watch_state(&state).await.unwrap();
        assert_eq!(storage.load_watch_state().await.unwrap(), Some(state));

        storage.remove_watch_state().await.unwrap();
        assert!(!storage.watch_cache_path().exists());
        storage.remove_watch_state().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_watch_state_clears_interrupted_write() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let cache = storage.watch_cache_path();
        let leftover = cache.with_extension("tmp");
        std::fs::write(&cache, "a.json:1\n").unwrap();
        std::fs::write(&leftover, "a.json:2\n").unwrap();

        storage.remove_watch_state().await.unwrap();
        assert!(!cache.exists());
        assert!(!leftover.exists());
    }
}
