//! Utility functions and helpers.

pub mod http;

use std::path::Path;

use crate::models::{Mtime, mtime_of};

/// Current modification time of a file, or `None` if it cannot be read.
pub async fn file_mtime(path: &Path) -> Option<Mtime> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(mtime_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_mtime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.json");
        assert!(file_mtime(&path).await.is_none());

        std::fs::write(&path, "[]").unwrap();
        let mtime = file_mtime(&path).await.unwrap();
        assert!(mtime > 0.0);
    }
}
