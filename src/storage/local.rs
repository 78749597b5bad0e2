//! Local filesystem storage implementation.
//!
//! Documents are written atomically (temporary file, then rename) so a
//! concurrent reader never observes a half-written catalog.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::DocumentStore;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write JSON data.
    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read JSON data.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove everything below the root and recreate it empty.
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Io(e)),
        }
        tokio::fs::create_dir_all(&self.root_dir).await?;
        Ok(())
    }

    /// Move `key` into another local store under the same key.
    pub async fn move_to(&self, key: &str, other: &LocalStorage) -> Result<()> {
        let target = other.path(key);
        other.ensure_dir(&target).await?;
        let source = self.path(key);
        if tokio::fs::rename(&source, &target).await.is_err() {
            // Rename fails across filesystems
            tokio::fs::copy(&source, &target).await?;
            tokio::fs::remove_file(&source).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for LocalStorage {
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn location(&self, key: &str) -> String {
        self.path(key).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!tmp.path().join("test.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
        assert!(!storage.remove("nope.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        for key in ["sitemap00001.xml", "sitemap.xml", "sitemap00000.xml", "stats.json"] {
            storage.write_bytes(key, b"x").await.unwrap();
        }
        let keys = storage.list("sitemap", ".xml").await.unwrap();
        assert_eq!(keys, vec!["sitemap.xml", "sitemap00000.xml", "sitemap00001.xml"]);
    }

    #[tokio::test]
    async fn test_move_and_reset() {
        let tmp = TempDir::new().unwrap();
        let staging = LocalStorage::new(tmp.path().join("tmp"));
        let output = LocalStorage::new(tmp.path().join("out"));

        staging.write_bytes("sitemap.xml", b"<urlset/>").await.unwrap();
        staging.move_to("sitemap.xml", &output).await.unwrap();
        assert_eq!(
            output.read_bytes("sitemap.xml").await.unwrap(),
            Some(b"<urlset/>".to_vec())
        );
        assert!(staging.read_bytes("sitemap.xml").await.unwrap().is_none());

        staging.write_bytes("left.xml", b"x").await.unwrap();
        staging.reset().await.unwrap();
        assert!(staging.list("", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage
            .write_json("stats.json", &serde_json::json!({"resources": 3}))
            .await
            .unwrap();
        let value: serde_json::Value = storage.read_json("stats.json").await.unwrap().unwrap();
        assert_eq!(value["resources"], 3);
    }
}
