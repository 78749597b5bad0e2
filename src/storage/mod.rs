//! Storage abstractions for published catalog documents.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Harvest and publish configuration
//! ├── static/               # Published documents (served by an external HTTP server)
//! │   ├── sitemap.xml       # Single document, or index of the chunks below
//! │   ├── sitemap00000.xml
//! │   ├── changeset.xml     # Current change-set, when change memory is enabled
//! │   └── stats.json
//! └── tmp/                  # Staging area for the next publish round
//! ```

pub mod local;
pub mod sitemap;

use async_trait::async_trait;

use crate::error::Result;

// Re-export for convenience
pub use local::LocalStorage;
pub use sitemap::{Catalog, CatalogCodec, ReadSummary, WriteSummary};

/// Keyed byte store for catalog documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write bytes under `key`, replacing any previous content atomically.
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read bytes, returning `None` if `key` does not exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix` and ending with `suffix`, sorted.
    async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>>;

    /// Filesystem path or URI of `key`, used to derive published locations.
    fn location(&self, key: &str) -> String;
}
