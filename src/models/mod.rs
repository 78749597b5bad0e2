// src/models/mod.rs

//! Domain models for harvesting and publishing.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod record;
mod resource;
mod snapshot;

use std::fmt;

// Re-export all public types
pub use config::{
    ChangeMemoryConfig, Config, HarvestConfig, LoggingConfig, PollConfig, PublishConfig,
};
pub use event::ChangeEvent;
pub use record::{ChangeRecord, Granularity, RecordHeader};
pub use resource::{ChangeType, Fixity, Resource};
pub use snapshot::{Capabilities, Capability, ChangeSet, ResourceContainer, Snapshot};

/// Root kind of a catalog document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// `<urlset>` holding resource entries
    UrlSet,
    /// `<sitemapindex>` listing chunk documents
    Index,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::UrlSet => f.write_str("sitemap"),
            DocumentKind::Index => f.write_str("sitemapindex"),
        }
    }
}
