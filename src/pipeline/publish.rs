// src/pipeline/publish.rs

//! Periodic catalog publication.
//!
//! Each round clones the shared snapshot under its read lock, writes the
//! catalog into a staging directory, then swaps the documents into the
//! output directory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Capability, PublishConfig};
use crate::services::{ChangeMemory, SharedSnapshot};
use crate::storage::{CatalogCodec, DocumentStore, LocalStorage};
use crate::utils::mapper::Mapper;

/// File name of the current change-set document.
pub const CHANGESET_FILE: &str = "changeset.xml";
/// File name of the publish statistics.
pub const STATS_FILE: &str = "stats.json";

/// Statistics of one publish round, written as `stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishStats {
    pub resource_count: usize,
    /// Change events held by the change memory (0 without one)
    pub change_count: usize,
    pub documents_written: usize,
    pub duration_ms: u64,
    pub published_at: DateTime<Utc>,
}

/// Writes the repository snapshot into a served directory.
pub struct Publisher {
    codec: CatalogCodec,
    snapshot: SharedSnapshot,
    staging: LocalStorage,
    output: LocalStorage,
    basename: String,
    change_memory: Option<Arc<ChangeMemory>>,
}

impl Publisher {
    /// Chunk locations are written against `base_uri`, so the staging
    /// directory is mapped onto it.
    pub fn from_config(config: &PublishConfig, snapshot: SharedSnapshot) -> Result<Self> {
        let staging_dir = config.temp_dir.to_string_lossy();
        let mapper = Mapper::parse(&[config.base_uri.as_str(), &*staging_dir])?;
        Ok(Self {
            codec: CatalogCodec::from_config(config)?.with_mapper(mapper),
            snapshot,
            staging: LocalStorage::new(&config.temp_dir),
            output: LocalStorage::new(&config.output_dir),
            basename: config.basename.clone(),
            change_memory: None,
        })
    }

    /// Advertise and publish change-sets from `memory`.
    pub fn with_change_memory(mut self, memory: Arc<ChangeMemory>) -> Self {
        self.change_memory = Some(memory);
        self
    }

    pub fn output(&self) -> &LocalStorage {
        &self.output
    }

    /// Run one publish round.
    pub async fn publish_once(&self) -> Result<PublishStats> {
        let started = Instant::now();
        let mut snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(memory) = &self.change_memory {
            snapshot.capabilities.insert(
                memory.next_changeset_uri(),
                Capability::rel("next rs:changeset"),
            );
        }

        self.staging.reset().await?;
        let mut written = self
            .codec
            .write(&snapshot, &self.staging, &self.basename)
            .await?
            .documents;

        let mut change_count = 0;
        if let Some(memory) = &self.change_memory {
            let changes = memory.generate(None);
            change_count = changes.len();
            written.extend(
                self.codec
                    .write(&changes, &self.staging, CHANGESET_FILE)
                    .await?
                    .documents,
            );
        }

        for basename in [self.basename.as_str(), CHANGESET_FILE] {
            let stem = basename.strip_suffix(".xml").unwrap_or(basename);
            for key in self.output.list(stem, ".xml").await? {
                self.output.remove(&key).await?;
            }
        }
        for key in &written {
            self.staging.move_to(key, &self.output).await?;
        }

        let stats = PublishStats {
            resource_count: snapshot.len(),
            change_count,
            documents_written: written.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            published_at: Utc::now(),
        };
        self.output.write_json(STATS_FILE, &stats).await?;
        log::info!(
            "Published {} resources in {} documents to {} ({} ms)",
            stats.resource_count,
            stats.documents_written,
            self.output.root().display(),
            stats.duration_ms
        );
        Ok(stats)
    }
}

/// Background task running [`Publisher::publish_once`] on a fixed interval.
pub struct PublishTask {
    cancel: CancellationToken,
    handle: JoinHandle<(Publisher, u64)>,
}

impl PublishTask {
    pub fn spawn(publisher: Publisher, interval: Duration, cancel: CancellationToken) -> Self {
        let handle = tokio::spawn(publish_loop(publisher, interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Cancel the loop, returning the publisher and the number of
    /// successful rounds.
    pub async fn stop(self) -> Result<(Publisher, u64)> {
        self.cancel.cancel();
        Ok(self.handle.await?)
    }
}

async fn publish_loop(
    publisher: Publisher,
    interval: Duration,
    cancel: CancellationToken,
) -> (Publisher, u64) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut published = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match publisher.publish_once().await {
            Ok(_) => published += 1,
            Err(e) => log::error!("Publish failed, retrying next interval: {}", e),
        }
    }
    (publisher, published)
}
