// src/services/repository.rs

//! Reconciles harvested change records into the published resource state.
//!
//! Each tracked resource moves `absent -> present -> absent`. The remote
//! identifier namespace differs from the published URI namespace, so the
//! repository keeps an [`IdentifierIndex`] beside the snapshot. Mappings
//! are created on create and removed before the resource on delete.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{ChangeEvent, ChangeRecord, ChangeType, HarvestConfig, Resource, Snapshot};
use crate::services::{HarvestClient, Observer, ObserverBus};

/// Snapshot shared between the reconciler and the publisher.
pub type SharedSnapshot = Arc<RwLock<Snapshot>>;

/// Bidirectional identifier <-> URI index with a 1:1 invariant.
#[derive(Debug, Clone, Default)]
pub struct IdentifierIndex {
    by_id: HashMap<String, String>,
    by_uri: HashMap<String, String>,
}

impl IdentifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identifier -> uri`; both sides must be unmapped.
    pub fn create_mapping(&mut self, identifier: &str, uri: &str) -> Result<()> {
        if let Some(existing) = self.by_id.get(identifier) {
            return Err(AppError::mapping(
                identifier,
                format!("already mapped to {existing}"),
            ));
        }
        if let Some(owner) = self.by_uri.get(uri) {
            return Err(AppError::mapping(
                identifier,
                format!("{uri} already belongs to {owner}"),
            ));
        }
        self.by_id.insert(identifier.to_string(), uri.to_string());
        self.by_uri.insert(uri.to_string(), identifier.to_string());
        Ok(())
    }

    /// Drop the mapping of `identifier`, returning its URI.
    pub fn remove_mapping(&mut self, identifier: &str) -> Result<String> {
        let uri = self
            .by_id
            .remove(identifier)
            .ok_or_else(|| AppError::mapping(identifier, "no mapping to remove"))?;
        self.by_uri.remove(&uri);
        Ok(uri)
    }

    pub fn uri_for(&self, identifier: &str) -> Option<&str> {
        self.by_id.get(identifier).map(String::as_str)
    }

    pub fn identifier_for(&self, uri: &str) -> Option<&str> {
        self.by_uri.get(uri).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Counts from one reconciliation round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub records: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Known identifiers whose datestamp was not after the cursor
    pub skipped: usize,
    /// Records with nothing to apply
    pub ignored: usize,
}

impl CheckSummary {
    pub fn change_count(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// In-memory resource repository fed by a harvest endpoint.
pub struct Repository {
    client: HarvestClient,
    snapshot: SharedSnapshot,
    index: IdentifierIndex,
    cursor: Option<DateTime<Utc>>,
    observers: ObserverBus,
    track_metadata_records: bool,
    page_delay: Option<Duration>,
}

impl Repository {
    pub fn new(client: HarvestClient) -> Self {
        Self {
            client,
            snapshot: Arc::new(RwLock::new(Snapshot::new())),
            index: IdentifierIndex::new(),
            cursor: None,
            observers: ObserverBus::new(),
            track_metadata_records: false,
            page_delay: None,
        }
    }

    /// Build an HTTP-backed repository from configuration.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let delay = (config.page_delay_ms > 0).then(|| Duration::from_millis(config.page_delay_ms));
        Ok(Self::new(HarvestClient::from_config(config)?)
            .with_metadata_records(config.track_metadata_records)
            .with_page_delay(delay))
    }

    /// Also track the `GetRecord` URL of each identifier.
    pub fn with_metadata_records(mut self, enabled: bool) -> Self {
        self.track_metadata_records = enabled;
        self
    }

    pub fn with_page_delay(mut self, delay: Option<Duration>) -> Self {
        self.page_delay = delay;
        self
    }

    /// Abort backoff sleeps when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.client = self.client.with_cancellation(cancel);
        self
    }

    pub fn register_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.register(observer);
    }

    pub fn client(&self) -> &HarvestClient {
        &self.client
    }

    /// Harvest progress point.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    pub fn resource_count(&self) -> usize {
        self.read_snapshot().len()
    }

    /// Consistent copy of the current state.
    pub fn current_snapshot(&self) -> Snapshot {
        self.read_snapshot().clone()
    }

    /// Handle for readers that clone under the lock themselves.
    pub fn snapshot_handle(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn identifiers(&self) -> &IdentifierIndex {
        &self.index
    }

    /// Initial full load from `from` (full history if `None`).
    ///
    /// Deletions are ignored; the cursor ends at the response date of the
    /// last record, or `from` if nothing came back.
    pub async fn bootstrap_from(&mut self, from: Option<DateTime<Utc>>) -> Result<CheckSummary> {
        log::info!(
            "Bootstrapping from {} (from={})",
            self.client.endpoint(),
            from.map(|f| f.to_rfc3339()).unwrap_or_else(|| "-".into())
        );
        let summary = self.round(from, true).await?;
        log::info!(
            "Bootstrap done: {} resources, cursor {:?}",
            self.resource_count(),
            self.cursor
        );
        Ok(summary)
    }

    /// One incremental round starting at the cursor.
    pub async fn check(&mut self) -> Result<CheckSummary> {
        let summary = self.round(self.cursor, false).await?;
        if summary.change_count() > 0 {
            log::info!(
                "Check: {} created, {} updated, {} deleted, {} skipped",
                summary.created,
                summary.updated,
                summary.deleted,
                summary.skipped
            );
        }
        Ok(summary)
    }

    async fn round(&mut self, from: Option<DateTime<Utc>>, bootstrap: bool) -> Result<CheckSummary> {
        let since = self.cursor;
        let mut working = if bootstrap { from } else { self.cursor };
        let mut summary = CheckSummary::default();

        let mut records = self.client.list_changes(from, self.page_delay).await;
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => {
                    summary.records += 1;
                    self.apply(&record, bootstrap, since, &mut summary);
                    working = Some(record.response_date);
                }
                Err(e) if e.is_no_records_match() => {
                    log::info!("No new records at {}: {}", self.client.endpoint(), e);
                    break;
                }
                Err(e) => {
                    log::error!(
                        "Harvest from {} failed after {} records: {}",
                        self.client.endpoint(),
                        summary.records,
                        e
                    );
                    // Records applied during a bootstrap stay applied, so
                    // the next check resumes after them. An incremental
                    // round is retried from its start.
                    if bootstrap && summary.records > 0 {
                        self.cursor = working;
                    }
                    return Err(e);
                }
            }
        }

        self.cursor = working;
        Ok(summary)
    }

    fn apply(
        &mut self,
        record: &ChangeRecord,
        bootstrap: bool,
        since: Option<DateTime<Utc>>,
        summary: &mut CheckSummary,
    ) {
        let identifier = record.identifier();
        let datestamp = record.header.datestamp;
        let known = self.index.uri_for(identifier).map(str::to_string);

        let outcome = match (known, record.is_deleted()) {
            (Some(_), true) if bootstrap => {
                summary.ignored += 1;
                return;
            }
            (Some(uri), true) => self.delete(identifier, &uri, datestamp).map(|_| summary.deleted += 1),
            (Some(uri), false) => {
                if !bootstrap && since.is_some_and(|cursor| datestamp <= cursor) {
                    log::debug!(
                        "Record {} ({}) not after cursor, skipped",
                        identifier,
                        datestamp
                    );
                    summary.skipped += 1;
                    return;
                }
                self.update(identifier, &uri, record, datestamp);
                summary.updated += 1;
                Ok(())
            }
            (None, false) => match &record.resource_uri {
                Some(uri) => self.create(identifier, uri, datestamp).map(|_| summary.created += 1),
                None => {
                    log::debug!("Record {} has no resource URI, discarded", identifier);
                    summary.ignored += 1;
                    Ok(())
                }
            },
            (None, true) => {
                summary.ignored += 1;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            log::error!(
                "Skipping record from {} (identifier={}, datestamp={}): {}",
                self.client.endpoint(),
                identifier,
                datestamp,
                e
            );
        }
    }

    fn create(&mut self, identifier: &str, uri: &str, datestamp: DateTime<Utc>) -> Result<()> {
        self.index.create_mapping(identifier, uri)?;
        let uris = self.tracked_uris(identifier, uri);
        {
            let mut snapshot = self.write_snapshot();
            for uri in &uris {
                snapshot.replace(Resource::new(uri.as_str()).with_timestamp(datestamp));
            }
        }
        self.emit(&uris, ChangeType::Created, datestamp);
        Ok(())
    }

    fn update(&mut self, identifier: &str, uri: &str, record: &ChangeRecord, datestamp: DateTime<Utc>) {
        if let Some(reported) = record.resource_uri.as_deref().filter(|r| *r != uri) {
            log::warn!(
                "Record {} now reports {} but stays mapped to {}",
                identifier,
                reported,
                uri
            );
        }
        let uris = self.tracked_uris(identifier, uri);
        {
            let mut snapshot = self.write_snapshot();
            for uri in &uris {
                match snapshot.get_mut(uri) {
                    Some(resource) => resource.timestamp = Some(datestamp),
                    None => {
                        snapshot.replace(Resource::new(uri.as_str()).with_timestamp(datestamp));
                    }
                }
            }
        }
        self.emit(&uris, ChangeType::Updated, datestamp);
    }

    fn delete(&mut self, identifier: &str, uri: &str, datestamp: DateTime<Utc>) -> Result<()> {
        self.index.remove_mapping(identifier)?;

        let uris = self.tracked_uris(identifier, uri);
        let missing: Vec<&String> = {
            let mut snapshot = self.write_snapshot();
            uris.iter().filter(|u| snapshot.remove(u).is_none()).collect()
        };
        self.emit(&uris, ChangeType::Deleted, datestamp);

        if !missing.is_empty() {
            return Err(AppError::mapping(
                identifier,
                format!("mapped resource {} was not present", missing[0]),
            ));
        }
        Ok(())
    }

    /// Primary URI plus the metadata record URL when tracked.
    fn tracked_uris(&self, identifier: &str, uri: &str) -> Vec<String> {
        let mut uris = vec![uri.to_string()];
        if self.track_metadata_records {
            uris.push(self.client.record_url(identifier));
        }
        uris
    }

    fn emit(&self, uris: &[String], change_type: ChangeType, timestamp: DateTime<Utc>) {
        for uri in uris {
            self.observers
                .notify(&ChangeEvent::new(uri.as_str(), change_type, timestamp));
        }
    }

    fn read_snapshot(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::utils::datetime::parse_w3c;
    use crate::utils::http::testing::Scripted;

    const ENDPOINT: &str = "http://eprints.example.org/cgi/oai2";

    struct Events(Mutex<Vec<(String, ChangeType)>>);

    impl Observer for Events {
        fn name(&self) -> &str {
            "events"
        }

        fn on_change(&self, event: &ChangeEvent) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((event.resource_uri.clone(), event.change_type));
            Ok(())
        }
    }

    fn page(response_date: &str, records: &[String]) -> Result<String> {
        Ok(format!(
            r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
              <responseDate>{response_date}</responseDate>
              <ListRecords>{}</ListRecords>
            </OAI-PMH>"#,
            records.concat()
        ))
    }

    fn identify(granularity: &str) -> Result<String> {
        Ok(format!(
            r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
              <Identify><granularity>{granularity}</granularity></Identify>
            </OAI-PMH>"#
        ))
    }

    fn created(id: &str, datestamp: &str, uri: &str) -> String {
        format!(
            r#"<record><header><identifier>{id}</identifier><datestamp>{datestamp}</datestamp></header>
              <metadata><dc xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:identifier>{uri}</dc:identifier></dc></metadata>
            </record>"#
        )
    }

    fn deleted(id: &str, datestamp: &str) -> String {
        format!(
            r#"<record><header status="deleted"><identifier>{id}</identifier><datestamp>{datestamp}</datestamp></header></record>"#
        )
    }

    fn repository(replies: Vec<Result<String>>) -> (Repository, Arc<Events>) {
        let fetcher = Scripted::new(replies);
        let client = HarvestClient::new(fetcher, ENDPOINT).unwrap();
        let events = Arc::new(Events(Mutex::new(Vec::new())));
        let mut repo = Repository::new(client);
        repo.register_observer(events.clone());
        (repo, events)
    }

    #[test]
    fn test_index_enforces_one_to_one() {
        let mut index = IdentifierIndex::new();
        index.create_mapping("id:1", "http://x/1").unwrap();
        assert!(index.create_mapping("id:1", "http://x/2").is_err());
        assert!(index.create_mapping("id:2", "http://x/1").is_err());
        assert_eq!(index.identifier_for("http://x/1"), Some("id:1"));

        assert_eq!(index.remove_mapping("id:1").unwrap(), "http://x/1");
        assert!(index.is_empty());
        assert_eq!(index.identifier_for("http://x/1"), None);
        assert!(index.remove_mapping("id:1").is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_ignores_deletes_and_sets_cursor() {
        let (mut repo, events) = repository(vec![page(
            "2012-09-01T10:00:00Z",
            &[
                created("oai:x:1", "2012-08-01", "http://eprints.example.org/1"),
                deleted("oai:x:1", "2012-08-02"),
                deleted("oai:x:9", "2012-08-02"),
            ],
        )]);
        let summary = repo.bootstrap_from(None).await.unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.ignored, 2);
        assert_eq!(repo.resource_count(), 1);
        assert_eq!(repo.cursor(), Some(parse_w3c("2012-09-01T10:00:00Z").unwrap()));
        assert_eq!(
            *events.0.lock().unwrap(),
            vec![("http://eprints.example.org/1".to_string(), ChangeType::Created)]
        );
    }

    #[tokio::test]
    async fn test_record_without_uri_is_discarded() {
        let (mut repo, _) = repository(vec![page(
            "2012-09-01T10:00:00Z",
            &[created("oai:x:1", "2012-08-01", "http://elsewhere.org/1")],
        )]);
        let summary = repo.bootstrap_from(None).await.unwrap();
        assert_eq!(summary.ignored, 1);
        assert_eq!(repo.resource_count(), 0);
        assert!(repo.identifiers().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_uri_from_other_identifier_is_skipped() {
        let (mut repo, _) = repository(vec![page(
            "2012-09-01T10:00:00Z",
            &[
                created("oai:x:1", "2012-08-01", "http://eprints.example.org/1"),
                created("oai:x:2", "2012-08-01", "http://eprints.example.org/1"),
            ],
        )]);
        let summary = repo.bootstrap_from(None).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(repo.identifiers().len(), 1);
        assert_eq!(
            repo.identifiers().identifier_for("http://eprints.example.org/1"),
            Some("oai:x:1")
        );
    }

    #[tokio::test]
    async fn test_metadata_records_are_tracked() {
        let (repo, events) = repository(vec![
            page(
                "2012-09-01T10:00:00Z",
                &[created("oai:x:1", "2012-08-01", "http://eprints.example.org/1")],
            ),
            identify("YYYY-MM-DD"),
            page("2012-09-02T10:00:00Z", &[deleted("oai:x:1", "2012-09-02")]),
        ]);
        let mut repo = repo.with_metadata_records(true);
        repo.bootstrap_from(None).await.unwrap();

        let record_url = repo.client().record_url("oai:x:1");
        assert_eq!(repo.resource_count(), 2);
        assert!(repo.current_snapshot().contains(&record_url));

        repo.check().await.unwrap();
        assert_eq!(repo.resource_count(), 0);
        let seen = events.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], (record_url, ChangeType::Deleted));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_cursor() {
        let (mut repo, _) = repository(vec![
            page(
                "2012-09-01T10:00:00Z",
                &[created("oai:x:1", "2012-08-01", "http://eprints.example.org/1")],
            ),
            identify("YYYY-MM-DD"),
            Err(AppError::Transport {
                url: ENDPOINT.into(),
                status: 502,
            }),
        ]);
        repo.bootstrap_from(None).await.unwrap();
        let cursor = repo.cursor();

        assert!(repo.check().await.is_err());
        assert_eq!(repo.cursor(), cursor);
        assert_eq!(repo.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_commits_applied_records() {
        let first = format!(
            r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
              <responseDate>2012-09-01T10:00:00Z</responseDate>
              <ListRecords>{}<resumptionToken>t1</resumptionToken></ListRecords>
            </OAI-PMH>"#,
            created("oai:x:1", "2012-08-01", "http://eprints.example.org/1")
        );
        let (mut repo, events) = repository(vec![
            Ok(first),
            Err(AppError::Transport {
                url: ENDPOINT.into(),
                status: 503,
            }),
        ]);

        assert!(repo.bootstrap_from(None).await.is_err());
        assert_eq!(repo.cursor(), Some(parse_w3c("2012-09-01T10:00:00Z").unwrap()));
        assert_eq!(repo.resource_count(), 1);
        assert_eq!(events.0.lock().unwrap().len(), 1);
    }
}
