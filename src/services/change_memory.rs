// src/services/change_memory.rs

//! In-memory change log that produces change-sets.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::models::{Capability, ChangeEvent, ChangeMemoryConfig, ChangeSet};
use crate::services::Observer;

#[derive(Debug, Clone)]
struct StoredChange {
    id: u64,
    event: ChangeEvent,
}

#[derive(Debug, Default)]
struct Log {
    changes: VecDeque<StoredChange>,
    latest_id: u64,
}

impl Log {
    fn first_id(&self) -> u64 {
        self.changes
            .front()
            .map(|c| c.id)
            .unwrap_or(self.latest_id + 1)
    }
}

/// Observer keeping a bounded list of numbered change events.
///
/// Ids start at 1 and increase by one per event. When the bound is reached
/// the oldest event is evicted.
#[derive(Debug)]
pub struct ChangeMemory {
    base_uri: String,
    limit: Option<usize>,
    log: Mutex<Log>,
}

impl ChangeMemory {
    /// `base_uri` is the public URI of the published catalog.
    pub fn new(base_uri: &str, config: &ChangeMemoryConfig) -> Self {
        Self {
            base_uri: format!(
                "{}/{}",
                base_uri.trim_end_matches('/'),
                config.uri_path.trim_matches('/')
            ),
            limit: config.limit(),
            log: Mutex::new(Log::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// URI prefix of the change-set documents.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Number of events currently held.
    pub fn change_count(&self) -> usize {
        self.lock().changes.len()
    }

    pub fn latest_change_id(&self) -> u64 {
        self.lock().latest_id
    }

    /// True if `id` is still held in memory.
    pub fn knows_change_id(&self, id: u64) -> bool {
        let log = self.lock();
        !log.changes.is_empty() && log.first_id() <= id && id <= log.latest_id
    }

    /// URI where the change-set following the latest event will appear.
    pub fn next_changeset_uri(&self) -> String {
        let next = self.lock().latest_id + 1;
        self.changeset_uri(next)
    }

    fn changeset_uri(&self, from: u64) -> String {
        format!("{}/from/{}", self.base_uri, from)
    }

    /// All held changes with id >= `from` (oldest held if `None`).
    pub fn generate(&self, from: Option<u64>) -> ChangeSet {
        let log = self.lock();
        let from = from.unwrap_or_else(|| log.first_id());

        let mut change_set = ChangeSet::new();
        for change in log.changes.iter().filter(|c| c.id >= from) {
            change_set.add(change.event.to_resource());
        }
        change_set.capabilities.insert(
            self.changeset_uri(log.latest_id + 1),
            Capability::rel("next rs:changeset"),
        );
        change_set
            .capabilities
            .insert(self.changeset_uri(from), Capability::rel("current rs:changeset"));
        change_set
    }
}

impl Observer for ChangeMemory {
    fn name(&self) -> &str {
        "change-memory"
    }

    fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        let mut log = self.lock();
        log.latest_id += 1;
        let id = log.latest_id;
        if let Some(limit) = self.limit {
            while !log.changes.is_empty() && log.changes.len() >= limit {
                log.changes.pop_front();
            }
        }
        log::debug!("Change {}: {} {}", id, event.change_type, event.resource_uri);
        log.changes.push_back(StoredChange {
            id,
            event: event.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::ChangeType;

    fn memory(max_changes: i64) -> ChangeMemory {
        let config = ChangeMemoryConfig {
            enabled: true,
            uri_path: "changeset".to_string(),
            max_changes,
        };
        ChangeMemory::new("http://localhost:8888/", &config)
    }

    fn event(n: u32, change: ChangeType) -> ChangeEvent {
        ChangeEvent::new(format!("http://x/{n}"), change, Utc::now())
    }

    #[test]
    fn test_ids_and_uris() {
        let cm = memory(-1);
        assert_eq!(cm.next_changeset_uri(), "http://localhost:8888/changeset/from/1");
        assert!(!cm.knows_change_id(1));

        cm.on_change(&event(1, ChangeType::Created)).unwrap();
        cm.on_change(&event(2, ChangeType::Updated)).unwrap();
        assert_eq!(cm.change_count(), 2);
        assert_eq!(cm.latest_change_id(), 2);
        assert!(cm.knows_change_id(1));
        assert!(cm.knows_change_id(2));
        assert!(!cm.knows_change_id(3));
        assert_eq!(cm.next_changeset_uri(), "http://localhost:8888/changeset/from/3");
    }

    #[test]
    fn test_bounded_eviction() {
        let cm = memory(2);
        for n in 1..=3 {
            cm.on_change(&event(n, ChangeType::Created)).unwrap();
        }
        assert_eq!(cm.change_count(), 2);
        assert!(!cm.knows_change_id(1));
        assert!(cm.knows_change_id(2));
        assert!(cm.knows_change_id(3));
    }

    #[test]
    fn test_generate_from() {
        let cm = memory(-1);
        cm.on_change(&event(1, ChangeType::Created)).unwrap();
        cm.on_change(&event(2, ChangeType::Updated)).unwrap();
        cm.on_change(&event(1, ChangeType::Deleted)).unwrap();

        let all = cm.generate(None);
        assert_eq!(all.len(), 3);
        let tail = cm.generate(Some(2));
        let changes: Vec<_> = tail.iter().map(|r| r.change).collect();
        assert_eq!(changes, vec![Some(ChangeType::Updated), Some(ChangeType::Deleted)]);

        let rels: Vec<_> = tail
            .capabilities
            .iter()
            .map(|(href, cap)| (href.as_str(), cap.rel.join(" ")))
            .collect();
        assert_eq!(
            rels,
            vec![
                ("http://localhost:8888/changeset/from/2", "current rs:changeset".to_string()),
                ("http://localhost:8888/changeset/from/4", "next rs:changeset".to_string()),
            ]
        );
    }

    #[test]
    fn test_zero_bound_keeps_changes() {
        let cm = memory(0);
        cm.on_change(&event(1, ChangeType::Created)).unwrap();
        cm.on_change(&event(2, ChangeType::Created)).unwrap();
        assert_eq!(cm.change_count(), 2);
        assert_eq!(cm.latest_change_id(), 2);
    }
}
