//! Snapshot comparison.
//!
//! Partitions the URIs of two snapshots into same, updated, deleted and
//! created sets with a single merge-join over their sorted iterators.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{ChangeSet, ChangeType, Resource, Snapshot};

/// Outcome of comparing a current snapshot against an incoming one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Present in both and in the same state
    pub same: Snapshot,
    /// Present in both with a different state; holds the incoming version
    pub updated: Snapshot,
    /// Present only in the current snapshot
    pub deleted: Snapshot,
    /// Present only in the incoming snapshot
    pub created: Snapshot,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.updated.is_empty() || !self.deleted.is_empty() || !self.created.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.updated.len() + self.deleted.len() + self.created.len()
    }

    /// Turn the changes into a change-set, created first, then updated,
    /// then deleted, each in URI order.
    pub fn into_change_set(self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        let tagged = [
            (self.created, ChangeType::Created),
            (self.updated, ChangeType::Updated),
            (self.deleted, ChangeType::Deleted),
        ];
        for (snapshot, change) in tagged {
            for resource in snapshot {
                changes.add(resource.with_change(change));
            }
        }
        changes
    }
}

/// Compare `current` (destination) against `incoming` (source).
pub fn calculate_diff(current: &Snapshot, incoming: &Snapshot) -> DiffResult {
    let mut result = DiffResult::default();
    let mut dst = current.iter().peekable();
    let mut src = incoming.iter().peekable();

    loop {
        let order = match (dst.peek(), src.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(d), Some(s)) => d.uri.cmp(&s.uri),
        };
        match order {
            Ordering::Equal => {
                if let (Some(d), Some(s)) = (dst.next(), src.next()) {
                    if d.same_state(s) {
                        insert(&mut result.same, d);
                    } else {
                        insert(&mut result.updated, s);
                    }
                }
            }
            Ordering::Less => {
                if let Some(d) = dst.next() {
                    insert(&mut result.deleted, d);
                }
            }
            Ordering::Greater => {
                if let Some(s) = src.next() {
                    insert(&mut result.created, s);
                }
            }
        }
    }

    log::debug!(
        "Diff: {} same, {} updated, {} deleted, {} created",
        result.same.len(),
        result.updated.len(),
        result.deleted.len(),
        result.created.len()
    );
    result
}

// Each URI reaches exactly one output set once, so replace never overwrites.
fn insert(target: &mut Snapshot, resource: &Resource) {
    target.replace(resource.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_resource(uri: &str, lastmod: &str, size: u64) -> Resource {
        Resource::new(uri)
            .with_lastmod(lastmod)
            .unwrap()
            .with_size(size)
    }

    fn uris(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.uris().collect()
    }

    #[test]
    fn test_no_changes() {
        let a: Snapshot = vec![
            make_resource("http://x/a", "2012-07-25T17:13:46Z", 20),
            make_resource("http://x/b", "2001-09-09T01:46:40Z", 45),
        ]
        .into_iter()
        .collect();

        let result = calculate_diff(&a, &a);
        assert!(!result.has_changes());
        assert_eq!(result.same, a);
    }

    #[test]
    fn test_all_four_sets() {
        let current: Snapshot = vec![
            make_resource("http://x/a", "2012-01-01", 1),
            make_resource("http://x/b", "2012-01-01", 2),
            make_resource("http://x/c", "2012-01-01", 3),
        ]
        .into_iter()
        .collect();
        let incoming: Snapshot = vec![
            make_resource("http://x/b", "2012-01-01", 2),
            make_resource("http://x/c", "2012-02-01", 3),
            make_resource("http://x/d", "2012-01-01", 4),
        ]
        .into_iter()
        .collect();

        let result = calculate_diff(&current, &incoming);
        assert_eq!(uris(&result.same), vec!["http://x/b"]);
        assert_eq!(uris(&result.updated), vec!["http://x/c"]);
        assert_eq!(uris(&result.deleted), vec!["http://x/a"]);
        assert_eq!(uris(&result.created), vec!["http://x/d"]);
        assert_eq!(result.change_count(), 3);

        // Updated entries carry the incoming state
        assert_eq!(
            result.updated.get("http://x/c").unwrap().lastmod().as_deref(),
            Some("2012-02-01T00:00:00Z")
        );
    }

    #[test]
    fn test_partition_covers_union() {
        let current: Snapshot = (0..50)
            .filter(|i| i % 3 != 0)
            .map(|i| make_resource(&format!("http://x/{i:03}"), "2012-01-01", i))
            .collect();
        let incoming: Snapshot = (0..50)
            .filter(|i| i % 5 != 0)
            .map(|i| make_resource(&format!("http://x/{i:03}"), "2012-01-01", i % 7))
            .collect();

        let result = calculate_diff(&current, &incoming);
        let mut all: Vec<&str> = [&result.same, &result.updated, &result.deleted, &result.created]
            .into_iter()
            .flat_map(|s| s.uris())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, all.len());

        let mut union: Vec<&str> = current.uris().chain(incoming.uris()).collect();
        union.sort();
        union.dedup();
        assert_eq!(all, union);
    }

    #[test]
    fn test_empty_sides() {
        let some: Snapshot = vec![make_resource("http://x/a", "2012-01-01", 1)]
            .into_iter()
            .collect();
        let empty = Snapshot::new();

        assert_eq!(calculate_diff(&empty, &some).created.len(), 1);
        assert_eq!(calculate_diff(&some, &empty).deleted.len(), 1);
        assert!(!calculate_diff(&empty, &empty).has_changes());
    }

    #[test]
    fn test_into_change_set_tags_entries() {
        let current: Snapshot = vec![make_resource("http://x/a", "2012-01-01", 1)]
            .into_iter()
            .collect();
        let incoming: Snapshot = vec![make_resource("http://x/b", "2012-01-01", 1)]
            .into_iter()
            .collect();

        let changes = calculate_diff(&current, &incoming).into_change_set();
        let tags: Vec<_> = changes.iter().map(|r| (r.uri.as_str(), r.change)).collect();
        assert_eq!(
            tags,
            vec![
                ("http://x/b", Some(ChangeType::Created)),
                ("http://x/a", Some(ChangeType::Deleted)),
            ]
        );
    }
}
