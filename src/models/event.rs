//! Change notifications emitted by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChangeType, Resource};

/// A state transition applied to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource_uri: String,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(resource_uri: impl Into<String>, change_type: ChangeType, timestamp: DateTime<Utc>) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            change_type,
            timestamp,
        }
    }

    /// Change-set entry describing this event.
    pub fn to_resource(&self) -> Resource {
        Resource::new(self.resource_uri.clone())
            .with_timestamp(self.timestamp)
            .with_change(self.change_type)
    }
}
