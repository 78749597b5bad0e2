//! Harvest protocol records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Date precision reported by a harvest endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// `YYYY-MM-DD`
    #[default]
    DateOnly,
    /// `YYYY-MM-DDThh:mm:ssZ`
    DateTime,
}

impl Granularity {
    /// Interpret the granularity string of an Identify response.
    pub fn from_identify(value: &str) -> Self {
        if value.trim().len() > 10 {
            Granularity::DateTime
        } else {
            Granularity::DateOnly
        }
    }

    /// Format a cursor for the `from` request parameter.
    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        match self {
            Granularity::DateOnly => instant.format("%Y-%m-%d").to_string(),
            Granularity::DateTime => instant.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::DateOnly => f.write_str("YYYY-MM-DD"),
            Granularity::DateTime => f.write_str("YYYY-MM-DDThh:mm:ssZ"),
        }
    }
}

/// Header block of a harvested record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Remote identifier, e.g. `oai:eprints.example.org:42`
    pub identifier: String,
    /// Normalized to UTC; day-only values become midnight
    pub datestamp: DateTime<Utc>,
    pub deleted: bool,
}

/// One unit yielded by the harvest client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub header: RecordHeader,
    /// URI extracted from the metadata block, if any
    pub resource_uri: Option<String>,
    /// Response timestamp of the page this record came from
    pub response_date: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn identifier(&self) -> &str {
        &self.header.identifier
    }

    pub fn is_deleted(&self) -> bool {
        self.header.deleted
    }
}
