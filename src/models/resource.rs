//! Resource data structure.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::datetime::{format_w3c, parse_w3c};

/// Kind of change recorded against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "created" => Ok(ChangeType::Created),
            "updated" => Ok(ChangeType::Updated),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(AppError::protocol(format!("unknown change type '{other}'"))),
        }
    }
}

/// A web resource as listed in a snapshot or change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI, unique within a snapshot
    pub uri: String,

    /// Last modification instant (UTC)
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,

    /// Content fingerprint with its algorithm name
    #[serde(default)]
    pub fixity: Option<Fixity>,

    /// Change tag, only on change-set entries
    #[serde(default)]
    pub change: Option<ChangeType>,
}

/// A content digest and the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixity {
    pub algorithm: String,
    pub digest: String,
}

impl Fixity {
    pub fn md5(digest: impl Into<String>) -> Self {
        Self {
            algorithm: "md5".to_string(),
            digest: digest.into(),
        }
    }
}

impl Resource {
    /// Create a resource with only a URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            timestamp: None,
            size: None,
            fixity: None,
            change: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the timestamp from a W3C Datetime string.
    pub fn with_lastmod(mut self, lastmod: &str) -> Result<Self> {
        self.timestamp = Some(parse_w3c(lastmod)?);
        Ok(self)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_fixity(mut self, fixity: Fixity) -> Self {
        self.fixity = Some(fixity);
        self
    }

    pub fn with_change(mut self, change: ChangeType) -> Self {
        self.change = Some(change);
        self
    }

    /// Timestamp in W3C Datetime `Z` notation.
    pub fn lastmod(&self) -> Option<String> {
        self.timestamp.as_ref().map(format_w3c)
    }

    /// Last path segment of the URI (`http://example.com/resource/1` -> `1`).
    pub fn basename(&self) -> String {
        let path = match url::Url::parse(&self.uri) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.uri.clone(),
        };
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Same state for diffing purposes.
    ///
    /// Timestamps must both be absent or lie within one second of each
    /// other; size and fixity are compared only when both sides carry them.
    pub fn same_state(&self, other: &Resource) -> bool {
        if self.uri != other.uri {
            return false;
        }
        match (self.timestamp, other.timestamp) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                if (a - b).num_milliseconds().abs() >= 1000 {
                    return false;
                }
            }
            _ => return false,
        }
        if let (Some(a), Some(b)) = (&self.fixity, &other.fixity) {
            if a != b {
                return false;
            }
        }
        if let (Some(a), Some(b)) = (self.size, other.size) {
            if a != b {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ {} | {} | {} | {} ]",
            self.uri,
            self.lastmod().unwrap_or_default(),
            self.size.map(|s| s.to_string()).unwrap_or_default(),
            self.fixity
                .as_ref()
                .map(|x| x.digest.as_str())
                .unwrap_or_default()
        )?;
        if let Some(change) = self.change {
            write!(f, " {change}")?;
        }
        Ok(())
    }
}
