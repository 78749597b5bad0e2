// src/error.rs

//! Unified error handling for harvesting, reconciliation and publishing.

use std::fmt;

use thiserror::Error;

use crate::models::DocumentKind;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("Transport error for {url}: HTTP {status}")]
    Transport { url: String, status: u16 },

    /// Endpoint asked us to come back later (HTTP 503)
    #[error("Rate limited by endpoint (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// XML could not be parsed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Well-formed XML that is not what the protocol requires
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Protocol error element returned by the harvest endpoint
    #[error("OAI-PMH error {code}: {message}")]
    Oai { code: String, message: String },

    /// The endpoint has nothing for the requested range
    #[error("No matching records: {0}")]
    NoRecordsMatch(String),

    /// A document index pointed outside its own authority
    #[error("Index {index} has no authority over {location}")]
    AuthorityViolation { index: String, location: String },

    /// Resource already present in a snapshot
    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    /// Identifier mapping and resource map disagree
    #[error("Mapping inconsistency for {identifier}: {message}")]
    MappingConsistency { identifier: String, message: String },

    /// Got an index where a single document was expected, or vice versa
    #[error("Expected {expected} but got {found}")]
    UnexpectedDocument {
        expected: DocumentKind,
        found: DocumentKind,
    },

    /// Unparseable datestamp or lastmod value
    #[error("Bad datetime '{value}': {message}")]
    DateParse { value: String, message: String },

    /// URI/path mapping failed
    #[error("Mapper error: {0}")]
    Mapper(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Background task panicked or was aborted
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Work stopped because the owning task was cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a mapper error.
    pub fn mapper(message: impl Into<String>) -> Self {
        Self::Mapper(message.into())
    }

    /// Create a datetime parse error.
    pub fn date_parse(value: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::DateParse {
            value: value.into(),
            message: message.to_string(),
        }
    }

    /// Create a mapping consistency error.
    pub fn mapping(identifier: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::MappingConsistency {
            identifier: identifier.into(),
            message: message.to_string(),
        }
    }

    /// True for the clean "nothing new" signal of the harvest protocol.
    pub fn is_no_records_match(&self) -> bool {
        matches!(self, Self::NoRecordsMatch(_))
    }

    /// True for errors that are contained at the record or document level
    /// and must not end a polling round.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoRecordsMatch(_)
                | Self::RateLimited { .. }
                | Self::Protocol(_)
                | Self::DateParse { .. }
                | Self::DuplicateResource(_)
                | Self::MappingConsistency { .. }
                | Self::UnexpectedDocument { .. }
        )
    }
}
