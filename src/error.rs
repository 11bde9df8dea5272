//! Error types shared across the crate

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading a classification policy. All of these are fatal.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy is not a JSON array of rule objects: {0}")]
    Json(#[from] serde_json::Error),

    #[error("network rule '{name}' has invalid CIDR '{net}': {source}")]
    InvalidNetwork {
        name: String,
        net: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("network rule '{name}' has no 'net' field")]
    MissingNetwork { name: String },
}

/// Failures while tokenizing a log line or decoding one of its fields.
///
/// Only `TooFewFields` causes a line to be dropped; the decode variants
/// degrade the affected value to zero.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line_number}: only {found} fields, need at least {required}")]
    TooFewFields {
        line_number: u64,
        found: usize,
        required: usize,
    },

    #[error("invalid byte size '{0}'")]
    InvalidSize(String),

    #[error("invalid elapsed time '{0}'")]
    InvalidElapsed(String),
}

/// Failures of a reverse (address to hostname) lookup.
///
/// Cached alongside successful answers, hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),

    #[error("reverse lookups disabled")]
    Unavailable,
}

/// Failures while reading or writing aggregate snapshots.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
