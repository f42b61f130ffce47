//! Error types for the newsletter dispatcher.

use std::time::Duration;

/// Errors that stop a run before it starts.
///
/// Quota and transport failures surface on the event stream instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed list input. Raised before anything is sent.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("List {list} has no sender address")]
    MissingSender { list: String },

    #[error("List {list} contains an empty member address at position {position}")]
    EmptyMember { list: String, position: usize },

    #[error("List {list} has an empty report address at position {position}")]
    EmptyReportAddress { list: String, position: usize },

    #[error("List id {0} is used more than once")]
    DuplicateId(String),

    #[error("List {list} sends a report, but its report id {report_id} is already a list id")]
    ReportIdTaken { list: String, report_id: String },

    #[error("List {list}: {source}")]
    Message {
        list: String,
        #[source]
        source: MessageError,
    },
}

/// Message template errors.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("list.message.html or list.message.plain is required")]
    MissingBody,
}

/// Quota provider errors. Fatal to the whole run.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Quota request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid quota response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Per-recipient send failures. Always recovered into the list report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
