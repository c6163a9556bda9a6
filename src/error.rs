//! Error types for reply-triage.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox fetch/send failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Mailbox fetch from {folder} failed: {reason}")]
    FetchFailed { folder: String, reason: String },

    #[error("Failed to send reply to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// The text-generation collaborator failed or returned something we refuse to guess at.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Generation call failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Malformed classification output: {reason}")]
    Malformed { reason: String },

    #[error("Empty draft returned for {message_id}")]
    EmptyDraft { message_id: String },
}

/// State file unreadable or corrupt. A missing file is not an error.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path} (line {line}): {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
