//! Error types for the integrity engine

use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Malformed batches and frames never reach this type at the ingestion
/// boundary; they are reported as non-fatal outcomes instead. What remains
/// are caller errors (wrong or unknown session) and configuration I/O.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Batch belongs to session {actual}, expected {expected}")]
    SessionMismatch { expected: String, actual: String },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session already open: {0}")]
    SessionExists(String),

    #[error("Session worker stopped: {0}")]
    SessionClosed(String),

    #[error("Invalid keystroke batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid face tracking frame: {0}")]
    InvalidFrame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
