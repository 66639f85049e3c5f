//! Error types for the workspace core.
//!
//! Only registration, storage, configuration and reflection calls surface errors.
//! Controller operations never fail for the caller: lookup misses are logged and ignored.

use thiserror::Error;

/// Manifest failed required-field validation at registration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("widget manifest '{manifest_id}' is invalid: missing {}", missing.join(", "))]
pub struct ValidationError {
    /// Id of the offending manifest (empty when the id itself is missing).
    pub manifest_id: String,
    /// Required fields that were absent or blank.
    pub missing: Vec<String>,
}

impl ValidationError {
    pub fn new(manifest_id: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            manifest_id: manifest_id.into(),
            missing,
        }
    }
}

/// Document/blob store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Reflection (LLM) endpoint failures. Always recovered by the session with a fallback message.
#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error("reflection client is not configured (no API key)")]
    NotConfigured,

    #[error("reflection request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("reflection API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not parse reflection actions: {0}")]
    Parse(String),
}

/// Configuration file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
