// src/errors.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::dom::NodeId;

/// Failures raised by the document model. Every operation against a stale
/// document or a removed node reports one of these instead of panicking.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("document {0} is detached")]
    Detached(u64),
    #[error("node {0:?} does not exist in this document")]
    NodeNotFound(NodeId),
    #[error("node {0:?} is not a frame element")]
    NotAFrame(NodeId),
    #[error("node {0:?} is not a text field")]
    NotAField(NodeId),
    #[error("frame {0:?} belongs to another origin")]
    CrossOrigin(NodeId),
    #[error("invalid boundary: {0}")]
    InvalidBoundary(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// Cross-origin frame. Expected, never retried.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Surface not ready yet, or the anchor went away. Retried.
    #[error("surface unavailable: {0}")]
    TransientUnavailable(String),
    #[error("anchor is no longer attached to its document")]
    StaleAnchor,
    #[error("insertion failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
}

impl InsertError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InsertError::TransientUnavailable(_) | InsertError::StaleAnchor
        )
    }
}

impl From<DomError> for InsertError {
    fn from(error: DomError) -> Self {
        match error {
            DomError::CrossOrigin(_) => InsertError::AccessDenied(error.to_string()),
            DomError::Detached(_) | DomError::NodeNotFound(_) => InsertError::StaleAnchor,
            other => InsertError::TransientUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reply store is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read reply store at {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write reply store at {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("reply store contents are not valid JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find a configuration directory")]
    ConfigDirectoryNotFound,
    #[error("failed to create configuration directory: {source}")]
    CreateConfigDir { source: std::io::Error },
    #[error("failed to write default configuration: {source}")]
    WriteDefaultConfig { source: std::io::Error },
    #[error("failed to read config file at {path}: {source}")]
    ReadConfig { path: PathBuf, source: std::io::Error },
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {source}")]
    Serialize {
        #[from]
        source: toml::ser::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum QuickReplyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Insert(#[from] InsertError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QuickReplyError>;
