//! Error types for sitestack.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate construct id: {0}")]
    DuplicateId(String),

    #[error("unresolved reference from {from} to {target}")]
    UnresolvedReference { from: String, target: String },

    #[error("cycle detected in dependencies: {0}")]
    CycleDetected(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("asset error for {path}: {message}")]
    Asset { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
