//! Builder errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Core(#[from] sitestack_core::Error),

    #[error("configuration error: {0}")]
    Config(#[from] sitestack_config::ConfigError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
