use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading or validating configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
    #[error("failed to parse {path}")]
    Parse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
