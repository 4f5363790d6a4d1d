use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a scan before any probe is issued.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to resolve host `{host}`: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("port {0} is out of range (1-65535)")]
    InvalidPort(u32),
}

/// Misuse of the result collector. These indicate a bug in the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("port {0} already has a verdict")]
    Duplicate(u16),

    #[error("port {0} is not part of this scan")]
    UnexpectedPort(u16),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
