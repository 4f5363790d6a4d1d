use std::fs;
use std::net::IpAddr;
use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::ports::ScanOrder;
use crate::scanner::{ScanOptions, DEFAULT_MAX_IN_FLIGHT, DEFAULT_TIMEOUT};

const CONFIG_FILE_NAME: &str = ".connscan.toml";

/// Scan settings as stored in a TOML file. Missing keys take their defaults.
///
/// ```toml
/// max_in_flight = 250
/// timeout_ms = 800
/// tries = 2
/// scan_order = "random"
/// exclude_ports = [9100]
/// resolver = ["1.1.1.1", "8.8.8.8"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub max_in_flight: usize,
    pub timeout_ms: u64,
    pub tries: u8,
    pub scan_order: ScanOrder,
    pub exclude_ports: Vec<u16>,
    /// Raise the soft descriptor limit to this value before scanning.
    pub ulimit: Option<u64>,
    /// Nameservers to resolve the host with; empty means the system resolver.
    pub resolver: Vec<IpAddr>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            tries: 1,
            scan_order: ScanOrder::Serial,
            exclude_ports: Vec::new(),
            ulimit: None,
            resolver: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// `~/.connscan.toml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load `explicit` if given, else the default file if it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "loading config");
                Self::from_path(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_in_flight: self.max_in_flight.max(1),
            timeout: self.timeout(),
            tries: NonZeroU8::new(self.tries).unwrap_or(NonZeroU8::MIN),
            order: self.scan_order,
        }
    }
}
