
use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drivers::hanvon::driver::{ENDPOINT, INTERFACE, VID};

/// Represents all possible errors loading a [Config]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not read: {0}")]
    IoError(#[from] io::Error),
    #[error("Unable to deserialize: {0}")]
    DeserializeError(#[from] serde_yaml::Error),
    #[error("Invalid value for '{0}': {1}")]
    InvalidValue(&'static str, String),
}

/// Driver configuration. Every field is optional in the YAML file and falls
/// back to the values that work for all supported tablets.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Vendor id used to filter hotplug notifications
    pub vendor_id: u16,
    /// Interface carrying the input reports
    pub interface: u8,
    /// Interrupt IN endpoint on that interface
    pub endpoint: u8,
    /// Longest time a single poll of the USB stack may block
    pub poll_timeout_ms: u64,
    /// Log every raw packet at debug level
    pub dump_packets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_id: VID,
            interface: INTERFACE,
            endpoint: ENDPOINT,
            poll_timeout_ms: 1000,
            dump_packets: false,
        }
    }
}

impl Config {
    /// Load a [Config] from the given YAML string
    pub fn from_yaml(content: String) -> Result<Config, LoadError> {
        let config: Config = serde_yaml::from_str(content.as_str())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a [Config] from the given YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Config, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Config::from_yaml(content)
    }

    /// A zero timeout would let a single poll block forever
    fn validate(&self) -> Result<(), LoadError> {
        if self.poll_timeout_ms == 0 {
            return Err(LoadError::InvalidValue(
                "poll_timeout_ms",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
