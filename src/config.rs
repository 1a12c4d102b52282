//! Channel configuration
//!
//! Device identity and transfer tuning for the USB bulk channel.
//! Values default to what the on-target command loop expects and can be
//! overridden from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Nintendo's USB vendor id.
pub const DEFAULT_VENDOR_ID: u16 = 0x057E;
/// Product id reported by the on-target command loop.
pub const DEFAULT_PRODUCT_ID: u16 = 0x3000;
/// Largest single bulk transfer the target reads or writes.
pub const DEFAULT_MAX_CHUNK: usize = 0xE00;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// USB vendor id to match
    pub vendor_id: u16,
    /// USB product id to match
    pub product_id: u16,
    /// Per-chunk deadline (milliseconds)
    pub timeout_ms: u64,
    /// Maximum bytes per bulk transfer
    pub max_chunk: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            timeout_ms: 3000,
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

impl ChannelConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|_| Error::Config("config file unreadable"))?;
                Self::from_json(&json)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk == 0 {
            return Err(Error::Config("max_chunk must be nonzero"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be nonzero"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
