//! Bridge configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codepage::CodePage;
use crate::error::{PrinterError, Result};
use crate::protocol::TextEncoding;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Budget for the known-device lookup plus scanning, in milliseconds.
    pub scan_timeout_ms: u64,

    /// How long a request waits for the adapter to power on.
    pub adapter_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// Bytes per GATT write used by the btleplug backend, 0 for no limit.
    pub max_write_len: usize,

    pub code_page: CodePage,

    /// Send lines the code page cannot represent as UTF-8 instead of dropping them.
    pub utf8_fallback: bool,

    /// Capacity of the bridge command channel.
    pub command_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 15_000,
            adapter_timeout_ms: 10_000,
            connect_timeout_ms: 20_000,
            max_write_len: 20,
            code_page: CodePage::Iso8859_6,
            utf8_fallback: true,
            command_buffer: 16,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PrinterError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PrinterError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PrinterError::Config(e.to_string()))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn text_encoding(&self) -> TextEncoding {
        TextEncoding {
            code_page: self.code_page,
            utf8_fallback: self.utf8_fallback,
        }
    }
}
