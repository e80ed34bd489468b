//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::duplex::DuplexSettings;
use crate::host::native::NativeSettings;
use crate::host::Parity;
use crate::options::OpenOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default open options and port aliases
    pub serial: SerialConfig,
    /// Native OS transport tuning
    pub native: NativeConfig,
    /// Duplex stream tuning
    pub duplex: DuplexConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that would make the adapters misbehave.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be greater than 0",
            ));
        }
        if self.native.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "native.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.native.read_chunk_size == 0 {
            return Err(ConfigError::validation(
                "native.read_chunk_size",
                "must be greater than 0",
            ));
        }
        if self.duplex.high_water_mark == 0 {
            return Err(ConfigError::validation(
                "duplex.high_water_mark",
                "must be greater than 0",
            ));
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Default baud rate for new connections
    pub default_baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Hardware flow control
    pub rtscts: bool,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            rtscts: false,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Build open options from the defaults, optionally overriding the baud
    /// rate.
    pub fn open_options(&self, baud_rate: Option<u32>) -> OpenOptions {
        OpenOptions {
            baud_rate: baud_rate.unwrap_or(self.default_baud),
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            rtscts: self.rtscts,
            ..Default::default()
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Native transport section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Device timeout between cancellation checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Largest chunk returned by one read
    pub read_chunk_size: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        let settings = NativeSettings::default();
        Self {
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            read_chunk_size: settings.read_chunk_size,
        }
    }
}

impl NativeConfig {
    pub fn settings(&self) -> NativeSettings {
        NativeSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            read_chunk_size: self.read_chunk_size,
        }
    }
}

/// Duplex stream section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    /// Chunks buffered ahead of the consumer
    pub high_water_mark: usize,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DuplexSettings::default().high_water_mark,
        }
    }
}

impl DuplexConfig {
    pub fn settings(&self) -> DuplexSettings {
        DuplexSettings {
            high_water_mark: self.high_water_mark,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
