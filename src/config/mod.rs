//! Configuration module for serial-binding.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_BINDING_CONFIG` environment variable (explicit path)
//! 2. `./serial-binding.toml` (current directory)
//! 3. `~/.config/serial-binding/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-binding\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_BINDING_<SECTION>_<KEY>`, for example
//! `SERIAL_BINDING_SERIAL_DEFAULT_BAUD=9600` or
//! `SERIAL_BINDING_DUPLEX_HIGH_WATER_MARK=4`.
//!
//! # Example
//!
//! ```rust,ignore
//! use serial_binding::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let options = loader.config().serial.open_options(None);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DuplexConfig, LogFormat, LoggingConfig, NativeConfig, SerialConfig,
};
