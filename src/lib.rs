//! Serial Binding Library
//!
//! Adapters that let generic serial consumers drive ports exposed by a
//! lock-based host transport (a browser serial capability, the OS serial
//! driver, or a mock), through one of two contract shapes.
//!
//! # Modules
//!
//! - `host`: host transport traits, plus native and mock transports
//! - `options`: binding-facing open options and control-line types
//! - `binding`: operation-shaped binding (`open`/`read`/`write`/`drain`/...)
//! - `duplex`: duplex byte stream with long-lived host locks
//! - `error`: binding error type
//! - `config`: configuration management with TOML support

pub mod binding;
pub mod config;
pub mod duplex;
pub mod error;
pub mod host;
pub mod options;

// Re-export commonly used types for convenience
pub use binding::{Binding, Lifecycle, PortListing, StreamBinding};
pub use duplex::{DuplexSettings, DuplexStream};
pub use error::{BindingError, BindingResult};
pub use host::{
    HostError, HostPort, HostResult, HostSerial, MockHostPort, MockSerial, NativePort,
    NativeSerial, Parity, StreamPair,
};
pub use options::{BaudRate, OpenOptions, PortSignals, SetSignals, UpdateOptions};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
