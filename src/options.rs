//! Binding-facing option and signal types.
//!
//! These mirror what generic serial consumers hand to a binding. Their value
//! space is wider than what a browser transport accepts (5 and 6 data bits,
//! mark and space parity); the adapter does not narrow it and leaves the
//! rejection to the host.

use crate::error::{BindingError, BindingResult};
use crate::host::{FlowControl, HostInputSignals, HostOpenOptions, HostOutputSignals, Parity};
use serde::{Deserialize, Serialize};

/// Options for [`Binding::open`](crate::binding::Binding::open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Baud rate (bits per second).
    pub baud_rate: u32,
    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: u8,
    /// Number of stop bits (1 or 2).
    pub stop_bits: u8,
    pub parity: Parity,
    /// Hardware (RTS/CTS) flow control.
    pub rtscts: bool,
    /// Software flow control flags. The host transport has no software flow
    /// control, so setting any of them makes `open` fail.
    pub xon: bool,
    pub xoff: bool,
    pub xany: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            rtscts: false,
            xon: false,
            xoff: false,
            xany: false,
        }
    }
}

impl OpenOptions {
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Translate into the options handed to the host.
    ///
    /// Fails with [`BindingError::UnsupportedFlowControl`] for software flow
    /// control. Everything else passes through unvalidated.
    pub fn to_host(&self) -> BindingResult<HostOpenOptions> {
        if self.xon || self.xoff || self.xany {
            return Err(BindingError::UnsupportedFlowControl);
        }

        Ok(HostOpenOptions {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: if self.rtscts {
                FlowControl::Hardware
            } else {
                FlowControl::None
            },
        })
    }
}

/// Options for [`Binding::update`](crate::binding::Binding::update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub baud_rate: u32,
}

/// Result of [`Binding::get_baud_rate`](crate::binding::Binding::get_baud_rate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaudRate {
    pub baud_rate: u32,
}

/// Outbound control lines for [`Binding::set`](crate::binding::Binding::set).
/// `None` leaves a line as it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetSignals {
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
    pub brk: Option<bool>,
}

impl From<SetSignals> for HostOutputSignals {
    fn from(signals: SetSignals) -> Self {
        Self {
            data_terminal_ready: signals.dtr,
            request_to_send: signals.rts,
            break_signal: signals.brk,
        }
    }
}

/// Inbound control lines returned by [`Binding::get`](crate::binding::Binding::get).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortSignals {
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
}

impl From<HostInputSignals> for PortSignals {
    fn from(signals: HostInputSignals) -> Self {
        Self {
            cts: signals.clear_to_send,
            dsr: signals.data_set_ready,
            dcd: signals.data_carrier_detect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = OpenOptions::default();
        assert_eq!(options.baud_rate, 9600);
        assert_eq!(options.data_bits, 8);
        assert_eq!(options.stop_bits, 1);
        assert_eq!(options.parity, Parity::None);
        assert!(!options.rtscts);
    }

    #[test]
    fn test_translation_passes_values_through() {
        let options = OpenOptions {
            baud_rate: 57600,
            data_bits: 5,
            stop_bits: 2,
            parity: Parity::Mark,
            ..Default::default()
        };

        let host = options.to_host().unwrap();
        assert_eq!(host.baud_rate, 57600);
        assert_eq!(host.data_bits, 5);
        assert_eq!(host.stop_bits, 2);
        assert_eq!(host.parity, Parity::Mark);
        assert_eq!(host.flow_control, FlowControl::None);
    }

    #[test]
    fn test_rtscts_maps_to_hardware_flow_control() {
        let options = OpenOptions {
            rtscts: true,
            ..Default::default()
        };
        assert_eq!(options.to_host().unwrap().flow_control, FlowControl::Hardware);
    }

    #[test]
    fn test_software_flow_control_is_rejected() {
        for options in [
            OpenOptions { xon: true, ..Default::default() },
            OpenOptions { xoff: true, ..Default::default() },
            OpenOptions { xany: true, ..Default::default() },
        ] {
            assert!(matches!(
                options.to_host(),
                Err(BindingError::UnsupportedFlowControl)
            ));
        }
    }

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let options: OpenOptions = serde_json::from_str(r#"{"baud_rate": 115200}"#).unwrap();
        assert_eq!(options, OpenOptions::with_baud_rate(115200));
    }

    #[test]
    fn test_signal_translation() {
        let host: HostOutputSignals = SetSignals {
            dtr: Some(true),
            rts: Some(false),
            brk: None,
        }
        .into();
        assert_eq!(host.data_terminal_ready, Some(true));
        assert_eq!(host.request_to_send, Some(false));
        assert_eq!(host.break_signal, None);

        let signals: PortSignals = HostInputSignals {
            clear_to_send: true,
            data_set_ready: false,
            data_carrier_detect: true,
        }
        .into();
        assert_eq!(
            signals,
            PortSignals {
                cts: true,
                dsr: false,
                dcd: true
            }
        );
    }
}
