//! Shared test utilities for the adapter suites.
//!
//! - Open bindings and host ports with default options
//! - Poll mock state until a condition holds
//! - Host open options builder

#![allow(dead_code)]

use serial_binding::host::{FlowControl, HostOpenOptions, HostPort, MockHostPort, Parity};
use serial_binding::{Binding, OpenOptions, StreamBinding};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn host_options(baud_rate: u32) -> HostOpenOptions {
    HostOpenOptions {
        baud_rate,
        data_bits: 8,
        stop_bits: 1,
        parity: Parity::None,
        flow_control: FlowControl::None,
    }
}

/// A binding opened on a fresh mock port, plus the scripting handle.
pub async fn open_binding(name: &str) -> (Arc<StreamBinding>, MockHostPort) {
    let mock = MockHostPort::new(name);
    let binding = Arc::new(StreamBinding::new());
    binding
        .open(Arc::new(mock.clone()), OpenOptions::with_baud_rate(115200))
        .await
        .expect("open should succeed on a fresh mock");
    (binding, mock)
}

/// A host port opened directly, for the duplex adapter.
pub async fn open_host_port(name: &str) -> MockHostPort {
    let mock = MockHostPort::new(name);
    mock.open(&host_options(9600))
        .await
        .expect("open should succeed on a fresh mock");
    mock
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
