//! Hardware integration tests.
//!
//! These tests require a real serial device and are ignored by default.
//! Point `SERIAL_BINDING_TEST_PORT` at a loopback (TX wired to RX) and run:
//! `cargo test --test integration_hardware -- --ignored`

#[path = "common/mod.rs"]
mod common;

use common::TEST_TIMEOUT;
use serial_binding::host::native::NativeSettings;
use serial_binding::{Binding, HostPort, NativeSerial, OpenOptions, StreamBinding};
use std::sync::Arc;
use tokio::time::timeout;

fn test_port() -> Option<String> {
    std::env::var("SERIAL_BINDING_TEST_PORT").ok()
}

#[tokio::test]
#[ignore = "requires serial hardware"]
async fn test_native_loopback_through_binding() {
    let Some(name) = test_port() else {
        eprintln!("SERIAL_BINDING_TEST_PORT not set, skipping");
        return;
    };

    let native = NativeSerial::new(NativeSettings::default());
    let port: Arc<dyn HostPort> = Arc::new(native.port(name));
    let binding = StreamBinding::new();
    binding
        .open(port, OpenOptions::with_baud_rate(115200))
        .await
        .unwrap();

    binding.write(b"loopback\n").await.unwrap();
    binding.drain().await.unwrap();

    let mut received = Vec::new();
    let mut buffer = [0u8; 64];
    while received.len() < 9 {
        let n = timeout(TEST_TIMEOUT, binding.read(&mut buffer, 0, 64))
            .await
            .expect("loopback data should arrive")
            .unwrap();
        received.extend_from_slice(&buffer[..n]);
    }
    assert_eq!(received, b"loopback\n");

    binding.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires serial hardware"]
async fn test_native_close_cancels_idle_read() {
    let Some(name) = test_port() else {
        return;
    };

    let native = NativeSerial::new(NativeSettings::default());
    let binding = Arc::new(StreamBinding::new());
    binding
        .open(Arc::new(native.port(name)), OpenOptions::with_baud_rate(115200))
        .await
        .unwrap();

    let reader = {
        let binding = Arc::clone(&binding);
        tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            binding.read(&mut buffer, 0, 64).await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    timeout(TEST_TIMEOUT, binding.close()).await.unwrap().unwrap();
    assert!(reader.await.unwrap().unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_listing_does_not_fail_without_hardware() {
    let native = NativeSerial::new(NativeSettings::default());
    // Enumeration may legitimately find nothing, or fail on exotic CI hosts.
    if let Ok(ports) = StreamBinding::list(&native).await {
        for port in ports {
            if let Some(vid) = &port.vendor_id {
                assert_eq!(vid.len(), 4);
            }
        }
    }
}
