//! Native host tests on a pseudo-terminal pair.
//!
//! The binding drives the pty's device side through `NativePort`, and the
//! test plays the far end on the controller side.

#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use common::{host_options, TEST_TIMEOUT};
use pretty_assertions::assert_eq;
use serial_binding::host::native::NativeSettings;
use serial_binding::host::{HostPort, HostReader, StreamPair};
use serial_binding::{Binding, NativeSerial, OpenOptions, StreamBinding};
use serialport::{SerialPort, TTYPort};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const SETTINGS: NativeSettings = NativeSettings {
    poll_interval: Duration::from_millis(20),
    read_chunk_size: 256,
};

/// A pty pair. The returned path names the device side, which is left
/// closed so the port under test is its only opener.
fn pty() -> (TTYPort, String) {
    let (controller, device) = TTYPort::pair().expect("pty pair");
    let path = device.name().expect("pty device path");
    drop(device);
    (controller, path)
}

async fn read_exactly(binding: &StreamBinding, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buffer = [0u8; 64];
    while received.len() < len {
        let n = timeout(TEST_TIMEOUT, binding.read(&mut buffer, 0, 64))
            .await
            .expect("data should arrive")
            .unwrap();
        assert!(n > 0, "unexpected end of stream");
        received.extend_from_slice(&buffer[..n]);
    }
    received
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_read_does_not_wedge_port() {
    let (mut controller, path) = pty();
    let native = NativeSerial::new(SETTINGS);
    let binding = StreamBinding::new();
    binding
        .open(Arc::new(native.port(&path)), OpenOptions::with_baud_rate(9600))
        .await
        .unwrap();

    let mut buffer = [0u8; 16];
    let abandoned = timeout(Duration::from_millis(30), binding.read(&mut buffer, 0, 16)).await;
    assert!(abandoned.is_err());

    // Bytes sent after the abandoned read gave up go to the next reader.
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.write_all(b"hi").unwrap();
    assert_eq!(read_exactly(&binding, 2).await, b"hi".to_vec());

    timeout(TEST_TIMEOUT, binding.close()).await.unwrap().unwrap();
    binding
        .open(Arc::new(native.port(&path)), OpenOptions::with_baud_rate(9600))
        .await
        .unwrap();
    binding.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_right_after_dropped_read() {
    let (_controller, path) = pty();
    let native = NativeSerial::new(SETTINGS);
    let binding = StreamBinding::new();
    binding
        .open(Arc::new(native.port(&path)), OpenOptions::with_baud_rate(9600))
        .await
        .unwrap();

    let mut buffer = [0u8; 16];
    assert!(timeout(Duration::from_millis(30), binding.read(&mut buffer, 0, 16))
        .await
        .is_err());

    // The blocking read may still be polling the device here.
    timeout(TEST_TIMEOUT, binding.close()).await.unwrap().unwrap();
    binding
        .open(Arc::new(native.port(&path)), OpenOptions::with_baud_rate(9600))
        .await
        .unwrap();
    binding.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_port_close_waits_for_abandoned_reader() {
    let (_controller, path) = pty();
    let port = NativeSerial::new(SETTINGS).port(&path);
    port.open(&host_options(9600)).await.unwrap();

    let mut reader = port.readable().unwrap();
    let abandoned = timeout(Duration::from_millis(30), reader.read()).await;
    assert!(abandoned.is_err());
    drop(reader);
    assert!(port.readable().is_ok(), "a dropped reader frees its lock");

    timeout(TEST_TIMEOUT, port.close()).await.unwrap().unwrap();
    port.open(&host_options(9600)).await.unwrap();
    port.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_writes_reach_the_far_end() {
    let (mut controller, path) = pty();
    let native = NativeSerial::new(SETTINGS);
    let binding = StreamBinding::new();
    binding
        .open(Arc::new(native.port(&path)), OpenOptions::with_baud_rate(9600))
        .await
        .unwrap();

    binding.write(b"ping").await.unwrap();
    binding.drain().await.unwrap();

    controller.set_timeout(Duration::from_millis(500)).unwrap();
    let mut received = [0u8; 4];
    std::io::Read::read_exact(&mut controller, &mut received).unwrap();
    assert_eq!(&received, b"ping");

    binding.close().await.unwrap();
}
