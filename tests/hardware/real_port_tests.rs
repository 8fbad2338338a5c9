//! Tests requiring actual serial hardware.
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0   # or COM3 on Windows
//! export TEST_BAUD=115200         # optional, default: 9600
//! export TEST_LOOPBACK=1          # if TX and RX are wired together
//!
//! cargo test --features hardware-tests -- --ignored
//! ```

use super::utils::skip_without_hardware;
use crate::common::{next_chunk, TEST_DEADLINE};
use futures::StreamExt;
use serial_bridge::native::{ClearBuffers, OpenMode};
use serial_bridge::reader::{ReaderOptions, ReaderState, SerialPortReader};
use serial_bridge::{SerialError, SerialPort};
use std::time::Duration;

#[test]
#[ignore]
fn test_real_port_is_listed() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let names = SerialPort::available_ports().expect("Failed to list ports");
    println!("Available ports: {:?}", names);
    assert!(names.iter().any(|n| n == &test.port_name));
}

#[test]
#[ignore]
fn test_real_port_open_configure_close() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let mut port = test.open(OpenMode::ReadWrite);
    assert_eq!(port.name().unwrap(), test.port_name);
    assert_eq!(port.config().unwrap().baud_rate, test.baud_rate);

    match port.info() {
        Ok(info) => println!("{}", serde_json::to_string_pretty(&info).unwrap()),
        Err(e) => println!("info unavailable: {}", e),
    }

    port.close().unwrap();
    port.dispose().unwrap();
}

#[test]
#[ignore]
fn test_real_port_lookup_of_missing_device() {
    if skip_without_hardware().is_none() {
        return;
    }
    let err = SerialPort::new("/dev/definitely-not-a-port").unwrap_err();
    assert!(matches!(err, SerialError::NativeCall { .. }));
}

#[test]
#[ignore]
fn test_real_port_loopback_single_shot() {
    let Some(test) = skip_without_hardware() else {
        return;
    };
    if !test.loopback_enabled {
        println!("Skipping loopback test: TEST_LOOPBACK not set to 1");
        return;
    }

    let port = test.open(OpenMode::ReadWrite);
    port.flush(ClearBuffers::Both).unwrap();

    let data = b"LOOPBACK TEST\r\n";
    let written = port.write(data, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(written, data.len());
    port.drain().unwrap();

    let echoed = port.read(data.len(), Some(Duration::from_secs(1))).unwrap();
    assert_eq!(echoed, data);
}

#[tokio::test]
#[ignore]
async fn test_real_port_loopback_stream() {
    let Some(test) = skip_without_hardware() else {
        return;
    };
    if !test.loopback_enabled {
        println!("Skipping loopback test: TEST_LOOPBACK not set to 1");
        return;
    }

    let port = test.open(OpenMode::ReadWrite);
    port.flush(ClearBuffers::Both).unwrap();

    let reader = SerialPortReader::new(&port, ReaderOptions::default()).unwrap();
    let mut stream = reader.stream().unwrap();

    let data = b"STREAMED LOOPBACK\r\n";
    port.write(data, Some(Duration::from_secs(1))).unwrap();

    let mut received = Vec::new();
    while received.len() < data.len() {
        match next_chunk(&mut stream).await {
            Some(chunk) => received.extend(chunk),
            None => panic!("stream ended early: {:?}", reader.termination()),
        }
    }
    assert_eq!(received, data);

    reader.shutdown().await.unwrap();
    assert_eq!(reader.state(), ReaderState::Stopped);
    assert!(stream.next().await.is_none());
}

#[test]
#[ignore]
fn test_real_port_stop_latency_bounded_by_poll_timeout() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let port = test.open(OpenMode::Read);
    let options = ReaderOptions {
        poll_timeout: Duration::from_millis(100),
        channel_capacity: 4,
    };
    let reader = SerialPortReader::new(&port, options).unwrap();
    let _stream = reader.stream().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let started = std::time::Instant::now();
    reader.close();
    assert!(started.elapsed() < Duration::from_millis(50));
    crate::common::wait_until("reader to stop", || reader.state() == ReaderState::Stopped);
    assert!(started.elapsed() < TEST_DEADLINE);
    assert!(started.elapsed() < Duration::from_millis(500));
}
