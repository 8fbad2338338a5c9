//! Shared test utilities for serial-bridge integration tests.
//!
//! - Mock driver and port construction
//! - Stream collection with a deadline
//! - Polling helpers for background state

#![allow(dead_code)]

use futures::{Stream, StreamExt};
use serial_bridge::native::{MockDevice, MockDriver, OpenMode};
use serial_bridge::reader::ReaderOptions;
use serial_bridge::SerialPort;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Reader options with a short poll interval so tests finish quickly.
pub fn fast_reader() -> ReaderOptions {
    ReaderOptions {
        poll_timeout: Duration::from_millis(10),
        channel_capacity: 16,
    }
}

/// A mock driver with one plain device per name.
pub fn mock_driver(names: &[&str]) -> Arc<MockDriver> {
    let driver = Arc::new(MockDriver::new());
    for name in names {
        driver.add_device(MockDevice::new(*name));
    }
    driver
}

/// Look up and open a port on `driver`.
pub fn open_mock_port(driver: &Arc<MockDriver>, name: &str, mode: OpenMode) -> SerialPort {
    let mut port = SerialPort::with_driver(driver.clone(), name).expect("mock port lookup");
    port.open(mode).expect("mock port open");
    port
}

/// Collect a stream until it completes, failing the test if it takes too long.
pub async fn collect_all<S>(stream: S) -> Vec<Vec<u8>>
where
    S: Stream<Item = Vec<u8>>,
{
    tokio::time::timeout(TEST_DEADLINE, stream.collect::<Vec<_>>())
        .await
        .expect("stream did not complete in time")
}

/// Next chunk with a deadline.
pub async fn next_chunk<S>(stream: &mut S) -> Option<Vec<u8>>
where
    S: Stream<Item = Vec<u8>> + Unpin,
{
    tokio::time::timeout(TEST_DEADLINE, stream.next())
        .await
        .expect("no chunk in time")
}

/// Spin until `condition` holds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_DEADLINE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
