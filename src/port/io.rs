//! Single-shot reads and writes, blocking and async.

use super::handle::SerialPort;
use crate::error::Result;
use crate::native::{with_read_buffer, with_write_buffer, PortToken, SerialDriver};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Driver timeout in milliseconds; saturates rather than wrapping.
fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// Read up to `bytes` bytes from `port` through `driver`.
///
/// `None` issues a nonblocking read. `Some(d)` issues a blocking read that
/// gives up after `d`; a zero duration waits indefinitely.
pub fn read_with(
    driver: &dyn SerialDriver,
    port: PortToken,
    bytes: usize,
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let data = with_read_buffer(driver, bytes, |buf| match timeout {
        None => driver.nonblocking_read(port, buf),
        Some(t) => driver.blocking_read(port, buf, timeout_ms(t)),
    })?;
    trace!(port, requested = bytes, received = data.len(), "read");
    Ok(data)
}

/// Write `data` to `port` through `driver`, returning the accepted byte count.
pub fn write_with(
    driver: &dyn SerialDriver,
    port: PortToken,
    data: &[u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    let written = with_write_buffer(driver, data, |buf| match timeout {
        None => driver.nonblocking_write(port, buf),
        Some(t) => driver.blocking_write(port, buf, timeout_ms(t)),
    })?;
    trace!(port, requested = data.len(), written, "write");
    Ok(written)
}

/// Async single-shot I/O.
///
/// Calls run on Tokio's blocking pool so a blocking driver read never stalls
/// the runtime. Dropping the returned future does not interrupt a call that
/// has already started.
#[async_trait]
pub trait AsyncPortIo {
    async fn read_async(&self, bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>>;

    async fn write_async(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize>;
}

#[async_trait]
impl AsyncPortIo for SerialPort {
    async fn read_async(&self, bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let token = self.live()?;
        let driver = Arc::clone(self.driver());

        tokio::task::spawn_blocking(move || read_with(driver.as_ref(), token, bytes, timeout))
            .await?
    }

    async fn write_async(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let token = self.live()?;
        let driver = Arc::clone(self.driver());
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || write_with(driver.as_ref(), token, &data, timeout))
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerialError;
    use crate::native::{MockDevice, MockDriver, MockSerialDriver, OpenMode, SP_ERR_FAIL};
    use mockall::predicate::*;

    fn open_mock(name: &str) -> (Arc<MockDriver>, SerialPort) {
        let driver = Arc::new(MockDriver::new());
        driver.add_device(MockDevice::new(name));
        let mut port = SerialPort::with_driver(driver.clone(), name).unwrap();
        port.open(OpenMode::ReadWrite).unwrap();
        (driver, port)
    }

    #[test]
    fn test_timeout_selects_blocking_call() {
        let mut driver = MockSerialDriver::new();
        driver
            .expect_blocking_read()
            .with(eq(7usize), always(), eq(250u32))
            .times(1)
            .returning(|_, buf, _| {
                buf[0] = 0x42;
                1
            });
        driver.expect_nonblocking_read().never();

        let data = read_with(&driver, 7, 4, Some(Duration::from_millis(250))).unwrap();
        assert_eq!(data, vec![0x42]);
    }

    #[test]
    fn test_no_timeout_selects_nonblocking_call() {
        let mut driver = MockSerialDriver::new();
        driver
            .expect_nonblocking_write()
            .times(1)
            .returning(|_, buf| buf.len() as i32);
        driver.expect_blocking_write().never();

        assert_eq!(write_with(&driver, 7, &[1, 2, 3], None).unwrap(), 3);
    }

    #[test]
    fn test_zero_timeout_means_wait_forever() {
        let mut driver = MockSerialDriver::new();
        driver
            .expect_blocking_write()
            .with(always(), always(), eq(0u32))
            .times(1)
            .returning(|_, buf, _| buf.len() as i32);

        assert_eq!(
            write_with(&driver, 1, b"x", Some(Duration::ZERO)).unwrap(),
            1
        );
    }

    #[test]
    fn test_huge_timeout_saturates() {
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX / 2)), u32::MAX);
        assert_eq!(timeout_ms(Duration::from_millis(1500)), 1500);
    }

    #[test]
    fn test_write_reports_driver_count_and_bytes() {
        let (driver, port) = open_mock("MOCK0");
        assert_eq!(port.write(&[1, 2, 3], None).unwrap(), 3);
        assert_eq!(driver.write_log("MOCK0"), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_short_write_is_returned() {
        let (driver, port) = open_mock("MOCK0");
        driver.set_write_limit("MOCK0", Some(2));
        assert_eq!(port.write(b"hello", Some(Duration::from_millis(10))).unwrap(), 2);
    }

    #[test]
    fn test_read_failure_carries_record() {
        let (driver, port) = open_mock("MOCK0");
        driver.fail_next("nonblocking_read", SP_ERR_FAIL, 5, "Input/output error");

        match port.read(4, None).unwrap_err() {
            SerialError::NativeCall { code, message } => {
                assert_eq!(code, 5);
                assert_eq!(message, "Input/output error");
            }
            other => panic!("Expected NativeCall error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_read_and_write() {
        let (driver, port) = open_mock("MOCK0");
        driver.enqueue_read("MOCK0", b"ping");

        let data = port.read_async(16, Some(Duration::from_millis(100))).await.unwrap();
        assert_eq!(data, b"ping");

        let written = port.write_async(b"pong", None).await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(driver.write_log("MOCK0"), vec![b"pong".to_vec()]);
    }

    #[tokio::test]
    async fn test_async_on_disposed_handle_is_state_error() {
        let (_driver, mut port) = open_mock("MOCK0");
        port.dispose().unwrap();
        let err = port.read_async(1, None).await.unwrap_err();
        assert!(matches!(err, SerialError::State(_)));
    }

    #[test]
    fn test_async_write_from_plain_runtime() {
        let (driver, port) = open_mock("MOCK0");
        let result = tokio_test::block_on(port.write_async(b"abc", Some(Duration::from_millis(10))));
        let written = tokio_test::assert_ok!(result);
        assert_eq!(written, 3);
        assert_eq!(driver.write_log("MOCK0"), vec![b"abc".to_vec()]);
    }
}
