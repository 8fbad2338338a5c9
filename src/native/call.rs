//! Native call adapter.
//!
//! Runs exactly one driver call and checks its status. On failure the
//! driver's last-error state is read before anything else can touch the
//! driver, because the next call on any handle may overwrite it.

use super::{SerialDriver, SP_ERR_SUPP, SP_OK};
use crate::error::{ErrorRecord, Result, SerialError};
use tracing::debug;

/// Invoke `op` once and turn a negative status into a [`SerialError`].
///
/// `SP_ERR_SUPP` becomes [`SerialError::NotSupported`]; every other negative
/// status becomes [`SerialError::NativeCall`] carrying the captured record.
/// Non-negative statuses are returned unchanged (byte counts, for instance).
pub fn call<F>(driver: &dyn SerialDriver, op: F) -> Result<i32>
where
    F: FnOnce() -> i32,
{
    let status = op();
    if status >= SP_OK {
        return Ok(status);
    }

    let record = last_error(driver);
    debug!(status, code = record.code, message = %record.message, "native call failed");

    if status == SP_ERR_SUPP {
        return Err(SerialError::NotSupported(record.message));
    }
    Err(record.into())
}

/// Capture the driver's last error code and message.
///
/// The code is read first; the message string is owned by the returned
/// record and released with it.
pub fn last_error(driver: &dyn SerialDriver) -> ErrorRecord {
    let code = driver.last_error_code();
    let message = driver.last_error_message();
    ErrorRecord { code, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{MockSerialDriver, SP_ERR_FAIL};
    use mockall::Sequence;

    #[test]
    fn test_success_passes_status_through() {
        let mut driver = MockSerialDriver::new();
        driver.expect_last_error_code().never();
        driver.expect_last_error_message().never();

        assert_eq!(call(&driver, || 42).unwrap(), 42);
        assert_eq!(call(&driver, || SP_OK).unwrap(), 0);
    }

    #[test]
    fn test_failure_captures_code_then_message() {
        let mut driver = MockSerialDriver::new();
        let mut seq = Sequence::new();
        driver
            .expect_last_error_code()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(5);
        driver
            .expect_last_error_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| "Input/output error".to_string());

        let err = call(&driver, || SP_ERR_FAIL).unwrap_err();
        match err {
            SerialError::NativeCall { code, message } => {
                assert_eq!(code, 5);
                assert_eq!(message, "Input/output error");
            }
            other => panic!("Expected NativeCall error, got: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_maps_to_not_supported() {
        let mut driver = MockSerialDriver::new();
        driver.expect_last_error_code().return_const(0);
        driver
            .expect_last_error_message()
            .returning(|| "Not a USB device".to_string());

        let err = call(&driver, || SP_ERR_SUPP).unwrap_err();
        assert!(matches!(err, SerialError::NotSupported(ref m) if m == "Not a USB device"));
    }

    #[test]
    fn test_operation_runs_exactly_once() {
        let driver = MockSerialDriver::new();
        let mut calls = 0;
        let _ = call(&driver, || {
            calls += 1;
            3
        });
        assert_eq!(calls, 1);
    }
}
