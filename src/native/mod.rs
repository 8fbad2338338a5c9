//! Driver collaborator surface.
//!
//! [`SerialDriver`] mirrors a C-style serial driver: every fallible call
//! returns a signed status (`>= 0` is success, negative is one of the
//! `SP_ERR_*` codes) and hands outputs back through `&mut` parameters. The
//! rest of the crate never talks to the driver directly; it goes through
//! [`call`] and [`buffer`], which turn statuses into [`SerialError`]s.
//!
//! [`SerialError`]: crate::error::SerialError

pub mod buffer;
pub mod call;
pub mod mock;
pub mod system;

pub use buffer::{with_read_buffer, with_write_buffer, TransientBuffer};
pub use call::{call, last_error};
pub use mock::{MockDevice, MockDriver};
pub use system::SystemDriver;

use crate::port::PortConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Operation succeeded.
pub const SP_OK: i32 = 0;
/// Invalid arguments were passed to the function.
pub const SP_ERR_ARG: i32 = -1;
/// A system error occurred while executing the operation.
pub const SP_ERR_FAIL: i32 = -2;
/// A memory allocation failed while executing the operation.
pub const SP_ERR_MEM: i32 = -3;
/// The requested operation is not supported by this system or device.
pub const SP_ERR_SUPP: i32 = -4;

/// Opaque reference to a driver-side port object.
///
/// Plain integer so it can be copied into another thread by value.
pub type PortToken = usize;

/// Opaque reference to a driver-side event set.
pub type EventSetToken = usize;

/// Access mode requested when opening a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// How a port is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Native platform serial port.
    Native,
    /// USB serial port adapter.
    Usb,
    /// Bluetooth serial port adapter.
    Bluetooth,
}

/// Selects which driver buffers a flush discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearBuffers {
    Input,
    Output,
    Both,
}

impl From<ClearBuffers> for serialport::ClearBuffer {
    fn from(buffers: ClearBuffers) -> Self {
        match buffers {
            ClearBuffers::Input => serialport::ClearBuffer::Input,
            ClearBuffers::Output => serialport::ClearBuffer::Output,
            ClearBuffers::Both => serialport::ClearBuffer::All,
        }
    }
}

bitflags::bitflags! {
    /// Readiness conditions an event set can wait for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// Data received and ready to read.
        const RX_READY = 0x01;
        /// Ready to transmit new data.
        const TX_READY = 0x02;
        /// Error occurred.
        const ERROR = 0x04;
    }
}

bitflags::bitflags! {
    /// Modem control input lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Signals: u32 {
        /// Clear to send.
        const CTS = 0x01;
        /// Data set ready.
        const DSR = 0x02;
        /// Data carrier detect.
        const DCD = 0x04;
        /// Ring indicator.
        const RI = 0x08;
    }
}

/// The blocking, C-style serial driver surface.
///
/// Implementations must be callable from several threads at once: the
/// background reader polls from its own thread while the foreground keeps
/// issuing calls against other handles. Last-error state may be overwritten
/// by the next call on any handle, so callers capture it immediately through
/// [`last_error`].
#[cfg_attr(test, mockall::automock)]
pub trait SerialDriver: Send + Sync {
    /// Look up a port by its system name and create a new port object.
    fn get_port_by_name(&self, name: &str, port: &mut PortToken) -> i32;

    /// Create an independent port object referring to the same device.
    fn copy_port(&self, port: PortToken, copy: &mut PortToken) -> i32;

    /// Enumerate every port on the system, each as a new port object.
    fn list_ports(&self, ports: &mut Vec<PortToken>) -> i32;

    /// Release a port list returned by [`SerialDriver::list_ports`].
    fn free_port_list(&self, ports: Vec<PortToken>);

    /// Release a port object.
    fn free_port(&self, port: PortToken);

    fn open(&self, port: PortToken, mode: OpenMode) -> i32;

    fn close(&self, port: PortToken) -> i32;

    fn port_name(&self, port: PortToken) -> Option<String>;

    fn port_description(&self, port: PortToken) -> Option<String>;

    fn port_transport(&self, port: PortToken) -> Transport;

    fn usb_bus_address(&self, port: PortToken, bus: &mut i32, address: &mut i32) -> i32;

    fn usb_vid_pid(&self, port: PortToken, vid: &mut i32, pid: &mut i32) -> i32;

    fn usb_manufacturer(&self, port: PortToken) -> Option<String>;

    fn usb_product(&self, port: PortToken) -> Option<String>;

    fn usb_serial(&self, port: PortToken) -> Option<String>;

    fn bluetooth_address(&self, port: PortToken) -> Option<String>;

    fn get_config(&self, port: PortToken, config: &mut PortConfig) -> i32;

    fn set_config(&self, port: PortToken, config: &PortConfig) -> i32;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms` (0 = forever).
    ///
    /// Returns the number of bytes read.
    fn blocking_read(&self, port: PortToken, buf: &mut [u8], timeout_ms: u32) -> i32;

    /// Read whatever is immediately available, up to `buf.len()` bytes.
    fn nonblocking_read(&self, port: PortToken, buf: &mut [u8]) -> i32;

    /// Write `buf`, waiting at most `timeout_ms` (0 = forever).
    ///
    /// Returns the number of bytes written, which may be short on timeout.
    fn blocking_write(&self, port: PortToken, buf: &[u8], timeout_ms: u32) -> i32;

    fn nonblocking_write(&self, port: PortToken, buf: &[u8]) -> i32;

    /// Bytes waiting in the input buffer, or a negative error code.
    fn input_waiting(&self, port: PortToken) -> i32;

    /// Bytes waiting in the output buffer, or a negative error code.
    fn output_waiting(&self, port: PortToken) -> i32;

    fn flush(&self, port: PortToken, buffers: ClearBuffers) -> i32;

    /// Block until all queued output has been transmitted.
    fn drain(&self, port: PortToken) -> i32;

    fn get_signals(&self, port: PortToken, signals: &mut Signals) -> i32;

    fn start_break(&self, port: PortToken) -> i32;

    fn end_break(&self, port: PortToken) -> i32;

    fn new_event_set(&self, set: &mut EventSetToken) -> i32;

    fn add_port_events(&self, set: EventSetToken, port: PortToken, mask: EventMask) -> i32;

    /// Block until one of the registered events fires or `timeout_ms` elapses.
    fn wait(&self, set: EventSetToken, timeout_ms: u32) -> i32;

    fn free_event_set(&self, set: EventSetToken);

    /// OS error code of the last failing call.
    fn last_error_code(&self) -> i32;

    /// Message of the last failing call. The returned string is owned by the caller.
    fn last_error_message(&self) -> String;
}

static DEFAULT_DRIVER: Lazy<Arc<SystemDriver>> = Lazy::new(|| Arc::new(SystemDriver::new()));

/// The process-wide driver backed by the host's serial ports.
pub fn default_driver() -> Arc<dyn SerialDriver> {
    DEFAULT_DRIVER.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_capabilities() {
        assert!(OpenMode::Read.can_read());
        assert!(!OpenMode::Read.can_write());
        assert!(OpenMode::Write.can_write());
        assert!(OpenMode::ReadWrite.can_read() && OpenMode::ReadWrite.can_write());
    }

    #[test]
    fn test_clear_buffers_conversion() {
        let both: serialport::ClearBuffer = ClearBuffers::Both.into();
        assert!(matches!(both, serialport::ClearBuffer::All));
    }

    #[test]
    fn test_default_driver_is_shared() {
        let a = default_driver();
        let b = default_driver();
        assert!(std::ptr::eq(
            Arc::as_ptr(&a) as *const u8,
            Arc::as_ptr(&b) as *const u8
        ));
    }
}
