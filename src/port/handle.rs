//! Port handle: the single owner of one driver-side port object.

use super::config::PortConfig;
use super::io::{read_with, write_with};
use crate::error::{ErrorRecord, Result, SerialError};
use crate::native::{
    self, call, ClearBuffers, OpenMode, PortToken, SerialDriver, Signals, Transport,
};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a serial device.
///
/// Each handle owns exactly one driver port object and frees it once, either
/// through [`SerialPort::dispose`] or when dropped. Duplicates are made with
/// [`SerialPort::copy`], which asks the driver for a second, independent port
/// object; the handle type itself is deliberately not `Clone`.
///
/// Equality and hashing compare the underlying port token.
///
/// # Example
/// ```no_run
/// use serial_bridge::native::OpenMode;
/// use serial_bridge::port::SerialPort;
///
/// let mut port = SerialPort::new("/dev/ttyUSB0")?;
/// port.open(OpenMode::ReadWrite)?;
/// port.set_config(&port.config()?.with_baud_rate(115200))?;
/// port.write(b"AT\r\n", Some(std::time::Duration::from_millis(500)))?;
/// # Ok::<(), serial_bridge::SerialError>(())
/// ```
pub struct SerialPort {
    driver: Arc<dyn SerialDriver>,
    token: PortToken,
    mode: Option<OpenMode>,
    disposed: bool,
}

impl SerialPort {
    /// Look up a port by system name using the process-wide driver.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_driver(native::default_driver(), name)
    }

    /// Look up a port by system name using the given driver.
    pub fn with_driver(driver: Arc<dyn SerialDriver>, name: &str) -> Result<Self> {
        let mut token: PortToken = 0;
        call(driver.as_ref(), || driver.get_port_by_name(name, &mut token))?;
        debug!(port = name, token, "port handle created");
        Ok(Self::from_token(driver, token))
    }

    fn from_token(driver: Arc<dyn SerialDriver>, token: PortToken) -> Self {
        Self {
            driver,
            token,
            mode: None,
            disposed: false,
        }
    }

    /// Names of every serial port on the system.
    pub fn available_ports() -> Result<Vec<String>> {
        Self::available_ports_with(native::default_driver().as_ref())
    }

    /// Names of every serial port the given driver can see.
    pub fn available_ports_with(driver: &dyn SerialDriver) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        call(driver, || driver.list_ports(&mut tokens))?;
        let names = tokens
            .iter()
            .filter_map(|&token| driver.port_name(token))
            .collect();
        driver.free_port_list(tokens);
        Ok(names)
    }

    /// Create an independent handle to the same device.
    ///
    /// The copy starts closed and must be disposed on its own.
    pub fn copy(&self) -> Result<Self> {
        let token = self.live()?;
        let mut copy: PortToken = 0;
        call(self.driver.as_ref(), || self.driver.copy_port(token, &mut copy))?;
        Ok(Self::from_token(Arc::clone(&self.driver), copy))
    }

    /// Release the driver port object.
    ///
    /// A second call returns [`SerialError::State`]; so does every other
    /// operation on a disposed handle.
    pub fn dispose(&mut self) -> Result<()> {
        let token = self.live()?;
        if self.mode.is_some() {
            warn!(token, "disposing a port handle that is still open");
        }
        self.driver.free_port(token);
        self.disposed = true;
        self.mode = None;
        debug!(token, "port handle disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// The driver token; safe to copy into another thread as a non-owning reference.
    pub fn token(&self) -> PortToken {
        self.token
    }

    pub fn driver(&self) -> &Arc<dyn SerialDriver> {
        &self.driver
    }

    pub(crate) fn live(&self) -> Result<PortToken> {
        if self.disposed {
            return Err(SerialError::state("port handle already disposed"));
        }
        Ok(self.token)
    }

    fn driver_call<F>(&self, op: F) -> Result<i32>
    where
        F: FnOnce(&dyn SerialDriver, PortToken) -> i32,
    {
        let token = self.live()?;
        let driver = self.driver.as_ref();
        call(driver, || op(driver, token))
    }

    fn driver_string<F>(&self, what: &str, op: F) -> Result<String>
    where
        F: FnOnce(&dyn SerialDriver, PortToken) -> Option<String>,
    {
        let token = self.live()?;
        op(self.driver.as_ref(), token).ok_or_else(|| SerialError::not_supported(what))
    }

    // ---- lifecycle ----

    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        self.driver_call(|d, t| d.open(t, mode))?;
        self.mode = Some(mode);
        debug!(token = self.token, ?mode, "port opened");
        Ok(())
    }

    pub fn open_read(&mut self) -> Result<()> {
        self.open(OpenMode::Read)
    }

    pub fn open_write(&mut self) -> Result<()> {
        self.open(OpenMode::Write)
    }

    pub fn open_read_write(&mut self) -> Result<()> {
        self.open(OpenMode::ReadWrite)
    }

    pub fn close(&mut self) -> Result<()> {
        self.driver_call(|d, t| d.close(t))?;
        self.mode = None;
        debug!(token = self.token, "port closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    /// Mode the handle was opened with, if open.
    pub fn mode(&self) -> Option<OpenMode> {
        self.mode
    }

    // ---- accessors ----

    pub fn name(&self) -> Result<String> {
        self.driver_string("port name", |d, t| d.port_name(t))
    }

    pub fn description(&self) -> Result<String> {
        self.driver_string("port description", |d, t| d.port_description(t))
    }

    pub fn transport(&self) -> Result<Transport> {
        let token = self.live()?;
        Ok(self.driver.port_transport(token))
    }

    /// USB bus number.
    pub fn bus_number(&self) -> Result<i32> {
        Ok(self.usb_bus_address()?.0)
    }

    /// USB device address on its bus.
    pub fn device_number(&self) -> Result<i32> {
        Ok(self.usb_bus_address()?.1)
    }

    fn usb_bus_address(&self) -> Result<(i32, i32)> {
        let (mut bus, mut address) = (0, 0);
        self.driver_call(|d, t| d.usb_bus_address(t, &mut bus, &mut address))?;
        Ok((bus, address))
    }

    pub fn vendor_id(&self) -> Result<u16> {
        Ok(self.usb_vid_pid()?.0)
    }

    pub fn product_id(&self) -> Result<u16> {
        Ok(self.usb_vid_pid()?.1)
    }

    fn usb_vid_pid(&self) -> Result<(u16, u16)> {
        let (mut vid, mut pid) = (0, 0);
        self.driver_call(|d, t| d.usb_vid_pid(t, &mut vid, &mut pid))?;
        Ok((vid as u16, pid as u16))
    }

    pub fn manufacturer(&self) -> Result<String> {
        self.driver_string("usb manufacturer", |d, t| d.usb_manufacturer(t))
    }

    pub fn product_name(&self) -> Result<String> {
        self.driver_string("usb product", |d, t| d.usb_product(t))
    }

    pub fn serial_number(&self) -> Result<String> {
        self.driver_string("usb serial number", |d, t| d.usb_serial(t))
    }

    /// Bluetooth MAC address.
    pub fn mac_address(&self) -> Result<String> {
        self.driver_string("bluetooth address", |d, t| d.bluetooth_address(t))
    }

    /// Snapshot of every attribute, with unsupported ones left empty.
    pub fn info(&self) -> Result<PortInfo> {
        fn optional<T>(value: Result<T>) -> Result<Option<T>> {
            match value {
                Ok(v) => Ok(Some(v)),
                Err(SerialError::NotSupported(_)) => Ok(None),
                Err(e) => Err(e),
            }
        }

        Ok(PortInfo {
            name: self.name()?,
            description: optional(self.description())?,
            transport: self.transport()?,
            usb_bus: optional(self.bus_number())?,
            usb_address: optional(self.device_number())?,
            vendor_id: optional(self.vendor_id())?,
            product_id: optional(self.product_id())?,
            manufacturer: optional(self.manufacturer())?,
            product: optional(self.product_name())?,
            serial_number: optional(self.serial_number())?,
            mac_address: optional(self.mac_address())?,
        })
    }

    // ---- configuration ----

    /// Read the current configuration from the device.
    pub fn config(&self) -> Result<PortConfig> {
        let mut config = PortConfig::default();
        self.driver_call(|d, t| d.get_config(t, &mut config))?;
        Ok(config)
    }

    /// Write a full configuration to the device.
    pub fn set_config(&self, config: &PortConfig) -> Result<()> {
        self.driver_call(|d, t| d.set_config(t, config))?;
        debug!(token = self.token, baud = config.baud_rate, "port configured");
        Ok(())
    }

    // ---- I/O ----

    /// Read up to `bytes` bytes.
    ///
    /// `None` returns immediately with whatever is buffered. `Some(timeout)`
    /// blocks until `bytes` bytes arrive or the timeout passes; a zero
    /// timeout waits indefinitely. A blocking read cannot be cancelled once
    /// issued. Reading here while a background reader polls the same port is
    /// driver-dependent and left to the caller to avoid.
    pub fn read(&self, bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let token = self.live()?;
        read_with(self.driver.as_ref(), token, bytes, timeout)
    }

    /// Write `data`, returning how many bytes the driver accepted.
    ///
    /// Timeout semantics match [`SerialPort::read`]. A short count is not an
    /// error.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let token = self.live()?;
        write_with(self.driver.as_ref(), token, data, timeout)
    }

    pub fn input_waiting(&self) -> Result<usize> {
        Ok(self.driver_call(|d, t| d.input_waiting(t))? as usize)
    }

    pub fn output_waiting(&self) -> Result<usize> {
        Ok(self.driver_call(|d, t| d.output_waiting(t))? as usize)
    }

    /// Discard buffered data.
    pub fn flush(&self, buffers: ClearBuffers) -> Result<()> {
        self.driver_call(|d, t| d.flush(t, buffers)).map(drop)
    }

    /// Wait until all queued output has been sent.
    pub fn drain(&self) -> Result<()> {
        self.driver_call(|d, t| d.drain(t)).map(drop)
    }

    pub fn signals(&self) -> Result<Signals> {
        let mut signals = Signals::empty();
        self.driver_call(|d, t| d.get_signals(t, &mut signals))?;
        Ok(signals)
    }

    pub fn start_break(&self) -> Result<()> {
        self.driver_call(|d, t| d.start_break(t)).map(drop)
    }

    pub fn end_break(&self) -> Result<()> {
        self.driver_call(|d, t| d.end_break(t)).map(drop)
    }

    // ---- process-wide error state ----

    /// Last error code reported by the process-wide driver on this thread.
    pub fn last_error_code() -> i32 {
        native::default_driver().last_error_code()
    }

    /// Last error message reported by the process-wide driver on this thread.
    pub fn last_error_message() -> String {
        native::default_driver().last_error_message()
    }

    /// Both halves of the process-wide driver's last error.
    pub fn last_error() -> ErrorRecord {
        native::last_error(native::default_driver().as_ref())
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        if !self.disposed {
            self.driver.free_port(self.token);
            self.disposed = true;
        }
    }
}

impl PartialEq for SerialPort {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for SerialPort {}

impl Hash for SerialPort {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("token", &format_args!("{:#x}", self.token))
            .field("mode", &self.mode)
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Everything a port reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub transport: Transport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_bus: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_address: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}
