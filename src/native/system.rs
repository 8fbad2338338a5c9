//! Driver backed by the host's serial ports through the `serialport` crate.
//!
//! Port objects live in a handle table keyed by [`PortToken`]. Each entry has
//! its own lock, so a long blocking read on one port never stalls calls on
//! another. The table lock itself is only held long enough to clone an entry
//! out.
//!
//! Last-error state is kept per calling thread, the same way `errno` is.

use super::{
    ClearBuffers, EventMask, EventSetToken, OpenMode, PortToken, SerialDriver, Signals, Transport,
    SP_ERR_ARG, SP_ERR_FAIL, SP_ERR_SUPP, SP_OK,
};
use crate::error::ErrorRecord;
use crate::port::{Cts, Dsr, Dtr, PortConfig, Rts, XonXoff};
use parking_lot::Mutex;
use serialport::{SerialPort as _, SerialPortInfo, SerialPortType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[cfg(unix)]
type NativePort = serialport::TTYPort;

#[cfg(windows)]
type NativePort = serialport::COMPort;

/// Read/write slice used when the caller asked to wait forever.
const FOREVER_SLICE: Duration = Duration::from_secs(1);

/// Poll granularity for platforms without a readiness primitive.
#[cfg(not(unix))]
const POLL_SLICE: Duration = Duration::from_millis(10);

thread_local! {
    static LAST_ERROR: RefCell<ErrorRecord> = RefCell::new(ErrorRecord::new(0, "No error"));
}

fn set_last_error(code: i32, message: impl Into<String>) {
    let record = ErrorRecord::new(code, message);
    trace!(code = record.code, message = %record.message, "driver error recorded");
    LAST_ERROR.with(|last| *last.borrow_mut() = record);
}

fn fail(status: i32, code: i32, message: impl Into<String>) -> i32 {
    set_last_error(code, message);
    status
}

fn fail_io(err: &std::io::Error) -> i32 {
    fail(SP_ERR_FAIL, err.raw_os_error().unwrap_or(5), err.to_string())
}

fn fail_serial(err: &serialport::Error) -> i32 {
    let code = match err.kind() {
        serialport::ErrorKind::NoDevice => 19,
        serialport::ErrorKind::InvalidInput => 22,
        serialport::ErrorKind::Io(_) => 5,
        _ => 0,
    };
    let status = match err.kind() {
        serialport::ErrorKind::InvalidInput => SP_ERR_ARG,
        _ => SP_ERR_FAIL,
    };
    fail(status, code, err.description.clone())
}

fn clamp_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// One port object in the handle table.
struct PortEntry {
    name: String,
    info: Option<SerialPortInfo>,
    device: Option<NativePort>,
    config: PortConfig,
}

impl PortEntry {
    fn usb(&self) -> Option<&serialport::UsbPortInfo> {
        match self.info.as_ref().map(|info| &info.port_type) {
            Some(SerialPortType::UsbPort(usb)) => Some(usb),
            _ => None,
        }
    }

    fn open_device(&mut self) -> Result<&mut NativePort, i32> {
        self.device
            .as_mut()
            .ok_or_else(|| fail(SP_ERR_ARG, 9, "Port not open"))
    }
}

/// [`SerialDriver`] over the operating system's serial ports.
pub struct SystemDriver {
    ports: Mutex<HashMap<PortToken, Arc<Mutex<PortEntry>>>>,
    event_sets: Mutex<HashMap<EventSetToken, Vec<(PortToken, EventMask)>>>,
    next_token: AtomicUsize,
}

impl Default for SystemDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemDriver {
    pub fn new() -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
            event_sets: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
        }
    }

    fn issue_token(&self) -> PortToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, entry: PortEntry) -> PortToken {
        let token = self.issue_token();
        self.ports.lock().insert(token, Arc::new(Mutex::new(entry)));
        token
    }

    fn entry(&self, port: PortToken) -> Result<Arc<Mutex<PortEntry>>, i32> {
        self.ports
            .lock()
            .get(&port)
            .cloned()
            .ok_or_else(|| fail(SP_ERR_ARG, 9, "Bad port handle"))
    }

    /// Run `f` against the open device behind `port`.
    fn with_open<F>(&self, port: PortToken, f: F) -> i32
    where
        F: FnOnce(&mut NativePort) -> i32,
    {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let mut entry = entry.lock();
        match entry.open_device() {
            Ok(device) => f(device),
            Err(status) => status,
        }
    }

    /// Run `f` against the port entry, open or not.
    fn with_entry<T, F>(&self, port: PortToken, f: F) -> Option<T>
    where
        F: FnOnce(&PortEntry) -> Option<T>,
    {
        let entry = self.entry(port).ok()?;
        let entry = entry.lock();
        f(&*entry)
    }
}

fn lookup_info(name: &str) -> Option<SerialPortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().find(|info| info.port_name == name),
        Err(e) => {
            warn!(error = %e, "port enumeration failed");
            None
        }
    }
}

fn apply_config(device: &mut NativePort, config: &PortConfig) -> Result<(), serialport::Error> {
    device.set_baud_rate(config.baud_rate)?;
    device.set_data_bits(config.data_bits.into())?;
    device.set_parity(config.parity.into())?;
    device.set_stop_bits(config.stop_bits.into())?;
    device.set_flow_control(config.flow_control().into())?;
    match config.rts {
        Rts::On => device.write_request_to_send(true)?,
        Rts::Off => device.write_request_to_send(false)?,
        Rts::FlowControl => {}
    }
    match config.dtr {
        Dtr::On => device.write_data_terminal_ready(true)?,
        Dtr::Off => device.write_data_terminal_ready(false)?,
        Dtr::FlowControl => {}
    }
    Ok(())
}

fn read_config(device: &NativePort, stored: &PortConfig) -> Result<PortConfig, serialport::Error> {
    let mut config = PortConfig {
        baud_rate: device.baud_rate()?,
        data_bits: device.data_bits()?.into(),
        parity: device.parity()?.into(),
        stop_bits: device.stop_bits()?.into(),
        ..*stored
    };
    // serialport reports the coarse mode only; fold it back into the line settings.
    match device.flow_control()? {
        serialport::FlowControl::Hardware => {
            config.rts = Rts::FlowControl;
            config.cts = Cts::FlowControl;
            config.xon_xoff = XonXoff::Disabled;
        }
        serialport::FlowControl::Software => {
            config.xon_xoff = XonXoff::InOut;
        }
        serialport::FlowControl::None => {
            if config.rts == Rts::FlowControl {
                config.rts = Rts::On;
            }
            config.cts = Cts::Ignore;
            if config.dsr == Dsr::FlowControl && config.dtr != Dtr::FlowControl {
                config.dsr = Dsr::Ignore;
            }
            if config.xon_xoff != XonXoff::Disabled {
                config.xon_xoff = XonXoff::Disabled;
            }
        }
    }
    Ok(config)
}

impl SerialDriver for SystemDriver {
    fn get_port_by_name(&self, name: &str, port: &mut PortToken) -> i32 {
        let info = lookup_info(name);

        #[cfg(unix)]
        if info.is_none() && !std::path::Path::new(name).exists() {
            return fail(SP_ERR_ARG, 2, format!("No such port: {name}"));
        }
        #[cfg(not(unix))]
        if info.is_none() {
            return fail(SP_ERR_ARG, 2, format!("No such port: {name}"));
        }

        *port = self.insert(PortEntry {
            name: name.to_string(),
            info,
            device: None,
            config: PortConfig::default(),
        });
        debug!(port = name, token = *port, "port object created");
        SP_OK
    }

    fn copy_port(&self, port: PortToken, copy: &mut PortToken) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let (name, info, config) = {
            let entry = entry.lock();
            (entry.name.clone(), entry.info.clone(), entry.config)
        };
        *copy = self.insert(PortEntry {
            name,
            info,
            device: None,
            config,
        });
        SP_OK
    }

    fn list_ports(&self, ports: &mut Vec<PortToken>) -> i32 {
        let infos = match serialport::available_ports() {
            Ok(infos) => infos,
            Err(e) => return fail_serial(&e),
        };
        for info in infos {
            ports.push(self.insert(PortEntry {
                name: info.port_name.clone(),
                info: Some(info),
                device: None,
                config: PortConfig::default(),
            }));
        }
        SP_OK
    }

    fn free_port_list(&self, ports: Vec<PortToken>) {
        for port in ports {
            self.free_port(port);
        }
    }

    fn free_port(&self, port: PortToken) {
        if self.ports.lock().remove(&port).is_some() {
            trace!(token = port, "port object freed");
        }
    }

    fn open(&self, port: PortToken, mode: OpenMode) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let mut entry = entry.lock();
        if entry.device.is_some() {
            return fail(SP_ERR_ARG, 16, "Port already open");
        }

        let config = entry.config;
        let opened = serialport::new(entry.name.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control().into())
            .timeout(FOREVER_SLICE)
            .open_native();

        match opened {
            Ok(device) => {
                debug!(port = %entry.name, ?mode, "port opened");
                entry.device = Some(device);
                SP_OK
            }
            Err(e) => fail_serial(&e),
        }
    }

    fn close(&self, port: PortToken) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let mut entry = entry.lock();
        match entry.device.take() {
            Some(device) => {
                drop(device);
                debug!(port = %entry.name, "port closed");
                SP_OK
            }
            None => fail(SP_ERR_ARG, 9, "Port not open"),
        }
    }

    fn port_name(&self, port: PortToken) -> Option<String> {
        self.with_entry(port, |entry| Some(entry.name.clone()))
    }

    fn port_description(&self, port: PortToken) -> Option<String> {
        self.with_entry(port, |entry| {
            entry
                .usb()
                .and_then(|usb| usb.product.clone())
                .or_else(|| Some(entry.name.clone()))
        })
    }

    fn port_transport(&self, port: PortToken) -> Transport {
        self.with_entry(port, |entry| {
            entry.info.as_ref().map(|info| match info.port_type {
                SerialPortType::UsbPort(_) => Transport::Usb,
                SerialPortType::BluetoothPort => Transport::Bluetooth,
                SerialPortType::PciPort | SerialPortType::Unknown => Transport::Native,
            })
        })
        .unwrap_or(Transport::Native)
    }

    fn usb_bus_address(&self, port: PortToken, _bus: &mut i32, _address: &mut i32) -> i32 {
        if let Err(status) = self.entry(port) {
            return status;
        }
        fail(SP_ERR_SUPP, 0, "USB bus address is not reported on this platform")
    }

    fn usb_vid_pid(&self, port: PortToken, vid: &mut i32, pid: &mut i32) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let entry = entry.lock();
        match entry.usb() {
            Some(usb) => {
                *vid = i32::from(usb.vid);
                *pid = i32::from(usb.pid);
                SP_OK
            }
            None => fail(SP_ERR_SUPP, 0, "Port does not use USB transport"),
        }
    }

    fn usb_manufacturer(&self, port: PortToken) -> Option<String> {
        self.with_entry(port, |entry| entry.usb()?.manufacturer.clone())
    }

    fn usb_product(&self, port: PortToken) -> Option<String> {
        self.with_entry(port, |entry| entry.usb()?.product.clone())
    }

    fn usb_serial(&self, port: PortToken) -> Option<String> {
        self.with_entry(port, |entry| entry.usb()?.serial_number.clone())
    }

    fn bluetooth_address(&self, _port: PortToken) -> Option<String> {
        None
    }

    fn get_config(&self, port: PortToken, config: &mut PortConfig) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let mut entry = entry.lock();
        let stored = entry.config;
        let device = match entry.open_device() {
            Ok(device) => device,
            Err(status) => return status,
        };
        match read_config(device, &stored) {
            Ok(current) => {
                *config = current;
                SP_OK
            }
            Err(e) => fail_serial(&e),
        }
    }

    fn set_config(&self, port: PortToken, config: &PortConfig) -> i32 {
        let entry = match self.entry(port) {
            Ok(entry) => entry,
            Err(status) => return status,
        };
        let mut entry = entry.lock();
        let device = match entry.open_device() {
            Ok(device) => device,
            Err(status) => return status,
        };
        if let Err(e) = apply_config(device, config) {
            return fail_serial(&e);
        }
        entry.config = *config;
        SP_OK
    }

    fn blocking_read(&self, port: PortToken, buf: &mut [u8], timeout_ms: u32) -> i32 {
        self.with_open(port, |device| {
            let deadline = (timeout_ms > 0)
                .then(|| Instant::now() + Duration::from_millis(u64::from(timeout_ms)));
            let mut filled = 0;
            while filled < buf.len() {
                let slice = match deadline {
                    Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                        Some(left) if !left.is_zero() => left,
                        _ => break,
                    },
                    None => FOREVER_SLICE,
                };
                if let Err(e) = device.set_timeout(slice) {
                    return fail_serial(&e);
                }
                match device.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return fail_io(&e),
                }
            }
            clamp_len(filled)
        })
    }

    fn nonblocking_read(&self, port: PortToken, buf: &mut [u8]) -> i32 {
        self.with_open(port, |device| {
            let available = match device.bytes_to_read() {
                Ok(n) => n as usize,
                Err(e) => return fail_serial(&e),
            };
            let n = available.min(buf.len());
            if n == 0 {
                return 0;
            }
            if let Err(e) = device.set_timeout(Duration::ZERO) {
                return fail_serial(&e);
            }
            match device.read(&mut buf[..n]) {
                Ok(read) => clamp_len(read),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => fail_io(&e),
            }
        })
    }

    fn blocking_write(&self, port: PortToken, buf: &[u8], timeout_ms: u32) -> i32 {
        self.with_open(port, |device| {
            let deadline = (timeout_ms > 0)
                .then(|| Instant::now() + Duration::from_millis(u64::from(timeout_ms)));
            let mut written = 0;
            while written < buf.len() {
                let slice = match deadline {
                    Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                        Some(left) if !left.is_zero() => left,
                        _ => break,
                    },
                    None => FOREVER_SLICE,
                };
                if let Err(e) = device.set_timeout(slice) {
                    return fail_serial(&e);
                }
                match device.write(&buf[written..]) {
                    Ok(n) => written += n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return fail_io(&e),
                }
            }
            clamp_len(written)
        })
    }

    fn nonblocking_write(&self, port: PortToken, buf: &[u8]) -> i32 {
        self.with_open(port, |device| {
            if let Err(e) = device.set_timeout(Duration::ZERO) {
                return fail_serial(&e);
            }
            match device.write(buf) {
                Ok(n) => clamp_len(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    0
                }
                Err(e) => fail_io(&e),
            }
        })
    }

    fn input_waiting(&self, port: PortToken) -> i32 {
        self.with_open(port, |device| match device.bytes_to_read() {
            Ok(n) => clamp_len(n as usize),
            Err(e) => fail_serial(&e),
        })
    }

    fn output_waiting(&self, port: PortToken) -> i32 {
        self.with_open(port, |device| match device.bytes_to_write() {
            Ok(n) => clamp_len(n as usize),
            Err(e) => fail_serial(&e),
        })
    }

    fn flush(&self, port: PortToken, buffers: ClearBuffers) -> i32 {
        self.with_open(port, |device| match device.clear(buffers.into()) {
            Ok(()) => SP_OK,
            Err(e) => fail_serial(&e),
        })
    }

    fn drain(&self, port: PortToken) -> i32 {
        self.with_open(port, |device| match device.flush() {
            Ok(()) => SP_OK,
            Err(e) => fail_io(&e),
        })
    }

    fn get_signals(&self, port: PortToken, signals: &mut Signals) -> i32 {
        self.with_open(port, |device| {
            let lines = [
                (Signals::CTS, device.read_clear_to_send()),
                (Signals::DSR, device.read_data_set_ready()),
                (Signals::DCD, device.read_carrier_detect()),
                (Signals::RI, device.read_ring_indicator()),
            ];
            let mut current = Signals::empty();
            for (flag, state) in lines {
                match state {
                    Ok(true) => current |= flag,
                    Ok(false) => {}
                    Err(e) => return fail_serial(&e),
                }
            }
            *signals = current;
            SP_OK
        })
    }

    fn start_break(&self, port: PortToken) -> i32 {
        self.with_open(port, |device| match device.set_break() {
            Ok(()) => SP_OK,
            Err(e) => fail_serial(&e),
        })
    }

    fn end_break(&self, port: PortToken) -> i32 {
        self.with_open(port, |device| match device.clear_break() {
            Ok(()) => SP_OK,
            Err(e) => fail_serial(&e),
        })
    }

    fn new_event_set(&self, set: &mut EventSetToken) -> i32 {
        let token = self.issue_token();
        self.event_sets.lock().insert(token, Vec::new());
        *set = token;
        SP_OK
    }

    fn add_port_events(&self, set: EventSetToken, port: PortToken, mask: EventMask) -> i32 {
        if let Err(status) = self.entry(port) {
            return status;
        }
        match self.event_sets.lock().get_mut(&set) {
            Some(entries) => {
                entries.push((port, mask));
                SP_OK
            }
            None => fail(SP_ERR_ARG, 9, "Bad event set"),
        }
    }

    #[cfg(unix)]
    fn wait(&self, set: EventSetToken, timeout_ms: u32) -> i32 {
        use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

        let Some(entries) = self.event_sets.lock().get(&set).cloned() else {
            return fail(SP_ERR_ARG, 9, "Bad event set");
        };

        // Poll duplicates: a port closed mid-wait must not leave a raw
        // descriptor number that the OS may hand out again.
        let mut owned: Vec<OwnedFd> = Vec::with_capacity(entries.len());
        let mut fds = Vec::with_capacity(entries.len());
        for (port, mask) in entries {
            let Ok(entry) = self.entry(port) else { continue };
            let entry = entry.lock();
            let Some(device) = entry.device.as_ref() else { continue };
            // SAFETY: the entry lock keeps the device, and so its descriptor, open.
            let borrowed = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
            let fd = match borrowed.try_clone_to_owned() {
                Ok(fd) => fd,
                Err(e) => return fail_io(&e),
            };
            let mut events: libc::c_short = 0;
            if mask.contains(EventMask::RX_READY) {
                events |= libc::POLLIN;
            }
            if mask.contains(EventMask::TX_READY) {
                events |= libc::POLLOUT;
            }
            if mask.contains(EventMask::ERROR) {
                events |= libc::POLLERR | libc::POLLHUP;
            }
            fds.push(libc::pollfd {
                fd: fd.as_raw_fd(),
                events,
                revents: 0,
            });
            owned.push(fd);
        }

        let timeout = if timeout_ms == 0 {
            -1
        } else {
            libc::c_int::try_from(timeout_ms).unwrap_or(libc::c_int::MAX)
        };

        // SAFETY: `fds` is a live, correctly sized array of pollfd for the
        // duration of the call; poll only writes the `revents` fields.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        drop(owned);
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return SP_OK;
            }
            return fail_io(&err);
        }
        SP_OK
    }

    #[cfg(not(unix))]
    fn wait(&self, set: EventSetToken, timeout_ms: u32) -> i32 {
        let Some(entries) = self.event_sets.lock().get(&set).cloned() else {
            return fail(SP_ERR_ARG, 9, "Bad event set");
        };
        let deadline = (timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(u64::from(timeout_ms)));

        loop {
            for (port, mask) in &entries {
                if !mask.contains(EventMask::RX_READY) {
                    continue;
                }
                let Ok(entry) = self.entry(*port) else { continue };
                let entry = entry.lock();
                match entry.device.as_ref().map(|device| device.bytes_to_read()) {
                    Some(Ok(n)) if n > 0 => return SP_OK,
                    Some(Err(_)) if mask.contains(EventMask::ERROR) => return SP_OK,
                    _ => {}
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return SP_OK;
            }
            std::thread::sleep(POLL_SLICE);
        }
    }

    fn free_event_set(&self, set: EventSetToken) {
        self.event_sets.lock().remove(&set);
    }

    fn last_error_code(&self) -> i32 {
        LAST_ERROR.with(|last| last.borrow().code)
    }

    fn last_error_message(&self) -> String {
        LAST_ERROR.with(|last| last.borrow().message.clone())
    }
}

impl std::fmt::Debug for SystemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDriver")
            .field("ports", &self.ports.lock().len())
            .field("event_sets", &self.event_sets.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_error() {
        let driver = SystemDriver::new();
        let mut token = 0;
        let status = driver.get_port_by_name("/dev/nonexistent_port_12345", &mut token);

        assert_eq!(status, SP_ERR_ARG);
        assert_eq!(driver.last_error_code(), 2);
        assert!(driver.last_error_message().contains("nonexistent"));
    }

    #[test]
    fn test_bad_handle_is_rejected() {
        let driver = SystemDriver::new();
        assert_eq!(driver.open(9999, OpenMode::Read), SP_ERR_ARG);
        assert_eq!(driver.input_waiting(9999), SP_ERR_ARG);
        assert_eq!(driver.last_error_message(), "Bad port handle");
    }

    #[test]
    fn test_event_set_lifecycle() {
        let driver = SystemDriver::new();
        let mut set = 0;
        assert_eq!(driver.new_event_set(&mut set), SP_OK);
        // No ports registered: the wait simply times out.
        assert_eq!(driver.wait(set, 1), SP_OK);
        driver.free_event_set(set);
        assert_eq!(driver.wait(set, 1), SP_ERR_ARG);
    }

    #[test]
    fn test_last_error_is_per_thread() {
        let driver = Arc::new(SystemDriver::new());
        assert_eq!(driver.open(4242, OpenMode::Read), SP_ERR_ARG);

        let other = Arc::clone(&driver);
        let code = std::thread::spawn(move || other.last_error_code())
            .join()
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(driver.last_error_code(), 9);
    }
}
