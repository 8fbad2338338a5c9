//! Scriptable in-memory driver for tests and demos.
//!
//! `MockDriver` simulates a set of named devices without any hardware. You
//! can queue bytes to be read, script what `input_waiting` reports from one
//! poll to the next, cap how many bytes a write accepts, inject one-shot
//! failures for any call, and afterwards inspect what was written, how often
//! each port object was freed and whether event sets were released.
//!
//! # Example
//! ```
//! use serial_bridge::native::{MockDevice, MockDriver, OpenMode};
//! use serial_bridge::port::SerialPort;
//! use std::sync::Arc;
//!
//! let driver = Arc::new(MockDriver::new());
//! driver.add_device(MockDevice::new("MOCK0"));
//! driver.enqueue_read("MOCK0", b"Hello");
//!
//! let mut port = SerialPort::with_driver(driver.clone(), "MOCK0")?;
//! port.open(OpenMode::ReadWrite)?;
//! assert_eq!(port.read(5, None)?, b"Hello");
//! assert_eq!(port.write(b"Response", None)?, 8);
//! assert_eq!(driver.write_log("MOCK0"), vec![b"Response".to_vec()]);
//! # Ok::<(), serial_bridge::SerialError>(())
//! ```

use super::{
    ClearBuffers, EventMask, EventSetToken, OpenMode, PortToken, SerialDriver, Signals, Transport,
    SP_ERR_ARG, SP_ERR_FAIL, SP_ERR_SUPP, SP_OK,
};
use crate::error::ErrorRecord;
use crate::port::PortConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Upper bound on how long an idle `wait` sleeps, so polling loops stay responsive.
const IDLE_WAIT_SLICE: Duration = Duration::from_millis(5);

/// Description of one simulated device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    name: String,
    description: Option<String>,
    transport: Transport,
    usb_bus_address: Option<(i32, i32)>,
    usb_vid_pid: Option<(i32, i32)>,
    manufacturer: Option<String>,
    product: Option<String>,
    serial_number: Option<String>,
    bluetooth_address: Option<String>,
    config: PortConfig,
    signals: Signals,
}

impl MockDevice {
    /// A native (non-USB) device with the given system name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: Some(format!("Mock serial port {name}")),
            name,
            transport: Transport::Native,
            usb_bus_address: None,
            usb_vid_pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
            bluetooth_address: None,
            config: PortConfig::default(),
            signals: Signals::empty(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Make this a USB device with the given IDs and bus location.
    pub fn usb(mut self, vid: u16, pid: u16, bus: i32, address: i32) -> Self {
        self.transport = Transport::Usb;
        self.usb_vid_pid = Some((i32::from(vid), i32::from(pid)));
        self.usb_bus_address = Some((bus, address));
        self
    }

    pub fn usb_strings(
        mut self,
        manufacturer: impl Into<String>,
        product: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.product = Some(product.into());
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Make this a Bluetooth device with the given MAC address.
    pub fn bluetooth(mut self, address: impl Into<String>) -> Self {
        self.transport = Transport::Bluetooth;
        self.bluetooth_address = Some(address.into());
        self
    }

    pub fn config(mut self, config: PortConfig) -> Self {
        self.config = config;
        self
    }

    pub fn signals(mut self, signals: Signals) -> Self {
        self.signals = signals;
        self
    }
}

/// Runtime state of one simulated device.
#[derive(Debug)]
struct DeviceState {
    profile: MockDevice,
    read_queue: VecDeque<u8>,
    input_script: VecDeque<i32>,
    write_limit: Option<usize>,
    write_log: Vec<Vec<u8>>,
    flushes: Vec<ClearBuffers>,
    drains: usize,
    in_break: bool,
}

/// A port object handed out by the driver.
#[derive(Debug)]
struct PortObject {
    device: String,
    mode: Option<OpenMode>,
}

#[derive(Debug, Default)]
struct MockState {
    devices: HashMap<String, DeviceState>,
    ports: HashMap<PortToken, PortObject>,
    next_token: PortToken,
    frees: HashMap<PortToken, usize>,
    event_sets: HashMap<EventSetToken, Vec<(PortToken, EventMask)>>,
    next_event_set: EventSetToken,
    event_sets_created: usize,
    event_sets_released: usize,
    waits: usize,
    failures: HashMap<String, VecDeque<(i32, ErrorRecord)>>,
    /// Last failure per calling thread, like the system driver's errno.
    last_errors: HashMap<ThreadId, ErrorRecord>,
}

impl MockState {
    fn fail(&mut self, status: i32, code: i32, message: impl Into<String>) -> i32 {
        self.record_error(ErrorRecord::new(code, message));
        status
    }

    fn injected(&mut self, op: &str) -> Option<i32> {
        let (status, record) = self.failures.get_mut(op)?.pop_front()?;
        self.record_error(record);
        Some(status)
    }

    fn record_error(&mut self, record: ErrorRecord) {
        self.last_errors.insert(thread::current().id(), record);
    }

    fn last_error(&self) -> Option<&ErrorRecord> {
        self.last_errors.get(&thread::current().id())
    }

    fn issue_token(&mut self) -> PortToken {
        // Spaced like heap addresses so tokens never look like small integers.
        self.next_token += 0x40;
        0x1000 + self.next_token
    }

    fn device_of(&mut self, port: PortToken) -> Result<&mut DeviceState, i32> {
        let Some(name) = self.ports.get(&port).map(|object| object.device.clone()) else {
            return Err(self.fail(SP_ERR_ARG, 9, "Bad port handle"));
        };
        if !self.devices.contains_key(&name) {
            return Err(self.fail(SP_ERR_FAIL, 19, "No such device"));
        }
        self.devices.get_mut(&name).ok_or(SP_ERR_FAIL)
    }

    fn open_device(&mut self, port: PortToken) -> Result<&mut DeviceState, i32> {
        match self.ports.get(&port).map(|object| object.mode.is_some()) {
            None => Err(self.fail(SP_ERR_ARG, 9, "Bad port handle")),
            Some(false) => Err(self.fail(SP_ERR_ARG, 9, "Port not open")),
            Some(true) => self.device_of(port),
        }
    }
}

/// In-memory [`SerialDriver`] with scripted behaviour and call recording.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device that `get_port_by_name` and `list_ports` can find.
    pub fn add_device(&self, device: MockDevice) {
        let mut state = self.state.lock();
        state.devices.insert(
            device.name.clone(),
            DeviceState {
                profile: device,
                read_queue: VecDeque::new(),
                input_script: VecDeque::new(),
                write_limit: None,
                write_log: Vec::new(),
                flushes: Vec::new(),
                drains: 0,
                in_break: false,
            },
        );
    }

    /// Simulate the device disappearing; calls on existing handles start failing.
    pub fn remove_device(&self, name: &str) {
        self.state.lock().devices.remove(name);
    }

    /// Append bytes to the device's receive buffer.
    pub fn enqueue_read(&self, device: &str, data: &[u8]) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.read_queue.extend(data);
        }
    }

    /// Script successive `input_waiting` results.
    ///
    /// Each poll consumes one entry; negative entries are reported as
    /// failures with `SP_ERR_FAIL`'s last-error record. Once the script runs
    /// out the real receive buffer length is reported.
    pub fn script_input_waiting(&self, device: &str, script: impl IntoIterator<Item = i32>) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.input_script.extend(script);
        }
    }

    /// Cap how many bytes each write reports as written.
    pub fn set_write_limit(&self, device: &str, limit: Option<usize>) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.write_limit = limit;
        }
    }

    /// Make the next call to `op` (e.g. `"open"`, `"usb_vid_pid"`) fail.
    pub fn fail_next(&self, op: &str, status: i32, code: i32, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back((status, ErrorRecord::new(code, message)));
    }

    /// Every buffer handed to a write call, as the driver saw it.
    pub fn write_log(&self, device: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .devices
            .get(device)
            .map(|dev| dev.write_log.clone())
            .unwrap_or_default()
    }

    pub fn flushes(&self, device: &str) -> Vec<ClearBuffers> {
        self.state
            .lock()
            .devices
            .get(device)
            .map(|dev| dev.flushes.clone())
            .unwrap_or_default()
    }

    pub fn drains(&self, device: &str) -> usize {
        self.state
            .lock()
            .devices
            .get(device)
            .map_or(0, |dev| dev.drains)
    }

    pub fn in_break(&self, device: &str) -> bool {
        self.state
            .lock()
            .devices
            .get(device)
            .is_some_and(|dev| dev.in_break)
    }

    /// Bytes still sitting in the device's receive buffer.
    pub fn pending_read(&self, device: &str) -> usize {
        self.state
            .lock()
            .devices
            .get(device)
            .map_or(0, |dev| dev.read_queue.len())
    }

    /// How many times `free_port` was called for this token.
    pub fn free_count(&self, port: PortToken) -> usize {
        self.state.lock().frees.get(&port).copied().unwrap_or(0)
    }

    /// Port objects handed out and not yet freed.
    pub fn live_ports(&self) -> usize {
        self.state.lock().ports.len()
    }

    pub fn is_open(&self, port: PortToken) -> bool {
        self.state
            .lock()
            .ports
            .get(&port)
            .is_some_and(|object| object.mode.is_some())
    }

    /// `(created, released)` event set counts.
    pub fn event_set_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.event_sets_created, state.event_sets_released)
    }

    /// Number of `wait` calls so far.
    pub fn wait_count(&self) -> usize {
        self.state.lock().waits
    }
}

/// Run `$body` on the open device behind `$port`, or return its failure status.
macro_rules! with_open_device {
    ($self:ident, $op:literal, $port:expr, |$dev:ident| $body:expr) => {{
        let mut state = $self.state.lock();
        if let Some(status) = state.injected($op) {
            return status;
        }
        match state.open_device($port) {
            Ok($dev) => $body,
            Err(status) => status,
        }
    }};
}

fn clamp_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl SerialDriver for MockDriver {
    fn get_port_by_name(&self, name: &str, port: &mut PortToken) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("get_port_by_name") {
            return status;
        }
        if !state.devices.contains_key(name) {
            return state.fail(SP_ERR_ARG, 2, "No such file or directory");
        }
        let token = state.issue_token();
        state.ports.insert(
            token,
            PortObject {
                device: name.to_string(),
                mode: None,
            },
        );
        *port = token;
        SP_OK
    }

    fn copy_port(&self, port: PortToken, copy: &mut PortToken) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("copy_port") {
            return status;
        }
        let Some(device) = state.ports.get(&port).map(|object| object.device.clone()) else {
            return state.fail(SP_ERR_ARG, 9, "Bad port handle");
        };
        let token = state.issue_token();
        state.ports.insert(token, PortObject { device, mode: None });
        *copy = token;
        SP_OK
    }

    fn list_ports(&self, ports: &mut Vec<PortToken>) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("list_ports") {
            return status;
        }
        let mut names: Vec<String> = state.devices.keys().cloned().collect();
        names.sort();
        for device in names {
            let token = state.issue_token();
            state.ports.insert(token, PortObject { device, mode: None });
            ports.push(token);
        }
        SP_OK
    }

    fn free_port_list(&self, ports: Vec<PortToken>) {
        for port in ports {
            self.free_port(port);
        }
    }

    fn free_port(&self, port: PortToken) {
        let mut state = self.state.lock();
        *state.frees.entry(port).or_default() += 1;
        state.ports.remove(&port);
    }

    fn open(&self, port: PortToken, mode: OpenMode) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("open") {
            return status;
        }
        if let Err(status) = state.device_of(port) {
            return status;
        }
        match state.ports.get_mut(&port) {
            None => state.fail(SP_ERR_ARG, 9, "Bad port handle"),
            Some(object) if object.mode.is_none() => {
                object.mode = Some(mode);
                SP_OK
            }
            Some(_) => state.fail(SP_ERR_ARG, 16, "Port already open"),
        }
    }

    fn close(&self, port: PortToken) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("close") {
            return status;
        }
        match state.ports.get(&port).map(|object| object.mode.is_some()) {
            None => state.fail(SP_ERR_ARG, 9, "Bad port handle"),
            Some(false) => state.fail(SP_ERR_ARG, 9, "Port not open"),
            Some(true) => {
                if let Some(object) = state.ports.get_mut(&port) {
                    object.mode = None;
                }
                SP_OK
            }
        }
    }

    fn port_name(&self, port: PortToken) -> Option<String> {
        let state = self.state.lock();
        state.ports.get(&port).map(|object| object.device.clone())
    }

    fn port_description(&self, port: PortToken) -> Option<String> {
        let state = self.state.lock();
        let object = state.ports.get(&port)?;
        state.devices.get(&object.device)?.profile.description.clone()
    }

    fn port_transport(&self, port: PortToken) -> Transport {
        let state = self.state.lock();
        state
            .ports
            .get(&port)
            .and_then(|object| state.devices.get(&object.device))
            .map_or(Transport::Native, |dev| dev.profile.transport)
    }

    fn usb_bus_address(&self, port: PortToken, bus: &mut i32, address: &mut i32) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("usb_bus_address") {
            return status;
        }
        let found = match state.device_of(port) {
            Ok(dev) => dev.profile.usb_bus_address,
            Err(status) => return status,
        };
        match found {
            Some((b, a)) => {
                *bus = b;
                *address = a;
                SP_OK
            }
            None => state.fail(SP_ERR_SUPP, 0, "Port does not use USB transport"),
        }
    }

    fn usb_vid_pid(&self, port: PortToken, vid: &mut i32, pid: &mut i32) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("usb_vid_pid") {
            return status;
        }
        let found = match state.device_of(port) {
            Ok(dev) => dev.profile.usb_vid_pid,
            Err(status) => return status,
        };
        match found {
            Some((v, p)) => {
                *vid = v;
                *pid = p;
                SP_OK
            }
            None => state.fail(SP_ERR_SUPP, 0, "Port does not use USB transport"),
        }
    }

    fn usb_manufacturer(&self, port: PortToken) -> Option<String> {
        let mut state = self.state.lock();
        state.device_of(port).ok()?.profile.manufacturer.clone()
    }

    fn usb_product(&self, port: PortToken) -> Option<String> {
        let mut state = self.state.lock();
        state.device_of(port).ok()?.profile.product.clone()
    }

    fn usb_serial(&self, port: PortToken) -> Option<String> {
        let mut state = self.state.lock();
        state.device_of(port).ok()?.profile.serial_number.clone()
    }

    fn bluetooth_address(&self, port: PortToken) -> Option<String> {
        let mut state = self.state.lock();
        state.device_of(port).ok()?.profile.bluetooth_address.clone()
    }

    fn get_config(&self, port: PortToken, config: &mut PortConfig) -> i32 {
        with_open_device!(self, "get_config", port, |dev| {
            *config = dev.profile.config;
            SP_OK
        })
    }

    fn set_config(&self, port: PortToken, config: &PortConfig) -> i32 {
        with_open_device!(self, "set_config", port, |dev| {
            dev.profile.config = *config;
            SP_OK
        })
    }

    fn blocking_read(&self, port: PortToken, buf: &mut [u8], _timeout_ms: u32) -> i32 {
        // The mock never blocks: whatever is queued is all that will ever arrive.
        with_open_device!(self, "blocking_read", port, |dev| {
            let n = buf.len().min(dev.read_queue.len());
            for (slot, byte) in buf.iter_mut().zip(dev.read_queue.drain(..n)) {
                *slot = byte;
            }
            clamp_len(n)
        })
    }

    fn nonblocking_read(&self, port: PortToken, buf: &mut [u8]) -> i32 {
        with_open_device!(self, "nonblocking_read", port, |dev| {
            let n = buf.len().min(dev.read_queue.len());
            for (slot, byte) in buf.iter_mut().zip(dev.read_queue.drain(..n)) {
                *slot = byte;
            }
            clamp_len(n)
        })
    }

    fn blocking_write(&self, port: PortToken, buf: &[u8], _timeout_ms: u32) -> i32 {
        with_open_device!(self, "blocking_write", port, |dev| {
            dev.write_log.push(buf.to_vec());
            clamp_len(dev.write_limit.map_or(buf.len(), |limit| limit.min(buf.len())))
        })
    }

    fn nonblocking_write(&self, port: PortToken, buf: &[u8]) -> i32 {
        with_open_device!(self, "nonblocking_write", port, |dev| {
            dev.write_log.push(buf.to_vec());
            clamp_len(dev.write_limit.map_or(buf.len(), |limit| limit.min(buf.len())))
        })
    }

    fn input_waiting(&self, port: PortToken) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("input_waiting") {
            return status;
        }
        let scripted = match state.open_device(port) {
            Ok(dev) => match dev.input_script.pop_front() {
                Some(step) => step,
                None => return clamp_len(dev.read_queue.len()),
            },
            Err(status) => return status,
        };
        if scripted < 0 {
            return state.fail(scripted, 5, "Input/output error");
        }
        scripted
    }

    fn output_waiting(&self, port: PortToken) -> i32 {
        with_open_device!(self, "output_waiting", port, |_dev| 0)
    }

    fn flush(&self, port: PortToken, buffers: ClearBuffers) -> i32 {
        with_open_device!(self, "flush", port, |dev| {
            if matches!(buffers, ClearBuffers::Input | ClearBuffers::Both) {
                dev.read_queue.clear();
            }
            dev.flushes.push(buffers);
            SP_OK
        })
    }

    fn drain(&self, port: PortToken) -> i32 {
        with_open_device!(self, "drain", port, |dev| {
            dev.drains += 1;
            SP_OK
        })
    }

    fn get_signals(&self, port: PortToken, signals: &mut Signals) -> i32 {
        with_open_device!(self, "get_signals", port, |dev| {
            *signals = dev.profile.signals;
            SP_OK
        })
    }

    fn start_break(&self, port: PortToken) -> i32 {
        with_open_device!(self, "start_break", port, |dev| {
            dev.in_break = true;
            SP_OK
        })
    }

    fn end_break(&self, port: PortToken) -> i32 {
        with_open_device!(self, "end_break", port, |dev| {
            dev.in_break = false;
            SP_OK
        })
    }

    fn new_event_set(&self, set: &mut EventSetToken) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("new_event_set") {
            return status;
        }
        state.next_event_set += 1;
        let token = state.next_event_set;
        state.event_sets.insert(token, Vec::new());
        state.event_sets_created += 1;
        *set = token;
        SP_OK
    }

    fn add_port_events(&self, set: EventSetToken, port: PortToken, mask: EventMask) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.injected("add_port_events") {
            return status;
        }
        if let Err(status) = state.open_device(port) {
            return status;
        }
        match state.event_sets.get_mut(&set) {
            Some(entries) => {
                entries.push((port, mask));
                SP_OK
            }
            None => state.fail(SP_ERR_ARG, 9, "Bad event set"),
        }
    }

    fn wait(&self, set: EventSetToken, timeout_ms: u32) -> i32 {
        let idle = {
            let mut state = self.state.lock();
            state.waits += 1;
            if let Some(status) = state.injected("wait") {
                return status;
            }
            let Some(entries) = state.event_sets.get(&set).cloned() else {
                return state.fail(SP_ERR_ARG, 9, "Bad event set");
            };
            entries.iter().all(|(port, _)| {
                state
                    .ports
                    .get(port)
                    .and_then(|object| state.devices.get(&object.device))
                    .is_some_and(|dev| dev.input_script.is_empty() && dev.read_queue.is_empty())
            })
        };
        if idle {
            let timeout = if timeout_ms == 0 {
                IDLE_WAIT_SLICE
            } else {
                Duration::from_millis(u64::from(timeout_ms)).min(IDLE_WAIT_SLICE)
            };
            std::thread::sleep(timeout);
        }
        SP_OK
    }

    fn free_event_set(&self, set: EventSetToken) {
        let mut state = self.state.lock();
        if state.event_sets.remove(&set).is_some() {
            state.event_sets_released += 1;
        }
    }

    fn last_error_code(&self) -> i32 {
        self.state.lock().last_error().map_or(0, |e| e.code)
    }

    fn last_error_message(&self) -> String {
        self.state
            .lock()
            .last_error()
            .map_or_else(|| "No error".to_string(), |e| e.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(name: &str) -> (MockDriver, PortToken) {
        let driver = MockDriver::new();
        driver.add_device(MockDevice::new(name));
        let mut token = 0;
        assert_eq!(driver.get_port_by_name(name, &mut token), SP_OK);
        (driver, token)
    }

    #[test]
    fn test_unknown_device_sets_last_error() {
        let driver = MockDriver::new();
        let mut token = 0;
        assert_eq!(driver.get_port_by_name("NOPE", &mut token), SP_ERR_ARG);
        assert_eq!(driver.last_error_code(), 2);
        assert_eq!(driver.last_error_message(), "No such file or directory");
    }

    #[test]
    fn test_io_requires_open_port() {
        let (driver, token) = driver_with("MOCK0");
        let mut buf = [0u8; 4];
        assert_eq!(driver.nonblocking_read(token, &mut buf), SP_ERR_ARG);

        assert_eq!(driver.open(token, OpenMode::Read), SP_OK);
        assert_eq!(driver.nonblocking_read(token, &mut buf), 0);
    }

    #[test]
    fn test_scripted_input_waiting_then_real_length() {
        let (driver, token) = driver_with("MOCK0");
        driver.open(token, OpenMode::Read);
        driver.enqueue_read("MOCK0", b"xy");
        driver.script_input_waiting("MOCK0", [0, SP_ERR_FAIL]);

        assert_eq!(driver.input_waiting(token), 0);
        assert_eq!(driver.input_waiting(token), SP_ERR_FAIL);
        assert_eq!(driver.last_error_code(), 5);
        assert_eq!(driver.input_waiting(token), 2);
    }

    #[test]
    fn test_write_limit_and_log() {
        let (driver, token) = driver_with("MOCK0");
        driver.open(token, OpenMode::Write);
        driver.set_write_limit("MOCK0", Some(2));

        assert_eq!(driver.nonblocking_write(token, b"abcd"), 2);
        assert_eq!(driver.write_log("MOCK0"), vec![b"abcd".to_vec()]);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let (driver, token) = driver_with("MOCK0");
        driver.fail_next("open", SP_ERR_FAIL, 13, "Permission denied");

        assert_eq!(driver.open(token, OpenMode::Read), SP_ERR_FAIL);
        assert_eq!(driver.last_error_message(), "Permission denied");
        assert_eq!(driver.open(token, OpenMode::Read), SP_OK);
    }

    #[test]
    fn test_free_counts_and_event_sets() {
        let (driver, token) = driver_with("MOCK0");
        driver.open(token, OpenMode::Read);

        let mut set = 0;
        assert_eq!(driver.new_event_set(&mut set), SP_OK);
        assert_eq!(driver.add_port_events(set, token, EventMask::RX_READY), SP_OK);
        assert_eq!(driver.wait(set, 1), SP_OK);
        driver.free_event_set(set);
        assert_eq!(driver.event_set_counts(), (1, 1));

        driver.free_port(token);
        assert_eq!(driver.free_count(token), 1);
        assert_eq!(driver.live_ports(), 0);
    }

    #[test]
    fn test_last_error_is_per_thread() {
        let (driver, token) = driver_with("MOCK0");
        driver.fail_next("open", SP_ERR_FAIL, 13, "Permission denied");
        assert_eq!(driver.open(token, OpenMode::Read), SP_ERR_FAIL);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(driver.input_waiting(token), SP_ERR_ARG);
                assert_eq!(driver.last_error_code(), 9);
                assert_eq!(driver.last_error_message(), "Port not open");
            });
        });

        assert_eq!(driver.last_error_code(), 13);
        assert_eq!(driver.last_error_message(), "Permission denied");
    }
}
