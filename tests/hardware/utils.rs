//! Environment-driven setup for hardware tests.

use serial_bridge::native::OpenMode;
use serial_bridge::SerialPort;
use std::env;

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub loopback_enabled: bool,
}

impl TestPortConfig {
    /// `TEST_PORT` (required), `TEST_BAUD` (default 9600), `TEST_LOOPBACK=1`.
    pub fn from_env() -> Option<Self> {
        let port_name = env::var("TEST_PORT").ok()?;
        let baud_rate = env::var("TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9600);
        let loopback_enabled = env::var("TEST_LOOPBACK").ok().as_deref() == Some("1");

        Some(TestPortConfig {
            port_name,
            baud_rate,
            loopback_enabled,
        })
    }

    /// Open the test port and apply the test baud rate.
    pub fn open(&self, mode: OpenMode) -> SerialPort {
        let mut port = SerialPort::new(&self.port_name).expect("Failed to look up test port");
        port.open(mode).expect("Failed to open test port");
        let settings = port
            .config()
            .expect("Failed to read port config")
            .with_baud_rate(self.baud_rate);
        port.set_config(&settings).expect("Failed to configure port");
        port
    }
}

/// The test port configuration, or `None` with a note when `TEST_PORT` is unset.
pub fn skip_without_hardware() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("Skipping hardware test: TEST_PORT not set");
    }
    config
}
