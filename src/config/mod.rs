//! Configuration for serial-bridge.
//!
//! TOML files with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `SERIAL_BRIDGE_CONFIG` environment variable (explicit path)
//! 2. `./serial-bridge.toml` (current directory)
//! 3. `$XDG_CONFIG_HOME/serial-bridge/serial-bridge.toml` (falls back to `~/.config`)
//! 4. `%APPDATA%\serial-bridge\serial-bridge.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_BRIDGE_<SECTION>_<KEY>`:
//! - `SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD=9600`
//! - `SERIAL_BRIDGE_READER_POLL_TIMEOUT_MS=100`
//! - `SERIAL_BRIDGE_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```no_run
//! use serial_bridge::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("Poll timeout: {:?}", loader.config().reader.poll_timeout());
//! # Ok::<(), serial_bridge::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, ReaderConfig, SerialConfig};
