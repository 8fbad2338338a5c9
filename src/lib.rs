//! Serial Bridge Library
//!
//! Blocking serial driver calls bridged into safe handles and async streams.
//!
//! # Modules
//!
//! - `native`: the C-style driver surface, its call adapter and buffer marshalling
//! - `port`: port handles, configuration and single-shot I/O
//! - `reader`: background polling and the chunk stream it feeds
//! - `error`: unified error handling
//! - `config`: configuration management with TOML support
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use serial_bridge::{OpenMode, ReaderOptions, SerialPort, SerialPortReader};
//!
//! # async fn example() -> serial_bridge::Result<()> {
//! let mut port = SerialPort::new("/dev/ttyACM0")?;
//! port.open(OpenMode::ReadWrite)?;
//!
//! let reader = SerialPortReader::new(&port, ReaderOptions::default())?;
//! let mut chunks = reader.stream()?;
//! port.write(b"status\r\n", None)?;
//! if let Some(reply) = chunks.next().await {
//!     println!("{}", String::from_utf8_lossy(&reply));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod native;
pub mod port;
pub mod reader;

// Re-export commonly used types for convenience
pub use error::{ErrorRecord, Result, SerialError};
pub use native::{ClearBuffers, OpenMode, Signals, Transport};
pub use port::{AsyncPortIo, PortConfig, PortInfo, SerialPort};
pub use reader::{ChunkStream, ReaderOptions, ReaderState, SerialPortReader};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
