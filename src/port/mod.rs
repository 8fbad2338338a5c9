//! Port handle layer.
//!
//! [`SerialPort`] owns one driver port object and exposes lifecycle,
//! attribute, configuration and single-shot I/O operations on it. Async
//! callers use [`AsyncPortIo`], which runs the same calls on Tokio's blocking
//! pool.

pub mod config;
pub mod handle;
pub mod io;

pub use config::*;
pub use handle::{PortInfo, SerialPort};
pub use io::{read_with, write_with, AsyncPortIo};
