//! Tests against real serial devices through the system driver.
//!
//! Ignored by default; run manually with `--ignored` and `TEST_PORT` set.

pub mod real_port_tests;
pub mod utils;
