//! Transient buffers handed to driver read/write calls.
//!
//! The driver only ever sees a borrowed block that lives for the duration of
//! one call. Results are copied out into an owned `Vec<u8>` and the block is
//! released on every exit path, including unwinding out of the closure.

use super::{call, SerialDriver};
use crate::error::Result;
use std::ops::{Deref, DerefMut};
use tracing::trace;

/// A fixed-size block released when dropped.
pub struct TransientBuffer {
    block: Box<[u8]>,
}

impl TransientBuffer {
    /// Allocate a zeroed block of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        trace!(len, "transient buffer acquired");
        Self {
            block: vec![0u8; len].into_boxed_slice(),
        }
    }

    /// Allocate a block holding a copy of `bytes`.
    pub fn copy_of(bytes: &[u8]) -> Self {
        trace!(len = bytes.len(), "transient buffer acquired");
        Self {
            block: bytes.to_vec().into_boxed_slice(),
        }
    }
}

impl Deref for TransientBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.block
    }
}

impl DerefMut for TransientBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.block
    }
}

impl Drop for TransientBuffer {
    fn drop(&mut self) {
        // Scrub before handing the memory back; it may have held device data.
        self.block.fill(0);
        trace!(len = self.block.len(), "transient buffer released");
        #[cfg(test)]
        tests::note_release();
    }
}

/// Run a read-style driver call against a fresh `len`-byte block.
///
/// `f` returns the driver status: negative for failure, otherwise the number
/// of bytes it placed at the front of the block. Exactly that many bytes are
/// copied into the returned vector.
pub fn with_read_buffer<F>(driver: &dyn SerialDriver, len: usize, f: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut [u8]) -> i32,
{
    let mut block = TransientBuffer::zeroed(len);
    let count = call(driver, || f(&mut block))? as usize;
    Ok(block[..count.min(len)].to_vec())
}

/// Run a write-style driver call against a transient copy of `bytes`.
///
/// Returns the byte count the driver reports; a short count is not an error.
pub fn with_write_buffer<F>(driver: &dyn SerialDriver, bytes: &[u8], f: F) -> Result<usize>
where
    F: FnOnce(&[u8]) -> i32,
{
    let block = TransientBuffer::copy_of(bytes);
    let count = call(driver, || f(&block))?;
    Ok(count as usize)
}
