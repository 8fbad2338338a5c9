//! Background reading.
//!
//! - [`events`]: the driver's readiness event sets
//! - [`worker`]: the polling loop on its own thread
//! - [`bridge`]: the subscription-driven [`Stream`](futures::Stream) front
//!
//! Data flows port -> event wait -> input query -> read -> channel -> stream.
//! Chunks arrive in device order; nothing is merged or reordered beyond what
//! the driver already batches.

pub mod bridge;
pub mod events;
pub mod worker;

pub use bridge::{ChunkStream, ReaderOptions, SerialPortReader};
pub use events::EventSet;
pub use worker::{ReaderJoin, ReaderSession, ReaderState};
