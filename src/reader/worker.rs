//! Background reader: one polling loop on a dedicated thread.
//!
//! The thread receives only the driver `Arc` and the port token. It never
//! frees the port; disposal stays with the foreground [`SerialPort`].
//!
//! Cancellation is cooperative. The flag is checked after every wait, and a
//! wait never lasts longer than the poll timeout, so a stop request is seen
//! within one interval. On every exit path the loop releases its event set
//! itself. The only case where release is left to the driver's own teardown
//! is a thread that never returns from a driver call, which the driver
//! surface does not allow us to interrupt.
//!
//! [`SerialPort`]: crate::port::SerialPort

use super::events::EventSet;
use crate::error::{ErrorRecord, Result, SerialError};
use crate::native::{EventMask, PortToken, SerialDriver};
use crate::port::read_with;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

/// How long a full channel is left alone before trying again.
const BACKPRESSURE_RETRY: Duration = Duration::from_millis(2);

/// Lifecycle of a reader session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReaderState {
    Idle = 0,
    Starting = 1,
    Polling = 2,
    Draining = 3,
    Stopped = 4,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Polling,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State shared between the foreground and one reader thread.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    cancel: AtomicBool,
    termination: Mutex<Option<ErrorRecord>>,
}

impl Shared {
    fn set_state(&self, state: ReaderState) {
        self.state.store(state as u8, Ordering::Release);
        trace!(%state, "reader state");
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Why the polling loop stopped.
#[derive(Debug)]
enum Exit {
    Cancelled,
    ReceiverGone,
    Terminated(ErrorRecord),
}

fn into_record(err: SerialError) -> ErrorRecord {
    err.record()
        .unwrap_or_else(|| ErrorRecord::new(0, err.to_string()))
}

/// One running background reader.
#[derive(Debug)]
pub struct ReaderSession {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    port: PortToken,
}

impl ReaderSession {
    /// Start polling `port` on a new thread, forwarding chunks into `tx`.
    pub fn spawn(
        driver: Arc<dyn SerialDriver>,
        port: PortToken,
        poll_timeout: Duration,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self> {
        Self::spawn_after(driver, port, poll_timeout, tx, None)
    }

    /// Like [`ReaderSession::spawn`], but the new thread first waits for
    /// `previous` to exit so two sessions never poll the port at once.
    pub fn spawn_after(
        driver: Arc<dyn SerialDriver>,
        port: PortToken,
        poll_timeout: Duration,
        tx: mpsc::Sender<Vec<u8>>,
        previous: Option<ReaderJoin>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ReaderState::Idle as u8),
            cancel: AtomicBool::new(false),
            termination: Mutex::new(None),
        });
        shared.set_state(ReaderState::Starting);

        let worker = Worker {
            driver,
            port,
            poll_timeout,
            shared: Arc::clone(&shared),
        };
        let handle = thread::Builder::new()
            .name(format!("serial-reader-{port:#x}"))
            .spawn(move || {
                if let Some(previous) = previous {
                    trace!(port, "waiting for previous reader to exit");
                    previous.join();
                }
                worker.run(tx)
            })?;

        debug!(port, ?poll_timeout, "reader session started");
        Ok(Self {
            shared,
            handle: Some(handle),
            port,
        })
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// The error that ended the session, if it ended on a device error.
    pub fn termination(&self) -> Option<ErrorRecord> {
        self.shared.termination.lock().clone()
    }

    /// Ask the thread to stop; it notices within one poll interval.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Take the thread handle so the join can happen elsewhere.
    ///
    /// Returns `None` once taken. State and termination stay readable here.
    pub fn detach(&mut self) -> Option<ReaderJoin> {
        self.handle.take().map(|handle| ReaderJoin {
            handle,
            shared: Arc::clone(&self.shared),
            port: self.port,
        })
    }

    /// Cancel and block until the thread exits.
    pub fn stop(&mut self) {
        self.cancel();
        if let Some(join) = self.detach() {
            join.join();
        }
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        // Never block here; the thread exits on its own once it sees the flag.
        self.cancel();
    }
}

/// A reader thread that can be waited on without holding the session.
#[derive(Debug)]
pub struct ReaderJoin {
    handle: JoinHandle<()>,
    shared: Arc<Shared>,
    port: PortToken,
}

impl ReaderJoin {
    /// Block until the thread exits.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!(port = self.port, "reader thread panicked");
            self.shared.set_state(ReaderState::Stopped);
        }
    }
}

struct Worker {
    driver: Arc<dyn SerialDriver>,
    port: PortToken,
    poll_timeout: Duration,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self, tx: mpsc::Sender<Vec<u8>>) {
        let exit = match self.setup() {
            Ok(events) => {
                self.shared.set_state(ReaderState::Polling);
                let exit = self.poll(&events, &tx);
                if matches!(exit, Exit::Cancelled | Exit::ReceiverGone) {
                    self.shared.set_state(ReaderState::Draining);
                }
                events.release();
                exit
            }
            Err(err) => Exit::Terminated(into_record(err)),
        };

        match exit {
            Exit::Terminated(record) => {
                info!(port = self.port, %record, "reader terminated by device error");
                *self.shared.termination.lock() = Some(record);
            }
            Exit::Cancelled => debug!(port = self.port, "reader cancelled"),
            Exit::ReceiverGone => debug!(port = self.port, "reader receiver dropped"),
        }
        self.shared.set_state(ReaderState::Stopped);
        // The sender goes last so a completed stream always observes Stopped.
        drop(tx);
    }

    fn setup(&self) -> Result<EventSet> {
        let events = EventSet::create(Arc::clone(&self.driver))?;
        events.add_interest(self.port, EventMask::RX_READY | EventMask::ERROR)?;
        Ok(events)
    }

    fn poll(&self, events: &EventSet, tx: &mpsc::Sender<Vec<u8>>) -> Exit {
        loop {
            if self.shared.cancelled() {
                return Exit::Cancelled;
            }
            if tx.is_closed() {
                return Exit::ReceiverGone;
            }

            // A failed wait counts as a timeout; the port query below decides.
            if let Err(err) = events.wait(self.poll_timeout) {
                debug!(port = self.port, error = %err, "event wait failed");
            }
            if self.shared.cancelled() {
                return Exit::Cancelled;
            }

            let available = match events.input_waiting(self.port) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(err) => return Exit::Terminated(into_record(err)),
            };

            let chunk = match read_with(self.driver.as_ref(), self.port, available, None) {
                Ok(chunk) => chunk,
                Err(err) => return Exit::Terminated(into_record(err)),
            };
            if chunk.is_empty() {
                continue;
            }

            trace!(port = self.port, len = chunk.len(), "chunk read");
            if let Some(exit) = self.forward(tx, chunk) {
                return exit;
            }
        }
    }

    /// Hand a chunk to the foreground, waiting for room if the channel is full.
    fn forward(&self, tx: &mpsc::Sender<Vec<u8>>, mut chunk: Vec<u8>) -> Option<Exit> {
        loop {
            match tx.try_send(chunk) {
                Ok(()) => return None,
                Err(TrySendError::Closed(_)) => return Some(Exit::ReceiverGone),
                Err(TrySendError::Full(returned)) => {
                    if self.shared.cancelled() {
                        return Some(Exit::Cancelled);
                    }
                    chunk = returned;
                    thread::sleep(BACKPRESSURE_RETRY);
                }
            }
        }
    }
}
