//! Stream bridge: a subscription-driven front for the background reader.

use super::worker::{ReaderSession, ReaderState};
use crate::config::ReaderConfig;
use crate::error::{Result, SerialError};
use crate::native::{OpenMode, PortToken, SerialDriver};
use crate::port::SerialPort;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Tuning for reader sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Upper bound on one event wait; also the cancellation latency.
    pub poll_timeout: Duration,
    /// Chunks buffered between the reader thread and the stream.
    pub channel_capacity: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            channel_capacity: 64,
        }
    }
}

impl ReaderOptions {
    /// Reject options a reader session cannot honor.
    ///
    /// A poll timeout under one millisecond would reach the driver as 0,
    /// which it treats as an unbounded wait.
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout < Duration::from_millis(1) {
            return Err(SerialError::state(format!(
                "poll timeout must be at least 1 ms, got {:?}",
                self.poll_timeout
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SerialError::state("channel capacity must be at least 1"));
        }
        Ok(())
    }
}

impl From<&ReaderConfig> for ReaderOptions {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    session: Option<ReaderSession>,
    /// Id of the live subscription, if any.
    subscriber: Option<u64>,
    next_id: u64,
}

/// Exposes the bytes arriving on a port as a [`Stream`] of chunks.
///
/// No reader thread runs until [`SerialPortReader::stream`] is called. The
/// bridge is single-subscriber: while a [`ChunkStream`] is alive, a second
/// call to `stream` fails with [`SerialError::State`]. Dropping the stream or
/// calling [`SerialPortReader::close`] tears the session down; the next
/// `stream` call starts a fresh one.
///
/// The session ends by itself when the device errors. The stream then
/// completes and [`SerialPortReader::termination`] reports why.
///
/// Teardown never blocks the caller. [`SerialPortReader::close`] and the
/// drops only raise the cancel flag; the thread exits within one poll
/// interval. Await [`SerialPortReader::shutdown`] to wait for that.
///
/// The bridge borrows the port, so the handle cannot be closed or disposed
/// while the bridge exists.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use serial_bridge::native::OpenMode;
/// use serial_bridge::port::SerialPort;
/// use serial_bridge::reader::{ReaderOptions, SerialPortReader};
///
/// # async fn example() -> serial_bridge::Result<()> {
/// let mut port = SerialPort::new("/dev/ttyUSB0")?;
/// port.open(OpenMode::Read)?;
/// let reader = SerialPortReader::new(&port, ReaderOptions::default())?;
/// let mut chunks = reader.stream()?;
/// while let Some(chunk) = chunks.next().await {
///     println!("{} bytes", chunk.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SerialPortReader<'p> {
    port: &'p SerialPort,
    driver: Arc<dyn SerialDriver>,
    token: PortToken,
    options: ReaderOptions,
    state: Arc<Mutex<BridgeState>>,
}

impl<'p> SerialPortReader<'p> {
    /// Bridge `port`, which must be open with read access.
    pub fn new(port: &'p SerialPort, options: ReaderOptions) -> Result<Self> {
        let token = readable(port)?;
        options.validate()?;
        Ok(Self {
            port,
            driver: Arc::clone(port.driver()),
            token,
            options,
            state: Arc::new(Mutex::new(BridgeState::default())),
        })
    }

    pub fn port(&self) -> &'p SerialPort {
        self.port
    }

    pub fn options(&self) -> ReaderOptions {
        self.options
    }

    /// Subscribe, starting a new reader session.
    pub fn stream(&self) -> Result<ChunkStream> {
        readable(self.port)?;
        let mut state = self.state.lock();
        if state.subscriber.is_some() {
            return Err(SerialError::state("reader already has a subscriber"));
        }

        // The previous thread may still be finishing its last wait. The new
        // thread joins it before polling, so the caller never waits here.
        let previous = state.session.take().and_then(|mut previous| {
            previous.cancel();
            previous.detach()
        });

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let session = ReaderSession::spawn_after(
            Arc::clone(&self.driver),
            self.token,
            self.options.poll_timeout,
            tx,
            previous,
        )?;

        state.next_id += 1;
        let id = state.next_id;
        state.subscriber = Some(id);
        state.session = Some(session);
        debug!(port = self.token, subscription = id, "reader subscribed");

        Ok(ChunkStream {
            inner: ReceiverStream::new(rx),
            bridge: Arc::clone(&self.state),
            id,
        })
    }

    /// Cancel the current session without waiting for its thread.
    ///
    /// An outstanding stream no longer counts as a subscriber and completes
    /// once the thread notices, within one poll interval.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.subscriber = None;
        if let Some(session) = state.session.as_ref() {
            session.cancel();
            debug!(port = self.token, "reader closed");
        }
    }

    /// Cancel the current session and wait until its thread has exited.
    ///
    /// The join runs on tokio's blocking pool; the calling task only
    /// suspends. Afterwards [`SerialPortReader::state`] is
    /// [`ReaderState::Stopped`] if a session was ever started.
    pub async fn shutdown(&self) -> Result<()> {
        let join = {
            let mut state = self.state.lock();
            state.subscriber = None;
            state.session.as_mut().and_then(|session| {
                session.cancel();
                session.detach()
            })
        };
        if let Some(join) = join {
            tokio::task::spawn_blocking(move || join.join()).await?;
            debug!(port = self.token, "reader shut down");
        }
        Ok(())
    }

    /// Current session state; [`ReaderState::Idle`] before the first subscription.
    pub fn state(&self) -> ReaderState {
        self.state
            .lock()
            .session
            .as_ref()
            .map_or(ReaderState::Idle, ReaderSession::state)
    }

    /// Whether a live subscription exists.
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscriber.is_some()
    }

    /// Why the latest session ended, if it ended on a device error.
    pub fn termination(&self) -> Option<SerialError> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(ReaderSession::termination)
            .map(SerialError::ReaderTerminated)
    }
}

fn readable(port: &SerialPort) -> Result<PortToken> {
    let token = port.live()?;
    if !port.mode().is_some_and(OpenMode::can_read) {
        return Err(SerialError::state("port is not open for reading"));
    }
    Ok(token)
}

impl Drop for SerialPortReader<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialPortReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortReader")
            .field("token", &format_args!("{:#x}", self.token))
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

/// Chunks read by one reader session, in arrival order.
///
/// Dropping the stream cancels its session.
pub struct ChunkStream {
    inner: ReceiverStream<Vec<u8>>,
    bridge: Arc<Mutex<BridgeState>>,
    id: u64,
}

impl Stream for ChunkStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        let mut state = self.bridge.lock();
        if state.subscriber == Some(self.id) {
            state.subscriber = None;
            if let Some(session) = state.session.as_ref() {
                session.cancel();
            }
            debug!(subscription = self.id, "reader unsubscribed");
        }
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream").field("id", &self.id).finish()
    }
}
