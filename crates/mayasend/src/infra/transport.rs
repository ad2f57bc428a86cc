//! Delivery of commands to Maya command ports.

use std::cell::RefCell;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::errors::TransportError;
use crate::domain::model::{Command, ExecutionTarget};

/// Connect and write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Pause after a successful write so Maya can flush its own output first.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Sends one command per call. Implementations never reuse connections.
pub trait Transport {
    fn send(&self, target: &ExecutionTarget, command: &Command) -> Result<(), TransportError>;
}

/// Fire-and-forget TCP delivery. Nothing is read back from the port.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    pub timeout: Duration,
    pub settle: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn connect(&self, target: &ExecutionTarget) -> io::Result<TcpStream> {
        let addrs = (target.host.as_str(), target.port).to_socket_addrs()?;
        connect_within(addrs, self.timeout).map_err(|err| match err {
            Some(err) => err,
            None => io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", target.host),
            ),
        })
    }

    fn write(&self, target: &ExecutionTarget, command: &Command) -> io::Result<()> {
        // The stream is dropped, and the socket closed, on every return path below.
        let mut stream = self.connect(target)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(command.as_bytes())?;
        stream.flush()?;
        let _ = stream.shutdown(Shutdown::Write);
        thread::sleep(self.settle);
        Ok(())
    }
}

/// Try each address in turn, all within one `timeout` budget.
///
/// Returns `Err(None)` when there was no address to try.
fn connect_within(
    addrs: impl IntoIterator<Item = SocketAddr>,
    timeout: Duration,
) -> Result<TcpStream, Option<io::Error>> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Some(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connection timed out after {timeout:?}"),
            )));
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err)
}

impl Transport for TcpTransport {
    fn send(&self, target: &ExecutionTarget, command: &Command) -> Result<(), TransportError> {
        tracing::debug!(address = %target.address(), bytes = command.len(), "connecting");
        self.write(target, command).map_err(|source| {
            tracing::warn!(address = %target.address(), error = %source, "send failed");
            TransportError::new(target.host.clone(), target.port, source)
        })
    }
}

/// One command captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub target: ExecutionTarget,
    pub command: Command,
}

/// Keeps commands instead of sending them. Used for dry runs.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: RefCell<Vec<RecordedSend>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.borrow().clone()
    }

    pub fn into_sent(self) -> Vec<RecordedSend> {
        self.sent.into_inner()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, target: &ExecutionTarget, command: &Command) -> Result<(), TransportError> {
        self.sent.borrow_mut().push(RecordedSend {
            target: target.clone(),
            command: command.clone(),
        });
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, target: &ExecutionTarget, command: &Command) -> Result<(), TransportError> {
        (**self).send(target, command)
    }
}
