//! Transport boundary
//!
//! The engine hands complete, preamble-wrapped frames to a [`Transport`] and
//! pulls received buffers from a [`FrameSource`]. No one-buffer-one-frame
//! assumption is made on receive; alignment is the scanner's job.
//!
//! Bindings provided here:
//! - [`MemoryLink`]: in-process duplex channel, for tests and loopback setups
//! - [`LossyTransport`]: wrapper that drops outgoing frames at random
//! - [`UdpTransport`]: datagrams to a modem process over UDP
//! - [`RecordingTransport`]: keeps every frame sent, for inspection
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;

use crate::errors::{LinkError, Result};

/// Outgoing side of a link
pub trait Transport: Send + Sync {
    /// Put one frame on the link, returning the number of bytes written
    fn send(&self, frame: &[u8]) -> Result<usize>;
}

/// Incoming side of a link
pub trait FrameSource: Send {
    /// Next received buffer, or `None` if nothing arrived within `timeout`
    ///
    /// Returns `Err` only when the source is permanently closed.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        (**self).send(frame)
    }
}

fn link_closed() -> LinkError {
    LinkError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "link peer closed"))
}

/// Sending half of an in-memory link endpoint
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::Sender<Bytes>,
}

impl Transport for MemorySender {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| link_closed())?;
        Ok(frame.len())
    }
}

/// Receiving half of an in-memory link endpoint
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl FrameSource for MemoryReceiver {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match self.rx.recv_timeout(timeout) {
            Ok(buf) => Ok(Some(buf)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(link_closed()),
        }
    }
}

/// One end of a [`MemoryLink`]
#[derive(Debug)]
pub struct MemoryEndpoint {
    pub sender: MemorySender,
    pub receiver: MemoryReceiver,
}

/// In-memory duplex byte channel
pub struct MemoryLink;

impl MemoryLink {
    /// Two endpoints where frames sent on one are received on the other
    pub fn duplex() -> (MemoryEndpoint, MemoryEndpoint) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();

        (
            MemoryEndpoint {
                sender: MemorySender { tx: a_tx },
                receiver: MemoryReceiver { rx: a_rx },
            },
            MemoryEndpoint {
                sender: MemorySender { tx: b_tx },
                receiver: MemoryReceiver { rx: b_rx },
            },
        )
    }
}

/// Transport wrapper simulating a lossy channel
pub struct LossyTransport<T> {
    inner: T,
    loss_rate: f64,
    dropped: AtomicU64,
}

impl<T: Transport> LossyTransport<T> {
    /// `loss_rate` is clamped to `0.0..=1.0`; NaN means lossless
    pub fn new(inner: T, loss_rate: f64) -> Self {
        let loss_rate = if loss_rate.is_nan() { 0.0 } else { loss_rate.clamp(0.0, 1.0) };
        Self {
            inner,
            loss_rate,
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames swallowed so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        if rand::thread_rng().gen_bool(self.loss_rate) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            // Lost in the air: the sender cannot tell.
            return Ok(frame.len());
        }
        self.inner.send(frame)
    }
}

/// Transport that records frames instead of sending them
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Instant, Bytes)>>,
}

impl RecordingTransport {
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.sent.lock().iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(t, _)| *t).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.sent
            .lock()
            .push((Instant::now(), Bytes::copy_from_slice(frame)));
        Ok(frame.len())
    }
}

/// UDP binding to a modem process
///
/// Each datagram carries one buffer. The socket is shared between the
/// transmit worker and the receive pump.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    buffer_size: usize,
}

impl UdpTransport {
    /// Bind `local` and send to `remote`
    pub fn bind(local: impl ToSocketAddrs, remote: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        let remote = remote
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| LinkError::config("remote address did not resolve"))?;

        Ok(Self {
            socket: Arc::new(socket),
            remote,
            buffer_size: crate::UDP_RECV_BUFFER_SIZE,
        })
    }

    /// Receive buffer size per datagram
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Re-point outgoing datagrams; clones made earlier keep the old peer
    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = remote;
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(frame, self.remote)?)
    }
}

/// Errors a datagram socket recovers from on the next call
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

impl FrameSource for UdpTransport {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut buffer = vec![0u8; self.buffer_size];
        match self.socket.recv_from(&mut buffer) {
            Ok((len, _)) => {
                buffer.truncate(len);
                Ok(Some(Bytes::from(buffer)))
            }
            Err(e) if is_transient(e.kind()) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
