//! Loopback Transport
//!
//! In-process transport made of two connected endpoints. Used when both ends
//! of a channel live in the same process (embedded mode, tests, the
//! `conduit-loopback` tool).
//!
//! # Handshake
//!
//! Connecting an endpoint sends a hello frame carrying its [`PeerId`]. The
//! other endpoint reports that identity through `TransportEvents::connected`
//! when the hello arrives, then reports every data frame as a message.
//! Dropping or closing an endpoint makes the other side report an error.
//!
//! # Usage
//!
//! ```ignore
//! let (server, client) = LoopbackFactory::pair("render", PeerId(1), PeerId(2));
//!
//! let mut proxy = ChannelProxy::new(listener, owner, io.scheduler());
//! proxy.init(Box::new(server), ChannelMode::Server, false)?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::message::{Message, PeerId};

use super::traits::{
    ChannelFactory, ChannelMode, ConcurrentSend, Transport, TransportError, TransportEvents,
};

/// What travels between the two endpoints
#[derive(Debug)]
enum Frame {
    Hello(PeerId),
    Data(Message),
}

/// Write half of an endpoint, shared with the concurrent-send capability
struct LoopbackSender {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    connected: AtomicBool,
}

impl LoopbackSender {
    fn push(&self, frame: Frame) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .map_err(|_| TransportError::SendFailed("peer endpoint dropped".to_string()))
    }
}

impl ConcurrentSend for LoopbackSender {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::InvalidState(
                "Transport not connected".to_string(),
            ));
        }
        self.push(Frame::Data(message))
    }
}

/// One endpoint of an in-process channel
pub struct LoopbackTransport {
    /// Identity announced to the other endpoint
    local_id: PeerId,
    /// Frames to the other endpoint
    outgoing: Arc<LoopbackSender>,
    /// Frames from the other endpoint, taken by the reader on connect
    incoming: Option<mpsc::UnboundedReceiver<Frame>>,
    /// Reader task forwarding frames into the proxy
    reader: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    /// Create two connected endpoints
    ///
    /// `a_id` is announced by the first endpoint, `b_id` by the second.
    #[must_use]
    pub fn new_pair(a_id: PeerId, b_id: PeerId) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (Self::endpoint(a_id, a_tx, a_rx), Self::endpoint(b_id, b_tx, b_rx))
    }

    fn endpoint(
        local_id: PeerId,
        tx: mpsc::UnboundedSender<Frame>,
        rx: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            local_id,
            outgoing: Arc::new(LoopbackSender {
                tx: Mutex::new(Some(tx)),
                connected: AtomicBool::new(false),
            }),
            incoming: Some(rx),
            reader: None,
        }
    }

    /// Identity this endpoint announces
    #[must_use]
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Whether `connect` has succeeded and `close` has not been called
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outgoing.connected.load(Ordering::Acquire)
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, events: TransportEvents) -> Result<(), TransportError> {
        let mut incoming = self
            .incoming
            .take()
            .ok_or_else(|| TransportError::InvalidState("Already connected".to_string()))?;

        let runtime = Handle::try_current().map_err(|_| {
            TransportError::ConnectionFailed("no runtime to drive the reader".to_string())
        })?;

        self.outgoing
            .push(Frame::Hello(self.local_id))
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        self.outgoing.connected.store(true, Ordering::Release);

        let local_id = self.local_id;
        self.reader = Some(runtime.spawn(async move {
            while let Some(frame) = incoming.recv().await {
                match frame {
                    Frame::Hello(peer) => events.connected(peer),
                    Frame::Data(message) => events.message(message),
                }
            }
            tracing::debug!(local = %local_id, "Loopback peer went away");
            events.error();
        }));

        tracing::debug!(local = %self.local_id, "Loopback endpoint connected");
        Ok(())
    }

    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        ConcurrentSend::send(self.outgoing.as_ref(), message)
    }

    fn close(&mut self) {
        self.outgoing.connected.store(false, Ordering::Release);
        // Dropping the sender is what the other endpoint observes
        self.outgoing.tx.lock().take();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.incoming = None;
    }

    fn concurrent_sender(&self) -> Option<Arc<dyn ConcurrentSend>> {
        Some(self.outgoing.clone())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Factory handing a prebuilt loopback endpoint to a proxy
pub struct LoopbackFactory {
    channel_id: String,
    transport: LoopbackTransport,
}

impl LoopbackFactory {
    /// Wrap an endpoint
    pub fn new(channel_id: impl Into<String>, transport: LoopbackTransport) -> Self {
        Self {
            channel_id: channel_id.into(),
            transport,
        }
    }

    /// Create factories for both ends of a new channel
    #[must_use]
    pub fn pair(channel_id: &str, a_id: PeerId, b_id: PeerId) -> (Self, Self) {
        let (a, b) = LoopbackTransport::new_pair(a_id, b_id);
        (Self::new(channel_id, a), Self::new(channel_id, b))
    }
}

impl ChannelFactory for LoopbackFactory {
    fn channel_id(&self) -> String {
        self.channel_id.clone()
    }

    fn build(self: Box<Self>, mode: ChannelMode) -> Result<Box<dyn Transport>, TransportError> {
        tracing::trace!(channel = %self.channel_id, %mode, "Building loopback endpoint");
        Ok(Box::new(self.transport))
    }
}
