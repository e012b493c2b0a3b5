//! Transport Traits
//!
//! The boundary between a channel proxy and the byte-level channel beneath
//! it. Everything behind these traits (pipes, sockets, handshakes, wire
//! format) belongs to the transport implementation.
//!
//! A transport is built by a [`ChannelFactory`], lives on the transport
//! context, and reports what it receives through the [`TransportEvents`]
//! handed to it in [`Transport::connect`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Message, PeerId};
use crate::proxy::IoTask;

/// Transport error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to establish the channel
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to write a message
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The channel is closed
    #[error("connection closed")]
    ConnectionClosed,
}

/// Which side of the channel this endpoint plays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMode {
    /// Creates the channel endpoint and waits for the peer
    #[default]
    Server,
    /// Attaches to an endpoint created by the peer
    Client,
    /// Server side of a channel the peer discovers by name
    NamedServer,
    /// Client side of a channel found by name
    NamedClient,
}

impl ChannelMode {
    /// Whether this endpoint creates the channel
    #[must_use]
    pub fn is_server(self) -> bool {
        matches!(self, Self::Server | Self::NamedServer)
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::NamedServer => "named-server",
            Self::NamedClient => "named-client",
        };
        f.write_str(s)
    }
}

/// Lower-level message channel driven on the transport context
///
/// All methods are called from the transport context only.
pub trait Transport: Send {
    /// Establish the channel
    ///
    /// `events` is the single recipient of everything the transport receives
    /// from now on. The transport may clone it into its own reader tasks.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the channel cannot be
    /// established. The proxy does not retry.
    fn connect(&mut self, events: TransportEvents) -> Result<(), TransportError>;

    /// Write one message
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The proxy logs and drops it.
    fn send(&mut self, message: Message) -> Result<(), TransportError>;

    /// Release the channel
    fn close(&mut self);

    /// Sender that may be used from any thread once connected
    ///
    /// Transports whose writes are safe to perform concurrently with the
    /// transport context return a sender here. The proxy then sends directly
    /// from the owner context instead of hopping through the transport
    /// context. The default is no such capability.
    fn concurrent_sender(&self) -> Option<Arc<dyn ConcurrentSend>> {
        None
    }
}

/// Thread-safe send capability exposed by some transports
pub trait ConcurrentSend: Send + Sync {
    /// Write one message from any thread
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// Builds the transport for a channel
///
/// This is the configuration a proxy is initialized with: it names the
/// channel and knows how to construct its endpoint.
pub trait ChannelFactory: Send {
    /// Name of the channel, remembered by the proxy
    fn channel_id(&self) -> String;

    /// Construct the transport for the given mode
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be created.
    fn build(self: Box<Self>, mode: ChannelMode) -> Result<Box<dyn Transport>, TransportError>;
}

/// Recipient of everything a transport receives
///
/// Each call posts an event to the owning proxy's transport-context queue,
/// so events are handled in the order they are reported. Reporting after the
/// proxy has torn down is a silent no-op.
#[derive(Clone)]
pub struct TransportEvents {
    tx: tokio::sync::mpsc::UnboundedSender<IoTask>,
}

impl TransportEvents {
    pub(crate) fn new(tx: tokio::sync::mpsc::UnboundedSender<IoTask>) -> Self {
        Self { tx }
    }

    /// A message arrived from the peer
    pub fn message(&self, message: Message) {
        let _ = self.tx.send(IoTask::TransportMessage(message));
    }

    /// The peer completed the handshake
    pub fn connected(&self, peer: PeerId) {
        let _ = self.tx.send(IoTask::TransportConnected(peer));
    }

    /// The channel failed or the peer went away
    pub fn error(&self) {
        let _ = self.tx.send(IoTask::TransportError);
    }

    /// Whether the owning proxy is still accepting events
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("open", &self.is_open())
            .finish()
    }
}
