//! Owner-Side Listener
//!
//! The application's end of a channel proxy. All methods are invoked on the
//! owner scheduler, in the order the transport produced the underlying
//! events, and never after `ChannelProxy::close` has been called.

use crate::message::{Message, PeerId};

/// Receives messages and connection events from a channel proxy
pub trait Listener: Send + Sync {
    /// A message arrived that no filter claimed
    ///
    /// Return whether the message was understood. Call
    /// `Message::mark_dispatch_error` to have the proxy follow up with
    /// [`Listener::on_bad_message_received`].
    fn on_message_received(&self, message: &Message) -> bool;

    /// The channel is connected to a peer
    ///
    /// Delivered at most once, and always before the first message or
    /// bad-message report. The identity is `None` only when a message
    /// overtook the handshake.
    fn on_channel_connected(&self, _peer: Option<PeerId>) {}

    /// The channel failed to connect or broke after connecting
    fn on_channel_error(&self) {}

    /// A message was marked malformed by a filter or by this listener
    ///
    /// Whether that is fatal for the peer is the owner's decision.
    fn on_bad_message_received(&self, _message: &Message) {}
}
