//! Message Filters
//!
//! Filters run on the transport context and get the first look at every
//! inbound message. A filter that claims a message handles it completely;
//! the owner never sees it. Filters are also told about connection, error,
//! and closing events so they can manage their own resources.
//!
//! # Lifecycle
//!
//! ```text
//!   add_filter()        channel open          remove_filter() / close()
//!        │                    │                          │
//!        ▼                    ▼                          ▼
//!   ┌─────────┐   on_filter_added()   ┌────────┐   on_filter_removed()
//!   │ pending │ ────────────────────► │ active │ ─────────────────────►
//!   └─────────┘                       └────────┘
//! ```
//!
//! A filter moves from pending to active exactly once. Removing a filter
//! that was never installed is allowed and does not call
//! `on_filter_removed`.
//!
//! Filters are shared between the owner (who keeps a handle so it can remove
//! them later) and the transport context, hence `Send + Sync`. They are never
//! invoked concurrently with themselves for a given proxy.

pub mod router;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::{Message, MessageClass, PeerId};
use crate::proxy::IoTask;

pub use router::FilterRouter;

/// Logic that may intercept inbound messages on the transport context
pub trait MessageFilter: Send + Sync {
    /// The filter was installed on an open channel
    ///
    /// `channel` may be kept to send replies from the transport context.
    fn on_filter_added(&self, _channel: &ChannelHandle) {}

    /// The filter was removed, either explicitly or because the channel
    /// closed
    fn on_filter_removed(&self) {}

    /// The peer completed the handshake
    fn on_channel_connected(&self, _peer: PeerId) {}

    /// The channel failed
    fn on_channel_error(&self) {}

    /// The channel is closing; called right before `on_filter_removed`
    fn on_channel_closing(&self) {}

    /// Offer an inbound message; return `true` to claim it
    ///
    /// A filter may call `Message::mark_dispatch_error` to report the
    /// message as malformed to the owner.
    fn on_message_received(&self, _message: &Message) -> bool {
        false
    }

    /// Message classes this filter wants to see; empty means all classes
    ///
    /// Read once, when the filter is installed.
    fn supported_message_classes(&self) -> Vec<MessageClass> {
        Vec::new()
    }
}

/// Rewrites every outbound message before it leaves the owner context
pub trait OutgoingMessageFilter: Send + Sync {
    /// Return the message to send in place of `message`
    fn rewrite(&self, message: Message) -> Message;
}

/// Whether two handles point at the same filter instance
pub(crate) fn same_filter(a: &Arc<dyn MessageFilter>, b: &Arc<dyn MessageFilter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Send-side view of a channel given to filters
///
/// Messages sent through the handle go through the proxy's transport-context
/// queue. They stay in order with owner sends that are queued too; once the
/// transport allows concurrent sends, owner sends bypass the queue and no
/// ordering between the two holds.
#[derive(Clone)]
pub struct ChannelHandle {
    channel_id: Arc<str>,
    tx: mpsc::UnboundedSender<IoTask>,
}

impl ChannelHandle {
    pub(crate) fn new(channel_id: Arc<str>, tx: mpsc::UnboundedSender<IoTask>) -> Self {
        Self { channel_id, tx }
    }

    /// Name of the channel
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Queue a message for the transport
    ///
    /// Returns `false` once the channel has been torn down.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(IoTask::Send(message)).is_ok()
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}
