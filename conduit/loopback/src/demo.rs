//! Listener and filters used by the loopback run
//!
//! ```text
//!   driver proxy                               echo proxy
//!  ┌──────────────────────┐   loopback pair   ┌──────────────────────┐
//!  │ ClassFilter (--class)│ ◄───────────────► │ EchoFilter           │
//!  │ ReportingListener    │                   │ ReportingListener    │
//!  └──────────────────────┘                   └──────────────────────┘
//! ```
//!
//! The echo side answers every message from its transport context, so its
//! owner only ever sees the connection. On the driver side, echoes in the
//! intercepted class stop at `ClassFilter`; the rest reach the listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use conduit_core::{ChannelHandle, Listener, Message, MessageClass, MessageFilter, PeerId};

/// Which proxy an outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Driver,
    Echo,
}

/// Something the driver loop waits for
#[derive(Debug)]
pub enum Outcome {
    Connected(Side, Option<PeerId>),
    Received(Side, Message),
    Filtered(Message),
    Error(Side),
}

/// Forwards owner-side callbacks to the driver loop
pub struct ReportingListener {
    side: Side,
    tx: mpsc::UnboundedSender<Outcome>,
}

impl ReportingListener {
    pub fn new(side: Side, tx: mpsc::UnboundedSender<Outcome>) -> Arc<Self> {
        Arc::new(Self { side, tx })
    }
}

impl Listener for ReportingListener {
    fn on_message_received(&self, message: &Message) -> bool {
        let _ = self.tx.send(Outcome::Received(self.side, message.clone()));
        true
    }

    fn on_channel_connected(&self, peer: Option<PeerId>) {
        let _ = self.tx.send(Outcome::Connected(self.side, peer));
    }

    fn on_channel_error(&self) {
        let _ = self.tx.send(Outcome::Error(self.side));
    }

    fn on_bad_message_received(&self, message: &Message) {
        tracing::warn!(routing_id = %message.routing_id(), "Malformed message");
    }
}

/// Claims every message and sends it straight back
#[derive(Default)]
pub struct EchoFilter {
    channel: Mutex<Option<ChannelHandle>>,
    echoed: AtomicUsize,
}

impl EchoFilter {
    pub fn echoed(&self) -> usize {
        self.echoed.load(Ordering::Relaxed)
    }
}

impl MessageFilter for EchoFilter {
    fn on_filter_added(&self, channel: &ChannelHandle) {
        tracing::debug!(channel = channel.channel_id(), "Echo filter installed");
        *self.channel.lock() = Some(channel.clone());
    }

    fn on_filter_removed(&self) {
        self.channel.lock().take();
    }

    fn on_message_received(&self, message: &Message) -> bool {
        let channel = self.channel.lock();
        let Some(channel) = channel.as_ref() else {
            return false;
        };
        if channel.send(message.clone()) {
            self.echoed.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

/// Intercepts one message class on the driver side
pub struct ClassFilter {
    class: MessageClass,
    tx: mpsc::UnboundedSender<Outcome>,
}

impl ClassFilter {
    pub fn new(class: MessageClass, tx: mpsc::UnboundedSender<Outcome>) -> Arc<Self> {
        Arc::new(Self { class, tx })
    }
}

impl MessageFilter for ClassFilter {
    fn on_message_received(&self, message: &Message) -> bool {
        let _ = self.tx.send(Outcome::Filtered(message.clone()));
        true
    }

    fn supported_message_classes(&self) -> Vec<MessageClass> {
        vec![self.class]
    }
}
