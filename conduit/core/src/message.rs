//! Channel Messages
//!
//! The addressed unit of data that travels through a channel proxy.
//!
//! A [`Message`] is built once by the sender and then moved, never shared,
//! from the owner context into the transport context (or the other way
//! around). The only mutable part is the dispatch-error mark, which a filter
//! or listener sets when it finds the message structurally invalid.
//!
//! # Message Type Layout
//!
//! ```text
//! +------------------+------------------+
//! | class (16 bits)  | line (16 bits)   |
//! +------------------+------------------+
//! ```
//!
//! Filters select the messages they care about by [`MessageClass`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

/// Routing identifier carried by every message
///
/// Identifies the logical endpoint (a frame, a worker, a debugger session)
/// on the other side of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingId(pub i32);

impl RoutingId {
    /// No routing information
    pub const NONE: Self = Self(-2);
    /// Messages addressed to the channel itself rather than an endpoint
    pub const CONTROL: Self = Self(i32::MAX);

    /// Get the raw value
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "route-none"),
            Self::CONTROL => write!(f, "route-control"),
            Self(id) => write!(f, "route-{id}"),
        }
    }
}

/// Message class, the upper half of a message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageClass(pub u16);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class-{}", self.0)
    }
}

/// Delivery priority hint for the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Background traffic
    Low,
    /// Regular traffic
    #[default]
    Normal,
    /// Latency-sensitive traffic (input, lifecycle)
    High,
}

/// Identity of the entity on the far end of a channel
///
/// Only known once the transport has completed its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Get the raw value
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// An addressed message with an opaque payload
#[derive(Debug)]
pub struct Message {
    routing_id: RoutingId,
    message_type: u32,
    priority: Priority,
    payload: Bytes,
    /// Set by whoever handled the message and found it malformed
    dispatch_error: AtomicBool,
}

impl Message {
    /// Create a message with normal priority
    pub fn new(routing_id: RoutingId, message_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            routing_id,
            message_type,
            priority: Priority::Normal,
            payload: payload.into(),
            dispatch_error: AtomicBool::new(false),
        }
    }

    /// Create a message whose type is built from a class and a line number
    pub fn with_class(
        routing_id: RoutingId,
        class: MessageClass,
        line: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(routing_id, message_type(class, line), payload)
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Routing identifier
    #[must_use]
    pub fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    /// Full message type
    #[must_use]
    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    /// Class of this message
    #[must_use]
    pub fn class(&self) -> MessageClass {
        MessageClass((self.message_type >> 16) as u16)
    }

    /// Line within the class
    #[must_use]
    pub fn line(&self) -> u16 {
        (self.message_type & 0xFFFF) as u16
    }

    /// Priority hint
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Opaque payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message and return its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Mark the message as structurally invalid
    ///
    /// Handlers call this while processing the message. The proxy then
    /// reports the message through `Listener::on_bad_message_received`.
    pub fn mark_dispatch_error(&self) {
        self.dispatch_error.store(true, Ordering::Release);
    }

    /// Whether a handler marked the message as malformed
    #[must_use]
    pub fn dispatch_error(&self) -> bool {
        self.dispatch_error.load(Ordering::Acquire)
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            routing_id: self.routing_id,
            message_type: self.message_type,
            priority: self.priority,
            payload: self.payload.clone(),
            dispatch_error: AtomicBool::new(self.dispatch_error()),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.routing_id == other.routing_id
            && self.message_type == other.message_type
            && self.priority == other.priority
            && self.payload == other.payload
    }
}

impl Eq for Message {}

/// Build a message type from a class and a line number
#[must_use]
pub fn message_type(class: MessageClass, line: u16) -> u32 {
    (u32::from(class.0) << 16) | u32::from(line)
}
