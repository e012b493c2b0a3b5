//! Transport Layer
//!
//! The lower-level channel a proxy wraps. A proxy never touches bytes: it
//! hands whole [`Message`](crate::Message)s to a [`Transport`] on the
//! transport context and receives whole messages back through
//! [`TransportEvents`].
//!
//! Provided implementations:
//! - `LoopbackTransport`: two in-process endpoints joined by channels

pub mod loopback;
pub mod traits;

// Re-exports for convenience
pub use loopback::{LoopbackFactory, LoopbackTransport};
pub use traits::{
    ChannelFactory, ChannelMode, ConcurrentSend, Transport, TransportError, TransportEvents,
};
