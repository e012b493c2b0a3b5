//! Conduit Core - Cross-Context Message Channel Proxy
//!
//! Lets application code on one execution context (the *owner*) exchange
//! messages with a peer over a transport that is driven on a different,
//! dedicated execution context (the *transport context*), without either
//! side blocking on the other.
//!
//! # Architecture
//!
//! ```text
//!   owner context                         transport context
//!  ┌──────────────────┐   send / filters   ┌──────────────────────────┐
//!  │  ChannelProxy    │ ─────────────────► │  Transport               │
//!  │                  │                    │    │ inbound             │
//!  │  Listener  ◄─────┼─── unclaimed ───── │  FilterRouter ──► filters│
//!  └──────────────────┘    messages,       └──────────────────────────┘
//!                          connect, error
//! ```
//!
//! # Key Types
//!
//! - [`ChannelProxy`]: owner-side façade (`send`, `add_filter`, `close`, ...)
//! - [`Listener`]: implemented by the owner to receive messages and events
//! - [`MessageFilter`]: intercepts inbound messages on the transport context
//! - [`Transport`] / [`ChannelFactory`]: the lower-level channel being proxied
//! - [`Scheduler`] / [`IoThread`]: the two execution contexts
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use conduit_core::{ChannelMode, ChannelProxy, IoThread, LoopbackFactory, PeerId, Scheduler};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), conduit_core::ProxyError> {
//!     let io = IoThread::spawn("conduit-io")?;
//!     let owner = Scheduler::current("owner").expect("inside a runtime");
//!     let (ours, _theirs) = LoopbackFactory::pair("demo", PeerId(1), PeerId(2));
//!
//!     let proxy = ChannelProxy::create(
//!         Box::new(ours),
//!         ChannelMode::Server,
//!         Arc::new(MyListener),
//!         owner,
//!         io.scheduler(),
//!     )?;
//!     proxy.send(conduit_core::Message::new(conduit_core::RoutingId(1), 1, "hello"));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`message`]: message envelope, routing ids, classes, peer ids
//! - [`scheduler`]: execution contexts and the dedicated I/O thread
//! - [`transport`]: transport traits and the in-process loopback transport
//! - [`filter`]: message filters and the filter router
//! - [`listener`]: the owner-side callback interface
//! - [`proxy`]: the channel proxy
//! - [`config`]: proxy configuration
//! - [`error`]: setup errors

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod filter;
pub mod listener;
pub mod message;
pub mod proxy;
pub mod scheduler;
pub mod transport;

// Re-exports for convenience
pub use config::{ConfigError, ProxyConfig};
pub use error::ProxyError;
pub use filter::{ChannelHandle, FilterRouter, MessageFilter, OutgoingMessageFilter};
pub use listener::Listener;
pub use message::{message_type, Message, MessageClass, PeerId, Priority, RoutingId};
pub use proxy::ChannelProxy;
pub use scheduler::{IoThread, Scheduler, SchedulerId};
pub use transport::{
    ChannelFactory, ChannelMode, ConcurrentSend, LoopbackFactory, LoopbackTransport, Transport,
    TransportError, TransportEvents,
};
