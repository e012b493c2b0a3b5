//! Channel Proxy
//!
//! Lets code on one execution context exchange messages over a transport
//! driven on another, without either side ever blocking on the other.
//!
//! - [`ChannelProxy`]: the owner-context façade
//! - `ProxyContext`: the shared state and the two dispatch tasks behind it

mod channel_proxy;
mod context;

pub use channel_proxy::ChannelProxy;
pub(crate) use context::IoTask;
