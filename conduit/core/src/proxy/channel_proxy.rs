//! Channel Proxy
//!
//! The owner-context façade over a transport driven on another context.
//! Nothing here blocks: every operation either completes locally or posts a
//! task to the transport context and returns.
//!
//! # Usage
//!
//! ```ignore
//! let io = IoThread::spawn("conduit-io")?;
//! let owner = Scheduler::current("owner").expect("inside a tokio runtime");
//!
//! let mut proxy = ChannelProxy::new(listener, owner, io.scheduler());
//! proxy.add_filter(Arc::new(InputFilter::default()));
//! proxy.init(Box::new(factory), ChannelMode::Server, false)?;
//!
//! proxy.send(Message::new(RoutingId(7), HELLO, "hi"));
//! // ... listener callbacks arrive on `owner` ...
//! proxy.close();
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::filter::{MessageFilter, OutgoingMessageFilter};
use crate::listener::Listener;
use crate::message::{Message, PeerId};
use crate::scheduler::Scheduler;
use crate::transport::{ChannelFactory, ChannelMode};

use super::context::{IoTask, ProxyContext};

/// Owner-side handle to a channel running on a transport context
///
/// Dropping the proxy closes it.
pub struct ChannelProxy {
    context: Arc<ProxyContext>,
    outgoing_filter: Option<Arc<dyn OutgoingMessageFilter>>,
    did_init: bool,
}

impl ChannelProxy {
    /// Create a proxy without a channel yet
    ///
    /// Callbacks for `listener` run on `listener_scheduler`; the transport is
    /// driven on `io_scheduler`. Call [`ChannelProxy::init`] to build and
    /// open the channel.
    ///
    /// # Panics
    ///
    /// Panics if called from `io_scheduler` or if both schedulers are the
    /// same context.
    pub fn new(
        listener: Arc<dyn Listener>,
        listener_scheduler: Scheduler,
        io_scheduler: Scheduler,
    ) -> Self {
        assert!(
            !io_scheduler.is_current(),
            "ChannelProxy must not be created on its transport scheduler"
        );
        assert_ne!(
            listener_scheduler.id(),
            io_scheduler.id(),
            "ChannelProxy needs distinct owner and transport schedulers"
        );

        Self {
            context: ProxyContext::start(listener, listener_scheduler, io_scheduler),
            outgoing_filter: None,
            did_init: false,
        }
    }

    /// Create a proxy and schedule channel construction on the transport
    /// context
    ///
    /// # Errors
    ///
    /// Never fails with deferred construction; the signature matches
    /// [`ChannelProxy::init`].
    pub fn create(
        factory: Box<dyn ChannelFactory>,
        mode: ChannelMode,
        listener: Arc<dyn Listener>,
        listener_scheduler: Scheduler,
        io_scheduler: Scheduler,
    ) -> Result<Self, ProxyError> {
        let mut proxy = Self::new(listener, listener_scheduler, io_scheduler);
        proxy.init(factory, mode, false)?;
        Ok(proxy)
    }

    /// Create a proxy using the mode and construction policy from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or immediate
    /// construction fails.
    pub fn from_config(
        config: &ProxyConfig,
        factory: Box<dyn ChannelFactory>,
        listener: Arc<dyn Listener>,
        listener_scheduler: Scheduler,
        io_scheduler: Scheduler,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        let mut proxy = Self::new(listener, listener_scheduler, io_scheduler);
        proxy.init(factory, config.mode, config.create_immediately)?;
        Ok(proxy)
    }

    /// Build the channel and start pumping it
    ///
    /// With `create_immediately` the transport is built right here, on the
    /// owner context, so the endpoint exists before this call returns (peers
    /// that discover the channel by name need that). Otherwise it is built
    /// on the transport context. Either way the channel is opened on the
    /// transport context afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Transport` if immediate construction fails.
    /// Deferred construction failures are reported as
    /// `Listener::on_channel_error`.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init(
        &mut self,
        factory: Box<dyn ChannelFactory>,
        mode: ChannelMode,
        create_immediately: bool,
    ) -> Result<(), ProxyError> {
        assert!(!self.did_init, "ChannelProxy::init called twice");
        self.did_init = true;

        let channel_id = factory.channel_id();
        tracing::debug!(channel = %channel_id, %mode, create_immediately, "Initializing channel proxy");

        if create_immediately {
            let transport = factory.build(mode)?;
            self.context.post_io(IoTask::InstallTransport {
                transport,
                channel_id,
            });
        } else {
            self.context
                .post_io(IoTask::ConstructTransport { factory, mode });
        }

        self.context.post_io(IoTask::OpenAndPump);
        Ok(())
    }

    /// Install a rewrite applied to every message passed to `send`
    pub fn set_outgoing_message_filter(&mut self, filter: Arc<dyn OutgoingMessageFilter>) {
        self.outgoing_filter = Some(filter);
    }

    /// Send a message to the peer
    ///
    /// Always returns `true`: the result says nothing about whether the
    /// transport write succeeds. Messages sent before the channel connects
    /// are held and flushed on connect; messages sent after `close` are
    /// dropped.
    pub fn send(&self, message: Message) -> bool {
        let message = match &self.outgoing_filter {
            Some(filter) => filter.rewrite(message),
            None => message,
        };
        self.context.send(message);
        true
    }

    /// Add a filter
    ///
    /// If the channel is not open yet the filter waits until it is.
    pub fn add_filter(&self, filter: Arc<dyn MessageFilter>) {
        self.context.add_filter(filter);
    }

    /// Remove a filter
    ///
    /// Safe for filters that were never installed or already removed.
    pub fn remove_filter(&self, filter: &Arc<dyn MessageFilter>) {
        self.context.remove_filter(Arc::clone(filter));
    }

    /// Stop all deliveries and tear the channel down
    ///
    /// No listener callback runs after this returns. Filters are notified
    /// and the transport released later, on the transport context. Calling
    /// it again has no effect.
    pub fn close(&self) {
        if self.context.close() {
            tracing::trace!(
                io = %self.context.io_scheduler().id(),
                "Teardown scheduled"
            );
        }
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    /// Identity of the peer, once the handshake has completed
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        self.context.peer_id()
    }

    /// Name of the channel, once its transport has been constructed
    #[must_use]
    pub fn channel_id(&self) -> Option<String> {
        self.context.channel_id().map(str::to_string)
    }

    /// Scheduler the listener callbacks run on
    #[must_use]
    pub fn listener_scheduler(&self) -> &Scheduler {
        self.context.listener_scheduler()
    }

    /// Scheduler the transport is driven on
    #[must_use]
    pub fn io_scheduler(&self) -> &Scheduler {
        self.context.io_scheduler()
    }
}

impl Drop for ChannelProxy {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChannelProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProxy")
            .field("channel_id", &self.context.channel_id())
            .field("peer_id", &self.context.peer_id())
            .field("closed", &self.context.is_closed())
            .field("did_init", &self.did_init)
            .finish()
    }
}
