//! Proxy Context
//!
//! State shared between a `ChannelProxy` on the owner context and the pump
//! that drives its transport on the transport context.
//!
//! # Architecture
//!
//! ```text
//!        owner scheduler                          transport scheduler
//!   ┌──────────────────────┐    IoTask (FIFO)    ┌──────────────────────┐
//!   │ ChannelProxy         │ ──────────────────► │ IoState (run_io)     │
//!   │   send / add_filter  │                     │   Transport          │
//!   │   close              │                     │   FilterRouter       │
//!   │                      │  ListenerTask (FIFO)│   outbound buffer    │
//!   │ run_listener ◄───────┼──────────────────── │                      │
//!   │   Listener callbacks │                     └──────────────────────┘
//!   └──────────────────────┘
//!                  ▲                                   ▲
//!                  └───────── Arc<ProxyContext> ───────┘
//! ```
//!
//! Each direction is a single unbounded channel drained by exactly one task,
//! so ordering is preserved in both directions and filters never run
//! concurrently with themselves. Transport-side state (`IoState`) is owned
//! by the pump task and never locked. The only cross-context fields are:
//!
//! - the listener slot and the `closed` flag, written by the owner
//! - the pending-filter inbox, pushed by the owner and drained by the pump
//! - the peer identity and channel id, written once by the pump
//! - the concurrent-send capability, published by the pump once connected
//!
//! # Lifetime
//!
//! The pump holds a strong reference to the context from construction until
//! it runs the teardown task. The owner-side dispatcher holds one until the
//! pump drops its end of the listener queue. The context is destroyed when
//! the proxy and both tasks are gone.

use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::filter::{same_filter, ChannelHandle, FilterRouter, MessageFilter};
use crate::listener::Listener;
use crate::message::{Message, PeerId};
use crate::scheduler::Scheduler;
use crate::transport::{
    ChannelFactory, ChannelMode, ConcurrentSend, Transport, TransportEvents,
};

/// Work for the transport context
pub(crate) enum IoTask {
    /// Build the transport on the transport context
    ConstructTransport {
        factory: Box<dyn ChannelFactory>,
        mode: ChannelMode,
    },
    /// Adopt a transport built on the owner context
    InstallTransport {
        transport: Box<dyn Transport>,
        channel_id: String,
    },
    /// Connect the transport and start pumping
    OpenAndPump,
    /// Message queued by the owner
    OwnerSend(Message),
    /// Message queued from the transport context (filter replies)
    Send(Message),
    /// Install filters waiting in the pending inbox
    AddFilters,
    /// Remove a filter, pending or active
    RemoveFilter(Arc<dyn MessageFilter>),
    /// Inbound message reported by the transport
    TransportMessage(Message),
    /// Peer handshake reported by the transport
    TransportConnected(PeerId),
    /// Failure reported by the transport
    TransportError,
    /// Release everything and stop the pump
    Teardown,
}

impl fmt::Debug for IoTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstructTransport { mode, .. } => {
                f.debug_struct("ConstructTransport").field("mode", mode).finish()
            }
            Self::InstallTransport { channel_id, .. } => f
                .debug_struct("InstallTransport")
                .field("channel_id", channel_id)
                .finish(),
            Self::OpenAndPump => f.write_str("OpenAndPump"),
            Self::OwnerSend(m) => f.debug_tuple("OwnerSend").field(m).finish(),
            Self::Send(m) => f.debug_tuple("Send").field(m).finish(),
            Self::AddFilters => f.write_str("AddFilters"),
            Self::RemoveFilter(_) => f.write_str("RemoveFilter"),
            Self::TransportMessage(m) => f.debug_tuple("TransportMessage").field(m).finish(),
            Self::TransportConnected(p) => f.debug_tuple("TransportConnected").field(p).finish(),
            Self::TransportError => f.write_str("TransportError"),
            Self::Teardown => f.write_str("Teardown"),
        }
    }
}

/// Work for the owner context
#[derive(Debug)]
pub(crate) enum ListenerTask {
    Message(Message),
    BadMessage(Message),
    Connected(PeerId),
    Error,
}

/// Transport-side connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// No transport, or not yet connected
    Unconnected,
    /// `Transport::connect` succeeded
    Connected,
    /// Connect failed or teardown ran; the transport is gone
    Closed,
}

/// Shared state of one channel proxy
pub(crate) struct ProxyContext {
    listener: RwLock<Option<Arc<dyn Listener>>>,
    listener_scheduler: Scheduler,
    io_scheduler: Scheduler,
    io_tx: mpsc::UnboundedSender<IoTask>,

    /// Filters added by the owner, not yet installed
    pending_filters: Mutex<Vec<Arc<dyn MessageFilter>>>,

    peer: OnceLock<PeerId>,
    channel_id: OnceLock<Arc<str>>,

    /// Published by the pump once a capable transport is connected
    concurrent_sender: RwLock<Option<Arc<dyn ConcurrentSend>>>,
    /// Owner sends queued but not yet written by the pump
    queued_sends: AtomicUsize,
    send_order: Mutex<()>,

    /// Owner has called close
    closed: AtomicBool,
    /// Owner has seen `on_channel_connected`
    peer_delivered: AtomicBool,
}

impl ProxyContext {
    /// Create the context and start its two dispatch tasks
    pub(crate) fn start(
        listener: Arc<dyn Listener>,
        listener_scheduler: Scheduler,
        io_scheduler: Scheduler,
    ) -> Arc<Self> {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (listener_tx, listener_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(Self {
            listener: RwLock::new(Some(listener)),
            listener_scheduler,
            io_scheduler,
            io_tx,
            pending_filters: Mutex::new(Vec::new()),
            peer: OnceLock::new(),
            channel_id: OnceLock::new(),
            concurrent_sender: RwLock::new(None),
            queued_sends: AtomicUsize::new(0),
            send_order: Mutex::new(()),
            closed: AtomicBool::new(false),
            peer_delivered: AtomicBool::new(false),
        });

        ctx.io_scheduler
            .post(run_io(Arc::clone(&ctx), io_rx, listener_tx));
        ctx.listener_scheduler
            .post(run_listener(Arc::clone(&ctx), listener_rx));

        tracing::debug!(
            owner = %ctx.listener_scheduler.id(),
            io = %ctx.io_scheduler.id(),
            "Channel proxy context started"
        );
        ctx
    }

    // =========================================================================
    // Owner-side entry points
    // =========================================================================

    /// Queue work for the transport context
    ///
    /// Returns `false` once the pump has torn down.
    pub(crate) fn post_io(&self, task: IoTask) -> bool {
        self.io_tx.send(task).is_ok()
    }

    /// Send from the owner context
    pub(crate) fn send(&self, message: Message) {
        if self.is_closed() {
            tracing::trace!(
                channel = self.channel_label(),
                routing_id = %message.routing_id(),
                "Dropping message sent after close"
            );
            return;
        }

        let _order = self.send_order.lock();

        // The direct path is only taken once every queued send has been
        // written, so it never overtakes them.
        if self.queued_sends.load(Ordering::Acquire) == 0 {
            let sender = self.concurrent_sender.read().clone();
            if let Some(sender) = sender {
                if let Err(e) = sender.send(message) {
                    tracing::debug!(channel = self.channel_label(), error = %e, "Direct send failed");
                }
                return;
            }
        }

        self.queued_sends.fetch_add(1, Ordering::AcqRel);
        if !self.post_io(IoTask::OwnerSend(message)) {
            self.queued_sends.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(channel = self.channel_label(), "Channel already torn down");
        }
    }

    /// Add a filter to the pending inbox and ask the pump to install it
    pub(crate) fn add_filter(&self, filter: Arc<dyn MessageFilter>) {
        if self.is_closed() {
            tracing::debug!(channel = self.channel_label(), "Ignoring filter added after close");
            return;
        }
        self.pending_filters.lock().push(filter);
        self.post_io(IoTask::AddFilters);
    }

    /// Ask the pump to remove a filter wherever it is
    pub(crate) fn remove_filter(&self, filter: Arc<dyn MessageFilter>) {
        self.post_io(IoTask::RemoveFilter(filter));
    }

    /// Stop deliveries and schedule teardown
    ///
    /// Returns `false` if the context was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.listener.write().take();
        self.post_io(IoTask::Teardown);
        tracing::debug!(channel = self.channel_label(), "Channel proxy closed");
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Peer identity, once the handshake completed
    pub(crate) fn peer_id(&self) -> Option<PeerId> {
        self.peer.get().copied()
    }

    /// Channel name, once the transport was constructed
    pub(crate) fn channel_id(&self) -> Option<&str> {
        self.channel_id.get().map(AsRef::as_ref)
    }

    pub(crate) fn io_scheduler(&self) -> &Scheduler {
        &self.io_scheduler
    }

    pub(crate) fn listener_scheduler(&self) -> &Scheduler {
        &self.listener_scheduler
    }

    fn channel_label(&self) -> &str {
        self.channel_id().unwrap_or("<unnamed>")
    }

    // =========================================================================
    // Owner-side dispatch
    // =========================================================================

    /// Listener to deliver to, unless the owner has closed the proxy
    fn listener(&self) -> Option<Arc<dyn Listener>> {
        if self.is_closed() {
            return None;
        }
        self.listener.read().clone()
    }

    fn dispatch(&self, task: ListenerTask) {
        debug_assert!(self.listener_scheduler.is_current());

        match task {
            ListenerTask::Message(message) => self.deliver_message(&message),
            ListenerTask::BadMessage(message) => self.deliver_bad_message(&message),
            ListenerTask::Connected(peer) => self.deliver_connected(Some(peer)),
            ListenerTask::Error => self.deliver_error(),
        }
    }

    fn deliver_message(&self, message: &Message) {
        // A message can overtake the connect notification; the owner still
        // sees the connection first.
        self.deliver_connected(self.peer_id());

        // The connect callback may have closed the proxy.
        let Some(listener) = self.listener() else {
            return;
        };

        tracing::trace!(
            channel = self.channel_label(),
            routing_id = %message.routing_id(),
            message_type = message.message_type(),
            "Dispatching message"
        );
        listener.on_message_received(message);

        if message.dispatch_error() && !self.is_closed() {
            listener.on_bad_message_received(message);
        }
    }

    fn deliver_bad_message(&self, message: &Message) {
        self.deliver_connected(self.peer_id());
        if let Some(listener) = self.listener() {
            listener.on_bad_message_received(message);
        }
    }

    fn deliver_connected(&self, peer: Option<PeerId>) {
        let Some(listener) = self.listener() else {
            return;
        };
        if self.peer_delivered.swap(true, Ordering::AcqRel) {
            return;
        }
        listener.on_channel_connected(peer);
    }

    fn deliver_error(&self) {
        if let Some(listener) = self.listener() {
            listener.on_channel_error();
        }
    }
}

async fn run_listener(ctx: Arc<ProxyContext>, mut rx: mpsc::UnboundedReceiver<ListenerTask>) {
    while let Some(task) = rx.recv().await {
        ctx.dispatch(task);
    }
    tracing::trace!(channel = ctx.channel_label(), "Owner dispatcher finished");
}

async fn run_io(
    ctx: Arc<ProxyContext>,
    mut rx: mpsc::UnboundedReceiver<IoTask>,
    listener_tx: mpsc::UnboundedSender<ListenerTask>,
) {
    let mut io = IoState::new(ctx, listener_tx);
    while let Some(task) = rx.recv().await {
        if io.run(task).is_break() {
            break;
        }
    }
    // Dropping `rx` discards whatever was queued after teardown
}

// =============================================================================
// Transport-side state
// =============================================================================

/// Everything only the transport context touches
struct IoState {
    ctx: Arc<ProxyContext>,
    listener_tx: mpsc::UnboundedSender<ListenerTask>,
    transport: Option<Box<dyn Transport>>,
    router: FilterRouter,
    state: ConnectionState,
    /// Sends that arrived before the transport connected
    outbound: VecDeque<Message>,
    peer_connected: bool,
}

impl IoState {
    fn new(ctx: Arc<ProxyContext>, listener_tx: mpsc::UnboundedSender<ListenerTask>) -> Self {
        Self {
            ctx,
            listener_tx,
            transport: None,
            router: FilterRouter::new(),
            state: ConnectionState::Unconnected,
            outbound: VecDeque::new(),
            peer_connected: false,
        }
    }

    fn run(&mut self, task: IoTask) -> ControlFlow<()> {
        debug_assert!(self.ctx.io_scheduler.is_current());

        match task {
            IoTask::ConstructTransport { factory, mode } => self.construct_transport(factory, mode),
            IoTask::InstallTransport {
                transport,
                channel_id,
            } => self.install_transport(transport, channel_id),
            IoTask::OpenAndPump => self.open_and_pump(),
            IoTask::OwnerSend(message) => {
                self.write(message);
                self.ctx.queued_sends.fetch_sub(1, Ordering::AcqRel);
            }
            IoTask::Send(message) => self.write(message),
            IoTask::AddFilters => {
                if self.state == ConnectionState::Connected {
                    self.install_pending_filters();
                }
            }
            IoTask::RemoveFilter(filter) => self.remove_filter(&filter),
            IoTask::TransportMessage(message) => {
                self.on_transport_message(message);
            }
            IoTask::TransportConnected(peer) => self.on_transport_connected(peer),
            IoTask::TransportError => self.on_transport_error(),
            IoTask::Teardown => {
                self.teardown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn post_to_owner(&self, task: ListenerTask) {
        let _ = self.listener_tx.send(task);
    }

    fn channel_handle(&self) -> ChannelHandle {
        let id = self
            .ctx
            .channel_id
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::from(""));
        ChannelHandle::new(id, self.ctx.io_tx.clone())
    }

    fn construct_transport(&mut self, factory: Box<dyn ChannelFactory>, mode: ChannelMode) {
        let channel_id = factory.channel_id();
        match factory.build(mode) {
            Ok(transport) => self.install_transport(transport, channel_id),
            Err(e) => {
                let _ = self.ctx.channel_id.set(Arc::from(channel_id.as_str()));
                tracing::warn!(channel = %channel_id, %mode, error = %e, "Failed to construct transport");
            }
        }
    }

    fn install_transport(&mut self, transport: Box<dyn Transport>, channel_id: String) {
        let _ = self.ctx.channel_id.set(Arc::from(channel_id.as_str()));
        if self.transport.replace(transport).is_some() {
            tracing::warn!(channel = %channel_id, "Replacing an existing transport");
        }
        tracing::debug!(channel = %channel_id, "Transport constructed");
    }

    fn open_and_pump(&mut self) {
        if self.state != ConnectionState::Unconnected {
            tracing::warn!(channel = self.ctx.channel_label(), state = ?self.state, "Channel already opened");
            return;
        }

        let events = TransportEvents::new(self.ctx.io_tx.clone());
        let result = match self.transport.as_mut() {
            Some(transport) => transport.connect(events),
            None => Err(crate::transport::TransportError::InvalidState(
                "no transport constructed".to_string(),
            )),
        };

        if let Err(e) = result {
            tracing::warn!(channel = self.ctx.channel_label(), error = %e, "Channel connect failed");
            if let Some(mut transport) = self.transport.take() {
                transport.close();
            }
            self.state = ConnectionState::Closed;
            let dropped = self.outbound.len();
            self.outbound.clear();
            if dropped > 0 {
                tracing::debug!(channel = self.ctx.channel_label(), dropped, "Discarded queued messages");
            }
            self.on_transport_error();
            return;
        }

        self.state = ConnectionState::Connected;
        tracing::info!(channel = self.ctx.channel_label(), "Channel opened");

        self.install_pending_filters();

        let flushed = self.outbound.len();
        while let Some(message) = self.outbound.pop_front() {
            self.write(message);
        }
        if flushed > 0 {
            tracing::debug!(channel = self.ctx.channel_label(), flushed, "Flushed queued messages");
        }

        if let Some(sender) = self.transport.as_ref().and_then(|t| t.concurrent_sender()) {
            *self.ctx.concurrent_sender.write() = Some(sender);
            tracing::debug!(channel = self.ctx.channel_label(), "Direct sends enabled");
        }
    }

    fn write(&mut self, message: Message) {
        match (self.state, self.transport.as_mut()) {
            (ConnectionState::Connected, Some(transport)) => {
                let routing_id = message.routing_id();
                if let Err(e) = transport.send(message) {
                    tracing::debug!(
                        channel = self.ctx.channel_label(),
                        %routing_id,
                        error = %e,
                        "Transport send failed"
                    );
                }
            }
            (ConnectionState::Unconnected, _) => self.outbound.push_back(message),
            _ => {
                tracing::trace!(
                    channel = self.ctx.channel_label(),
                    routing_id = %message.routing_id(),
                    "Dropping message for closed channel"
                );
            }
        }
    }

    fn install_pending_filters(&mut self) {
        let pending = std::mem::take(&mut *self.ctx.pending_filters.lock());
        if pending.is_empty() {
            return;
        }

        let handle = self.channel_handle();
        let peer = self.ctx.peer.get().copied();
        for filter in pending {
            if self.router.contains(&filter) {
                tracing::debug!(channel = self.ctx.channel_label(), "Filter already installed");
                continue;
            }
            filter.on_filter_added(&handle);
            if let Some(peer) = peer {
                filter.on_channel_connected(peer);
            }
            self.router.add(filter);
        }
        tracing::debug!(
            channel = self.ctx.channel_label(),
            active = self.router.len(),
            "Installed pending filters"
        );
    }

    fn remove_filter(&mut self, filter: &Arc<dyn MessageFilter>) {
        self.ctx
            .pending_filters
            .lock()
            .retain(|pending| !same_filter(pending, filter));

        if self.router.remove(filter) {
            filter.on_filter_removed();
            tracing::debug!(
                channel = self.ctx.channel_label(),
                active = self.router.len(),
                "Filter removed"
            );
        }
    }

    /// Offer an inbound message to filters, forwarding it if unclaimed
    ///
    /// Returns whether a filter claimed it.
    fn on_transport_message(&mut self, message: Message) -> bool {
        if self.router.try_filters(&message).is_some() {
            tracing::trace!(
                channel = self.ctx.channel_label(),
                routing_id = %message.routing_id(),
                "Message claimed by filter"
            );
            if message.dispatch_error() {
                self.post_to_owner(ListenerTask::BadMessage(message));
            }
            return true;
        }

        self.post_to_owner(ListenerTask::Message(message));
        false
    }

    fn on_transport_connected(&mut self, peer: PeerId) {
        if self.peer_connected {
            tracing::debug!(channel = self.ctx.channel_label(), %peer, "Duplicate connect event");
            return;
        }
        self.peer_connected = true;

        for filter in self.router.filters() {
            filter.on_channel_connected(peer);
        }
        let _ = self.ctx.peer.set(peer);

        if self.state == ConnectionState::Connected {
            self.install_pending_filters();
        }

        tracing::info!(channel = self.ctx.channel_label(), %peer, "Peer connected");
        self.post_to_owner(ListenerTask::Connected(peer));
    }

    fn on_transport_error(&mut self) {
        tracing::info!(channel = self.ctx.channel_label(), "Channel error");
        for filter in self.router.filters() {
            filter.on_channel_error();
        }
        self.post_to_owner(ListenerTask::Error);
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::Closed;
        self.ctx.concurrent_sender.write().take();

        for filter in self.router.clear() {
            filter.on_channel_closing();
            filter.on_filter_removed();
        }
        self.ctx.pending_filters.lock().clear();

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        let dropped = self.outbound.len();
        self.outbound.clear();
        tracing::debug!(channel = self.ctx.channel_label(), dropped, "Channel torn down");
    }
}
