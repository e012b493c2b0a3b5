//! Shared test infrastructure: a scriptable transport, a recording listener,
//! and a recording filter.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use conduit_core::{
    ChannelFactory, ChannelHandle, ChannelMode, ConcurrentSend, Listener, Message, MessageClass,
    MessageFilter, PeerId, RoutingId, Transport, TransportError, TransportEvents,
};

/// How long any single wait may take before the test fails
pub const WAIT: Duration = Duration::from_secs(5);

/// How long to watch for something that must not happen
pub const QUIET: Duration = Duration::from_millis(100);

/// Wait until `check` returns `Some`, re-checking whenever `notify` fires
pub async fn wait_until<T>(notify: &Notify, mut check: impl FnMut() -> Option<T>) -> T {
    let fut = async {
        loop {
            let notified = notify.notified();
            if let Some(value) = check() {
                return value;
            }
            notified.await;
        }
    };
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting for condition")
}

// =============================================================================
// Mock Transport
// =============================================================================

#[derive(Default)]
struct MockShared {
    sent: Mutex<Vec<Message>>,
    direct_sends: AtomicUsize,
    events: Mutex<Option<TransportEvents>>,
    connect_calls: AtomicUsize,
    closed: AtomicBool,
    built_on: Mutex<Option<String>>,
    notify: Notify,
}

/// Transport whose events are driven by the test
struct MockTransport {
    shared: Arc<MockShared>,
    fail_connect: bool,
    concurrent: bool,
}

struct MockSender {
    shared: Arc<MockShared>,
}

impl ConcurrentSend for MockSender {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.shared.direct_sends.fetch_add(1, Ordering::SeqCst);
        self.shared.sent.lock().push(message);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, events: TransportEvents) -> Result<(), TransportError> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            self.shared.notify.notify_waiters();
            return Err(TransportError::ConnectionFailed("scripted failure".into()));
        }
        *self.shared.events.lock() = Some(events);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.shared.sent.lock().push(message);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    fn concurrent_sender(&self) -> Option<Arc<dyn ConcurrentSend>> {
        if self.concurrent {
            Some(Arc::new(MockSender {
                shared: Arc::clone(&self.shared),
            }))
        } else {
            None
        }
    }
}

/// Builds a [`MockTransport`]
pub struct MockFactory {
    channel_id: String,
    shared: Arc<MockShared>,
    fail_build: bool,
    fail_connect: bool,
    concurrent: bool,
}

impl MockFactory {
    pub fn new(channel_id: &str) -> (Self, MockController) {
        let shared = Arc::new(MockShared::default());
        let factory = Self {
            channel_id: channel_id.to_string(),
            shared: Arc::clone(&shared),
            fail_build: false,
            fail_connect: false,
            concurrent: false,
        };
        (factory, MockController { shared })
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_concurrent_send(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

impl ChannelFactory for MockFactory {
    fn channel_id(&self) -> String {
        self.channel_id.clone()
    }

    fn build(self: Box<Self>, _mode: ChannelMode) -> Result<Box<dyn Transport>, TransportError> {
        *self.shared.built_on.lock() = std::thread::current().name().map(str::to_string);
        if self.fail_build {
            return Err(TransportError::InvalidState("scripted build failure".into()));
        }
        Ok(Box::new(MockTransport {
            shared: self.shared,
            fail_connect: self.fail_connect,
            concurrent: self.concurrent,
        }))
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockController {
    shared: Arc<MockShared>,
}

impl MockController {
    /// Events sink handed to the transport, once the proxy connected it
    pub async fn events(&self) -> TransportEvents {
        wait_until(&self.shared.notify, || self.shared.events.lock().clone()).await
    }

    /// Wait until at least `n` messages have been written
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Message> {
        wait_until(&self.shared.notify, || {
            let sent = self.shared.sent.lock();
            (sent.len() >= n).then(|| sent.clone())
        })
        .await
    }

    /// Wait until the proxy released the transport
    pub async fn wait_closed(&self) {
        wait_until(&self.shared.notify, || {
            self.shared.closed.load(Ordering::SeqCst).then_some(())
        })
        .await;
    }

    /// Wait until the proxy attempted to connect
    pub async fn wait_connect_attempt(&self) {
        wait_until(&self.shared.notify, || {
            (self.shared.connect_calls.load(Ordering::SeqCst) > 0).then_some(())
        })
        .await;
    }

    pub fn sent(&self) -> Vec<Message> {
        self.shared.sent.lock().clone()
    }

    pub fn direct_sends(&self) -> usize {
        self.shared.direct_sends.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Name of the thread the transport was built on
    pub fn built_on(&self) -> Option<String> {
        self.shared.built_on.lock().clone()
    }
}

// =============================================================================
// Recording Listener
// =============================================================================

/// Everything a listener can observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(Option<PeerId>),
    Message(Message),
    Error,
    BadMessage(Message),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    notify: Notify,
    /// Messages on these routes are marked malformed when received
    malformed_routes: Mutex<HashSet<RoutingId>>,
    /// Owner-context check performed on every callback
    off_context: AtomicUsize,
    expected_thread: Mutex<Option<std::thread::ThreadId>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            expected_thread: Mutex::new(Some(std::thread::current().id())),
            ..Self::default()
        })
    }

    pub fn mark_malformed(&self, route: RoutingId) {
        self.malformed_routes.lock().insert(route);
    }

    fn record(&self, event: Event) {
        let expected = *self.expected_thread.lock();
        if expected.is_some_and(|id| id != std::thread::current().id()) {
            self.off_context.fetch_add(1, Ordering::SeqCst);
        }
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Wait until at least `n` events have been recorded
    pub async fn wait_for(&self, n: usize) -> Vec<Event> {
        wait_until(&self.notify, || {
            let events = self.events.lock();
            (events.len() >= n).then(|| events.clone())
        })
        .await
    }

    /// Number of callbacks that ran off the thread that created the listener
    pub fn off_context_calls(&self) -> usize {
        self.off_context.load(Ordering::SeqCst)
    }
}

impl Listener for RecordingListener {
    fn on_message_received(&self, message: &Message) -> bool {
        if self.malformed_routes.lock().contains(&message.routing_id()) {
            message.mark_dispatch_error();
        }
        self.record(Event::Message(message.clone()));
        true
    }

    fn on_channel_connected(&self, peer: Option<PeerId>) {
        self.record(Event::Connected(peer));
    }

    fn on_channel_error(&self) {
        self.record(Event::Error);
    }

    fn on_bad_message_received(&self, message: &Message) {
        self.record(Event::BadMessage(message.clone()));
    }
}

// =============================================================================
// Recording Filter
// =============================================================================

/// Every filter callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCall {
    Added,
    Removed,
    Connected(PeerId),
    Error,
    Closing,
    Offered(RoutingId),
}

#[derive(Default)]
pub struct RecordingFilter {
    calls: Mutex<Vec<FilterCall>>,
    notify: Notify,
    claims: Mutex<HashSet<RoutingId>>,
    malformed: Mutex<HashSet<RoutingId>>,
    classes: Vec<MessageClass>,
    /// Reply to claimed messages through the channel handle
    reply: bool,
    channel: Mutex<Option<ChannelHandle>>,
    in_flight: AtomicBool,
    overlapped: AtomicBool,
}

impl RecordingFilter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Filter that claims messages on `routes`
    pub fn claiming(routes: &[RoutingId]) -> Arc<Self> {
        Arc::new(Self {
            claims: Mutex::new(routes.iter().copied().collect()),
            ..Self::default()
        })
    }

    /// Filter restricted to `classes` that claims everything it is offered
    pub fn for_classes(classes: &[MessageClass], routes: &[RoutingId]) -> Arc<Self> {
        Arc::new(Self {
            claims: Mutex::new(routes.iter().copied().collect()),
            classes: classes.to_vec(),
            ..Self::default()
        })
    }

    /// Filter that claims `routes` and echoes them back to the peer
    pub fn replying(routes: &[RoutingId]) -> Arc<Self> {
        Arc::new(Self {
            claims: Mutex::new(routes.iter().copied().collect()),
            reply: true,
            ..Self::default()
        })
    }

    pub fn mark_malformed(&self, route: RoutingId) {
        self.malformed.lock().insert(route);
    }

    fn record(&self, call: FilterCall) {
        self.calls.lock().push(call);
        self.notify.notify_waiters();
    }

    pub fn calls(&self) -> Vec<FilterCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &FilterCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Wait until `call` has been recorded at least once
    pub async fn wait_for(&self, call: FilterCall) -> Vec<FilterCall> {
        wait_until(&self.notify, || {
            let calls = self.calls.lock();
            calls.contains(&call).then(|| calls.clone())
        })
        .await
    }

    /// Whether the filter was ever entered while already running
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

impl MessageFilter for RecordingFilter {
    fn on_filter_added(&self, channel: &ChannelHandle) {
        *self.channel.lock() = Some(channel.clone());
        self.record(FilterCall::Added);
    }

    fn on_filter_removed(&self) {
        self.record(FilterCall::Removed);
    }

    fn on_channel_connected(&self, peer: PeerId) {
        self.record(FilterCall::Connected(peer));
    }

    fn on_channel_error(&self) {
        self.record(FilterCall::Error);
    }

    fn on_channel_closing(&self) {
        self.record(FilterCall::Closing);
    }

    fn on_message_received(&self, message: &Message) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }

        let route = message.routing_id();
        self.record(FilterCall::Offered(route));
        if self.malformed.lock().contains(&route) {
            message.mark_dispatch_error();
        }

        let claimed = self.claims.lock().contains(&route);
        if claimed && self.reply {
            if let Some(channel) = self.channel.lock().as_ref() {
                channel.send(Message::new(route, message.message_type(), message.payload().clone()));
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        claimed
    }

    fn supported_message_classes(&self) -> Vec<MessageClass> {
        self.classes.clone()
    }
}

/// Plain message on `route` with a text payload
pub fn msg(route: i32, payload: &'static str) -> Message {
    Message::new(RoutingId(route), 1, payload)
}
