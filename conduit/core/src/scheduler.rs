//! Execution Contexts
//!
//! A channel proxy lives on two cooperating execution contexts:
//!
//! - the **owner scheduler**, wherever the application builds the proxy and
//!   consumes its callbacks
//! - the **transport scheduler**, a single dedicated context that drives the
//!   transport and runs message filters
//!
//! Both are run-to-completion task queues backed by tokio. Everything posted
//! through [`Scheduler::post`] runs inside a task-local scope naming the
//! scheduler, which is how [`Scheduler::is_current`] detects the context a
//! caller is running on.
//!
//! [`IoThread`] owns a dedicated transport context: a current-thread runtime
//! parked on its own OS thread.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ProxyError;

tokio::task_local! {
    static CURRENT_SCHEDULER: SchedulerId;
}

/// Process-unique identifier of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sched-{}", self.0)
    }
}

/// Handle to an execution context that accepts posted work
///
/// Cloning yields another handle to the same context.
#[derive(Clone, Debug)]
pub struct Scheduler {
    id: SchedulerId,
    name: Arc<str>,
    handle: Handle,
}

impl Scheduler {
    /// Wrap a runtime handle as a new execution context
    pub fn new(name: &str, handle: Handle) -> Self {
        Self {
            id: SchedulerId::next(),
            name: Arc::from(name),
            handle,
        }
    }

    /// Capture the context the caller is running on
    ///
    /// Inside work posted to a scheduler this returns that scheduler's
    /// identity. Elsewhere it wraps the ambient tokio runtime as a fresh
    /// context, so capture it once and clone it. Returns `None` outside a
    /// tokio runtime.
    #[must_use]
    pub fn current(name: &str) -> Option<Self> {
        let handle = Handle::try_current().ok()?;
        let id = CURRENT_SCHEDULER
            .try_with(|id| *id)
            .unwrap_or_else(|_| SchedulerId::next());
        Some(Self {
            id,
            name: Arc::from(name),
            handle,
        })
    }

    /// Identity of this context
    #[must_use]
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Human-readable name, used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this context
    #[must_use]
    pub fn is_current(&self) -> bool {
        CURRENT_SCHEDULER
            .try_with(|id| *id == self.id)
            .unwrap_or(false)
    }

    /// Post work to run on this context
    pub fn post<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(CURRENT_SCHEDULER.scope(self.id, future))
    }
}

/// A dedicated transport context on its own OS thread
///
/// The thread runs a current-thread runtime until [`IoThread::shutdown`] is
/// called or the value is dropped. Work still queued at that point is
/// discarded.
pub struct IoThread {
    scheduler: Scheduler,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl IoThread {
    /// Start a new I/O thread
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Runtime` if the runtime or the OS thread cannot
    /// be created.
    pub fn spawn(name: &str) -> Result<Self, ProxyError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProxyError::Runtime(format!("failed to build runtime: {e}")))?;
        let scheduler = Scheduler::new(name, runtime.handle().clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(async {
                    // Either an explicit shutdown or the IoThread being dropped
                    let _ = shutdown_rx.await;
                });
                tracing::debug!(thread = %thread_name, "I/O thread stopping");
            })
            .map_err(|e| ProxyError::Runtime(format!("failed to spawn thread {name}: {e}")))?;

        tracing::debug!(thread = name, scheduler = %scheduler.id(), "I/O thread started");

        Ok(Self {
            scheduler,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Scheduler for posting work to this thread
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(scheduler = %self.scheduler.id(), "I/O thread panicked");
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IoThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoThread")
            .field("scheduler", &self.scheduler.id())
            .field("name", &self.scheduler.name())
            .finish()
    }
}
