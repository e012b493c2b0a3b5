//! Filter Router
//!
//! Offers an inbound message to the active filters able to handle its class,
//! in registration order, and stops at the first one that claims it.
//!
//! The router is owned by the transport context and never locked.

use std::sync::Arc;

use crate::message::{Message, MessageClass};

use super::{same_filter, MessageFilter};

struct Entry {
    filter: Arc<dyn MessageFilter>,
    /// Empty means every class
    classes: Vec<MessageClass>,
}

impl Entry {
    fn accepts(&self, class: MessageClass) -> bool {
        self.classes.is_empty() || self.classes.contains(&class)
    }
}

/// Ordered set of active filters
#[derive(Default)]
pub struct FilterRouter {
    entries: Vec<Entry>,
}

impl FilterRouter {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter after all existing ones
    pub fn add(&mut self, filter: Arc<dyn MessageFilter>) {
        let classes = filter.supported_message_classes();
        self.entries.push(Entry { filter, classes });
    }

    /// Unregister a filter
    ///
    /// Returns `true` if the filter was registered.
    pub fn remove(&mut self, filter: &Arc<dyn MessageFilter>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !same_filter(&e.filter, filter));
        self.entries.len() != before
    }

    /// Whether the filter is registered
    #[must_use]
    pub fn contains(&self, filter: &Arc<dyn MessageFilter>) -> bool {
        self.entries.iter().any(|e| same_filter(&e.filter, filter))
    }

    /// Offer a message to capable filters
    ///
    /// Returns the filter that claimed the message, or `None` if it is
    /// unclaimed.
    pub fn try_filters(&self, message: &Message) -> Option<&Arc<dyn MessageFilter>> {
        let class = message.class();
        self.entries
            .iter()
            .filter(|e| e.accepts(class))
            .find(|e| e.filter.on_message_received(message))
            .map(|e| &e.filter)
    }

    /// Registered filters in registration order
    pub fn filters(&self) -> impl Iterator<Item = &Arc<dyn MessageFilter>> {
        self.entries.iter().map(|e| &e.filter)
    }

    /// Remove every filter, returning them in registration order
    pub fn clear(&mut self) -> Vec<Arc<dyn MessageFilter>> {
        self.entries.drain(..).map(|e| e.filter).collect()
    }

    /// Number of registered filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no filters are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
