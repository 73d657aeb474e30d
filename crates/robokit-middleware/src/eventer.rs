//! [`Eventer`] – a named table of [`Event`] topics.
//!
//! Devices, robots and the manager each embed one. Topics must be created
//! with [`Eventer::add_event`] before anyone can publish to or subscribe on
//! them; both operations fail with [`BotError::UnknownEvent`] otherwise.
//!
//! The table lock is only held long enough to look a topic up. Publishing and
//! subscribing happen on the cloned `Arc<Event>` after the lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use robokit_types::BotError;
use serde_json::Value;
use tracing::trace;

use crate::event::{DEFAULT_GRACE, Event, SubscriptionId};

pub struct Eventer {
    grace: Duration,
    events: RwLock<BTreeMap<String, Arc<Event>>>,
}

impl Default for Eventer {
    fn default() -> Self {
        Self::new()
    }
}

impl Eventer {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    /// Topics created by this table wait at most `grace` on a full subscriber.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            grace,
            events: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create topic `name` if it does not exist yet and return it.
    pub fn add_event(&self, name: &str) -> Arc<Event> {
        if let Some(existing) = self.events.read().get(name) {
            return Arc::clone(existing);
        }
        let mut events = self.events.write();
        Arc::clone(
            events
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Event::with_grace(name, self.grace))),
        )
    }

    /// Remove topic `name`, dropping its subscribers without notifying them.
    pub fn delete_event(&self, name: &str) -> bool {
        let removed = self.events.write().remove(name);
        match removed {
            Some(event) => {
                event.clear();
                true
            }
            None => false,
        }
    }

    pub fn event(&self, name: &str) -> Option<Arc<Event>> {
        self.events.read().get(name).cloned()
    }

    /// Snapshot of every topic keyed by name.
    pub fn events(&self) -> BTreeMap<String, Arc<Event>> {
        self.events.read().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.read().keys().cloned().collect()
    }

    fn lookup(&self, name: &str) -> Result<Arc<Event>, BotError> {
        self.event(name)
            .ok_or_else(|| BotError::UnknownEvent(name.to_string()))
    }

    /// Publish `value` on topic `name`, returning how many subscribers got it.
    pub fn publish(&self, name: &str, value: impl Into<Value>) -> Result<usize, BotError> {
        let event = self.lookup(name)?;
        let delivered = event.publish(value.into());
        trace!(topic = name, delivered, "published");
        Ok(delivered)
    }

    pub fn on<F>(&self, name: &str, f: F) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.lookup(name)?.on(f)
    }

    pub fn once<F>(&self, name: &str, f: F) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.lookup(name)?.once(f)
    }

    /// Remove a subscription from topic `name`. Unknown topics are a no-op.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        self.event(name).is_some_and(|event| event.unsubscribe(id))
    }
}

impl std::fmt::Debug for Eventer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eventer")
            .field("events", &self.event_names())
            .finish()
    }
}
