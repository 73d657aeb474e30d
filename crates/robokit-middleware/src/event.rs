//! [`Event`] – a single best-effort publish/subscribe topic.
//!
//! Every subscriber owns a listener thread fed through a one-slot
//! [`crossbeam::channel`]. Publishing hands the value to each listener
//! without waiting for the callback to run, so a slow subscriber never holds
//! up the publisher or its siblings.
//!
//! # Delivery rules
//!
//! | Situation | Outcome |
//! |---|---|
//! | Slot free | value queued, callback runs on the listener thread |
//! | Slot full, subscriber healthy | publisher waits up to the grace period, then drops |
//! | Slot full, subscriber stalled | value dropped immediately |
//! | Once-subscriber already fired | skipped, then pruned |
//!
//! A subscriber counts as *stalled* after its first timed-out delivery and
//! recovers as soon as a delivery succeeds again, so a wedged callback costs
//! the publisher at most one grace period per stall.
//!
//! Values reach a persistent subscriber in publication order. A callback that
//! panics is logged and the listener keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use robokit_types::BotError;
use serde_json::Value;
use tracing::{debug, warn};

/// How long a publisher may wait on a full slot before dropping the value.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(10);

/// Callback invoked with every delivered value.
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle identifying one subscription on one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    once: bool,
    fired: AtomicBool,
    stalled: AtomicBool,
    closed: AtomicBool,
    tx: Sender<Value>,
}

impl Subscriber {
    fn spent(&self) -> bool {
        self.closed.load(Ordering::Acquire) || (self.once && self.fired.load(Ordering::Acquire))
    }
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

/// A named fan-out topic.
pub struct Event {
    name: String,
    grace: Duration,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Event {
    /// Create a topic with the [`DEFAULT_GRACE`] period.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_grace(name, DEFAULT_GRACE)
    }

    /// Create a topic whose publishers wait at most `grace` on a full slot.
    pub fn with_grace(name: impl Into<String>, grace: Duration) -> Self {
        Self {
            name: name.into(),
            grace,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a persistent subscriber.
    pub fn on<F>(&self, f: F) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(false, Arc::new(f))
    }

    /// Register a subscriber that fires for the next publication only.
    pub fn once<F>(&self, f: F) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(true, Arc::new(f))
    }

    fn subscribe(&self, once: bool, callback: Callback) -> Result<SubscriptionId, BotError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(1);
        spawn_listener(&self.name, rx, callback)?;
        self.subscribers.write().push(Subscriber {
            id,
            once,
            fired: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx,
        });
        debug!(topic = %self.name, id, once, "subscriber added");
        Ok(SubscriptionId(id))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.id != id.0);
        subs.len() != before
    }

    /// Drop every subscriber without delivering anything.
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    /// Hand `value` to every current subscriber.
    ///
    /// Returns the number of subscribers the value was queued for.
    pub fn publish(&self, value: Value) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        let mut prune = false;
        {
            let subs = self.subscribers.read();
            for sub in subs.iter() {
                if sub.once {
                    // Whoever flips `fired` first owns the only delivery.
                    if sub.fired.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    prune = true;
                }
                match self.deliver(sub, value.clone()) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Dropped => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Closed => {
                        sub.closed.store(true, Ordering::Release);
                        prune = true;
                    }
                }
            }
        }
        if prune {
            self.subscribers
                .write()
                .retain(|s| !s.spent());
        }
        delivered
    }

    fn deliver(&self, sub: &Subscriber, value: Value) -> Delivery {
        match sub.tx.try_send(value) {
            Ok(()) => {
                sub.stalled.store(false, Ordering::Relaxed);
                Delivery::Sent
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Closed,
            Err(TrySendError::Full(value)) => {
                if self.grace.is_zero() || sub.stalled.load(Ordering::Relaxed) {
                    return Delivery::Dropped;
                }
                match sub.tx.send_timeout(value, self.grace) {
                    Ok(()) => Delivery::Sent,
                    Err(SendTimeoutError::Timeout(_)) => {
                        sub.stalled.store(true, Ordering::Relaxed);
                        warn!(topic = %self.name, id = sub.id, "subscriber stalled; dropping events");
                        Delivery::Dropped
                    }
                    Err(SendTimeoutError::Disconnected(_)) => Delivery::Closed,
                }
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().iter().filter(|s| !s.spent()).count()
    }

    /// Total publications on this topic.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because a subscriber's slot was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .field("dropped", &self.dropped())
            .finish()
    }
}

fn spawn_listener(topic: &str, rx: Receiver<Value>, callback: Callback) -> Result<(), BotError> {
    let topic = topic.to_string();
    thread::Builder::new()
        .name(format!("event-{topic}"))
        .spawn(move || {
            for value in rx.iter() {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                    warn!(topic = %topic, "event subscriber panicked");
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v| sink.lock().push(v))
    }

    #[test]
    fn on_receives_values_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Event::with_grace("tick", Duration::from_millis(500));
        let (seen, cb) = recorder();
        topic.on(cb)?;

        for i in 1..=20 {
            topic.publish(json!(i));
        }

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 20));
        let expected: Vec<Value> = (1..=20).map(|i| json!(i)).collect();
        assert_eq!(*seen.lock(), expected);
        Ok(())
    }

    #[test]
    fn once_fires_exactly_once_across_concurrent_publishers() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Arc::new(Event::new("burst"));
        let (seen, cb) = recorder();
        topic.once(cb)?;

        let publishers: Vec<_> = (0..8)
            .map(|i| {
                let topic = Arc::clone(&topic);
                thread::spawn(move || {
                    for j in 0..50 {
                        topic.publish(json!(i * 100 + j));
                    }
                })
            })
            .collect();
        for p in publishers {
            p.join().map_err(|_| "publisher panicked")?;
        }

        assert!(wait_until(Duration::from_secs(1), || !seen.lock().is_empty()));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(topic.subscriber_count(), 0);
        Ok(())
    }

    #[test]
    fn publish_does_not_block_on_a_wedged_subscriber() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Event::new("flood");
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        topic.on(move |_| {
            // Never returns until the test ends.
            let _ = release_rx.lock().recv();
        })?;

        let started = Instant::now();
        for i in 0..1_000 {
            topic.publish(json!(i));
        }
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(1), "publishing took {elapsed:?}");
        assert!(topic.dropped() > 0);
        assert_eq!(topic.published(), 1_000);
        drop(release_tx);
        Ok(())
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Event::with_grace("faulty", Duration::from_millis(500));
        topic.on(|v| {
            if v == json!(1) {
                panic!("subscriber failure");
            }
        })?;
        let (seen, cb) = recorder();
        topic.on(cb)?;

        topic.publish(json!(1));
        topic.publish(json!(2));

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 2));
        assert_eq!(topic.subscriber_count(), 2);
        Ok(())
    }

    #[test]
    fn unsubscribe_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Event::new("status");
        let (seen, cb) = recorder();
        let id = topic.on(cb)?;

        assert!(topic.unsubscribe(id));
        assert!(!topic.unsubscribe(id));
        assert_eq!(topic.publish(json!("ignored")), 0);

        thread::sleep(Duration::from_millis(30));
        assert!(seen.lock().is_empty());
        Ok(())
    }

    #[test]
    fn clear_drops_all_subscribers() -> Result<(), Box<dyn std::error::Error>> {
        let topic = Event::new("status");
        topic.on(|_| {})?;
        topic.once(|_| {})?;
        assert_eq!(topic.subscriber_count(), 2);

        topic.clear();
        assert_eq!(topic.subscriber_count(), 0);
        assert_eq!(topic.publish(json!(null)), 0);
        Ok(())
    }
}
