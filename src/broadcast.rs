//! ==============================================================================
//! broadcast.rs - viewer registry and fan-out
//! ==============================================================================
//!
//! purpose:
//!     keeps the set of currently connected viewers and pushes every published
//!     event to all of them.
//!
//! delivery contract:
//!     - publish order is preserved per viewer (publish enqueues under the lock)
//!     - at most once: no replay for late joiners, no ack, no retry
//!     - each viewer has a bounded queue. when it is full the event is dropped
//!       for that viewer only; a slow viewer never stalls a publisher.
//!
//! relationships:
//!     - used by: service.rs (sensorUpdate), relay.rs (controlUpdate)
//!     - drained by: http.rs (one websocket task per viewer)
//!
//! ==============================================================================

use crate::domain::{Event, SensorReading};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type ViewerId = u64;

/// default per-viewer queue depth
pub const DEFAULT_VIEWER_QUEUE: usize = 64;

pub struct ViewerRegistry {
    next_id: AtomicU64,
    queue_capacity: usize,
    viewers: Mutex<HashMap<ViewerId, mpsc::Sender<Event>>>,
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWER_QUEUE)
    }
}

impl ViewerRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            viewers: Mutex::new(HashMap::new()),
        }
    }

    /// register a new viewer. dropping the subscription unregisters it.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.lock().insert(id, tx);
        Subscription { id, events: rx, registry: Arc::clone(self) }
    }

    pub fn remove(&self, id: ViewerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// number of connected viewers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// deliver an event to every connected viewer.
    /// returns how many viewers had it enqueued.
    pub fn publish(&self, event: Event) -> usize {
        let mut viewers = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in viewers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(viewer = id, event = event.kind(), "viewer queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            viewers.remove(&id);
        }

        tracing::trace!(event = event.kind(), delivered, "event published");
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ViewerId, mpsc::Sender<Event>>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// one viewer's end of the registry
pub struct Subscription {
    id: ViewerId,
    events: mpsc::Receiver<Event>,
    registry: Arc<ViewerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// next published event, `None` once the viewer has been removed
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// non-blocking variant, used by tests and by draining loops
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// a freshly connected viewer: the greeting event first, then the live stream.
/// the viewer is registered before the greeting is read, so a reading stored
/// in between is queued as well; that one copy is skipped.
pub struct ViewerSession {
    greeting: Option<Event>,
    greeted: Option<SensorReading>,
    subscription: Subscription,
}

impl ViewerSession {
    pub fn new(subscription: Subscription, greeting: Option<Event>) -> Self {
        let greeted = match &greeting {
            Some(Event::SensorUpdate(reading)) => Some(reading.clone()),
            _ => None,
        };
        Self { greeting, greeted, subscription }
    }

    pub fn id(&self) -> ViewerId {
        self.subscription.id()
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        if let Some(greeting) = self.greeting.take() {
            return Some(greeting);
        }
        loop {
            let event = self.subscription.recv().await?;
            match (&event, &self.greeted) {
                (Event::SensorUpdate(reading), Some(greeted)) if reading == greeted => {
                    self.greeted = None;
                }
                _ => return Some(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ControlCommand, ControlValue};
    use chrono::Utc;

    fn control(action: &str) -> Event {
        Event::ControlUpdate(ControlCommand {
            action: action.to_string(),
            value: ControlValue::Bool(true),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn publish_reaches_every_viewer_in_order() {
        let registry = Arc::new(ViewerRegistry::default());
        let mut a = registry.subscribe();
        let mut b = registry.subscribe();
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.publish(control("pump")), 2);
        assert_eq!(registry.publish(control("lights")), 2);

        for sub in [&mut a, &mut b] {
            assert!(matches!(sub.try_recv(), Some(Event::ControlUpdate(c)) if c.action == "pump"));
            assert!(matches!(sub.try_recv(), Some(Event::ControlUpdate(c)) if c.action == "lights"));
            assert!(sub.try_recv().is_none());
        }
    }

    #[test]
    fn late_joiners_get_no_replay() {
        let registry = Arc::new(ViewerRegistry::default());
        registry.publish(control("pump"));
        let mut late = registry.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        let registry = Arc::new(ViewerRegistry::default());
        let sub = registry.subscribe();
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert!(registry.is_empty());
        assert_eq!(registry.publish(control("pump")), 0);
    }

    #[test]
    fn full_queue_drops_only_for_the_slow_viewer() {
        let registry = Arc::new(ViewerRegistry::new(1));
        let mut slow = registry.subscribe();
        let mut fast = registry.subscribe();

        assert_eq!(registry.publish(control("pump")), 2);
        fast.try_recv().unwrap();
        // slow still holds "pump", so "lights" is dropped for it
        assert_eq!(registry.publish(control("lights")), 1);

        assert!(matches!(slow.try_recv(), Some(Event::ControlUpdate(c)) if c.action == "pump"));
        assert!(slow.try_recv().is_none());
        assert!(matches!(fast.try_recv(), Some(Event::ControlUpdate(c)) if c.action == "lights"));
    }

    #[tokio::test]
    async fn session_yields_greeting_before_live_events() {
        let registry = Arc::new(ViewerRegistry::default());
        let greeting = Event::SensorUpdate(SensorReading::fallback(Utc::now()));
        let mut session = ViewerSession::new(registry.subscribe(), Some(greeting.clone()));

        registry.publish(control("pump"));

        assert_eq!(session.next_event().await, Some(greeting));
        assert!(matches!(session.next_event().await, Some(Event::ControlUpdate(c)) if c.action == "pump"));
    }

    #[tokio::test]
    async fn reading_queued_before_the_greeting_is_not_repeated() {
        let registry = Arc::new(ViewerRegistry::default());
        let subscription = registry.subscribe();
        let reading = SensorReading::fallback(Utc::now());
        // stored and published while the greeting was being loaded
        registry.publish(Event::SensorUpdate(reading.clone()));
        let mut session = ViewerSession::new(subscription, Some(Event::SensorUpdate(reading.clone())));

        registry.publish(control("pump"));
        registry.publish(Event::SensorUpdate(reading.clone()));

        assert_eq!(session.next_event().await, Some(Event::SensorUpdate(reading.clone())));
        assert!(matches!(session.next_event().await, Some(Event::ControlUpdate(c)) if c.action == "pump"));
        // only the first copy is skipped
        assert_eq!(session.next_event().await, Some(Event::SensorUpdate(reading)));
    }
}
