//! In-process event bus for playlist notifications.
//!
//! Listeners are plain callbacks invoked on the flushing thread (normally the
//! control loop), one event at a time and never with the engine lock held.
//! Channel subscribers get a copy of every event as well.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use playlist_types::PlaylistEvent;

pub type Listener = Arc<dyn Fn(&PlaylistEvent) + Send + Sync>;

/// Handle returned by [`EventBus::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
    subscribers: Vec<Sender<PlaylistEvent>>,
}

#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future event.
    pub fn add_listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&PlaylistEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, Arc::new(f)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Subscribe to the event stream. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<PlaylistEvent> {
        let (tx, rx) = unbounded();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .push(tx);
        rx
    }

    /// Deliver `events` in order.
    pub fn publish(&self, events: &[PlaylistEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .subscribers
                .retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for event in events {
            tracing::trace!(?event, "publish");
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playlist_types::{PlaylistId, UpdateLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_and_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.add_listener(move |event| sink.lock().unwrap().push(event.clone()));

        let events = vec![
            PlaylistEvent::Update {
                level: UpdateLevel::Selection,
            },
            PlaylistEvent::Position {
                playlist: PlaylistId(1000),
            },
        ];
        bus.publish(&events);

        assert_eq!(*seen.lock().unwrap(), events);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), events);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.add_listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&[PlaylistEvent::Activate]);
        assert!(bus.remove_listener(id));
        bus.publish(&[PlaylistEvent::Activate]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        bus.publish(&[PlaylistEvent::PlaybackStop]);
        assert!(bus.inner.lock().unwrap().subscribers.is_empty());
    }
}
