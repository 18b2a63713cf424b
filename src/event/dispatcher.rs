//! # In-Process Event Dispatcher
//!
//! Fans consumed events out to handlers registered per event type. Used by
//! layers that react to events locally (e.g. refreshing a read cache) after
//! the broker delivered them.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::types::{Event, EventType};

/// Handles events delivered by a [`Dispatcher`].
///
/// Implemented for any `Fn(Event)` closure, so plain functions can be
/// subscribed directly.
pub trait Handler: Send + Sync {
    fn handle(&self, event: Event);
}

impl<F> Handler for F
where
    F: Fn(Event) + Send + Sync,
{
    fn handle(&self, event: Event) {
        self(event)
    }
}

/// Routes events to the handlers subscribed to their type.
///
/// Instance-scoped: build one per consumer loop, register handlers at
/// startup, then feed it consumed events.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventType, Vec<Arc<dyn Handler>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(event_type, handlers)| (event_type.as_str(), handlers.len()))
            .collect();
        f.debug_struct("Dispatcher").field("handlers", &counts).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for each of `event_types`.
    pub fn subscribe(&mut self, handler: Arc<dyn Handler>, event_types: &[EventType]) {
        for event_type in event_types {
            self.handlers.entry(*event_type).or_default().push(handler.clone());
        }
    }

    /// Deliver `event` to every handler subscribed to its type.
    pub fn dispatch(&self, event: &Event) {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            debug!(event_type = %event.event_type, "no handlers subscribed");
            return;
        };
        for handler in handlers {
            handler.handle(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_only_to_matching_type() {
        let created = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = Dispatcher::new();
        let counter = created.clone();
        dispatcher.subscribe(
            Arc::new(move |_event: Event| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            &[EventType::Created],
        );
        let counter = deleted.clone();
        dispatcher.subscribe(
            Arc::new(move |_event: Event| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            &[EventType::Deleted],
        );

        dispatcher.dispatch(&Event::new("article", EventType::Created, vec![]));
        dispatcher.dispatch(&Event::new("article", EventType::Created, vec![]));
        dispatcher.dispatch(&Event::new("article", EventType::Deleted, vec![]));

        assert_eq!(created.load(Ordering::Relaxed), 2);
        assert_eq!(deleted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn one_handler_may_watch_several_types() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(
            Arc::new(move |_event: Event| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            &[EventType::Created, EventType::Updated],
        );

        dispatcher.dispatch(&Event::new("article", EventType::Created, vec![]));
        dispatcher.dispatch(&Event::new("article", EventType::Updated, vec![]));
        dispatcher.dispatch(&Event::new("article", EventType::Deleted, vec![]));

        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
