//! Typed publish/subscribe topics
//!
//! Cross-component notification without ambient global listener sets. Each
//! [`Topic`] carries one event type; subscribing returns a [`Subscription`]
//! handle that unsubscribes explicitly, so a dropped consumer never leaves a
//! dangling callback firing into the void.

/// Handle returned by [`Topic::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// A single-event-type broadcast topic
pub struct Topic<T> {
    subscribers: Vec<(u64, Box<dyn Fn(&T) + Send>)>,
    next_id: u64,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Topic<T> {
    /// Create a topic with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a callback for every subsequent publish
    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        Subscription(id)
    }

    /// Remove a subscriber; returns false if the handle was already gone
    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(id, _)| *id != sub.0);
        self.subscribers.len() != before
    }

    /// Deliver an event to every current subscriber, in subscription order
    pub fn publish(&self, event: &T) {
        for (_, callback) in &self.subscribers {
            callback(event);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn publish_reaches_all_subscribers() {
        let mut topic = Topic::<u32>::new();
        let seen = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let seen = seen.clone();
            topic.subscribe(move |v| {
                seen.fetch_add(*v, Ordering::SeqCst);
            });
        }
        topic.publish(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut topic = Topic::<u32>::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_cb = seen.clone();
        let sub = topic.subscribe(move |v| {
            seen_cb.fetch_add(*v, Ordering::SeqCst);
        });

        topic.publish(&1);
        assert!(topic.unsubscribe(sub));
        topic.publish(&1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Second unsubscribe with the same handle is a no-op.
        assert!(!topic.unsubscribe(sub));
        assert_eq!(topic.subscriber_count(), 0);
    }
}
