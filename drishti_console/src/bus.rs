//! Topic-based event bus for decoupling console components
//!
//! Dispatch is synchronous: every callback registered for the event's topic
//! runs before `dispatch` returns, in registration order. There is no queue
//! and no replay; a subscriber only sees events dispatched while it is
//! registered.

use crate::filters::FilterUpdate;
use chrono::{DateTime, Utc};
use drishti_common::NotificationFrame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A chronological time range, `from <= to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn width(&self) -> chrono::Duration {
        self.to - self.from
    }
}

/// Payload of a UI-attention pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub duration: Duration,
}

/// Every event the console components exchange, one variant per topic
#[derive(Debug, Clone)]
pub enum Event {
    /// Filter value changed; `None` means the filter was cleared
    FiltersChanged(FilterUpdate),

    /// Visible time range of the connection list. `from` is the start time
    /// of the last (oldest) row and `to` of the first (newest) one, since
    /// the list is newest-first.
    ConnectionUpdates(TimeRange),

    /// Committed chart selection
    TimelineUpdates(TimeRange),

    /// Raw push-notification relay
    Notification(NotificationFrame),

    /// Draw attention to the timeline chart
    PulseTimeline(Pulse),

    /// Draw attention to the connection list
    PulseConnectionsView(Pulse),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::FiltersChanged(_) => Topic::ConnectionsFilters,
            Event::ConnectionUpdates(_) => Topic::ConnectionUpdates,
            Event::TimelineUpdates(_) => Topic::TimelineUpdates,
            Event::Notification(_) => Topic::Notifications,
            Event::PulseTimeline(_) => Topic::PulseTimeline,
            Event::PulseConnectionsView(_) => Topic::PulseConnectionsView,
        }
    }
}

/// Topics of the console event namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ConnectionsFilters,
    ConnectionUpdates,
    TimelineUpdates,
    Notifications,
    PulseTimeline,
    PulseConnectionsView,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ConnectionsFilters => "connections_filters",
            Topic::ConnectionUpdates => "connection_updates",
            Topic::TimelineUpdates => "timeline_updates",
            Topic::Notifications => "notifications",
            Topic::PulseTimeline => "pulse_timeline",
            Topic::PulseConnectionsView => "pulse_connections_view",
        }
    }
}

/// One topic or a set of topics, so a callback can be registered on several
/// topics in a single call
#[derive(Debug, Clone)]
pub struct TopicSet(Vec<Topic>);

impl TopicSet {
    pub fn contains(&self, topic: Topic) -> bool {
        self.0.contains(&topic)
    }
}

impl From<Topic> for TopicSet {
    fn from(topic: Topic) -> Self {
        Self(vec![topic])
    }
}

impl From<&[Topic]> for TopicSet {
    fn from(topics: &[Topic]) -> Self {
        Self(topics.to_vec())
    }
}

impl<const N: usize> From<[Topic; N]> for TopicSet {
    fn from(topics: [Topic; N]) -> Self {
        Self(topics.to_vec())
    }
}

/// Handle identifying one subscription, used to unregister it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    token: u64,
    topics: TopicSet,
    callback: Box<dyn Fn(&Event) + Send + Sync>,
}

struct BusInner {
    subscribers: Vec<Arc<Subscriber>>,
    next_token: u64,
}

/// Synchronous in-process publish/subscribe bus.
///
/// Components hold an `Arc<EventBus>`; there is no global instance.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: Vec::new(),
                next_token: 0,
            }),
        }
    }

    /// Register `callback` on one topic or a set of topics.
    ///
    /// The returned token removes the whole registration, across all its
    /// topics, when passed to [`unregister`](Self::unregister).
    pub fn register<T, F>(&self, topics: T, callback: F) -> SubscriptionToken
    where
        T: Into<TopicSet>,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.push(Arc::new(Subscriber {
            token,
            topics: topics.into(),
            callback: Box::new(callback),
        }));
        SubscriptionToken(token)
    }

    /// Deliver `event` to every callback currently registered for its topic,
    /// in registration order.
    ///
    /// A panicking callback is isolated and logged; the remaining callbacks
    /// still run. Dispatching with no subscribers is a no-op.
    pub fn dispatch(&self, event: Event) {
        let topic = event.topic();
        // Snapshot outside the callback invocations so subscribers may
        // register, unregister or dispatch from within their callback.
        let matching: Vec<Arc<Subscriber>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .iter()
                .filter(|s| s.topics.contains(topic))
                .cloned()
                .collect()
        };

        for subscriber in matching {
            let result = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&event)));
            if result.is_err() {
                tracing::error!(topic = topic.as_str(), "event subscriber panicked");
            }
        }
    }

    /// Remove the subscription identified by `token`; no-op if absent
    pub fn unregister(&self, token: SubscriptionToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| s.token != token.0);
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
