//! Client-side state core of the drishti traffic-inspection console
//!
//! The pieces are wired through one explicit [`bus::EventBus`]: the filter
//! store publishes filter changes, the connection window and the timeline
//! re-query their backends in response and publish the ranges they now
//! show, and the live coordinator relays backend push notifications that
//! trigger targeted refreshes.

pub mod api;
pub mod bus;
pub mod config;
pub mod connections;
pub mod debounce;
pub mod filters;
pub mod live;
pub mod notify;
pub mod timeline;

pub use api::{ConnectionSource, Cursor, HttpBackend, MetricsSource, TransportError};
pub use bus::{Event, EventBus, SubscriptionToken, TimeRange, Topic};
pub use config::Config;
pub use connections::CursorPaginationWindow;
pub use filters::{FilterStateStore, FilterStatus, FilterValue, MemoryLocation, QueryLocation};
pub use live::{LiveStatus, LiveUpdateCoordinator};
pub use timeline::{Metric, TimeSeriesWindower};
