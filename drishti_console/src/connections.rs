//! Bounded, bidirectional cursor-pagination window over the connection list
//!
//! The window holds at most `max_size` records, newest first, and extends in
//! either direction from cursors at its ends. The backend echoes the cursor
//! row: a forward page starts with the row whose id was passed as `from`, a
//! backward page ends with the `to` row. The echo is dropped before the page
//! is merged, except on an initial load where no cursor was sent.

use crate::api::{ConnectionSource, Cursor};
use crate::bus::{Event, EventBus, TimeRange};
use drishti_common::{ConnectionRecord, Rule, Service};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const PAGE_SIZE: usize = 50;
pub const MAX_CONNECTIONS: usize = 200;

/// Relative scroll positions that trigger an extend
pub const SCROLL_TOP_THRESHOLD: f64 = 0.00001;
pub const SCROLL_BOTTOM_THRESHOLD: f64 = 0.99999;

#[derive(Debug, Clone)]
enum FetchKind {
    /// No cursor; replaces the window
    Initial,
    /// Extend past the last (oldest) row
    Forward(String),
    /// Extend before the first (newest) row
    Backward(String),
    /// Replace the window with records inside a committed chart selection
    Range(TimeRange),
}

struct WindowState {
    items: Vec<ConnectionRecord>,
    filters: Vec<(String, String)>,
    /// Bumped on every filter change; responses from older epochs are stale
    epoch: u64,
    /// Id of the fetch currently in flight, if any. Extends are admitted
    /// only while this is `None`, and only the owning fetch releases it, so
    /// a superseded fetch cannot reopen the gate for a newer one.
    in_flight: Option<u64>,
    fetch_seq: u64,
    /// Suppresses scroll-triggered extends while a jump's own reset-to-top
    /// scroll event is still settling
    scroll_guard: bool,
    last_scroll: f64,
    show_more_recent: bool,
    rules: Vec<Rule>,
    services: BTreeMap<u16, Service>,
    pulse_until: Option<Instant>,
}

pub struct CursorPaginationWindow<S: ConnectionSource> {
    source: S,
    bus: Arc<EventBus>,
    page_size: usize,
    max_size: usize,
    state: Mutex<WindowState>,
}

impl<S: ConnectionSource> CursorPaginationWindow<S> {
    pub fn new(source: S, bus: Arc<EventBus>) -> Self {
        Self::with_limits(source, bus, PAGE_SIZE, MAX_CONNECTIONS)
    }

    pub fn with_limits(
        source: S,
        bus: Arc<EventBus>,
        page_size: usize,
        max_size: usize,
    ) -> Self {
        Self {
            source,
            bus,
            page_size,
            max_size,
            state: Mutex::new(WindowState {
                items: Vec::new(),
                filters: Vec::new(),
                epoch: 0,
                in_flight: None,
                fetch_seq: 0,
                scroll_guard: false,
                last_scroll: 0.0,
                show_more_recent: false,
                rules: Vec::new(),
                services: BTreeMap::new(),
                pulse_until: None,
            }),
        }
    }

    /// Load the most recent page with the current filters
    pub async fn load_initial(&self) {
        self.fetch(FetchKind::Initial).await;
    }

    /// Start a new filter epoch and re-anchor the window.
    ///
    /// The old window is discarded, never extended: the filter set defines
    /// which records exist at all.
    pub async fn set_filters(&self, filters: Vec<(String, String)>) {
        {
            let mut state = self.state.lock().unwrap();
            state.filters = filters;
            state.epoch += 1;
        }
        tracing::debug!("re-anchoring connection window after filter change");
        self.fetch(FetchKind::Initial).await;
    }

    /// React to the scroll position of the list, relative in `0.0..=1.0`
    pub async fn handle_scroll(&self, relative: f64) {
        let kind = {
            let mut state = self.state.lock().unwrap();
            if state.scroll_guard {
                state.last_scroll = relative;
                return;
            }

            let idle = state.in_flight.is_none();
            let kind = if idle && relative > SCROLL_BOTTOM_THRESHOLD {
                state.items.last().map(|c| FetchKind::Forward(c.id.clone()))
            } else if idle && relative < SCROLL_TOP_THRESHOLD {
                state.show_more_recent = false;
                state.items.first().map(|c| FetchKind::Backward(c.id.clone()))
            } else {
                // Scrolling upward away from the top reveals the
                // jump-to-most-recent hint
                state.show_more_recent = state.last_scroll > relative;
                None
            };
            state.last_scroll = relative;
            kind
        };

        if let Some(kind) = kind {
            self.fetch(kind).await;
        }
    }

    /// Reload the most recent page, suppressing the scroll handler until
    /// the jump has settled
    pub async fn jump_to_most_recent(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.scroll_guard = true;
        }
        self.fetch(FetchKind::Initial).await;
        let mut state = self.state.lock().unwrap();
        state.scroll_guard = false;
        state.show_more_recent = false;
        state.last_scroll = 0.0;
    }

    /// Replace the window with records inside a committed chart selection
    pub async fn apply_timeline_range(&self, range: TimeRange) {
        tracing::info!(from = %range.from, to = %range.to, "loading connections for selection");
        self.fetch(FetchKind::Range(range)).await;
    }

    /// Refresh rules/services side data when a push notification reports
    /// they changed
    pub async fn handle_notification(&self, frame: &drishti_common::NotificationFrame) {
        match frame.event.as_str() {
            "rules.new" | "rules.edit" => match self.source.get_rules().await {
                Ok(rules) => {
                    self.state.lock().unwrap().rules = rules;
                    tracing::debug!("connection rules reloaded after notification");
                }
                Err(err) => tracing::warn!(error = %err, "failed to reload rules"),
            },
            "services.edit" => match self.source.get_services().await {
                Ok(services) => {
                    self.state.lock().unwrap().services = services;
                    tracing::debug!("services reloaded after notification");
                }
                Err(err) => tracing::warn!(error = %err, "failed to reload services"),
            },
            _ => {}
        }
    }

    pub fn pulse(&self, duration: Duration) {
        self.state.lock().unwrap().pulse_until = Some(Instant::now() + duration);
    }

    pub fn is_pulsing(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .pulse_until
            .is_some_and(|until| Instant::now() < until)
    }

    async fn fetch(&self, kind: FetchKind) {
        let (filters, epoch, fetch_id) = {
            let mut state = self.state.lock().unwrap();
            // Extends are serialized: a second scroll while one is in
            // flight is dropped. Re-anchors always go through; staleness is
            // handled by the epoch check below.
            let gated = matches!(kind, FetchKind::Forward(_) | FetchKind::Backward(_));
            if gated && state.in_flight.is_some() {
                tracing::debug!("extend skipped, fetch already in flight");
                return;
            }
            state.fetch_seq += 1;
            let fetch_id = state.fetch_seq;
            state.in_flight = Some(fetch_id);

            let mut filters = state.filters.clone();
            if let FetchKind::Range(range) = &kind {
                filters.push((
                    "started_after".to_string(),
                    range.from.timestamp().to_string(),
                ));
                filters.push((
                    "started_before".to_string(),
                    range.to.timestamp().to_string(),
                ));
            }
            (filters, state.epoch, fetch_id)
        };

        let (cursor, limit) = match &kind {
            FetchKind::Initial => (Cursor::none(), self.page_size),
            FetchKind::Forward(id) => (Cursor::forward_from(id.clone()), self.page_size),
            FetchKind::Backward(id) => (Cursor::backward_to(id.clone()), self.page_size),
            FetchKind::Range(_) => (Cursor::none(), self.max_size),
        };

        let result = self.source.query(&filters, &cursor, limit).await;

        let published = {
            let mut state = self.state.lock().unwrap();
            // A superseded fetch must not release a gate a newer fetch holds
            if state.in_flight == Some(fetch_id) {
                state.in_flight = None;
            }

            if state.epoch != epoch {
                tracing::debug!("stale page response discarded, filters changed in flight");
                return;
            }

            let rows = match result {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(error = %err, "connection page query failed");
                    return;
                }
            };

            self.apply(&mut state, &kind, rows);

            match (state.items.first(), state.items.last()) {
                (Some(first), Some(last)) => {
                    Some(TimeRange::new(last.started_at, first.started_at))
                }
                _ => None,
            }
        };

        // The `from`/`to` naming is inverted relative to chronological
        // order because the list is newest-first.
        if let Some(range) = published {
            self.bus.dispatch(Event::ConnectionUpdates(range));
        }
    }

    fn apply(&self, state: &mut WindowState, kind: &FetchKind, rows: Vec<ConnectionRecord>) {
        match kind {
            FetchKind::Initial | FetchKind::Range(_) => {
                state.items = rows;
            }
            FetchKind::Forward(_) => {
                if rows.is_empty() {
                    // A boundary id with no match is a legitimate empty
                    // extension, not an error
                    return;
                }
                // First row echoes the cursor
                state.items.extend(rows.into_iter().skip(1));
                if state.items.len() > self.max_size {
                    let excess = state.items.len() - self.max_size;
                    state.items.drain(..excess);
                }
            }
            FetchKind::Backward(_) => {
                if rows.is_empty() {
                    return;
                }
                // Last row echoes the cursor
                let fresh_len = rows.len() - 1;
                let mut merged = Vec::with_capacity(fresh_len + state.items.len());
                merged.extend(rows.into_iter().take(fresh_len));
                merged.append(&mut state.items);
                if merged.len() > self.max_size {
                    merged.truncate(self.max_size);
                }
                state.items = merged;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_id(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .items
            .first()
            .map(|c| c.id.clone())
    }

    pub fn last_id(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .items
            .last()
            .map(|c| c.id.clone())
    }

    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn show_more_recent(&self) -> bool {
        self.state.lock().unwrap().show_more_recent
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn services(&self) -> BTreeMap<u16, Service> {
        self.state.lock().unwrap().services.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportError;
    use crate::bus::Topic;
    use chrono::{TimeZone, Utc};
    use drishti_common::NotificationFrame;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Newest-first dataset addressed by cursor, echoing the boundary row
    /// like the backend does
    struct MockSource {
        records: Vec<ConnectionRecord>,
        fail: AtomicBool,
        calls: AtomicUsize,
        block_next: AtomicBool,
        gate: Arc<Notify>,
        rules: Vec<Rule>,
        services: BTreeMap<u16, Service>,
    }

    fn record(seq: i64) -> ConnectionRecord {
        // Higher sequence numbers are newer
        let started = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()
            + chrono::Duration::minutes(seq);
        ConnectionRecord {
            id: format!("c{seq:04}"),
            ip_src: "10.10.1.4".to_string(),
            ip_dst: "10.10.1.1".to_string(),
            port_src: 40000,
            port_dst: 8080,
            started_at: started,
            closed_at: started + chrono::Duration::seconds(2),
            client_bytes: 100,
            server_bytes: 250,
            matched_rules: Vec::new(),
            marked: false,
            comment: String::new(),
        }
    }

    impl MockSource {
        /// Dataset of ids `cNNNN` for sequences `newest..=oldest`, newest first
        fn with_range(newest: i64, oldest: i64) -> Self {
            Self {
                records: (oldest..=newest).rev().map(record).collect(),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                block_next: AtomicBool::new(false),
                gate: Arc::new(Notify::new()),
                rules: Vec::new(),
                services: BTreeMap::new(),
            }
        }

        fn index_of(&self, id: &str) -> Option<usize> {
            self.records.iter().position(|r| r.id == id)
        }
    }

    impl ConnectionSource for MockSource {
        async fn query(
            &self,
            filters: &[(String, String)],
            cursor: &Cursor,
            limit: usize,
        ) -> Result<Vec<ConnectionRecord>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.block_next.swap(false, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Status {
                    status_code: 500,
                    status: "500 Internal Server Error".to_string(),
                    body: String::new(),
                });
            }

            let mut records: Vec<&ConnectionRecord> = self.records.iter().collect();
            for (key, value) in filters {
                let ts: i64 = value.parse().unwrap_or(0);
                if key == "started_after" {
                    records.retain(|r| r.started_at.timestamp() > ts);
                } else if key == "started_before" {
                    records.retain(|r| r.started_at.timestamp() < ts);
                }
            }

            let page: Vec<ConnectionRecord> = match (&cursor.from, &cursor.to) {
                (Some(from), None) => {
                    // Echo first, then up to `limit` older rows
                    let idx = records.iter().position(|r| &r.id == from);
                    match idx {
                        Some(idx) => records[idx..]
                            .iter()
                            .take(limit + 1)
                            .map(|r| (*r).clone())
                            .collect(),
                        None => Vec::new(),
                    }
                }
                (None, Some(to)) => {
                    // Up to `limit` newer rows, echo last
                    let idx = records.iter().position(|r| &r.id == to);
                    match idx {
                        Some(idx) => {
                            let start = idx.saturating_sub(limit);
                            records[start..=idx].iter().map(|r| (*r).clone()).collect()
                        }
                        None => Vec::new(),
                    }
                }
                _ => records.iter().take(limit).map(|r| (*r).clone()).collect(),
            };
            Ok(page)
        }

        async fn get_rules(&self) -> Result<Vec<Rule>, TransportError> {
            Ok(self.rules.clone())
        }

        async fn get_services(&self) -> Result<BTreeMap<u16, Service>, TransportError> {
            Ok(self.services.clone())
        }
    }

    fn window(source: MockSource) -> CursorPaginationWindow<MockSource> {
        CursorPaginationWindow::new(source, Arc::new(EventBus::new()))
    }

    fn assert_no_duplicate_ids(window: &CursorPaginationWindow<MockSource>) {
        let ids: Vec<String> = window.snapshot().iter().map(|c| c.id.clone()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "window contains duplicate ids");
    }

    #[tokio::test]
    async fn test_initial_load_fills_one_page() {
        let w = window(MockSource::with_range(150, 1));
        w.load_initial().await;

        assert_eq!(w.len(), 50);
        assert_eq!(w.first_id().as_deref(), Some("c0150"));
        assert_eq!(w.last_id().as_deref(), Some("c0101"));
    }

    #[tokio::test]
    async fn test_empty_initial_load_clears_cursors() {
        let bus = Arc::new(EventBus::new());
        let published = Arc::new(AtomicUsize::new(0));
        let published2 = published.clone();
        bus.register(Topic::ConnectionUpdates, move |_| {
            published2.fetch_add(1, Ordering::SeqCst);
        });
        let w = CursorPaginationWindow::new(MockSource::with_range(0, 1), bus);
        w.load_initial().await;

        assert!(w.is_empty());
        assert_eq!(w.first_id(), None);
        assert_eq!(w.last_id(), None);
        // No range event for an empty window
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forward_extend_drops_echoed_boundary_row() {
        // Scenario: 50 rows loaded, scroll to bottom, page of 51 arrives
        // (boundary echoed first), window grows to exactly 100.
        let w = window(MockSource::with_range(150, 1));
        w.load_initial().await;

        w.handle_scroll(0.9999999).await;

        assert_eq!(w.len(), 100);
        assert_eq!(w.first_id().as_deref(), Some("c0150"));
        assert_eq!(w.last_id().as_deref(), Some("c0051"));
        assert_no_duplicate_ids(&w);
    }

    #[tokio::test]
    async fn test_forward_extend_trims_front_at_max_size() {
        // Window already at max (200); one more extend appends 50 then
        // trims the oldest-loaded (front) rows back to 200.
        let w = window(MockSource::with_range(400, 1));
        w.load_initial().await;
        for _ in 0..4 {
            w.handle_scroll(1.0).await;
        }

        assert_eq!(w.len(), 200);
        assert_eq!(w.first_id().as_deref(), Some("c0350"));
        assert_eq!(w.last_id().as_deref(), Some("c0151"));
        assert_no_duplicate_ids(&w);
    }

    #[tokio::test]
    async fn test_backward_extend_prepends_and_trims_tail() {
        let w = window(MockSource::with_range(400, 1));
        w.load_initial().await;
        for _ in 0..4 {
            w.handle_scroll(1.0).await;
        }
        // first is now c0350; scroll to top loads the 50 newer rows
        w.handle_scroll(0.0).await;

        assert_eq!(w.len(), 200);
        assert_eq!(w.first_id().as_deref(), Some("c0400"));
        assert_eq!(w.last_id().as_deref(), Some("c0201"));
        assert_no_duplicate_ids(&w);
    }

    #[tokio::test]
    async fn test_echo_only_forward_page_leaves_window_unchanged() {
        // Dataset ends exactly at the window's last row: the page contains
        // only the echoed boundary row.
        let w = window(MockSource::with_range(50, 1));
        w.load_initial().await;
        assert_eq!(w.len(), 50);

        w.handle_scroll(1.0).await;
        assert_eq!(w.len(), 50);
        assert_eq!(w.last_id().as_deref(), Some("c0001"));
    }

    #[tokio::test]
    async fn test_transport_error_leaves_window_untouched() {
        let source = MockSource::with_range(150, 1);
        let w = window(source);
        w.load_initial().await;
        let before = w.snapshot();

        w.source.fail.store(true, Ordering::SeqCst);
        w.handle_scroll(1.0).await;

        let after = w.snapshot();
        assert_eq!(before.len(), after.len());
        assert_eq!(
            before.first().map(|c| &c.id),
            after.first().map(|c| &c.id)
        );
    }

    #[tokio::test]
    async fn test_filter_change_discards_in_flight_response() {
        let source = MockSource::with_range(150, 1);
        source.block_next.store(true, Ordering::SeqCst);
        let gate = source.gate.clone();
        let w = Arc::new(window(source));

        // First fetch parks inside the source
        let w2 = w.clone();
        let stale = tokio::spawn(async move { w2.load_initial().await });
        tokio::task::yield_now().await;

        // Filters change while the first fetch is in flight
        w.set_filters(vec![(
            "started_after".to_string(),
            record(100).started_at.timestamp().to_string(),
        )])
        .await;
        assert_eq!(w.first_id().as_deref(), Some("c0150"));
        assert_eq!(w.last_id().as_deref(), Some("c0101"));

        // Releasing the stale fetch must not overwrite the new epoch
        gate.notify_one();
        stale.await.unwrap();
        assert_eq!(w.last_id().as_deref(), Some("c0101"));
        assert_eq!(w.len(), 50);
    }

    #[tokio::test]
    async fn test_superseded_fetch_does_not_reopen_extend_gate() {
        let source = MockSource::with_range(400, 1);
        let gate = source.gate.clone();
        let w = Arc::new(window(source));
        w.load_initial().await;
        assert_eq!(w.last_id().as_deref(), Some("c0351"));

        // Fetch A parks inside the source with the old epoch
        w.source.block_next.store(true, Ordering::SeqCst);
        let w2 = w.clone();
        let stale = tokio::spawn(async move { w2.load_initial().await });
        tokio::task::yield_now().await;

        // The re-anchor B parks behind it with the new epoch
        w.source.block_next.store(true, Ordering::SeqCst);
        let w3 = w.clone();
        let fresh = tokio::spawn(async move {
            w3.set_filters(vec![(
                "started_before".to_string(),
                record(200).started_at.timestamp().to_string(),
            )])
            .await;
        });
        tokio::task::yield_now().await;
        assert_eq!(w.source.calls.load(Ordering::SeqCst), 3);

        // A completes first and is discarded; B still holds the gate, so a
        // bottom scroll must not launch an extend whose cursor comes from
        // the pre-re-anchor window
        gate.notify_one();
        stale.await.unwrap();
        w.handle_scroll(1.0).await;
        assert_eq!(w.source.calls.load(Ordering::SeqCst), 3);

        gate.notify_one();
        fresh.await.unwrap();
        assert_eq!(w.first_id().as_deref(), Some("c0199"));
        assert_eq!(w.last_id().as_deref(), Some("c0150"));
        assert_eq!(w.len(), 50);
    }

    #[tokio::test]
    async fn test_mid_scroll_does_not_fetch_and_tracks_direction() {
        let source = MockSource::with_range(150, 1);
        let w = window(source);
        w.load_initial().await;
        let calls = w.source.calls.load(Ordering::SeqCst);

        w.handle_scroll(0.8).await;
        assert_eq!(w.source.calls.load(Ordering::SeqCst), calls);
        assert!(!w.show_more_recent());

        // Scrolling back up reveals the jump hint
        w.handle_scroll(0.5).await;
        assert!(w.show_more_recent());
    }

    #[tokio::test]
    async fn test_jump_to_most_recent_resets_window_and_hint() {
        let w = window(MockSource::with_range(400, 1));
        w.load_initial().await;
        for _ in 0..4 {
            w.handle_scroll(1.0).await;
        }
        w.handle_scroll(0.5).await;
        assert!(w.show_more_recent());

        w.jump_to_most_recent().await;

        assert_eq!(w.first_id().as_deref(), Some("c0400"));
        assert_eq!(w.len(), 50);
        assert!(!w.show_more_recent());
    }

    #[tokio::test]
    async fn test_timeline_range_replaces_window() {
        let w = window(MockSource::with_range(150, 1));
        w.load_initial().await;

        let from = record(20).started_at;
        let to = record(40).started_at;
        w.apply_timeline_range(TimeRange::new(from, to)).await;

        // Exclusive bounds: sequences 21..=39
        assert_eq!(w.first_id().as_deref(), Some("c0039"));
        assert_eq!(w.last_id().as_deref(), Some("c0021"));
    }

    #[tokio::test]
    async fn test_range_event_is_inverted_newest_first() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.register(Topic::ConnectionUpdates, move |event| {
            if let Event::ConnectionUpdates(range) = event {
                seen2.lock().unwrap().push(*range);
            }
        });

        let w = CursorPaginationWindow::new(MockSource::with_range(150, 1), bus);
        w.load_initial().await;

        let ranges = seen.lock().unwrap();
        assert_eq!(ranges.len(), 1);
        // from = oldest visible row's start, to = newest's
        assert_eq!(ranges[0].from, record(101).started_at);
        assert_eq!(ranges[0].to, record(150).started_at);
    }

    #[tokio::test]
    async fn test_notifications_refresh_side_data() {
        let mut source = MockSource::with_range(10, 1);
        source.rules = vec![Rule {
            id: "rule-a".to_string(),
            name: "flag out".to_string(),
            color: "#ff0000".to_string(),
            enabled: true,
        }];
        source.services.insert(
            8080,
            Service {
                port: 8080,
                name: "web".to_string(),
                color: "#00ff00".to_string(),
                notes: String::new(),
            },
        );
        let w = window(source);

        assert!(w.rules().is_empty());
        w.handle_notification(&NotificationFrame::new("rules.new", serde_json::Value::Null))
            .await;
        assert_eq!(w.rules().len(), 1);

        assert!(w.services().is_empty());
        w.handle_notification(&NotificationFrame::new(
            "services.edit",
            serde_json::Value::Null,
        ))
        .await;
        assert_eq!(w.services().len(), 1);

        // Unrelated events touch nothing
        w.handle_notification(&NotificationFrame::new(
            "pcap.completed",
            serde_json::Value::Null,
        ))
        .await;
        assert_eq!(w.rules().len(), 1);
    }

    #[tokio::test]
    async fn test_pulse_expires() {
        let w = window(MockSource::with_range(10, 1));
        assert!(!w.is_pulsing());
        w.pulse(Duration::from_secs(5));
        assert!(w.is_pulsing());
    }
}
