//! Gap-free 1-minute time series over sparse statistics buckets
//!
//! The backend only returns buckets where activity occurred. The windower
//! densifies them into a renderable series, clamps runaway spans, and
//! manages a draggable selection whose commit is debounced before it is
//! published as [`Event::TimelineUpdates`].

use crate::api::MetricsSource;
use crate::bus::{Event, EventBus, TimeRange};
use crate::debounce::Debouncer;
use drishti_common::{MetricBucket, NotificationFrame, Rule, Service};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bucket granularity of the statistics endpoint
pub const BUCKET_WIDTH_SECS: i64 = 60;

/// Widest series the chart will densify; anything longer is clamped
pub const MAX_SPAN_HOURS: i64 = 24;

/// Quiet period before a dragged selection is committed
pub const SELECTION_DEBOUNCE: Duration = Duration::from_secs(1);

/// Minimum interval between two span-clamp notifications
const RANGE_NOTICE_INTERVAL: Duration = Duration::from_secs(60);

/// Asymmetric padding applied around the visible-connections range when the
/// chart auto-fits to it
pub const LEFT_SELECTION_PADDING: i32 = 24;
pub const RIGHT_SELECTION_PADDING: i32 = 8;

const SELECTION_KEY: &str = "timeline_selection";

/// Aggregate series selectable on the chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    ConnectionsPerService,
    ClientBytesPerService,
    ServerBytesPerService,
    DurationPerService,
    MatchedRules,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::ConnectionsPerService,
        Metric::ClientBytesPerService,
        Metric::ServerBytesPerService,
        Metric::DurationPerService,
        Metric::MatchedRules,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::ConnectionsPerService => "connections_per_service",
            Metric::ClientBytesPerService => "client_bytes_per_service",
            Metric::ServerBytesPerService => "server_bytes_per_service",
            Metric::DurationPerService => "duration_per_service",
            Metric::MatchedRules => "matched_rules",
        }
    }

    pub fn parse(value: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.as_str() == value)
    }

    /// Whether the series columns are rule ids rather than service ports
    pub fn per_rule(&self) -> bool {
        matches!(self, Metric::MatchedRules)
    }
}

/// Densify sparse buckets onto the 1-minute grid.
///
/// The output covers `first.time - 1min ..= last.time + 1min`, clamped to
/// [`MAX_SPAN_HOURS`]; the second element reports whether clamping occurred.
/// Buckets with sub-epoch (negative) timestamps are skipped when picking the
/// effective start. Every output bucket carries exactly the requested
/// columns, absent ones zeroed. Pure: identical input gives identical
/// output.
pub fn zero_fill(buckets: &[MetricBucket], columns: &[String]) -> (Vec<MetricBucket>, bool) {
    let step = chrono::Duration::seconds(BUCKET_WIDTH_SECS);
    let max_span = chrono::Duration::hours(MAX_SPAN_HOURS);

    let Some(start_index) = buckets
        .iter()
        .position(|b| b.range_start.timestamp() >= 0)
    else {
        return (Vec::new(), false);
    };
    let first = &buckets[start_index];
    let last = &buckets[buckets.len() - 1];

    let start = first.range_start - step;
    let mut end = last.range_start + step;
    let clamped = end - start > max_span;
    if clamped {
        end = start + max_span;
    }

    let mut dense = Vec::new();
    let mut tick = start;
    let mut i = start_index;
    while tick <= end {
        while i < buckets.len() && buckets[i].range_start < tick {
            i += 1;
        }
        if i < buckets.len() && buckets[i].range_start == tick {
            let source = &buckets[i];
            let values: BTreeMap<String, i64> = columns
                .iter()
                .map(|c| (c.clone(), source.value(c)))
                .collect();
            dense.push(MetricBucket {
                range_start: tick,
                values,
            });
            i += 1;
        } else {
            dense.push(MetricBucket::zero_filled(tick, columns));
        }
        tick += step;
    }
    (dense, clamped)
}

/// Min/max across every column of the dense series, for axis scaling
pub fn value_range(series: &[MetricBucket]) -> Option<(i64, i64)> {
    let mut range: Option<(i64, i64)> = None;
    for bucket in series {
        for value in bucket.values.values() {
            range = Some(match range {
                Some((min, max)) => (min.min(*value), max.max(*value)),
                None => (*value, *value),
            });
        }
    }
    range
}

struct TimelineState {
    metric: Metric,
    filters: Vec<(String, String)>,
    /// Bumped when the metric or a chart-relevant filter changes; a load
    /// captures it at issue time and discards its response on mismatch
    epoch: u64,
    series: Vec<MetricBucket>,
    columns: Vec<String>,
    value_range: Option<(i64, i64)>,
    /// Time bounds of the dense series
    bounds: Option<TimeRange>,
    /// Currently visible portion of the chart
    view: Option<TimeRange>,
    selection: Option<TimeRange>,
    /// Set while a drag is pending commit; external view updates are
    /// ignored until the debounce fires
    changes_disabled: bool,
    rules: Vec<Rule>,
    services: BTreeMap<u16, Service>,
    last_range_notice: Option<Instant>,
    pulse_until: Option<Instant>,
}

pub struct TimeSeriesWindower<M: MetricsSource> {
    source: M,
    bus: Arc<EventBus>,
    debouncer: Debouncer,
    state: Arc<Mutex<TimelineState>>,
}

impl<M: MetricsSource> TimeSeriesWindower<M> {
    pub fn new(source: M, bus: Arc<EventBus>) -> Self {
        Self {
            source,
            bus,
            debouncer: Debouncer::new(),
            state: Arc::new(Mutex::new(TimelineState {
                metric: Metric::default(),
                filters: Vec::new(),
                epoch: 0,
                series: Vec::new(),
                columns: Vec::new(),
                value_range: None,
                bounds: None,
                view: None,
                selection: None,
                changes_disabled: false,
                rules: Vec::new(),
                services: BTreeMap::new(),
                last_range_notice: None,
                pulse_until: None,
            })),
        }
    }

    /// Fetch the active metric and densify it.
    ///
    /// An empty response leaves the previous series in place. A response
    /// from before a metric or relevant-filter change is discarded whole,
    /// side-data caches included.
    pub async fn load(&self) {
        let (metric, filters, epoch) = {
            let state = self.state.lock().unwrap();
            (state.metric, state.filters.clone(), state.epoch)
        };

        let (columns, params) = if metric.per_rule() {
            let rules = match self.source.get_rules().await {
                Ok(rules) => rules,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load rules for the timeline");
                    return;
                }
            };
            let columns: Vec<String> = rules.iter().map(|r| r.id.clone()).collect();
            let params: Vec<(String, String)> = filters
                .iter()
                .filter(|(key, _)| key == "matched_rules")
                .cloned()
                .collect();
            {
                let mut state = self.state.lock().unwrap();
                if state.epoch != epoch {
                    tracing::debug!("stale statistics load discarded, inputs changed in flight");
                    return;
                }
                state.rules = rules;
            }
            (columns, params)
        } else {
            let mut services = match self.source.get_services().await {
                Ok(services) => services,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load services for the timeline");
                    return;
                }
            };
            {
                let mut state = self.state.lock().unwrap();
                if state.epoch != epoch {
                    tracing::debug!("stale statistics load discarded, inputs changed in flight");
                    return;
                }
                state.services = services.clone();
            }

            // A service_port filter narrows the chart to that one service,
            // if it is known
            let filtered_port = filters
                .iter()
                .find(|(key, _)| key == "service_port")
                .and_then(|(_, value)| value.parse::<u16>().ok());
            if let Some(port) = filtered_port {
                if services.contains_key(&port) {
                    services.retain(|p, _| *p == port);
                }
            }

            let columns: Vec<String> = services.keys().map(|p| p.to_string()).collect();
            let params: Vec<(String, String)> = columns
                .iter()
                .map(|port| ("ports".to_string(), port.clone()))
                .collect();
            (columns, params)
        };

        let buckets = match self.source.query_metrics(metric, &params).await {
            Ok(buckets) => buckets,
            Err(err) => {
                tracing::warn!(error = %err, metric = metric.as_str(), "statistics query failed");
                return;
            }
        };
        if buckets.is_empty() {
            tracing::debug!(metric = metric.as_str(), "statistics response empty");
            return;
        }

        let (series, clamped) = zero_fill(&buckets, &columns);

        let notify = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                tracing::debug!("stale statistics response discarded, inputs changed in flight");
                return;
            }
            state.value_range = value_range(&series);
            state.bounds = match (series.first(), series.last()) {
                (Some(first), Some(last)) => {
                    Some(TimeRange::new(first.range_start, last.range_start))
                }
                _ => None,
            };
            state.view = state.bounds;
            state.columns = columns;
            state.series = series;

            clamped
                && state
                    .last_range_notice
                    .is_none_or(|at| at.elapsed() >= RANGE_NOTICE_INTERVAL)
                && {
                    state.last_range_notice = Some(Instant::now());
                    true
                }
        };

        if notify {
            tracing::info!(metric = metric.as_str(), "statistics span clamped to 24 hours");
            self.bus.dispatch(Event::Notification(NotificationFrame::new(
                "timeline.range.large",
                serde_json::Value::Null,
            )));
        }
        tracing::debug!(metric = metric.as_str(), "statistics loaded");
    }

    pub async fn set_metric(&self, metric: Metric) {
        {
            let mut state = self.state.lock().unwrap();
            if state.metric == metric {
                return;
            }
            state.metric = metric;
            state.epoch += 1;
        }
        self.load().await;
    }

    /// Adopt a new filter set, reloading only when a chart-relevant filter
    /// (`service_port`, or `matched_rules` for the rules metric) changed
    pub async fn set_filters(&self, filters: Vec<(String, String)>) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let before = relevant_filters(state.metric, &state.filters);
            let after = relevant_filters(state.metric, &filters);
            state.filters = filters;
            let changed = before != after;
            if changed {
                state.epoch += 1;
            }
            changed
        };
        if changed {
            self.load().await;
        }
    }

    /// Pan/zoom from the chart itself; dropped while a selection drag is
    /// pending commit
    pub fn handle_view_change(&self, view: TimeRange) {
        let mut state = self.state.lock().unwrap();
        if state.changes_disabled {
            return;
        }
        state.view = Some(view);
    }

    /// A selection drag: disables external view changes and (re)starts the
    /// commit debounce. When it fires, the committed range is published and
    /// the chart accepts view changes again.
    pub fn select(&self, range: TimeRange) {
        {
            let mut state = self.state.lock().unwrap();
            state.changes_disabled = true;
            state.selection = Some(range);
        }

        let state = self.state.clone();
        let bus = self.bus.clone();
        self.debouncer
            .schedule(SELECTION_KEY, SELECTION_DEBOUNCE, async move {
                {
                    let mut state = state.lock().unwrap();
                    state.changes_disabled = false;
                }
                tracing::debug!(from = %range.from, to = %range.to, "chart selection committed");
                bus.dispatch(Event::TimelineUpdates(range));
            });
    }

    /// Auto-fit the view around the range currently visible in the
    /// connection list, padded asymmetrically and clamped to the series
    pub fn fit_to(&self, selection: TimeRange) {
        let mut state = self.state.lock().unwrap();
        state.selection = Some(selection);
        let Some(bounds) = state.bounds else {
            return;
        };
        let width = selection.width();
        let start = (selection.from - width * LEFT_SELECTION_PADDING).max(bounds.from);
        let end = (selection.to + width * RIGHT_SELECTION_PADDING).min(bounds.to);
        state.view = Some(TimeRange::new(start, end));
    }

    /// Service definitions changed upstream: reload and re-fit
    pub async fn handle_notification(&self, frame: &NotificationFrame) {
        if frame.event != "services.edit" {
            return;
        }
        self.load().await;
        let selection = self.state.lock().unwrap().selection;
        if let Some(selection) = selection {
            self.fit_to(selection);
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

    pub fn metric(&self) -> Metric {
        self.state.lock().unwrap().metric
    }

    pub fn series(&self) -> Vec<MetricBucket> {
        self.state.lock().unwrap().series.clone()
    }

    pub fn columns(&self) -> Vec<String> {
        self.state.lock().unwrap().columns.clone()
    }

    pub fn view(&self) -> Option<TimeRange> {
        self.state.lock().unwrap().view
    }

    pub fn selection(&self) -> Option<TimeRange> {
        self.state.lock().unwrap().selection
    }

    pub fn value_range(&self) -> Option<(i64, i64)> {
        self.state.lock().unwrap().value_range
    }
}

/// The filter values whose change requires re-querying the chart
fn relevant_filters(metric: Metric, filters: &[(String, String)]) -> Vec<String> {
    if metric.per_rule() {
        let mut values: Vec<String> = filters
            .iter()
            .filter(|(key, _)| key == "matched_rules")
            .map(|(_, value)| value.clone())
            .collect();
        values.sort();
        values
    } else {
        filters
            .iter()
            .filter(|(key, _)| key == "service_port")
            .map(|(_, value)| value.clone())
            .collect()
    }
}
