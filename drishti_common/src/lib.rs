//! Drishti Common - Shared wire model for the traffic inspection console
//!
//! This crate contains the JSON record types exchanged with the capture
//! backend, used by both the console core and the headless binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Wire-level errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize record: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// One captured connection, as returned by the paged connections endpoint.
///
/// Records are ordered by server-assigned sequence, newest first; `id` is the
/// opaque cursor used to page in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Server-assigned identifier, also the pagination cursor
    pub id: String,

    /// Client address
    pub ip_src: String,

    /// Service address
    pub ip_dst: String,

    /// Client port
    pub port_src: u16,

    /// Service port
    pub port_dst: u16,

    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,

    pub client_bytes: u64,
    pub server_bytes: u64,

    /// Identifiers of detection rules this connection matched
    #[serde(default)]
    pub matched_rules: Vec<String>,

    #[serde(default)]
    pub marked: bool,

    #[serde(default)]
    pub comment: String,
}

impl ConnectionRecord {
    /// Connection duration in milliseconds, zero for still-open connections
    pub fn duration_ms(&self) -> i64 {
        (self.closed_at - self.started_at).num_milliseconds().max(0)
    }
}

/// One aggregated statistics bucket at fixed one-minute granularity.
///
/// The backend returns only buckets where activity occurred; the console
/// zero-fills the gaps. Exactly one of the metric maps is populated per
/// requested metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBucket {
    /// Start of the one-minute interval this bucket covers
    pub range_start: DateTime<Utc>,

    /// Column (service port or rule id) to aggregated value
    #[serde(default)]
    pub values: BTreeMap<String, i64>,
}

impl MetricBucket {
    pub fn new(range_start: DateTime<Utc>) -> Self {
        Self {
            range_start,
            values: BTreeMap::new(),
        }
    }

    /// Bucket with every requested column present, absent ones zeroed
    pub fn zero_filled(range_start: DateTime<Utc>, columns: &[String]) -> Self {
        Self {
            range_start,
            values: columns.iter().map(|c| (c.clone(), 0)).collect(),
        }
    }

    pub fn value(&self, column: &str) -> i64 {
        self.values.get(column).copied().unwrap_or(0)
    }
}

/// A registered service (a port under observation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub port: u16,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub notes: String,
}

/// A detection rule, trimmed to the fields the console consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One push-notification frame from the backend event socket.
///
/// The frame is relayed verbatim; consumers filter on `event`
/// (e.g. "rules.new", "services.edit", "pcap.completed").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFrame {
    pub event: String,

    #[serde(default)]
    pub message: Value,
}

impl NotificationFrame {
    pub fn new(event: impl Into<String>, message: Value) -> Self {
        Self {
            event: event.into(),
            message,
        }
    }

    /// Parse a frame from the socket's text payload
    pub fn from_json(data: &str) -> Result<Self, WireError> {
        serde_json::from_str(data).map_err(WireError::Deserialize)
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialize)
    }

    /// Whether `event` falls under the given dot-separated namespace,
    /// so `"rules"` matches `"rules.new"` but not `"services.edit"`.
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.event == namespace
            || self
                .event
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> ConnectionRecord {
        ConnectionRecord {
            id: id.to_string(),
            ip_src: "10.10.1.4".to_string(),
            ip_dst: "10.10.1.1".to_string(),
            port_src: 44122,
            port_dst: 8080,
            started_at: Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap(),
            closed_at: Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 3).unwrap(),
            client_bytes: 320,
            server_bytes: 1480,
            matched_rules: vec!["5fa0f8d7c0a1b2c3d4e5f601".to_string()],
            marked: false,
            comment: String::new(),
        }
    }

    #[test]
    fn test_connection_record_roundtrip() {
        let rec = record("5fa0f8d7c0a1b2c3d4e5f600");

        let json = serde_json::to_string(&rec).unwrap();
        let decoded: ConnectionRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.id, rec.id);
        assert_eq!(decoded.port_dst, 8080);
        assert_eq!(decoded.started_at, rec.started_at);
        assert_eq!(decoded.matched_rules, rec.matched_rules);
    }

    #[test]
    fn test_connection_record_defaults() {
        // Fields the backend omits for unmarked, uncommented connections
        let json = r#"{
            "id": "5fa0f8d7c0a1b2c3d4e5f600",
            "ip_src": "10.10.1.4", "ip_dst": "10.10.1.1",
            "port_src": 44122, "port_dst": 8080,
            "started_at": "2024-05-04T12:00:00Z",
            "closed_at": "2024-05-04T12:00:03Z",
            "client_bytes": 320, "server_bytes": 1480
        }"#;
        let decoded: ConnectionRecord = serde_json::from_str(json).unwrap();

        assert!(decoded.matched_rules.is_empty());
        assert!(!decoded.marked);
        assert_eq!(decoded.comment, "");
        assert_eq!(decoded.duration_ms(), 3000);
    }

    #[test]
    fn test_metric_bucket_zero_filled() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 4, 12, 10, 0).unwrap();
        let columns = vec!["80".to_string(), "8080".to_string()];
        let bucket = MetricBucket::zero_filled(ts, &columns);

        assert_eq!(bucket.value("80"), 0);
        assert_eq!(bucket.value("8080"), 0);
        assert_eq!(bucket.value("443"), 0);
        assert_eq!(bucket.values.len(), 2);
    }

    #[test]
    fn test_notification_frame_roundtrip() {
        let frame = NotificationFrame::new(
            "rules.new",
            serde_json::json!({"name": "flag out", "id": "5fa0f8d7c0a1b2c3d4e5f601"}),
        );

        let json = frame.to_json().unwrap();
        let decoded = NotificationFrame::from_json(&json).unwrap();

        assert_eq!(decoded.event, "rules.new");
        assert_eq!(decoded.message["name"], "flag out");
    }

    #[test]
    fn test_notification_namespace_matching() {
        let frame = NotificationFrame::new("rules.new", Value::Null);
        assert!(frame.in_namespace("rules"));
        assert!(frame.in_namespace("rules.new"));
        assert!(!frame.in_namespace("rule"));
        assert!(!frame.in_namespace("services"));

        let other = NotificationFrame::new("services.edit", Value::Null);
        assert!(!other.in_namespace("rules"));
    }
}
