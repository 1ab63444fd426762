//! Backend query interfaces and their HTTP implementation
//!
//! The console core depends on two paged-query collaborators: a
//! [`ConnectionSource`] for the connection list and a [`MetricsSource`] for
//! the timeline statistics. `HttpBackend` implements both over the JSON API.

use crate::timeline::Metric;
use chrono::{DateTime, Utc};
use drishti_common::{ConnectionRecord, MetricBucket, Rule, Service};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure of a backend query.
///
/// The core never propagates these as fatal: the affected window or series
/// is left unchanged and the error is logged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request rejected: {status}")]
    Status {
        status_code: u16,
        status: String,
        body: String,
    },

    #[error("transport failure: {0}")]
    Network(#[from] reqwest::Error),
}

/// Cursor for paged connection queries.
///
/// `from` pages toward older records starting at an already-loaded id;
/// `to` pages toward newer ones. The backend echoes the boundary row:
/// with `from`, the first returned row's id equals `from`; with `to`,
/// the last returned row's id equals `to`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl Cursor {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn forward_from(id: impl Into<String>) -> Self {
        Self {
            from: Some(id.into()),
            to: None,
        }
    }

    pub fn backward_to(id: impl Into<String>) -> Self {
        Self {
            from: None,
            to: Some(id.into()),
        }
    }
}

/// Paged-query collaborator for the connection list
pub trait ConnectionSource: Send + Sync {
    /// Query up to `limit` records matching `filters`, newest first.
    /// Omitting both cursor ends returns the most recent records.
    fn query(
        &self,
        filters: &[(String, String)],
        cursor: &Cursor,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ConnectionRecord>, TransportError>> + Send;

    /// Detection rules, for the matched-rules side data
    fn get_rules(&self) -> impl Future<Output = Result<Vec<Rule>, TransportError>> + Send {
        async { Ok(Vec::new()) }
    }

    /// Registered services keyed by port
    fn get_services(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<u16, Service>, TransportError>> + Send {
        async { Ok(BTreeMap::new()) }
    }
}

/// Aggregated-statistics collaborator for the timeline.
///
/// Responses are sparse: only buckets where activity occurred are returned,
/// over an implicit recent horizon.
pub trait MetricsSource: Send + Sync {
    fn query_metrics(
        &self,
        metric: Metric,
        filters: &[(String, String)],
    ) -> impl Future<Output = Result<Vec<MetricBucket>, TransportError>> + Send;

    fn get_rules(&self) -> impl Future<Output = Result<Vec<Rule>, TransportError>> + Send {
        async { Ok(Vec::new()) }
    }

    fn get_services(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<u16, Service>, TransportError>> + Send {
        async { Ok(BTreeMap::new()) }
    }
}

/// Statistics record as the backend serializes it: one optional map per
/// metric, only the requested one populated.
#[derive(Debug, Deserialize)]
struct RawStatsRecord {
    range_start: DateTime<Utc>,
    #[serde(default)]
    connections_per_service: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    client_bytes_per_service: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    server_bytes_per_service: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    duration_per_service: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    matched_rules: Option<BTreeMap<String, i64>>,
}

impl RawStatsRecord {
    fn into_bucket(self, metric: Metric) -> MetricBucket {
        let values = match metric {
            Metric::ConnectionsPerService => self.connections_per_service,
            Metric::ClientBytesPerService => self.client_bytes_per_service,
            Metric::ServerBytesPerService => self.server_bytes_per_service,
            Metric::DurationPerService => self.duration_per_service,
            Metric::MatchedRules => self.matched_rules,
        };
        MetricBucket {
            range_start: self.range_start,
            values: values.unwrap_or_default(),
        }
    }
}

/// HTTP implementation of both query collaborators
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status_code: status.as_u16(),
                status: status.to_string(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

impl ConnectionSource for HttpBackend {
    async fn query(
        &self,
        filters: &[(String, String)],
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<ConnectionRecord>, TransportError> {
        let mut query: Vec<(String, String)> = filters.to_vec();
        if let Some(from) = &cursor.from {
            query.push(("from".to_string(), from.clone()));
        }
        if let Some(to) = &cursor.to {
            query.push(("to".to_string(), to.clone()));
        }
        query.push(("limit".to_string(), limit.to_string()));

        self.get_json("/api/connections", &query).await
    }

    async fn get_rules(&self) -> Result<Vec<Rule>, TransportError> {
        self.get_json("/api/rules", &[]).await
    }

    async fn get_services(&self) -> Result<BTreeMap<u16, Service>, TransportError> {
        self.get_json("/api/services", &[]).await
    }
}

impl MetricsSource for HttpBackend {
    async fn query_metrics(
        &self,
        metric: Metric,
        filters: &[(String, String)],
    ) -> Result<Vec<MetricBucket>, TransportError> {
        let mut query: Vec<(String, String)> =
            vec![("metric".to_string(), metric.as_str().to_string())];
        query.extend_from_slice(filters);

        let records: Vec<RawStatsRecord> = self.get_json("/api/statistics", &query).await?;
        Ok(records
            .into_iter()
            .map(|r| r.into_bucket(metric))
            .collect())
    }

    async fn get_rules(&self) -> Result<Vec<Rule>, TransportError> {
        self.get_json("/api/rules", &[]).await
    }

    async fn get_services(&self) -> Result<BTreeMap<u16, Service>, TransportError> {
        self.get_json("/api/services", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_raw_stats_record_selects_requested_metric() {
        let json = r#"{
            "range_start": "2024-05-04T12:10:00Z",
            "connections_per_service": {"80": 12, "8080": 3}
        }"#;
        let raw: RawStatsRecord = serde_json::from_str(json).unwrap();
        let bucket = raw.into_bucket(Metric::ConnectionsPerService);

        assert_eq!(
            bucket.range_start,
            Utc.with_ymd_and_hms(2024, 5, 4, 12, 10, 0).unwrap()
        );
        assert_eq!(bucket.value("80"), 12);
        assert_eq!(bucket.value("8080"), 3);
    }

    #[test]
    fn test_raw_stats_record_missing_metric_is_empty() {
        let json = r#"{"range_start": "2024-05-04T12:10:00Z"}"#;
        let raw: RawStatsRecord = serde_json::from_str(json).unwrap();
        let bucket = raw.into_bucket(Metric::MatchedRules);
        assert!(bucket.values.is_empty());
    }

    #[test]
    fn test_cursor_constructors() {
        assert_eq!(Cursor::none(), Cursor::default());

        let fwd = Cursor::forward_from("abc");
        assert_eq!(fwd.from.as_deref(), Some("abc"));
        assert!(fwd.to.is_none());

        let back = Cursor::backward_to("abc");
        assert_eq!(back.to.as_deref(), Some("abc"));
        assert!(back.from.is_none());
    }
}
