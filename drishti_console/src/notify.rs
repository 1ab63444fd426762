//! User-facing presentation of push notifications
//!
//! Turns raw [`NotificationFrame`]s into titled notices with a severity,
//! and keeps a bounded log of recent ones. Unknown events produce nothing.

use chrono::{DateTime, Utc};
use drishti_common::NotificationFrame;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// How many notices the log retains
pub const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Neutral,
    Info,
    Success,
    Alert,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Neutral => "neutral",
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Alert => "alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

/// Map a raw frame to a displayable notice; `None` for events that are not
/// user-facing
pub fn present(frame: &NotificationFrame) -> Option<Notice> {
    let message = &frame.message;
    let (title, description, severity) = match frame.event.as_str() {
        "connected" => (
            "connected",
            format!(
                "number of active clients: {}",
                field(message, "connected_clients")
            ),
            Severity::Neutral,
        ),
        "services.edit" => (
            "services updated",
            format!(
                "updated \"{}\" on port {}",
                field(message, "name"),
                field(message, "port")
            ),
            Severity::Info,
        ),
        "rules.new" => (
            "rules updated",
            format!("new rule added: {}", field(message, "name")),
            Severity::Success,
        ),
        "rules.edit" => (
            "rules updated",
            format!("existing rule updated: {}", field(message, "name")),
            Severity::Info,
        ),
        "pcap.completed" => (
            "new pcap analyzed",
            format!("{} packets processed", field(message, "processed_packets")),
            Severity::Info,
        ),
        "timeline.range.large" => (
            "timeline cropped",
            "the maximum range is 24h".to_string(),
            Severity::Alert,
        ),
        _ => return None,
    };
    Some(Notice {
        title: title.to_string(),
        description,
        severity,
        at: Utc::now(),
    })
}

fn field(message: &Value, key: &str) -> String {
    match message.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "?".to_string(),
    }
}

/// Bounded record of recent notices, oldest dropped first
pub struct NoticeLog {
    capacity: usize,
    notices: Mutex<VecDeque<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::with_capacity(NOTICE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            notices: Mutex::new(VecDeque::new()),
        }
    }

    /// Present and record a frame; returns the notice if it was one of the
    /// user-facing events
    pub fn handle(&self, frame: &NotificationFrame) -> Option<Notice> {
        let notice = present(frame)?;
        let mut notices = self.notices.lock().unwrap();
        if notices.len() == self.capacity {
            notices.pop_front();
        }
        notices.push_back(notice.clone());
        Some(notice)
    }

    /// Oldest first
    pub fn recent(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for NoticeLog {
    fn default() -> Self {
        Self::new()
    }
}
