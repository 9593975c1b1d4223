use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct LockMetrics {
    opens: u64,
    closes: u64,
    refused_closes: u64,
    grab_attempts: u64,
    grab_retries: u64,
    grab_failures: u64,
    unlocks: u64,
    teardowns: u64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&mut self) {
        self.opens = self.opens.saturating_add(1);
    }

    pub fn record_close(&mut self, refused: bool) {
        if refused {
            self.refused_closes = self.refused_closes.saturating_add(1);
        } else {
            self.closes = self.closes.saturating_add(1);
        }
    }

    pub fn record_grab_attempt(&mut self, retry: bool) {
        self.grab_attempts = self.grab_attempts.saturating_add(1);
        if retry {
            self.grab_retries = self.grab_retries.saturating_add(1);
        }
    }

    pub fn record_grab_failure(&mut self) {
        self.grab_failures = self.grab_failures.saturating_add(1);
    }

    pub fn record_unlock(&mut self) {
        self.unlocks = self.unlocks.saturating_add(1);
    }

    pub fn record_teardown(&mut self) {
        self.teardowns = self.teardowns.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            opens: self.opens,
            closes: self.closes,
            refused_closes: self.refused_closes,
            grab_attempts: self.grab_attempts,
            grab_retries: self.grab_retries,
            grab_failures: self.grab_failures,
            unlocks: self.unlocks,
            teardowns: self.teardowns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub opens: u64,
    pub closes: u64,
    pub refused_closes: u64,
    pub grab_attempts: u64,
    pub grab_retries: u64,
    pub grab_failures: u64,
    pub unlocks: u64,
    pub teardowns: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "lock_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("opens".to_string(), json!(self.opens));
        map.insert("closes".to_string(), json!(self.closes));
        map.insert("refused_closes".to_string(), json!(self.refused_closes));
        map.insert("grab_attempts".to_string(), json!(self.grab_attempts));
        map.insert("grab_retries".to_string(), json!(self.grab_retries));
        map.insert("grab_failures".to_string(), json!(self.grab_failures));
        map.insert("unlocks".to_string(), json!(self.unlocks));
        map.insert("teardowns".to_string(), json!(self.teardowns));
        map
    }
}
