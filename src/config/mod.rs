use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::{LockAudit, NullLockAudit};
use crate::{LockMetrics, Logger, Result};

/// Slider geometry and unlock thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliderSettings {
    /// Lowest slider value.
    pub lower: f64,
    /// Highest slider value; reaching it means unlock.
    pub upper: f64,
    /// Where the knob rests when idle.
    pub rest: f64,
    /// A released drag within this distance of `upper` unlocks.
    pub drag_unlock_distance: f64,
    /// A keyboard/scroll step within this distance of `upper` unlocks.
    pub step_unlock_distance: f64,
    /// Minimum travel from rest before a step counts as intent.
    pub step_min_travel: f64,
}

impl Default for SliderSettings {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 40.0,
            rest: 3.0,
            drag_unlock_distance: 5.0,
            step_unlock_distance: 0.9,
            step_min_travel: 0.5,
        }
    }
}

/// Tunables loaded from JSON. Missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub grab_retry_delay_ms: u64,
    pub max_grab_retries: u32,
    pub teardown_delay_ms: u64,
    pub clock_refresh_ms: u64,
    /// Zero disables periodic metric snapshots.
    pub metrics_interval_ms: u64,
    pub slider: SliderSettings,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            grab_retry_delay_ms: 200,
            max_grab_retries: 3,
            teardown_delay_ms: 2000,
            clock_refresh_ms: 1000,
            metrics_interval_ms: 5000,
            slider: SliderSettings::default(),
        }
    }
}

impl LockSettings {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn grab_retry_delay(&self) -> Duration {
        Duration::from_millis(self.grab_retry_delay_ms)
    }

    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }

    pub fn clock_refresh(&self) -> Duration {
        Duration::from_millis(self.clock_refresh_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

/// Settings plus the runtime handles a session reports through.
#[derive(Clone)]
pub struct LockConfig {
    pub settings: LockSettings,
    /// Optional structured logger shared by every component.
    pub logger: Option<Logger>,
    /// Metrics accumulator used for periodic snapshots.
    pub metrics: Option<Arc<Mutex<LockMetrics>>>,
    /// Target field used when emitting metrics snapshots.
    pub metrics_target: String,
    pub audit: Arc<dyn LockAudit>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            settings: LockSettings::default(),
            logger: None,
            metrics: None,
            metrics_target: "tklock::metrics".to_string(),
            audit: Arc::new(NullLockAudit),
        }
    }
}

impl LockConfig {
    pub fn with_settings(settings: LockSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn LockAudit>) -> Self {
        self.audit = audit;
        self
    }

    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(LockMetrics::new())));
        }
    }

    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    pub fn metrics_handle(&self) -> Option<Arc<Mutex<LockMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }

    pub(crate) fn record_metric(&self, record: impl FnOnce(&mut LockMetrics)) {
        if let Some(metrics) = self.metrics.as_ref() {
            if let Ok(mut guard) = metrics.lock() {
                record(&mut *guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            LockSettings::from_json_str(r#"{"grab_retry_delay_ms": 50, "slider": {"upper": 100.0}}"#)
                .unwrap();
        assert_eq!(settings.grab_retry_delay(), Duration::from_millis(50));
        assert_eq!(settings.max_grab_retries, 3);
        assert_eq!(settings.teardown_delay(), Duration::from_secs(2));
        assert_eq!(settings.slider.upper, 100.0);
        assert_eq!(settings.slider.rest, 3.0);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = LockSettings::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, crate::TklockError::Config(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = LockSettings::from_path("/nonexistent/tklock.json").unwrap_err();
        assert!(matches!(err, crate::TklockError::Io(_)));
    }

    #[test]
    fn metrics_toggle() {
        let mut config = LockConfig::default();
        assert!(config.metrics_handle().is_none());
        config.enable_metrics();
        config.record_metric(|m| m.record_open());
        let handle = config.metrics_handle().unwrap();
        assert_eq!(handle.lock().unwrap().snapshot(Duration::ZERO).opens, 1);
        config.disable_metrics();
        assert!(config.metrics_handle().is_none());
    }
}
