//! Lock lifecycle audit hooks.
//!
//! Records capture a stage identifier plus structured metadata so callers can
//! log, buffer or assert on the controller's progression without reaching
//! into the state machine.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;

/// Externally meaningful checkpoints of the lock controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAuditStage {
    SessionStarted,
    /// The machine entered a new mode.
    ModeChanged,
    GrabAcquired,
    GrabRetryScheduled,
    /// A surface exhausted its retry budget.
    GrabFailed,
    /// The machine gave up and asked for an unlock.
    FailedOpen,
    EaterArmed,
    OneInputFinished,
    SliderUnlocked,
    CloseRefused,
    Closed,
    TeardownArmed,
    TeardownFrozen,
    TeardownFired,
    KeyForwarded,
    SessionStopped,
}

#[derive(Debug, Clone)]
pub struct LockAuditEvent {
    pub timestamp: SystemTime,
    pub stage: LockAuditStage,
    pub details: Vec<(String, Value)>,
}

impl LockAuditEvent {
    fn new(stage: LockAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }
}

/// Builder helper to append fields ergonomically.
pub struct LockAuditEventBuilder {
    event: LockAuditEvent,
}

impl LockAuditEventBuilder {
    pub fn new(stage: LockAuditStage) -> Self {
        Self {
            event: LockAuditEvent::new(stage),
        }
    }

    pub fn detail(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.event.details.push((key.into(), value));
        self
    }

    pub fn finish(self) -> LockAuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait LockAudit: Send + Sync {
    fn record(&self, event: LockAuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullLockAudit;

impl LockAudit for NullLockAudit {
    fn record(&self, _event: LockAuditEvent) {}
}

/// Buffers every event. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingAudit {
    events: Arc<Mutex<Vec<LockAuditEvent>>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockAuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<LockAuditStage> {
        self.events().into_iter().map(|event| event.stage).collect()
    }

    pub fn count(&self, stage: LockAuditStage) -> usize {
        self.events()
            .iter()
            .filter(|event| event.stage == stage)
            .count()
    }
}

impl LockAudit for RecordingAudit {
    fn record(&self, event: LockAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
