use std::time::{Duration, Instant};

use serde_json::json;

use crate::bus::DisplayStatus;
use crate::logging::{LogLevel, Logger, emit, json_kv};
use crate::timer::{TimerHandle, TimerId, TimerKind, TimerQueue};

const TARGET: &str = "tklock::power";

/// One-shot teardown timer that the display gate can freeze.
#[derive(Debug)]
pub struct DeferredTeardown {
    delay: Duration,
    timer: Option<TimerHandle>,
    frozen: bool,
    /// An arm request arrived while frozen.
    deferred: bool,
}

impl DeferredTeardown {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: None,
            frozen: false,
            deferred: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(TimerHandle::deadline)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Arm (or re-arm) the timer. While frozen the request is remembered instead.
    pub fn arm(&mut self, timers: &mut TimerQueue) {
        if self.frozen {
            self.timer = None;
            self.deferred = true;
            return;
        }
        self.timer = Some(timers.schedule(self.delay, TimerKind::DeferredTeardown));
    }

    /// Cancel the timer and forget any deferred request.
    pub fn cancel(&mut self) {
        self.timer = None;
        self.deferred = false;
    }

    /// `true` when `fired` is the live teardown timer. Consumes it.
    pub fn take_fired(&mut self, fired: TimerId) -> bool {
        if self.timer.as_ref().map(TimerHandle::id) != Some(fired) {
            return false;
        }
        self.timer = None;
        true
    }

    fn freeze(&mut self) {
        if self.timer.take().is_some() {
            self.deferred = true;
        }
        self.frozen = true;
    }

    /// Returns whether a deferred teardown was re-armed.
    fn thaw(&mut self, timers: &mut TimerQueue) -> bool {
        self.frozen = false;
        if std::mem::take(&mut self.deferred) {
            self.arm(timers);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Display went off; teardown is frozen.
    Froze,
    /// Display is not off; the caller destroys the event eater.
    Thawed { rearmed: bool },
}

#[derive(Debug, Default)]
pub struct DisplayPowerGate {
    display_off: bool,
}

impl DisplayPowerGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_off(&self) -> bool {
        self.display_off
    }

    pub fn observe(
        &mut self,
        status: DisplayStatus,
        teardown: &mut DeferredTeardown,
        timers: &mut TimerQueue,
        logger: Option<&Logger>,
    ) -> GateAction {
        match status {
            DisplayStatus::Off => {
                self.display_off = true;
                teardown.freeze();
                emit(
                    logger,
                    LogLevel::Info,
                    TARGET,
                    "display_off",
                    [json_kv("teardown_deferred", json!(teardown.is_deferred()))],
                );
                GateAction::Froze
            }
            DisplayStatus::Awake => {
                self.display_off = false;
                let rearmed = teardown.thaw(timers);
                emit(
                    logger,
                    LogLevel::Info,
                    TARGET,
                    "display_awake",
                    [json_kv("teardown_rearmed", json!(rearmed))],
                );
                GateAction::Thawed { rearmed }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (DisplayPowerGate, DeferredTeardown, TimerQueue) {
        (
            DisplayPowerGate::new(),
            DeferredTeardown::new(Duration::from_secs(2)),
            TimerQueue::new(Instant::now()),
        )
    }

    #[test]
    fn display_off_cancels_armed_teardown() {
        let (mut gate, mut teardown, mut timers) = setup();
        teardown.arm(&mut timers);
        assert_eq!(
            gate.observe(DisplayStatus::Off, &mut teardown, &mut timers, None),
            GateAction::Froze
        );
        assert!(!teardown.is_active());
        timers.advance_by(Duration::from_secs(5));
        assert!(timers.pop_due().is_none());
    }

    #[test]
    fn arm_while_frozen_waits_for_display() {
        let (mut gate, mut teardown, mut timers) = setup();
        gate.observe(DisplayStatus::Off, &mut teardown, &mut timers, None);
        teardown.arm(&mut timers);
        assert!(!teardown.is_active());
        assert!(teardown.is_deferred());

        let action = gate.observe(DisplayStatus::Awake, &mut teardown, &mut timers, None);
        assert_eq!(action, GateAction::Thawed { rearmed: true });
        assert!(teardown.is_active());
    }

    #[test]
    fn awake_without_deferred_teardown_arms_nothing() {
        let (mut gate, mut teardown, mut timers) = setup();
        let action = gate.observe(DisplayStatus::Awake, &mut teardown, &mut timers, None);
        assert_eq!(action, GateAction::Thawed { rearmed: false });
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn cancel_forgets_deferred_request() {
        let (mut gate, mut teardown, mut timers) = setup();
        teardown.arm(&mut timers);
        gate.observe(DisplayStatus::Off, &mut teardown, &mut timers, None);
        teardown.cancel();
        let action = gate.observe(DisplayStatus::Awake, &mut teardown, &mut timers, None);
        assert_eq!(action, GateAction::Thawed { rearmed: false });
    }

    #[test]
    fn only_the_live_timer_counts_as_fired() {
        let (_, mut teardown, mut timers) = setup();
        teardown.arm(&mut timers);
        let first = teardown.deadline().unwrap();
        teardown.arm(&mut timers);
        assert_eq!(teardown.deadline(), Some(first));
        timers.advance_by(Duration::from_secs(2));
        let fired = timers.pop_due().unwrap();
        assert!(teardown.take_fired(fired.id));
        assert!(!teardown.take_fired(fired.id));
    }
}
