//! The lock-mode state machine.
//!
//! [`LockModeMachine`] owns every lock surface, the timer queue and the
//! collaborators, and sequences the transitions between the grab-only lock,
//! the visual slider lock and the one-input gate. Each public method is one
//! turn: it runs to completion, and timers only fire from [`LockModeMachine::run_due`].
//!
//! The machine never calls back into the host. Anything the host's waiting
//! callback must hear about is queued as a [`LockNotice`] and drained by the
//! session after the turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::bus::{DisplayStatus, SystemBus, request_unlock};
use crate::config::LockConfig;
use crate::eater::{EaterPhase, EaterStep, EventEater};
use crate::gesture::{ScrollKind, SliderOutcome, SliderState};
use crate::grab::{GrabLedger, GrabOutcome, SharedGrabLedger};
use crate::logging::{LogLevel, emit, json_kv};
use crate::metrics::LockMetrics;
use crate::power::{DeferredTeardown, DisplayPowerGate, GateAction};
use crate::presenter::LockPresenter;
use crate::timer::{FiredTimer, TimerKind, TimerQueue};
use crate::windowing::{SurfaceId, SurfaceRole, WindowSystem};

mod audit;
mod grab_only;
mod mode;
mod visual;

pub use audit::{
    LockAudit, LockAuditEvent, LockAuditEventBuilder, LockAuditStage, NullLockAudit,
    RecordingAudit,
};
pub use grab_only::GrabOnlyLock;
pub use mode::LockMode;
pub use visual::VisualLock;

const TARGET: &str = "tklock::machine";

/// Reason code delivered to the host's waiting callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackReason {
    Unlock = 1,
    Retry = 2,
    Timeout = 3,
    Closed = 4,
}

impl CallbackReason {
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Work for the session after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockNotice {
    /// Deliver to the callback that the current `open` is replacing.
    Superseded(CallbackReason),
    /// Deliver to the current callback.
    Notify(CallbackReason),
    /// Drop the current callback without notifying it.
    ReleaseCallback,
}

/// Progress of the one-input gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneInputStatus {
    Waiting,
    Pressed,
    Released,
    /// The display came on and the eater was removed before a release.
    Abandoned,
}

impl OneInputStatus {
    fn is_unresolved(self) -> bool {
        matches!(self, OneInputStatus::Waiting | OneInputStatus::Pressed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The one-input gate has not resolved yet.
    Refused,
}

/// Input and windowing events routed to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum LockEvent {
    ButtonPress(SurfaceId),
    ButtonRelease(SurfaceId),
    KeyPress {
        surface: SurfaceId,
        hardware_keycode: u32,
        keyval: u32,
    },
    /// Asynchronous map confirmation.
    Mapped(SurfaceId),
    /// The slider settled at a value (end of a drag).
    SliderReleased(f64),
    SliderStep {
        scroll: ScrollKind,
        value: f64,
    },
    /// Wall-clock time or timezone changed.
    ClockChanged,
}

impl LockEvent {
    pub fn label(&self) -> &'static str {
        match self {
            LockEvent::ButtonPress(_) => "button_press",
            LockEvent::ButtonRelease(_) => "button_release",
            LockEvent::KeyPress { .. } => "key_press",
            LockEvent::Mapped(_) => "mapped",
            LockEvent::SliderReleased(_) => "slider_released",
            LockEvent::SliderStep { .. } => "slider_step",
            LockEvent::ClockChanged => "clock_changed",
        }
    }
}

/// The external services a machine drives.
pub struct Collaborators {
    pub windows: Box<dyn WindowSystem>,
    pub bus: Box<dyn SystemBus>,
    pub presenter: Box<dyn LockPresenter>,
}

impl Collaborators {
    pub fn new<W, B, P>(windows: W, bus: B, presenter: P) -> Self
    where
        W: WindowSystem + 'static,
        B: SystemBus + 'static,
        P: LockPresenter + 'static,
    {
        Self {
            windows: Box::new(windows),
            bus: Box::new(bus),
            presenter: Box::new(presenter),
        }
    }
}

/// Point-in-time view of the machine for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSnapshot {
    pub mode: LockMode,
    pub grab_owner: Option<String>,
    pub grab_only: Option<SurfaceId>,
    pub visual: Option<SurfaceId>,
    pub visual_presented: bool,
    pub slider: Option<SliderState>,
    pub eater: EaterPhase,
    pub eater_surface: Option<SurfaceId>,
    pub one_input: OneInputStatus,
    pub teardown_active: bool,
    pub teardown_deferred: bool,
    pub display_off: bool,
}

pub struct LockModeMachine {
    mode: LockMode,
    windows: Box<dyn WindowSystem>,
    bus: Box<dyn SystemBus>,
    presenter: Box<dyn LockPresenter>,
    timers: TimerQueue,
    ledger: SharedGrabLedger,
    grab_only: Option<GrabOnlyLock>,
    visual: Option<VisualLock>,
    eater: EventEater,
    one_input: OneInputStatus,
    teardown: DeferredTeardown,
    gate: DisplayPowerGate,
    config: LockConfig,
    notices: Vec<LockNotice>,
}

impl LockModeMachine {
    pub fn new(collaborators: Collaborators, config: LockConfig, now: Instant) -> Self {
        let Collaborators {
            windows,
            bus,
            presenter,
        } = collaborators;
        let ledger: SharedGrabLedger = Arc::new(GrabLedger::new());
        Self {
            mode: LockMode::None,
            windows,
            bus,
            presenter,
            timers: TimerQueue::new(now),
            eater: EventEater::new(Arc::clone(&ledger), config.logger.clone()),
            ledger,
            grab_only: None,
            visual: None,
            one_input: OneInputStatus::Waiting,
            teardown: DeferredTeardown::new(config.settings.teardown_delay()),
            gate: DisplayPowerGate::new(),
            config,
            notices: Vec::new(),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SharedGrabLedger {
        &self.ledger
    }

    pub fn grab_only(&self) -> Option<&GrabOnlyLock> {
        self.grab_only.as_ref()
    }

    pub fn visual(&self) -> Option<&VisualLock> {
        self.visual.as_ref()
    }

    pub fn eater(&self) -> &EventEater {
        &self.eater
    }

    pub fn one_input(&self) -> OneInputStatus {
        self.one_input
    }

    pub fn teardown(&self) -> &DeferredTeardown {
        &self.teardown
    }

    pub fn now(&self) -> Instant {
        self.timers.now()
    }

    pub fn pending_timers(&mut self) -> usize {
        self.timers.pending()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn take_notices(&mut self) -> Vec<LockNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            mode: self.mode,
            grab_owner: self.ledger.current().map(|entry| entry.owner),
            grab_only: self.grab_only.as_ref().map(GrabOnlyLock::surface),
            visual: self.visual.as_ref().map(VisualLock::surface),
            visual_presented: self.visual.as_ref().is_some_and(VisualLock::is_presented),
            slider: self.visual.as_ref().map(|visual| visual.gesture().state()),
            eater: self.eater.phase(),
            eater_surface: self.eater.surface(),
            one_input: self.one_input,
            teardown_active: self.teardown.is_active(),
            teardown_deferred: self.teardown.is_deferred(),
            display_off: self.gate.display_off(),
        }
    }

    /// Enter `mode`. `LockMode::None` is not an open request and is ignored.
    pub fn open(&mut self, mode: LockMode) {
        self.config.record_metric(LockMetrics::record_open);
        self.log(
            LogLevel::Info,
            "open_requested",
            [
                json_kv("from", json!(self.mode.label())),
                json_kv("to", json!(mode.label())),
            ],
        );
        match mode {
            LockMode::None => {}
            LockMode::OneInput => self.enter_one_input(),
            LockMode::EnabledVisual => self.enter_visual(),
            LockMode::Enabled => self.enter_enabled(),
        }
    }

    /// Tear the lock down unless a non-silent close would cut the one-input
    /// gate short.
    pub fn close(&mut self, silent: bool) -> CloseOutcome {
        self.teardown.cancel();
        if self.mode == LockMode::OneInput && !silent && self.one_input.is_unresolved() {
            self.config.record_metric(|m| m.record_close(true));
            self.log(
                LogLevel::Warn,
                "close_refused",
                [json_kv("one_input", json!(format!("{:?}", self.one_input)))],
            );
            self.audit(LockAuditStage::CloseRefused, []);
            return CloseOutcome::Refused;
        }

        self.destroy_surfaces();
        self.notices.push(LockNotice::ReleaseCallback);
        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::None);
        self.config.record_metric(|m| m.record_close(false));
        self.audit(LockAuditStage::Closed, [("silent", json!(silent))]);
        CloseOutcome::Closed
    }

    pub fn dispatch(&mut self, event: LockEvent) {
        self.log(
            LogLevel::Trace,
            "event_dispatched",
            [json_kv("event", json!(event.label()))],
        );
        match event {
            LockEvent::ButtonPress(surface) => {
                if self.eater.on_press(surface) == EaterStep::Absorbed
                    && self.one_input == OneInputStatus::Waiting
                {
                    self.one_input = OneInputStatus::Pressed;
                }
            }
            LockEvent::ButtonRelease(surface) => {
                if self.eater.on_release(surface) == EaterStep::Finished {
                    self.finish_one_input();
                }
            }
            LockEvent::KeyPress {
                surface,
                hardware_keycode,
                keyval,
            } => self.key_press(surface, hardware_keycode, keyval),
            LockEvent::Mapped(surface) => self.surface_mapped(surface),
            LockEvent::SliderReleased(value) => {
                if self.mode != LockMode::EnabledVisual {
                    return;
                }
                let outcome = match self.visual.as_mut() {
                    Some(visual) => visual.slider_released(value, self.presenter.as_mut()),
                    None => return,
                };
                self.slider_outcome(outcome);
            }
            LockEvent::SliderStep { scroll, value } => {
                if self.mode != LockMode::EnabledVisual {
                    return;
                }
                let outcome = match self.visual.as_mut() {
                    Some(visual) => visual.slider_step(scroll, value, self.presenter.as_mut()),
                    None => return,
                };
                self.slider_outcome(outcome);
            }
            LockEvent::ClockChanged => {
                if let Some(visual) = self.visual.as_ref() {
                    visual.refresh_clock(self.presenter.as_mut());
                }
            }
        }
    }

    /// Feed the display-power signal. Only "off" versus anything else matters.
    pub fn display_status(&mut self, raw: &str) {
        let status = DisplayStatus::parse(raw);
        let action = self.gate.observe(
            status,
            &mut self.teardown,
            &mut self.timers,
            self.config.logger.as_ref(),
        );
        match action {
            GateAction::Froze => {
                self.audit(LockAuditStage::TeardownFrozen, [("status", json!(raw))]);
            }
            GateAction::Thawed { rearmed } => {
                if self.eater.is_present() {
                    self.eater.destroy(self.windows.as_mut());
                    if self.one_input.is_unresolved() {
                        self.one_input = OneInputStatus::Abandoned;
                    }
                }
                if rearmed {
                    self.audit(LockAuditStage::TeardownArmed, [("status", json!(raw))]);
                }
            }
        }
    }

    /// Move the clock to `now` and run every timer that came due.
    pub fn advance_to(&mut self, now: Instant) -> usize {
        self.timers.advance_to(now);
        self.run_due()
    }

    pub fn advance_by(&mut self, delta: Duration) -> usize {
        self.timers.advance_by(delta);
        self.run_due()
    }

    /// Run due timers one per turn, in deadline order.
    pub fn run_due(&mut self) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due() {
            self.on_timer(timer);
            fired += 1;
        }
        fired
    }

    /// Force every surface down. The machine stays usable.
    pub fn shutdown(&mut self) {
        self.teardown.cancel();
        self.destroy_surfaces();
        self.notices.push(LockNotice::ReleaseCallback);
        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::None);
    }

    fn enter_one_input(&mut self) {
        self.teardown.cancel();
        // The eater grabs next; nobody else may still hold the grab.
        if let Some(lock) = self.grab_only.as_mut() {
            lock.release_grab(self.windows.as_mut());
        }
        if let Some(visual) = self.visual.as_mut() {
            visual.release_grab(self.windows.as_mut());
        }

        match self.eater.create(self.windows.as_mut()) {
            Ok(surface) => {
                self.audit(LockAuditStage::EaterArmed, [("surface", json!(surface.raw()))]);
            }
            Err(err) => {
                self.fail_open("eater_construction", &err.to_string());
                return;
            }
        }
        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::OneInput);
    }

    fn enter_visual(&mut self) {
        self.teardown.cancel();
        self.eater.destroy(self.windows.as_mut());
        if let Some(lock) = self.grab_only.as_mut() {
            lock.disable(self.windows.as_mut());
        }

        if self.visual.is_none() {
            let created = VisualLock::create(
                self.windows.as_mut(),
                self.presenter.as_mut(),
                &self.config.settings,
                Arc::clone(&self.ledger),
                self.config.logger.clone(),
            );
            match created {
                Ok(visual) => self.visual = Some(visual),
                Err(err) => {
                    self.fail_open("visual_construction", &err.to_string());
                    return;
                }
            }
        }

        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::EnabledVisual);
        let outcome = self.visual.as_mut().and_then(|visual| {
            visual.present(self.windows.as_mut(), self.presenter.as_mut(), &mut self.timers)
        });
        if let Some(outcome) = outcome {
            self.grab_outcome(SurfaceRole::Visual, outcome, false);
        }
    }

    fn enter_enabled(&mut self) {
        if self.mode == LockMode::Enabled {
            self.arm_teardown();
            return;
        }
        if self.mode == LockMode::OneInput {
            self.notices
                .push(LockNotice::Superseded(CallbackReason::Closed));
        }

        self.teardown.cancel();
        self.eater.destroy(self.windows.as_mut());
        if let Some(visual) = self.visual.take() {
            visual.destroy(self.windows.as_mut(), self.presenter.as_mut());
        }
        if self
            .grab_only
            .as_ref()
            .is_some_and(|lock| lock.grab().state().is_failed())
        {
            if let Some(lock) = self.grab_only.take() {
                lock.destroy(self.windows.as_mut());
            }
        }
        if self.grab_only.is_none() {
            let created = GrabOnlyLock::create(
                self.windows.as_mut(),
                &self.config.settings,
                Arc::clone(&self.ledger),
                self.config.logger.clone(),
            );
            match created {
                Ok(lock) => self.grab_only = Some(lock),
                Err(err) => {
                    self.fail_open("grab_only_construction", &err.to_string());
                    return;
                }
            }
        }

        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::Enabled);
        let outcome = self
            .grab_only
            .as_mut()
            .and_then(|lock| lock.enable(self.windows.as_mut(), &mut self.timers));
        if let Some(outcome) = outcome {
            self.grab_outcome(SurfaceRole::GrabOnly, outcome, false);
        }
        if self.mode == LockMode::Enabled {
            self.arm_teardown();
        }
    }

    fn arm_teardown(&mut self) {
        self.teardown.arm(&mut self.timers);
        let stage = if self.teardown.is_active() {
            LockAuditStage::TeardownArmed
        } else {
            LockAuditStage::TeardownFrozen
        };
        self.audit(
            stage,
            [(
                "delay_ms",
                json!(self.config.settings.teardown_delay_ms),
            )],
        );
    }

    fn on_timer(&mut self, fired: FiredTimer) {
        match fired.kind {
            TimerKind::GrabRetry(surface) => {
                let ws = self.windows.as_mut();
                let routed = if let Some(lock) = self
                    .grab_only
                    .as_mut()
                    .filter(|lock| lock.surface() == surface)
                {
                    Some((SurfaceRole::GrabOnly, lock.on_retry(fired.id, ws, &mut self.timers)))
                } else if let Some(visual) = self
                    .visual
                    .as_mut()
                    .filter(|visual| visual.surface() == surface)
                {
                    Some((SurfaceRole::Visual, visual.on_retry(fired.id, ws, &mut self.timers)))
                } else {
                    None
                };
                match routed {
                    Some((role, outcome)) => self.grab_outcome(role, outcome, true),
                    None => self.log(
                        LogLevel::Debug,
                        "stale_timer_ignored",
                        [json_kv("timer", json!(fired.id.to_string()))],
                    ),
                }
            }
            TimerKind::DeferredTeardown => {
                if self.teardown.take_fired(fired.id) {
                    self.teardown_fired();
                }
            }
            TimerKind::ClockRefresh(surface) => {
                if let Some(visual) = self
                    .visual
                    .as_mut()
                    .filter(|visual| visual.surface() == surface)
                {
                    visual.on_clock(fired.id, self.presenter.as_mut());
                }
            }
        }
    }

    fn teardown_fired(&mut self) {
        self.log(
            LogLevel::Info,
            "teardown_fired",
            [json_kv("mode", json!(self.mode.label()))],
        );
        self.config.record_metric(LockMetrics::record_teardown);
        self.audit(LockAuditStage::TeardownFired, []);
        self.destroy_surfaces();
        self.notices.push(LockNotice::ReleaseCallback);
        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::None);
    }

    fn grab_outcome(&mut self, role: SurfaceRole, outcome: GrabOutcome, retry: bool) {
        match outcome {
            GrabOutcome::Ignored => {}
            GrabOutcome::Acquired => {
                self.config.record_metric(|m| m.record_grab_attempt(retry));
                self.audit(
                    LockAuditStage::GrabAcquired,
                    [("surface", json!(role.label()))],
                );
            }
            GrabOutcome::RetryScheduled { retry_count } => {
                self.config.record_metric(|m| m.record_grab_attempt(retry));
                self.audit(
                    LockAuditStage::GrabRetryScheduled,
                    [
                        ("surface", json!(role.label())),
                        ("retry_count", json!(retry_count)),
                    ],
                );
            }
            GrabOutcome::Failed => {
                self.config.record_metric(|m| {
                    m.record_grab_attempt(retry);
                    m.record_grab_failure();
                });
                self.audit(LockAuditStage::GrabFailed, [("surface", json!(role.label()))]);
                self.fail_open("grab_failed", role.label());
            }
        }
    }

    /// Terminal failure: never stay half-locked. Drop everything, turn the
    /// display on and report unlocked.
    fn fail_open(&mut self, reason: &str, detail: &str) {
        self.log(
            LogLevel::Error,
            "failed_open",
            [
                json_kv("reason", json!(reason)),
                json_kv("detail", json!(detail)),
                json_kv("mode", json!(self.mode.label())),
            ],
        );
        self.teardown.cancel();
        self.destroy_surfaces();
        request_unlock(self.bus.as_mut());
        self.notices.push(LockNotice::Notify(CallbackReason::Retry));
        self.notices.push(LockNotice::ReleaseCallback);
        self.audit(LockAuditStage::FailedOpen, [("reason", json!(reason))]);
        self.one_input = OneInputStatus::Waiting;
        self.set_mode(LockMode::None);
    }

    fn finish_one_input(&mut self) {
        self.eater.destroy(self.windows.as_mut());
        self.one_input = OneInputStatus::Released;
        self.notices.push(LockNotice::Notify(CallbackReason::Unlock));
        self.notices.push(LockNotice::Notify(CallbackReason::Closed));
        self.notices.push(LockNotice::ReleaseCallback);
        self.config.record_metric(LockMetrics::record_unlock);
        self.audit(LockAuditStage::OneInputFinished, []);
    }

    fn slider_outcome(&mut self, outcome: SliderOutcome) {
        if outcome != SliderOutcome::Unlocked {
            return;
        }
        self.log(LogLevel::Info, "slider_unlocked", std::iter::empty());
        request_unlock(self.bus.as_mut());
        self.notices.push(LockNotice::Notify(CallbackReason::Unlock));
        self.config.record_metric(LockMetrics::record_unlock);
        self.audit(LockAuditStage::SliderUnlocked, []);
    }

    fn key_press(&mut self, surface: SurfaceId, hardware_keycode: u32, keyval: u32) {
        if self.mode != LockMode::Enabled {
            return;
        }
        let forwarded = match self.grab_only.as_ref() {
            Some(lock) if lock.surface() == surface => {
                lock.handle_key(hardware_keycode, keyval, self.bus.as_mut())
            }
            _ => false,
        };
        if forwarded {
            self.audit(
                LockAuditStage::KeyForwarded,
                [("hardware_keycode", json!(hardware_keycode))],
            );
        }
    }

    /// Only the surface of the active mode may grab on a late map.
    fn surface_mapped(&mut self, surface: SurfaceId) {
        let ws = self.windows.as_mut();
        let routed = if let Some(lock) = self
            .grab_only
            .as_mut()
            .filter(|lock| self.mode == LockMode::Enabled && lock.surface() == surface)
        {
            Some((SurfaceRole::GrabOnly, lock.on_mapped(ws, &mut self.timers)))
        } else if let Some(visual) = self
            .visual
            .as_mut()
            .filter(|visual| self.mode == LockMode::EnabledVisual && visual.surface() == surface)
        {
            Some((SurfaceRole::Visual, visual.on_mapped(ws, &mut self.timers)))
        } else {
            None
        };
        if let Some((role, outcome)) = routed {
            self.grab_outcome(role, outcome, false);
        }
    }

    fn destroy_surfaces(&mut self) {
        self.eater.destroy(self.windows.as_mut());
        if let Some(lock) = self.grab_only.take() {
            lock.destroy(self.windows.as_mut());
        }
        if let Some(visual) = self.visual.take() {
            visual.destroy(self.windows.as_mut(), self.presenter.as_mut());
        }
    }

    fn set_mode(&mut self, mode: LockMode) {
        if self.mode == mode {
            return;
        }
        let previous = std::mem::replace(&mut self.mode, mode);
        self.log(
            LogLevel::Info,
            "mode_changed",
            [
                json_kv("from", json!(previous.label())),
                json_kv("to", json!(mode.label())),
            ],
        );
        self.audit(
            LockAuditStage::ModeChanged,
            [("from", json!(previous.label())), ("to", json!(mode.label()))],
        );
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        emit(self.config.logger.as_ref(), level, TARGET, message, fields);
    }

    fn audit<const N: usize>(&self, stage: LockAuditStage, details: [(&str, Value); N]) {
        let mut builder = LockAuditEventBuilder::new(stage);
        for (key, value) in details {
            builder.detail(key, value);
        }
        self.config.audit.record(builder.finish());
    }
}
