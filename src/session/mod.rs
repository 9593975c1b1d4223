use std::fmt;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::config::LockConfig;
use crate::lock::{
    CallbackReason, CloseOutcome, Collaborators, LockAuditEventBuilder, LockAuditStage, LockEvent,
    LockMode, LockModeMachine, LockNotice, LockSnapshot,
};
use crate::logging::{LogLevel, emit, json_kv};
use crate::{Result, TklockError};

const TARGET: &str = "tklock::session";

/// Host callback invoked with a reason code.
pub struct HostCallback {
    label: String,
    notify: Box<dyn FnMut(CallbackReason)>,
}

impl HostCallback {
    pub fn new<F>(label: impl Into<String>, notify: F) -> Self
    where
        F: FnMut(CallbackReason) + 'static,
    {
        Self {
            label: label.into(),
            notify: Box::new(notify),
        }
    }

    /// Callback that ignores every notification.
    pub fn noop() -> Self {
        Self::new("noop", |_| {})
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn invoke(&mut self, reason: CallbackReason) {
        (self.notify)(reason);
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallback")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Result of a successful `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// No callback was waiting.
    Registered,
    /// A waiting callback was replaced.
    Replaced,
}

impl CallbackStatus {
    /// Status code reported to the host.
    pub const fn code(self) -> i32 {
        match self {
            CallbackStatus::Registered => -3,
            CallbackStatus::Replaced => -2,
        }
    }
}

/// One step of a scripted run.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Open(u32),
    Close { silent: bool },
    Event(LockEvent),
    DisplayStatus(String),
    Advance(Duration),
}

/// Host-facing lock session: owns the mode machine and the host callback.
pub struct PluginSession {
    machine: LockModeMachine,
    callback: Option<HostCallback>,
    started_at: Instant,
    last_metrics_emit: Instant,
}

impl PluginSession {
    /// Start a session at the current wall-clock instant.
    pub fn init(collaborators: Collaborators, config: LockConfig) -> Self {
        Self::init_at(collaborators, config, Instant::now())
    }

    /// Start a session whose timer clock begins at `now`.
    pub fn init_at(collaborators: Collaborators, mut config: LockConfig, now: Instant) -> Self {
        if config.metrics.is_none() && !config.settings.metrics_interval().is_zero() {
            config.enable_metrics();
        }
        let machine = LockModeMachine::new(collaborators, config, now);
        let session = Self {
            machine,
            callback: None,
            started_at: now,
            last_metrics_emit: now,
        };
        session.log(
            LogLevel::Info,
            "session_started",
            [json_kv(
                "teardown_delay_ms",
                json!(session.machine.config().settings.teardown_delay_ms),
            )],
        );
        session.audit(LockAuditStage::SessionStarted);
        session
    }

    pub fn machine(&self) -> &LockModeMachine {
        &self.machine
    }

    pub fn mode(&self) -> LockMode {
        self.machine.mode()
    }

    pub fn snapshot(&self) -> LockSnapshot {
        self.machine.snapshot()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Open the lock in the mode given by its wire value.
    ///
    /// Unsupported values, including `0`, are rejected before the machine
    /// sees them; the stored callback is left untouched in that case.
    pub fn open(&mut self, raw_mode: u32, callback: HostCallback) -> Result<CallbackStatus> {
        let mode = match LockMode::from_wire(raw_mode) {
            Ok(LockMode::None) | Err(_) => {
                self.log(
                    LogLevel::Warn,
                    "open_rejected",
                    [json_kv("mode", json!(raw_mode))],
                );
                return Err(TklockError::UnsupportedMode(raw_mode));
            }
            Ok(mode) => mode,
        };

        self.machine.open(mode);
        let notices = self.machine.take_notices();

        for notice in &notices {
            if let LockNotice::Superseded(reason) = notice {
                if let Some(previous) = self.callback.as_mut() {
                    previous.invoke(*reason);
                }
            }
        }

        let status = match self.callback.replace(callback) {
            Some(_) => CallbackStatus::Replaced,
            None => CallbackStatus::Registered,
        };
        self.log(
            LogLevel::Debug,
            "callback_installed",
            [
                json_kv("status", json!(status.code())),
                json_kv("mode", json!(mode.label())),
            ],
        );

        self.apply_notices(
            notices
                .into_iter()
                .filter(|notice| !matches!(notice, LockNotice::Superseded(_))),
        );
        self.maybe_emit_metrics();
        Ok(status)
    }

    pub fn close(&mut self, silent: bool) -> CloseOutcome {
        let outcome = self.machine.close(silent);
        self.drain();
        outcome
    }

    pub fn dispatch(&mut self, event: LockEvent) {
        self.machine.dispatch(event);
        self.drain();
    }

    pub fn display_status(&mut self, status: &str) {
        self.machine.display_status(status);
        self.drain();
    }

    /// Advance the timer clock by `delta`, running due timers.
    pub fn advance(&mut self, delta: Duration) -> usize {
        let now = self.machine.now() + delta;
        self.run_until(now)
    }

    /// Run every timer due at or before `now`, one turn at a time, draining
    /// notices after each.
    pub fn run_until(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.machine.next_deadline() {
            if deadline > now {
                break;
            }
            fired += self.machine.advance_to(deadline);
            self.drain();
        }
        fired += self.machine.advance_to(now);
        self.drain();
        fired
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.machine.next_deadline()
    }

    pub fn pending_timers(&mut self) -> usize {
        self.machine.pending_timers()
    }

    pub fn run_scripted<I>(&mut self, steps: I) -> Result<()>
    where
        I: IntoIterator<Item = ScriptStep>,
    {
        for step in steps {
            match step {
                ScriptStep::Open(raw) => {
                    self.open(raw, HostCallback::noop())?;
                }
                ScriptStep::Close { silent } => {
                    self.close(silent);
                }
                ScriptStep::Event(event) => self.dispatch(event),
                ScriptStep::DisplayStatus(status) => self.display_status(&status),
                ScriptStep::Advance(delta) => {
                    self.advance(delta);
                }
            }
        }
        Ok(())
    }

    /// Force every surface down and drop the callback.
    pub fn shutdown(mut self) {
        self.machine.shutdown();
        self.drain();
        self.callback = None;
        let uptime = self.machine.now().duration_since(self.started_at);
        self.emit_metrics(uptime);
        self.log(
            LogLevel::Info,
            "session_stopped",
            [json_kv("uptime_ms", json!(uptime.as_millis() as u64))],
        );
        self.audit(LockAuditStage::SessionStopped);
    }

    fn drain(&mut self) {
        let notices = self.machine.take_notices();
        self.apply_notices(notices);
        self.maybe_emit_metrics();
    }

    fn apply_notices<I>(&mut self, notices: I)
    where
        I: IntoIterator<Item = LockNotice>,
    {
        for notice in notices {
            match notice {
                LockNotice::Superseded(reason) | LockNotice::Notify(reason) => {
                    let Some(label) = self.callback.as_ref().map(|cb| cb.label().to_string())
                    else {
                        continue;
                    };
                    self.log_callback(label, reason);
                    if let Some(callback) = self.callback.as_mut() {
                        callback.invoke(reason);
                    }
                }
                LockNotice::ReleaseCallback => {
                    self.callback = None;
                }
            }
        }
    }

    fn log_callback(&self, label: String, reason: CallbackReason) {
        self.log(
            LogLevel::Debug,
            "callback_notified",
            [
                json_kv("callback", json!(label)),
                json_kv("reason", json!(reason.code())),
            ],
        );
    }

    fn maybe_emit_metrics(&mut self) {
        let interval = self.machine.config().settings.metrics_interval();
        if interval.is_zero() {
            return;
        }
        let now = self.machine.now();
        if now.duration_since(self.last_metrics_emit) < interval {
            return;
        }
        self.last_metrics_emit = now;
        self.emit_metrics(now.duration_since(self.started_at));
    }

    fn emit_metrics(&self, uptime: Duration) {
        let config = self.machine.config();
        if let (Some(logger), Some(metrics)) = (config.logger.as_ref(), config.metrics.as_ref()) {
            if let Ok(guard) = metrics.lock() {
                let event = guard.snapshot(uptime).to_log_event(&config.metrics_target);
                let _ = logger.log_event(event);
            }
        }
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        emit(
            self.machine.config().logger.as_ref(),
            level,
            TARGET,
            message,
            fields,
        );
    }

    fn audit(&self, stage: LockAuditStage) {
        self.machine
            .config()
            .audit
            .record(LockAuditEventBuilder::new(stage).finish());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bus::RecordingBus;
    use crate::config::LockSettings;
    use crate::logging::{Logger, MemorySink};
    use crate::presenter::NullPresenter;
    use crate::windowing::SimulatedWindowSystem;

    fn session() -> PluginSession {
        PluginSession::init(
            Collaborators::new(SimulatedWindowSystem::new(), RecordingBus::new(), NullPresenter),
            LockConfig::default(),
        )
    }

    fn recorder(label: &str) -> (HostCallback, Rc<RefCell<Vec<CallbackReason>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (
            HostCallback::new(label, move |reason| sink.borrow_mut().push(reason)),
            seen,
        )
    }

    #[test]
    fn status_codes_match_host_protocol() {
        let mut session = session();
        let first = session.open(1, HostCallback::noop()).unwrap();
        let second = session.open(1, HostCallback::noop()).unwrap();
        assert_eq!(first.code(), -3);
        assert_eq!(second.code(), -2);
    }

    #[test]
    fn unsupported_modes_are_rejected_at_the_boundary() {
        let mut session = session();
        for raw in [0, 2, 3, 6, 99] {
            let err = session.open(raw, HostCallback::noop()).unwrap_err();
            assert!(matches!(err, TklockError::UnsupportedMode(v) if v == raw));
        }
        assert_eq!(session.mode(), LockMode::None);
        assert!(!session.has_callback());
    }

    #[test]
    fn superseded_waiter_hears_closed_before_replacement() {
        let mut session = session();
        let (first, first_seen) = recorder("first");
        let (second, second_seen) = recorder("second");
        session.open(4, first).unwrap();
        assert_eq!(session.open(1, second).unwrap(), CallbackStatus::Replaced);
        assert_eq!(*first_seen.borrow(), vec![CallbackReason::Closed]);
        assert!(second_seen.borrow().is_empty());
    }

    #[test]
    fn close_clears_callback() {
        let mut session = session();
        session.open(5, HostCallback::noop()).unwrap();
        assert_eq!(session.close(false), CloseOutcome::Closed);
        assert!(!session.has_callback());
        assert_eq!(
            session.open(5, HostCallback::noop()).unwrap(),
            CallbackStatus::Registered
        );
    }

    #[test]
    fn advance_counts_timers_sharing_a_deadline() {
        let windows = SimulatedWindowSystem::new();
        let settings = LockSettings {
            clock_refresh_ms: 200,
            ..LockSettings::default()
        };
        let mut session = PluginSession::init(
            Collaborators::new(windows.clone(), RecordingBus::new(), NullPresenter),
            LockConfig::with_settings(settings),
        );
        windows.deny_pointer_grabs(1);
        session.open(5, HostCallback::noop()).unwrap();
        assert_eq!(session.pending_timers(), 2);

        assert_eq!(session.advance(Duration::from_millis(200)), 2);
        assert_eq!(session.snapshot().grab_owner.as_deref(), Some("visual_tklock"));
        assert_eq!(session.advance(Duration::from_millis(200)), 1);
    }

    #[test]
    fn metrics_snapshot_is_logged_on_interval() {
        let sink = MemorySink::new();
        let config = LockConfig::default().with_logger(Logger::new(sink.clone()));
        let mut session = PluginSession::init(
            Collaborators::new(SimulatedWindowSystem::new(), RecordingBus::new(), NullPresenter),
            config,
        );
        session.open(1, HostCallback::noop()).unwrap();
        session.advance(Duration::from_secs(6));
        let snapshots: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.message == "lock_metrics")
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].field("opens"), Some(&json!(1)));
        assert_eq!(snapshots[0].field("teardowns"), Some(&json!(1)));
    }

    #[test]
    fn scripted_run_reaches_expected_mode() {
        let mut session = session();
        session
            .run_scripted([
                ScriptStep::Open(1),
                ScriptStep::DisplayStatus("off".into()),
                ScriptStep::Advance(Duration::from_secs(5)),
            ])
            .unwrap();
        assert_eq!(session.mode(), LockMode::Enabled);
        session
            .run_scripted([
                ScriptStep::DisplayStatus("on".into()),
                ScriptStep::Advance(Duration::from_secs(2)),
            ])
            .unwrap();
        assert_eq!(session.mode(), LockMode::None);
    }
}
