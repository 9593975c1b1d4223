use std::time::Duration;

use serde_json::json;

use crate::config::LockSettings;
use crate::logging::{LogLevel, Logger, emit, json_kv};
use crate::timer::{TimerHandle, TimerId, TimerKind, TimerQueue};
use crate::windowing::{SurfaceId, WindowSystem};

mod ledger;

pub use ledger::{GrabEntry, GrabLedger, SharedGrabLedger};

const TARGET: &str = "tklock::grab";

/// Grab pointer (optionally confined) and keyboard on `surface`.
///
/// Returns `true` only when both grabs succeed. A held pointer grab is
/// released again if the keyboard grab is refused.
pub fn try_grab(ws: &mut dyn WindowSystem, surface: SurfaceId, confine_to: Option<SurfaceId>) -> bool {
    if !ws.grab_pointer(surface, confine_to).is_success() {
        return false;
    }
    if !ws.grab_keyboard(surface).is_success() {
        ws.ungrab_pointer();
        return false;
    }
    true
}

/// Release both devices, whoever holds them in this client.
pub fn release_grabs(ws: &mut dyn WindowSystem) {
    ws.ungrab_keyboard();
    ws.ungrab_pointer();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabPhase {
    Released,
    Owned,
    /// Retry budget exhausted. Terminal for this surface.
    Failed,
}

/// Per-surface grab bookkeeping.
///
/// A pending retry timer implies the grab is not owned and the retry count is
/// still within budget.
#[derive(Debug)]
pub struct GrabState {
    phase: GrabPhase,
    retry_count: u32,
    retry_timer: Option<TimerHandle>,
}

impl Default for GrabState {
    fn default() -> Self {
        Self {
            phase: GrabPhase::Released,
            retry_count: 0,
            retry_timer: None,
        }
    }
}

impl GrabState {
    pub fn phase(&self) -> GrabPhase {
        self.phase
    }

    pub fn owned(&self) -> bool {
        self.phase == GrabPhase::Owned
    }

    pub fn is_failed(&self) -> bool {
        self.phase == GrabPhase::Failed
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn retry_timer_id(&self) -> Option<TimerId> {
        self.retry_timer.as_ref().map(TimerHandle::id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    Acquired,
    RetryScheduled { retry_count: u32 },
    /// The attempt that exhausted the budget. Reported once per surface.
    Failed,
    /// Nothing happened: stale timer, retry already pending, or terminal.
    Ignored,
}

/// Acquires the grab for one surface and retries on a timer until it is
/// owned or the retry budget runs out.
pub struct GrabController {
    owner: String,
    surface: SurfaceId,
    confine_to_self: bool,
    retry_delay: Duration,
    max_retries: u32,
    state: GrabState,
    ledger: SharedGrabLedger,
    logger: Option<Logger>,
}

impl GrabController {
    pub fn new(
        owner: impl Into<String>,
        surface: SurfaceId,
        settings: &LockSettings,
        ledger: SharedGrabLedger,
    ) -> Self {
        Self {
            owner: owner.into(),
            surface,
            confine_to_self: false,
            retry_delay: settings.grab_retry_delay(),
            max_retries: settings.max_grab_retries,
            state: GrabState::default(),
            ledger,
            logger: None,
        }
    }

    /// Confine the pointer to the surface on the initial attempt.
    pub fn confined(mut self) -> Self {
        self.confine_to_self = true;
        self
    }

    pub fn with_logger(mut self, logger: Option<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn state(&self) -> &GrabState {
        &self.state
    }

    /// Initial attempt, made when the surface is mapped.
    pub fn acquire(&mut self, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> GrabOutcome {
        match self.state.phase {
            GrabPhase::Failed => return GrabOutcome::Ignored,
            GrabPhase::Owned => return GrabOutcome::Acquired,
            GrabPhase::Released => {}
        }
        if self.state.retry_pending() {
            return GrabOutcome::Ignored;
        }

        let confine = self.confine_to_self.then_some(self.surface);
        if try_grab(ws, self.surface, confine) {
            self.mark_owned();
            return GrabOutcome::Acquired;
        }

        self.schedule_retry(timers);
        GrabOutcome::RetryScheduled {
            retry_count: self.state.retry_count,
        }
    }

    /// Handle a fired retry timer. Timers not owned by this controller are ignored.
    pub fn on_retry(
        &mut self,
        fired: TimerId,
        ws: &mut dyn WindowSystem,
        timers: &mut TimerQueue,
    ) -> GrabOutcome {
        if self.state.retry_timer_id() != Some(fired) {
            return GrabOutcome::Ignored;
        }
        self.state.retry_timer = None;

        release_grabs(ws);
        self.ledger.clear();
        if self.state.retry_count == 0 {
            ws.close_other_temporaries(self.surface);
        }

        if try_grab(ws, self.surface, None) {
            self.mark_owned();
            return GrabOutcome::Acquired;
        }

        self.state.retry_count += 1;
        if self.state.retry_count > self.max_retries {
            self.state.phase = GrabPhase::Failed;
            emit(
                self.logger.as_ref(),
                LogLevel::Error,
                TARGET,
                "grab_failed",
                [
                    json_kv("owner", json!(self.owner)),
                    json_kv("surface", json!(self.surface.raw())),
                    json_kv("retry_count", json!(self.state.retry_count)),
                ],
            );
            return GrabOutcome::Failed;
        }

        self.schedule_retry(timers);
        GrabOutcome::RetryScheduled {
            retry_count: self.state.retry_count,
        }
    }

    /// Drop the grab (if owned) and any pending retry.
    pub fn release(&mut self, ws: &mut dyn WindowSystem) {
        self.state.retry_timer = None;
        if self.state.phase == GrabPhase::Owned {
            release_grabs(ws);
            self.ledger.clear_owner(&self.owner);
            self.state.phase = GrabPhase::Released;
        }
        if self.state.phase != GrabPhase::Failed {
            self.state.retry_count = 0;
        }
    }

    fn mark_owned(&mut self) {
        self.state.phase = GrabPhase::Owned;
        self.state.retry_count = 0;
        self.state.retry_timer = None;
        if let Some(previous) = self.ledger.set_owner(&self.owner, self.surface) {
            emit(
                self.logger.as_ref(),
                LogLevel::Warn,
                TARGET,
                "grab_taken_over",
                [
                    json_kv("owner", json!(self.owner)),
                    json_kv("previous", json!(previous.owner)),
                ],
            );
        }
        emit(
            self.logger.as_ref(),
            LogLevel::Info,
            TARGET,
            "grab_acquired",
            [
                json_kv("owner", json!(self.owner)),
                json_kv("surface", json!(self.surface.raw())),
            ],
        );
    }

    fn schedule_retry(&mut self, timers: &mut TimerQueue) {
        let handle = timers.schedule(self.retry_delay, TimerKind::GrabRetry(self.surface));
        emit(
            self.logger.as_ref(),
            LogLevel::Debug,
            TARGET,
            "grab_retry_scheduled",
            [
                json_kv("owner", json!(self.owner)),
                json_kv("retry_count", json!(self.state.retry_count)),
                json_kv("delay_ms", json!(self.retry_delay.as_millis() as u64)),
            ],
        );
        self.state.retry_timer = Some(handle);
    }
}
