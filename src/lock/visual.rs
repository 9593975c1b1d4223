use crate::Result;
use crate::config::LockSettings;
use crate::gesture::{GestureRecognizer, ScrollKind, SliderOutcome};
use crate::grab::{GrabController, GrabOutcome, SharedGrabLedger};
use crate::logging::Logger;
use crate::presenter::LockPresenter;
use crate::timer::{TimerHandle, TimerId, TimerKind, TimerQueue};
use crate::windowing::{SurfaceId, SurfaceRole, SurfaceSpec, WindowSystem};

/// Slider lock screen. Built lazily, kept warm across hide/show.
pub struct VisualLock {
    surface: SurfaceId,
    presented: bool,
    grab: GrabController,
    gesture: GestureRecognizer,
    clock: Option<TimerHandle>,
    settings: LockSettings,
}

impl VisualLock {
    pub fn create(
        ws: &mut dyn WindowSystem,
        presenter: &mut dyn LockPresenter,
        settings: &LockSettings,
        ledger: SharedGrabLedger,
        logger: Option<Logger>,
    ) -> Result<Self> {
        let surface = ws.create_surface(&SurfaceSpec::visual())?;
        if let Err(err) = presenter.build_view(surface) {
            ws.destroy_surface(surface);
            return Err(err);
        }
        let grab = GrabController::new(SurfaceRole::Visual.label(), surface, settings, ledger)
            .with_logger(logger);
        Ok(Self {
            surface,
            presented: false,
            grab,
            gesture: GestureRecognizer::new(settings.slider.clone()),
            clock: None,
            settings: settings.clone(),
        })
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn is_presented(&self) -> bool {
        self.presented
    }

    pub fn grab(&self) -> &GrabController {
        &self.grab
    }

    pub fn gesture(&self) -> &GestureRecognizer {
        &self.gesture
    }

    pub fn clock_running(&self) -> bool {
        self.clock.is_some()
    }

    /// Refresh, map and raise. The grab is attempted once the map is confirmed.
    pub fn present(
        &mut self,
        ws: &mut dyn WindowSystem,
        presenter: &mut dyn LockPresenter,
        timers: &mut TimerQueue,
    ) -> Option<GrabOutcome> {
        presenter.refresh_clock(self.surface);
        let mapped = ws.show(self.surface);
        ws.raise(self.surface);
        self.presented = true;
        if self.clock.is_none() && !self.settings.clock_refresh().is_zero() {
            self.clock = Some(timers.schedule_repeating(
                self.settings.clock_refresh(),
                TimerKind::ClockRefresh(self.surface),
            ));
        }
        mapped.then(|| self.grab.acquire(ws, timers))
    }

    pub fn on_mapped(&mut self, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> GrabOutcome {
        if !self.presented {
            return GrabOutcome::Ignored;
        }
        self.grab.acquire(ws, timers)
    }

    pub fn on_retry(&mut self, fired: TimerId, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> GrabOutcome {
        self.grab.on_retry(fired, ws, timers)
    }

    /// Returns `false` for a timer that is not this lock's clock.
    pub fn on_clock(&mut self, fired: TimerId, presenter: &mut dyn LockPresenter) -> bool {
        if self.clock.as_ref().map(TimerHandle::id) != Some(fired) {
            return false;
        }
        presenter.refresh_clock(self.surface);
        true
    }

    pub fn refresh_clock(&self, presenter: &mut dyn LockPresenter) {
        if self.presented {
            presenter.refresh_clock(self.surface);
        }
    }

    pub fn release_grab(&mut self, ws: &mut dyn WindowSystem) {
        self.grab.release(ws);
    }

    /// Hide and stop the clock, keeping the surface for re-presentation.
    pub fn disable(&mut self, ws: &mut dyn WindowSystem) {
        self.grab.release(ws);
        self.clock = None;
        if self.presented {
            ws.hide(self.surface);
            self.presented = false;
        }
    }

    pub fn destroy(mut self, ws: &mut dyn WindowSystem, presenter: &mut dyn LockPresenter) {
        self.disable(ws);
        presenter.release_view(self.surface);
        ws.destroy_surface(self.surface);
    }

    pub fn slider_released(&mut self, value: f64, presenter: &mut dyn LockPresenter) -> SliderOutcome {
        let outcome = self.gesture.value_changed(value);
        self.sync_knob(outcome, presenter);
        outcome
    }

    pub fn slider_step(
        &mut self,
        scroll: ScrollKind,
        value: f64,
        presenter: &mut dyn LockPresenter,
    ) -> SliderOutcome {
        let outcome = self.gesture.change_value(scroll, value);
        self.sync_knob(outcome, presenter);
        outcome
    }

    fn sync_knob(&self, outcome: SliderOutcome, presenter: &mut dyn LockPresenter) {
        if matches!(outcome, SliderOutcome::Unlocked | SliderOutcome::Reset) {
            presenter.set_slider_position(self.surface, self.gesture.state().position);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::grab::GrabLedger;
    use crate::presenter::RecordingPresenter;
    use crate::windowing::SimulatedWindowSystem;

    #[test]
    fn disable_keeps_surface_for_next_present() {
        let mut ws = SimulatedWindowSystem::new();
        let mut presenter = RecordingPresenter::new();
        let mut timers = TimerQueue::new(Instant::now());
        let ledger = Arc::new(GrabLedger::new());
        let mut visual = VisualLock::create(
            &mut ws,
            &mut presenter,
            &LockSettings::default(),
            Arc::clone(&ledger),
            None,
        )
        .unwrap();

        assert_eq!(
            visual.present(&mut ws, &mut presenter, &mut timers),
            Some(GrabOutcome::Acquired)
        );
        assert!(visual.clock_running());

        visual.disable(&mut ws);
        assert!(!visual.clock_running());
        assert!(!ws.is_mapped(visual.surface()));
        assert!(ledger.current().is_none());
        assert_eq!(presenter.live_views(), 1);

        let refreshes = presenter.clock_refreshes();
        timers.advance_by(Duration::from_secs(2));
        assert!(timers.pop_due().is_none());
        assert_eq!(presenter.clock_refreshes(), refreshes);

        visual.present(&mut ws, &mut presenter, &mut timers);
        assert!(ws.is_mapped(visual.surface()));
        assert!(ledger.is_held_by("visual_tklock"));
    }

    #[test]
    fn failed_view_build_destroys_surface() {
        let mut ws = SimulatedWindowSystem::new();
        let mut presenter = RecordingPresenter::new();
        presenter.fail_builds(1);
        let created = VisualLock::create(
            &mut ws,
            &mut presenter,
            &LockSettings::default(),
            Arc::new(GrabLedger::new()),
            None,
        );
        assert!(created.is_err());
        assert_eq!(ws.surface_count(), 0);
    }
}
