use std::cell::RefCell;
use std::rc::Rc;

use crate::Result;
use crate::windowing::SurfaceId;

pub trait LockPresenter {
    /// Populate the view for a freshly created visual lock surface.
    fn build_view(&mut self, surface: SurfaceId) -> Result<()>;
    /// Redraw the time and date labels.
    fn refresh_clock(&mut self, surface: SurfaceId);
    fn set_slider_position(&mut self, surface: SurfaceId, position: f64);
    /// Release everything attached to `surface` before it is destroyed.
    fn release_view(&mut self, surface: SurfaceId);
}

/// Presenter that does nothing. Used when no view layer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl LockPresenter for NullPresenter {
    fn build_view(&mut self, _surface: SurfaceId) -> Result<()> {
        Ok(())
    }

    fn refresh_clock(&mut self, _surface: SurfaceId) {}

    fn set_slider_position(&mut self, _surface: SurfaceId, _position: f64) {}

    fn release_view(&mut self, _surface: SurfaceId) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenterCall {
    Build(SurfaceId),
    RefreshClock(SurfaceId),
    SliderPosition(SurfaceId, f64),
    Release(SurfaceId),
}

/// Presenter that records calls. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    calls: Rc<RefCell<Vec<PresenterCall>>>,
    fail_builds: Rc<RefCell<u32>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` view builds fail.
    pub fn fail_builds(&self, count: u32) {
        *self.fail_builds.borrow_mut() = count;
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.borrow().clone()
    }

    pub fn clock_refreshes(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, PresenterCall::RefreshClock(_)))
            .count()
    }

    pub fn live_views(&self) -> usize {
        let calls = self.calls.borrow();
        let built = calls
            .iter()
            .filter(|call| matches!(call, PresenterCall::Build(_)))
            .count();
        let released = calls
            .iter()
            .filter(|call| matches!(call, PresenterCall::Release(_)))
            .count();
        built.saturating_sub(released)
    }
}

impl LockPresenter for RecordingPresenter {
    fn build_view(&mut self, surface: SurfaceId) -> Result<()> {
        {
            let mut remaining = self.fail_builds.borrow_mut();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(crate::TklockError::SurfaceCreation(format!(
                    "view for {surface} could not be built"
                )));
            }
        }
        self.calls.borrow_mut().push(PresenterCall::Build(surface));
        Ok(())
    }

    fn refresh_clock(&mut self, surface: SurfaceId) {
        self.calls
            .borrow_mut()
            .push(PresenterCall::RefreshClock(surface));
    }

    fn set_slider_position(&mut self, surface: SurfaceId, position: f64) {
        self.calls
            .borrow_mut()
            .push(PresenterCall::SliderPosition(surface, position));
    }

    fn release_view(&mut self, surface: SurfaceId) {
        self.calls.borrow_mut().push(PresenterCall::Release(surface));
    }
}
