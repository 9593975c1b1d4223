use serde_json::json;

use crate::Result;
use crate::bus::{SystemBus, is_forwarded_media_key};
use crate::config::LockSettings;
use crate::grab::{GrabController, GrabOutcome, SharedGrabLedger};
use crate::logging::{LogLevel, Logger, emit, json_kv};
use crate::timer::{TimerId, TimerQueue};
use crate::windowing::{SurfaceId, SurfaceRole, SurfaceSpec, WindowSystem};

/// Invisible lock: an offscreen surface that only exists to hold the grab.
pub struct GrabOnlyLock {
    surface: SurfaceId,
    hidden: bool,
    grab: GrabController,
    logger: Option<Logger>,
}

impl GrabOnlyLock {
    pub fn create(
        ws: &mut dyn WindowSystem,
        settings: &LockSettings,
        ledger: SharedGrabLedger,
        logger: Option<Logger>,
    ) -> Result<Self> {
        let surface = ws.create_surface(&SurfaceSpec::grab_only())?;
        let grab = GrabController::new(SurfaceRole::GrabOnly.label(), surface, settings, ledger)
            .confined()
            .with_logger(logger.clone());
        Ok(Self {
            surface,
            hidden: true,
            grab,
            logger,
        })
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn grab(&self) -> &GrabController {
        &self.grab
    }

    /// Map the surface. The grab is attempted once the map is confirmed.
    pub fn enable(&mut self, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> Option<GrabOutcome> {
        if !self.hidden {
            return Some(self.grab.acquire(ws, timers));
        }
        self.hidden = false;
        let mapped = ws.show(self.surface);
        ws.raise(self.surface);
        mapped.then(|| self.grab.acquire(ws, timers))
    }

    pub fn on_mapped(&mut self, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> GrabOutcome {
        if self.hidden {
            return GrabOutcome::Ignored;
        }
        self.grab.acquire(ws, timers)
    }

    pub fn on_retry(&mut self, fired: TimerId, ws: &mut dyn WindowSystem, timers: &mut TimerQueue) -> GrabOutcome {
        self.grab.on_retry(fired, ws, timers)
    }

    /// Give up the grab but stay mapped.
    pub fn release_grab(&mut self, ws: &mut dyn WindowSystem) {
        self.grab.release(ws);
    }

    /// Release the grab and unmap. The surface is kept for a later enable.
    pub fn disable(&mut self, ws: &mut dyn WindowSystem) {
        self.grab.release(ws);
        if !self.hidden {
            ws.hide(self.surface);
            self.hidden = true;
        }
    }

    pub fn destroy(mut self, ws: &mut dyn WindowSystem) {
        self.disable(ws);
        ws.destroy_surface(self.surface);
    }

    /// Forward multimedia keys while locked. Everything else is swallowed.
    pub fn handle_key(&self, hardware_keycode: u32, keyval: u32, bus: &mut dyn SystemBus) -> bool {
        if !is_forwarded_media_key(hardware_keycode, keyval) {
            return false;
        }
        bus.send_mm_key_press(hardware_keycode, keyval);
        emit(
            self.logger.as_ref(),
            LogLevel::Debug,
            "tklock::machine",
            "mm_key_forwarded",
            [
                json_kv("hardware_keycode", json!(hardware_keycode)),
                json_kv("keyval", json!(keyval)),
            ],
        );
        true
    }
}
