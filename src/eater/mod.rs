use serde_json::json;

use crate::Result;
use crate::grab::SharedGrabLedger;
use crate::logging::{LogLevel, Logger, emit, json_kv};
use crate::windowing::{SurfaceId, SurfaceRole, SurfaceSpec, WindowSystem};

const TARGET: &str = "tklock::eater";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaterPhase {
    Idle,
    Armed,
    Consuming,
    Finished,
}

/// What a delivered button event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaterStep {
    Absorbed,
    Finished,
    /// Event was not for the eater.
    NotMine,
}

pub struct EventEater {
    surface: Option<SurfaceId>,
    phase: EaterPhase,
    ledger: SharedGrabLedger,
    logger: Option<Logger>,
}

impl EventEater {
    pub fn new(ledger: SharedGrabLedger, logger: Option<Logger>) -> Self {
        Self {
            surface: None,
            phase: EaterPhase::Idle,
            ledger,
            logger,
        }
    }

    pub fn phase(&self) -> EaterPhase {
        self.phase
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    pub fn is_present(&self) -> bool {
        self.surface.is_some()
    }

    pub fn owns(&self, surface: SurfaceId) -> bool {
        self.surface == Some(surface)
    }

    /// Create, raise and grab. A present eater is only raised again.
    pub fn create(&mut self, ws: &mut dyn WindowSystem) -> Result<SurfaceId> {
        if let Some(surface) = self.surface {
            ws.raise(surface);
            return Ok(surface);
        }

        let surface = ws.create_surface(&SurfaceSpec::event_eater())?;
        ws.show(surface);
        ws.raise(surface);

        // Single attempt. The eater has no retry path.
        let keyboard = ws.grab_keyboard(surface);
        let pointer = ws.grab_pointer(surface, None);
        if keyboard.is_success() && pointer.is_success() {
            self.ledger.set_owner(SurfaceRole::EventEater.label(), surface);
        } else {
            emit(
                self.logger.as_ref(),
                LogLevel::Warn,
                TARGET,
                "eater_grab_refused",
                [
                    json_kv("keyboard", json!(format!("{keyboard:?}"))),
                    json_kv("pointer", json!(format!("{pointer:?}"))),
                ],
            );
        }

        self.surface = Some(surface);
        self.phase = EaterPhase::Armed;
        emit(
            self.logger.as_ref(),
            LogLevel::Info,
            TARGET,
            "eater_armed",
            [json_kv("surface", json!(surface.raw()))],
        );
        Ok(surface)
    }

    pub fn on_press(&mut self, surface: SurfaceId) -> EaterStep {
        if !self.owns(surface) {
            return EaterStep::NotMine;
        }
        if self.phase == EaterPhase::Armed {
            self.phase = EaterPhase::Consuming;
        }
        EaterStep::Absorbed
    }

    /// The first release completes the gate. The caller destroys the eater.
    pub fn on_release(&mut self, surface: SurfaceId) -> EaterStep {
        if !self.owns(surface) {
            return EaterStep::NotMine;
        }
        match self.phase {
            EaterPhase::Armed | EaterPhase::Consuming => {
                self.phase = EaterPhase::Finished;
                emit(
                    self.logger.as_ref(),
                    LogLevel::Info,
                    TARGET,
                    "eater_finished",
                    [json_kv("surface", json!(surface.raw()))],
                );
                EaterStep::Finished
            }
            EaterPhase::Idle | EaterPhase::Finished => EaterStep::Absorbed,
        }
    }

    /// Destroy the surface; its grabs go with it.
    pub fn destroy(&mut self, ws: &mut dyn WindowSystem) {
        if let Some(surface) = self.surface.take() {
            ws.destroy_surface(surface);
            self.ledger.clear_owner(SurfaceRole::EventEater.label());
            emit(
                self.logger.as_ref(),
                LogLevel::Debug,
                TARGET,
                "eater_destroyed",
                [json_kv("surface", json!(surface.raw()))],
            );
        }
        self.phase = EaterPhase::Idle;
    }
}
