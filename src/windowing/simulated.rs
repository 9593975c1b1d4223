use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::{Result, TklockError};

use super::{GrabStatus, SurfaceId, SurfaceRole, SurfaceSpec, WindowSystem};

/// Every call the simulated backend received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCall {
    Create(SurfaceId, SurfaceRole),
    Destroy(SurfaceId),
    Show(SurfaceId),
    Hide(SurfaceId),
    Raise(SurfaceId),
    GrabPointer {
        surface: SurfaceId,
        confine_to: Option<SurfaceId>,
        status: GrabStatus,
    },
    GrabKeyboard {
        surface: SurfaceId,
        status: GrabStatus,
    },
    UngrabPointer,
    UngrabKeyboard,
    CloseOtherTemporaries(SurfaceId),
}

#[derive(Debug, Clone)]
struct SimSurface {
    role: SurfaceRole,
    mapped: bool,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u32,
    surfaces: BTreeMap<SurfaceId, SimSurface>,
    stacking: Vec<SurfaceId>,
    pointer_holder: Option<SurfaceId>,
    keyboard_holder: Option<SurfaceId>,
    foreign_grab: Option<ForeignGrab>,
    pointer_denials: u32,
    keyboard_denials: u32,
    fail_creates: u32,
    deferred_map: bool,
    overlapping_grabs: u32,
    calls: Vec<WindowCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForeignGrab {
    /// Held by a transient surface that `close_other_temporaries` dismisses.
    Transient,
    /// Held by another client that never lets go on its own.
    Client,
}

impl SimState {
    fn grant(&mut self, surface: SurfaceId, keyboard: bool) -> GrabStatus {
        let Some(sim) = self.surfaces.get(&surface) else {
            return GrabStatus::NotViewable;
        };
        if !sim.mapped {
            return GrabStatus::NotViewable;
        }
        if self.foreign_grab.is_some() {
            return GrabStatus::AlreadyGrabbed;
        }
        let denials = if keyboard {
            &mut self.keyboard_denials
        } else {
            &mut self.pointer_denials
        };
        if *denials > 0 {
            *denials -= 1;
            return GrabStatus::AlreadyGrabbed;
        }

        let holder = if keyboard {
            &mut self.keyboard_holder
        } else {
            &mut self.pointer_holder
        };
        if holder.is_some_and(|current| current != surface) {
            self.overlapping_grabs += 1;
        }
        *holder = Some(surface);
        GrabStatus::Success
    }

    fn drop_grabs_on(&mut self, surface: SurfaceId) {
        if self.pointer_holder == Some(surface) {
            self.pointer_holder = None;
        }
        if self.keyboard_holder == Some(surface) {
            self.keyboard_holder = None;
        }
    }
}

/// In-process window system used by tests, benches and the console demo.
///
/// Clones share state, so a test can hand one clone to the lock controller and
/// keep another to script failures and inspect what happened.
#[derive(Clone, Default)]
pub struct SimulatedWindowSystem {
    inner: Rc<RefCell<SimState>>,
}

impl SimulatedWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny the next `count` pointer grab requests.
    pub fn deny_pointer_grabs(&self, count: u32) {
        self.inner.borrow_mut().pointer_denials = count;
    }

    /// Deny the next `count` keyboard grab requests.
    pub fn deny_keyboard_grabs(&self, count: u32) {
        self.inner.borrow_mut().keyboard_denials = count;
    }

    /// Simulate a transient surface (e.g. a notification banner) holding the grab.
    pub fn hold_grab_by_transient(&self) {
        self.inner.borrow_mut().foreign_grab = Some(ForeignGrab::Transient);
    }

    /// Simulate another client holding the grab indefinitely.
    pub fn hold_grab_by_client(&self) {
        self.inner.borrow_mut().foreign_grab = Some(ForeignGrab::Client);
    }

    pub fn release_foreign_grab(&self) {
        self.inner.borrow_mut().foreign_grab = None;
    }

    /// Fail the next `count` surface creations.
    pub fn fail_creates(&self, count: u32) {
        self.inner.borrow_mut().fail_creates = count;
    }

    /// Report maps asynchronously; the host must deliver `Mapped` events.
    pub fn set_deferred_map(&self, deferred: bool) {
        self.inner.borrow_mut().deferred_map = deferred;
    }

    pub fn calls(&self) -> Vec<WindowCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn surfaces_with_role(&self, role: SurfaceRole) -> Vec<SurfaceId> {
        self.inner
            .borrow()
            .surfaces
            .iter()
            .filter(|(_, sim)| sim.role == role)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn surface_count(&self) -> usize {
        self.inner.borrow().surfaces.len()
    }

    pub fn is_mapped(&self, surface: SurfaceId) -> bool {
        self.inner
            .borrow()
            .surfaces
            .get(&surface)
            .is_some_and(|sim| sim.mapped)
    }

    /// Highest mapped surface in stacking order.
    pub fn topmost_mapped(&self) -> Option<SurfaceId> {
        let state = self.inner.borrow();
        state
            .stacking
            .iter()
            .rev()
            .find(|id| state.surfaces.get(*id).is_some_and(|sim| sim.mapped))
            .copied()
    }

    pub fn pointer_holder(&self) -> Option<SurfaceId> {
        self.inner.borrow().pointer_holder
    }

    pub fn keyboard_holder(&self) -> Option<SurfaceId> {
        self.inner.borrow().keyboard_holder
    }

    /// Grants that replaced a grab still held by a different surface.
    pub fn overlapping_grabs(&self) -> u32 {
        self.inner.borrow().overlapping_grabs
    }

    pub fn temporaries_closed(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, WindowCall::CloseOtherTemporaries(_)))
            .count()
    }

    pub fn pointer_grab_attempts(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, WindowCall::GrabPointer { .. }))
            .count()
    }
}

impl WindowSystem for SimulatedWindowSystem {
    fn create_surface(&mut self, spec: &SurfaceSpec) -> Result<SurfaceId> {
        let mut state = self.inner.borrow_mut();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(TklockError::SurfaceCreation(format!(
                "simulated failure creating {}",
                spec.title
            )));
        }
        state.next_id += 1;
        let id = SurfaceId::new(state.next_id);
        state.surfaces.insert(
            id,
            SimSurface {
                role: spec.role,
                mapped: false,
            },
        );
        state.stacking.push(id);
        state.calls.push(WindowCall::Create(id, spec.role));
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        let mut state = self.inner.borrow_mut();
        if state.surfaces.remove(&surface).is_some() {
            state.stacking.retain(|id| *id != surface);
            state.drop_grabs_on(surface);
            state.calls.push(WindowCall::Destroy(surface));
        }
    }

    fn show(&mut self, surface: SurfaceId) -> bool {
        let mut state = self.inner.borrow_mut();
        let deferred = state.deferred_map;
        state.calls.push(WindowCall::Show(surface));
        match state.surfaces.get_mut(&surface) {
            Some(sim) => {
                sim.mapped = true;
                !deferred
            }
            None => false,
        }
    }

    fn hide(&mut self, surface: SurfaceId) {
        let mut state = self.inner.borrow_mut();
        state.calls.push(WindowCall::Hide(surface));
        if let Some(sim) = state.surfaces.get_mut(&surface) {
            sim.mapped = false;
            state.drop_grabs_on(surface);
        }
    }

    fn raise(&mut self, surface: SurfaceId) {
        let mut state = self.inner.borrow_mut();
        state.calls.push(WindowCall::Raise(surface));
        if state.surfaces.contains_key(&surface) {
            state.stacking.retain(|id| *id != surface);
            state.stacking.push(surface);
        }
    }

    fn grab_pointer(&mut self, surface: SurfaceId, confine_to: Option<SurfaceId>) -> GrabStatus {
        let mut state = self.inner.borrow_mut();
        let status = state.grant(surface, false);
        state.calls.push(WindowCall::GrabPointer {
            surface,
            confine_to,
            status,
        });
        status
    }

    fn grab_keyboard(&mut self, surface: SurfaceId) -> GrabStatus {
        let mut state = self.inner.borrow_mut();
        let status = state.grant(surface, true);
        state.calls.push(WindowCall::GrabKeyboard { surface, status });
        status
    }

    fn ungrab_pointer(&mut self) {
        let mut state = self.inner.borrow_mut();
        state.pointer_holder = None;
        state.calls.push(WindowCall::UngrabPointer);
    }

    fn ungrab_keyboard(&mut self) {
        let mut state = self.inner.borrow_mut();
        state.keyboard_holder = None;
        state.calls.push(WindowCall::UngrabKeyboard);
    }

    fn close_other_temporaries(&mut self, surface: SurfaceId) {
        let mut state = self.inner.borrow_mut();
        if state.foreign_grab == Some(ForeignGrab::Transient) {
            state.foreign_grab = None;
        }
        state.calls.push(WindowCall::CloseOtherTemporaries(surface));
    }
}
