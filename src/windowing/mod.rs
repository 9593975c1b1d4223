//! Boundary to the windowing system.
//!
//! The lock controller never draws anything itself. It asks a
//! [`WindowSystem`] to create, map, raise and destroy surfaces, and to grant
//! or revoke the systemwide pointer and keyboard grabs. Widget trees, theming
//! and layout live behind the presenter boundary instead.

use std::fmt;

use crate::Result;

mod simulated;

pub use simulated::{SimulatedWindowSystem, WindowCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u32);

impl SurfaceId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Which lock presentation a surface backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    GrabOnly,
    Visual,
    EventEater,
}

impl SurfaceRole {
    pub fn label(self) -> &'static str {
        match self {
            SurfaceRole::GrabOnly => "gp_tklock",
            SurfaceRole::Visual => "visual_tklock",
            SurfaceRole::EventEater => "event_eater",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceGeometry {
    /// Fixed size at a fixed position. Negative coordinates park it offscreen.
    Fixed {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Fullscreen,
}

/// Creation parameters handed to the windowing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub role: SurfaceRole,
    pub title: &'static str,
    pub geometry: SurfaceGeometry,
    pub decorated: bool,
    pub keep_above: bool,
    pub override_redirect: bool,
    /// Compositor stacking layer hint, if any.
    pub stacking_layer: Option<u32>,
}

impl SurfaceSpec {
    /// Tiny undecorated window parked offscreen; exists only to hold the grab.
    pub fn grab_only() -> Self {
        Self {
            role: SurfaceRole::GrabOnly,
            title: "gp_tklock",
            geometry: SurfaceGeometry::Fixed {
                x: -15,
                y: -15,
                width: 15,
                height: 15,
            },
            decorated: false,
            keep_above: true,
            override_redirect: true,
            stacking_layer: None,
        }
    }

    pub fn visual() -> Self {
        Self {
            role: SurfaceRole::Visual,
            title: "visual_tklock",
            geometry: SurfaceGeometry::Fullscreen,
            decorated: false,
            keep_above: true,
            override_redirect: false,
            stacking_layer: None,
        }
    }

    /// Transparent fullscreen capture surface above every other layer.
    pub fn event_eater() -> Self {
        Self {
            role: SurfaceRole::EventEater,
            title: "EventEater",
            geometry: SurfaceGeometry::Fullscreen,
            decorated: false,
            keep_above: true,
            override_redirect: true,
            stacking_layer: Some(10),
        }
    }
}

/// Result of a single grab request, mirroring what X-style servers report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStatus {
    Success,
    AlreadyGrabbed,
    Frozen,
    NotViewable,
    InvalidTime,
}

impl GrabStatus {
    pub fn is_success(self) -> bool {
        matches!(self, GrabStatus::Success)
    }
}

/// Windowing operations the lock controller depends on.
///
/// Grabs are systemwide: `ungrab_*` releases whatever this client holds.
/// Unmapping or destroying a surface implicitly drops grabs held on it.
pub trait WindowSystem {
    fn create_surface(&mut self, spec: &SurfaceSpec) -> Result<SurfaceId>;
    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Map the surface. Returns `true` when it is mapped by the time the call
    /// returns; otherwise a map notification arrives later as an event.
    fn show(&mut self, surface: SurfaceId) -> bool;
    fn hide(&mut self, surface: SurfaceId);
    fn raise(&mut self, surface: SurfaceId);

    fn grab_pointer(&mut self, surface: SurfaceId, confine_to: Option<SurfaceId>) -> GrabStatus;
    fn grab_keyboard(&mut self, surface: SurfaceId) -> GrabStatus;
    fn ungrab_pointer(&mut self);
    fn ungrab_keyboard(&mut self);

    /// Dismiss transient top-level surfaces (menus, banners) that may be
    /// intercepting input on behalf of `surface`.
    fn close_other_temporaries(&mut self, surface: SurfaceId);
}
