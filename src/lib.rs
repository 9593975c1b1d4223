//! Lock-screen controller for a system-UI touch-lock plugin.
//!
//! The crate owns the input-grab lifecycle and arbitrates between three lock
//! presentations: an invisible grab-only lock, a slider lock screen and a
//! one-input gate that swallows a single tap. Windowing, the system bus and
//! the view layer are reached through traits, with simulated implementations
//! for tests, benches and the console demo.

pub mod bus;
pub mod config;
pub mod driver;
pub mod eater;
pub mod error;
pub mod gesture;
pub mod grab;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod power;
pub mod presenter;
pub mod session;
pub mod timer;
pub mod windowing;

pub use bus::{BusMessage, DisplayStatus, RecordingBus, SystemBus, request_unlock};
pub use config::{LockConfig, LockSettings, SliderSettings};
pub use driver::console::{ConsoleDriver, ConsoleDriverError, DriverResult};
pub use eater::{EaterPhase, EventEater};
pub use error::{Result, TklockError};
pub use gesture::{GestureRecognizer, ScrollKind, SliderOutcome, SliderState, SliderStatus};
pub use grab::{
    GrabController, GrabEntry, GrabLedger, GrabOutcome, GrabPhase, GrabState, SharedGrabLedger,
    release_grabs, try_grab,
};
pub use lock::{
    CallbackReason, CloseOutcome, Collaborators, LockAudit, LockAuditEvent, LockAuditEventBuilder,
    LockAuditStage, LockEvent, LockMode, LockModeMachine, LockNotice, LockSnapshot, NullLockAudit,
    OneInputStatus, RecordingAudit,
};
pub use logging::{LogEvent, LogFields, LogLevel, Logger, LoggingError, LoggingResult, MemorySink};
pub use metrics::{LockMetrics, MetricSnapshot};
pub use power::{DeferredTeardown, DisplayPowerGate, GateAction};
pub use presenter::{LockPresenter, NullPresenter, RecordingPresenter};
pub use session::{CallbackStatus, HostCallback, PluginSession, ScriptStep};
pub use timer::{TimerHandle, TimerId, TimerKind, TimerQueue};
pub use windowing::{SimulatedWindowSystem, SurfaceId, SurfaceRole, WindowSystem};
