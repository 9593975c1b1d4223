use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tklock::{
    CallbackReason, CallbackStatus, CloseOutcome, Collaborators, EaterPhase, HostCallback,
    LockAuditStage, LockConfig, LockEvent, LockMode, LockSettings, Logger, MemorySink,
    PluginSession, RecordingAudit, RecordingBus, RecordingPresenter, ScrollKind,
    SimulatedWindowSystem, SurfaceRole,
};

struct Harness {
    windows: SimulatedWindowSystem,
    bus: RecordingBus,
    presenter: RecordingPresenter,
    audit: RecordingAudit,
    logs: MemorySink,
    session: PluginSession,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(LockSettings::default())
    }

    fn with_settings(settings: LockSettings) -> Self {
        let windows = SimulatedWindowSystem::new();
        let bus = RecordingBus::new();
        let presenter = RecordingPresenter::new();
        let audit = RecordingAudit::new();
        let logs = MemorySink::new();
        let config = LockConfig::with_settings(settings)
            .with_logger(Logger::new(logs.clone()))
            .with_audit(Arc::new(audit.clone()));
        let session = PluginSession::init_at(
            Collaborators::new(windows.clone(), bus.clone(), presenter.clone()),
            config,
            Instant::now(),
        );
        Self {
            windows,
            bus,
            presenter,
            audit,
            logs,
            session,
        }
    }

    fn open(&mut self, mode: LockMode) -> (CallbackStatus, Rc<RefCell<Vec<CallbackReason>>>) {
        let heard = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&heard);
        let status = self
            .session
            .open(
                mode.wire_value(),
                HostCallback::new(mode.label(), move |reason| sink.borrow_mut().push(reason)),
            )
            .expect("supported mode");
        (status, heard)
    }

    fn assert_single_holder(&self) {
        assert_eq!(self.windows.overlapping_grabs(), 0, "grab moved without release");
        assert_eq!(self.windows.pointer_holder(), self.windows.keyboard_holder());
    }
}

#[test]
fn grab_is_never_held_by_two_surfaces() {
    let mut h = Harness::new();
    let sequence = [
        LockMode::Enabled,
        LockMode::OneInput,
        LockMode::EnabledVisual,
        LockMode::OneInput,
        LockMode::Enabled,
        LockMode::EnabledVisual,
        LockMode::Enabled,
    ];
    for mode in sequence {
        h.open(mode);
        h.assert_single_holder();
        let owner = h.session.snapshot().grab_owner;
        let expected = match mode {
            LockMode::Enabled => SurfaceRole::GrabOnly.label(),
            LockMode::EnabledVisual => SurfaceRole::Visual.label(),
            LockMode::OneInput => SurfaceRole::EventEater.label(),
            LockMode::None => unreachable!(),
        };
        assert_eq!(owner.as_deref(), Some(expected), "after opening {mode}");
    }
    h.session.close(true);
    assert_eq!(h.windows.pointer_holder(), None);
    assert_eq!(h.windows.surface_count(), 0);
}

#[test]
fn exhausted_retries_fail_open_exactly_once() {
    let mut h = Harness::new();
    h.windows.hold_grab_by_client();
    let (_, heard) = h.open(LockMode::Enabled);
    assert_eq!(h.session.mode(), LockMode::Enabled);

    h.session.advance(Duration::from_millis(800));

    assert_eq!(h.session.mode(), LockMode::None);
    assert_eq!(h.audit.count(LockAuditStage::GrabFailed), 1);
    assert_eq!(h.audit.count(LockAuditStage::FailedOpen), 1);
    assert_eq!(h.bus.unlock_requests(), 1);
    assert_eq!(*heard.borrow(), vec![CallbackReason::Retry]);
    assert!(!h.session.has_callback());
    // Initial attempt plus four retries.
    assert_eq!(h.windows.pointer_grab_attempts(), 5);
    assert_eq!(h.windows.temporaries_closed(), 1);
    assert_eq!(h.windows.surface_count(), 0);

    h.session.advance(Duration::from_secs(10));
    assert_eq!(h.bus.unlock_requests(), 1);
    assert_eq!(h.windows.pointer_grab_attempts(), 5);
    assert_eq!(h.session.pending_timers(), 0);

    let grab_logs = h.logs.messages_for("tklock::grab");
    assert_eq!(
        grab_logs.iter().filter(|m| m.as_str() == "grab_failed").count(),
        1
    );
    assert!(h.logs.messages_for("tklock::machine").contains(&"failed_open".to_string()));
}

#[test]
fn third_retry_success_keeps_lock() {
    let mut h = Harness::new();
    h.windows.deny_pointer_grabs(3);
    let (_, heard) = h.open(LockMode::Enabled);
    h.session.advance(Duration::from_millis(600));
    let snap = h.session.snapshot();
    assert_eq!(snap.mode, LockMode::Enabled);
    assert_eq!(snap.grab_owner.as_deref(), Some("gp_tklock"));
    assert_eq!(h.bus.unlock_requests(), 0);
    assert!(heard.borrow().is_empty());
    assert_eq!(h.audit.count(LockAuditStage::GrabRetryScheduled), 3);
}

#[test]
fn transient_surface_is_dismissed_on_first_retry() {
    let mut h = Harness::new();
    h.windows.hold_grab_by_transient();
    h.open(LockMode::EnabledVisual);
    assert!(h.session.snapshot().grab_owner.is_none());
    h.session.advance(Duration::from_millis(200));
    assert_eq!(h.windows.temporaries_closed(), 1);
    assert_eq!(
        h.session.snapshot().grab_owner.as_deref(),
        Some("visual_tklock")
    );
}

#[test]
fn visual_grab_failure_also_fails_open() {
    let mut h = Harness::new();
    h.windows.hold_grab_by_client();
    let (_, heard) = h.open(LockMode::EnabledVisual);
    h.session.advance(Duration::from_secs(1));
    assert_eq!(h.session.mode(), LockMode::None);
    assert_eq!(h.bus.unlock_requests(), 1);
    assert_eq!(*heard.borrow(), vec![CallbackReason::Retry]);
    assert_eq!(h.presenter.live_views(), 0);
}

#[test]
fn slider_unlock_is_reported_once() {
    let mut h = Harness::new();
    let (_, heard) = h.open(LockMode::EnabledVisual);
    for value in [12.0, 37.0, 40.0, 39.5] {
        h.session.dispatch(LockEvent::SliderReleased(value));
    }
    h.session.dispatch(LockEvent::SliderStep {
        scroll: ScrollKind::StepForward,
        value: 40.0,
    });
    assert_eq!(*heard.borrow(), vec![CallbackReason::Unlock]);
    assert_eq!(h.bus.unlock_requests(), 1);
    let slider = h.session.snapshot().slider.unwrap();
    assert_eq!(slider.position, 40.0);
}

#[test]
fn slider_events_outside_visual_mode_are_ignored() {
    let mut h = Harness::new();
    h.open(LockMode::EnabledVisual);
    h.open(LockMode::OneInput);
    h.session.dispatch(LockEvent::SliderReleased(40.0));
    assert_eq!(h.bus.unlock_requests(), 0);
}

#[test]
fn one_input_then_visual_leaves_no_eater_or_stray_timers() {
    let mut h = Harness::new();
    h.open(LockMode::OneInput);
    h.open(LockMode::EnabledVisual);
    let snap = h.session.snapshot();
    assert_eq!(snap.eater, EaterPhase::Idle);
    assert!(h.windows.surfaces_with_role(SurfaceRole::EventEater).is_empty());
    assert_eq!(h.windows.surfaces_with_role(SurfaceRole::Visual).len(), 1);
    // Only the clock refresh remains.
    assert_eq!(h.session.pending_timers(), 1);
    assert!(!snap.teardown_active);
}

#[test]
fn display_off_holds_teardown_until_display_returns() {
    let mut h = Harness::new();
    let (_, heard) = h.open(LockMode::Enabled);
    h.session.display_status("off");
    h.session.advance(Duration::from_secs(5));
    assert_eq!(h.session.mode(), LockMode::Enabled);
    assert_eq!(h.windows.surfaces_with_role(SurfaceRole::GrabOnly).len(), 1);

    h.session.display_status("on");
    assert!(h.session.snapshot().teardown_active);
    h.session.advance(Duration::from_millis(1999));
    assert_eq!(h.session.mode(), LockMode::Enabled);
    h.session.advance(Duration::from_millis(1));
    assert_eq!(h.session.mode(), LockMode::None);
    assert_eq!(h.windows.surface_count(), 0);
    assert!(heard.borrow().is_empty());
    assert!(!h.session.has_callback());
}

#[test]
fn mode_change_cancels_teardown() {
    let mut h = Harness::new();
    h.open(LockMode::Enabled);
    h.open(LockMode::EnabledVisual);
    h.session.advance(Duration::from_secs(3));
    assert_eq!(h.session.mode(), LockMode::EnabledVisual);
    assert_eq!(h.audit.count(LockAuditStage::TeardownFired), 0);
}

#[test]
fn close_during_one_input_is_refused_until_released() {
    let mut h = Harness::new();
    let (_, heard) = h.open(LockMode::OneInput);
    let eater = h.session.snapshot().eater_surface.unwrap();

    assert_eq!(h.session.close(false), CloseOutcome::Refused);
    let snap = h.session.snapshot();
    assert_eq!(snap.mode, LockMode::OneInput);
    assert_eq!(snap.eater_surface, Some(eater));
    assert!(h.session.has_callback());

    h.session.dispatch(LockEvent::ButtonPress(eater));
    assert_eq!(h.session.close(false), CloseOutcome::Refused);

    h.session.dispatch(LockEvent::ButtonRelease(eater));
    assert_eq!(
        *heard.borrow(),
        vec![CallbackReason::Unlock, CallbackReason::Closed]
    );
    assert!(!h.session.has_callback());
    assert_eq!(h.session.close(false), CloseOutcome::Closed);
    assert_eq!(h.session.mode(), LockMode::None);
}

#[test]
fn silent_close_overrides_one_input_gate() {
    let mut h = Harness::new();
    let (_, heard) = h.open(LockMode::OneInput);
    assert_eq!(h.session.close(true), CloseOutcome::Closed);
    assert!(heard.borrow().is_empty());
    assert_eq!(h.windows.surface_count(), 0);
}

#[test]
fn unsupported_mode_leaves_session_untouched() {
    let mut h = Harness::new();
    let (_, heard) = h.open(LockMode::Enabled);
    assert!(h.session.open(3, HostCallback::noop()).is_err());
    assert_eq!(h.session.mode(), LockMode::Enabled);
    assert!(h.session.has_callback());
    assert!(heard.borrow().is_empty());
}

#[test]
fn configured_retry_delay_is_honoured() {
    let settings = LockSettings::from_json_str(r#"{"grab_retry_delay_ms": 50, "max_grab_retries": 1}"#)
        .unwrap();
    let mut h = Harness::with_settings(settings);
    h.windows.hold_grab_by_client();
    h.open(LockMode::Enabled);
    h.session.advance(Duration::from_millis(99));
    assert_eq!(h.session.mode(), LockMode::Enabled);
    h.session.advance(Duration::from_millis(1));
    assert_eq!(h.session.mode(), LockMode::None);
    assert_eq!(h.bus.unlock_requests(), 1);
}

#[test]
fn shutdown_forces_every_surface_down() {
    let mut h = Harness::new();
    h.open(LockMode::Enabled);
    h.open(LockMode::OneInput);
    let windows = h.windows.clone();
    let audit = h.audit.clone();
    h.session.shutdown();
    assert_eq!(windows.surface_count(), 0);
    assert_eq!(windows.pointer_holder(), None);
    assert_eq!(audit.count(LockAuditStage::SessionStopped), 1);
}

#[test]
fn late_map_notification_triggers_the_grab() {
    let mut h = Harness::new();
    h.windows.set_deferred_map(true);
    h.open(LockMode::Enabled);
    assert!(h.session.snapshot().grab_owner.is_none());
    assert_eq!(h.windows.pointer_grab_attempts(), 0);

    let surface = h.session.snapshot().grab_only.unwrap();
    h.session.dispatch(LockEvent::Mapped(surface));
    assert_eq!(h.session.snapshot().grab_owner.as_deref(), Some("gp_tklock"));

    // A repeated map notification does not grab twice.
    h.session.dispatch(LockEvent::Mapped(surface));
    assert_eq!(h.windows.pointer_grab_attempts(), 1);
}

#[test]
fn late_map_of_a_replaced_lock_leaves_the_eater_grab_alone() {
    for (first, role) in [
        (LockMode::EnabledVisual, SurfaceRole::Visual),
        (LockMode::Enabled, SurfaceRole::GrabOnly),
    ] {
        let mut h = Harness::new();
        h.windows.set_deferred_map(true);
        h.open(first);
        let (_, heard) = h.open(LockMode::OneInput);
        let snap = h.session.snapshot();
        let eater = snap.eater_surface.unwrap();
        let stale = match role {
            SurfaceRole::Visual => snap.visual.unwrap(),
            _ => snap.grab_only.unwrap(),
        };

        h.session.dispatch(LockEvent::Mapped(stale));

        let snap = h.session.snapshot();
        assert_eq!(snap.grab_owner.as_deref(), Some("event_eater"), "after {first}");
        assert_eq!(h.windows.pointer_holder(), Some(eater));
        h.assert_single_holder();

        h.session.dispatch(LockEvent::ButtonPress(eater));
        h.session.dispatch(LockEvent::ButtonRelease(eater));
        assert_eq!(
            *heard.borrow(),
            vec![CallbackReason::Unlock, CallbackReason::Closed]
        );
        assert_eq!(h.session.close(false), CloseOutcome::Closed);
    }
}

#[test]
fn late_map_of_the_hidden_grab_only_lock_is_ignored() {
    let mut h = Harness::new();
    h.windows.set_deferred_map(true);
    h.open(LockMode::Enabled);
    h.open(LockMode::EnabledVisual);
    let snap = h.session.snapshot();
    let (grab_only, visual) = (snap.grab_only.unwrap(), snap.visual.unwrap());

    h.session.dispatch(LockEvent::Mapped(visual));
    assert_eq!(h.session.snapshot().grab_owner.as_deref(), Some("visual_tklock"));
    let attempts = h.windows.pointer_grab_attempts();

    h.session.dispatch(LockEvent::Mapped(grab_only));
    assert_eq!(h.windows.pointer_grab_attempts(), attempts);
    assert_eq!(h.windows.pointer_holder(), Some(visual));
    assert_eq!(h.session.snapshot().grab_owner.as_deref(), Some("visual_tklock"));
    h.assert_single_holder();
}

#[test]
fn media_keys_reach_the_bus_only_from_the_grab_only_lock() {
    let mut h = Harness::new();
    h.open(LockMode::Enabled);
    let surface = h.session.snapshot().grab_only.unwrap();
    h.session.dispatch(LockEvent::KeyPress {
        surface,
        hardware_keycode: 171,
        keyval: 0x1008ff17,
    });
    h.session.dispatch(LockEvent::KeyPress {
        surface,
        hardware_keycode: 38,
        keyval: 0x61,
    });
    assert_eq!(h.bus.forwarded_keys(), vec![(171, 0x1008ff17)]);

    h.open(LockMode::EnabledVisual);
    let visual = h.session.snapshot().visual.unwrap();
    h.session.dispatch(LockEvent::KeyPress {
        surface: visual,
        hardware_keycode: 171,
        keyval: 0x1008ff17,
    });
    assert_eq!(h.bus.forwarded_keys().len(), 1);
}
