use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use thiserror::Error;

use crate::gesture::ScrollKind;
use crate::lock::{CallbackReason, LockEvent, LockMode};
use crate::session::{HostCallback, PluginSession};
use crate::windowing::SimulatedWindowSystem;
use crate::TklockError;

pub type DriverResult<T> = std::result::Result<T, ConsoleDriverError>;

#[derive(Debug, Error)]
pub enum ConsoleDriverError {
    #[error("lock error: {0}")]
    Lock(#[from] TklockError),
    #[error("terminal error: {0}")]
    Terminal(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

const IDLE_POLL: Duration = Duration::from_millis(250);
const SLIDER_STEP: f64 = 4.0;

const HELP: &[&str] = &[
    "1 grab-only   5 visual   4 one-input   c close   C silent close",
    "p/r press/release top surface   m media key   t clock changed",
    "left/right step slider   enter release slider   d toggle display",
    "q quit",
];

/// Terminal driver that runs a session against the simulated window system
/// and maps keystrokes to host calls, windowing input and power signals.
pub struct ConsoleDriver {
    session: PluginSession,
    windows: SimulatedWindowSystem,
    slider: f64,
    display_off: bool,
    heard: Rc<RefCell<Vec<CallbackReason>>>,
    last_action: String,
    should_exit: bool,
}

impl ConsoleDriver {
    /// `windows` must be a clone of the window system the session drives.
    pub fn new(session: PluginSession, windows: SimulatedWindowSystem) -> Self {
        Self {
            session,
            windows,
            slider: 3.0,
            display_off: false,
            heard: Rc::new(RefCell::new(Vec::new())),
            last_action: "ready".to_string(),
            should_exit: false,
        }
    }

    pub fn run(mut self) -> DriverResult<()> {
        let mut stdout = io::stdout();
        self.enter(&mut stdout)?;
        let result = self.run_inner(&mut stdout);
        self.exit(&mut stdout);
        self.session.shutdown();
        result
    }

    fn run_inner(&mut self, stdout: &mut impl Write) -> DriverResult<()> {
        self.render(stdout)?;
        while !self.should_exit {
            let timeout = self
                .session
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key)?;
                    }
                }
            }
            self.session.run_until(Instant::now());
            self.render(stdout)?;
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> DriverResult<()> {
        match key.code {
            KeyCode::Char('q') => self.should_exit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_exit = true;
            }
            KeyCode::Char('1') => self.open(LockMode::Enabled)?,
            KeyCode::Char('4') => self.open(LockMode::OneInput)?,
            KeyCode::Char('5') => self.open(LockMode::EnabledVisual)?,
            KeyCode::Char('c') => self.close(false),
            KeyCode::Char('C') => self.close(true),
            KeyCode::Char('p') => self.button(true),
            KeyCode::Char('r') => self.button(false),
            KeyCode::Char('m') => self.media_key(),
            KeyCode::Char('t') => {
                self.session.dispatch(LockEvent::ClockChanged);
                self.last_action = "clock changed".to_string();
            }
            KeyCode::Char('d') => self.toggle_display(),
            KeyCode::Right => self.step_slider(SLIDER_STEP, ScrollKind::StepForward),
            KeyCode::Left => self.step_slider(-SLIDER_STEP, ScrollKind::StepBackward),
            KeyCode::Enter => self.release_slider(),
            _ => {}
        }
        Ok(())
    }

    fn open(&mut self, mode: LockMode) -> DriverResult<()> {
        let heard = Rc::clone(&self.heard);
        let callback = HostCallback::new("console", move |reason| heard.borrow_mut().push(reason));
        let status = self.session.open(mode.wire_value(), callback)?;
        self.slider = 3.0;
        self.last_action = format!("open {mode} -> {}", status.code());
        Ok(())
    }

    fn close(&mut self, silent: bool) {
        let outcome = self.session.close(silent);
        self.last_action = format!("close(silent={silent}) -> {outcome:?}");
    }

    fn button(&mut self, press: bool) {
        let Some(surface) = self.windows.topmost_mapped() else {
            self.last_action = "no mapped surface".to_string();
            return;
        };
        let event = if press {
            LockEvent::ButtonPress(surface)
        } else {
            LockEvent::ButtonRelease(surface)
        };
        self.last_action = format!("{} on {surface}", event.label());
        self.session.dispatch(event);
    }

    fn media_key(&mut self) {
        let Some(surface) = self.session.snapshot().grab_only else {
            self.last_action = "no grab-only surface".to_string();
            return;
        };
        self.session.dispatch(LockEvent::KeyPress {
            surface,
            hardware_keycode: 171,
            keyval: 0x1008ff17,
        });
        self.last_action = "media key 171".to_string();
    }

    fn toggle_display(&mut self) {
        self.display_off = !self.display_off;
        let status = if self.display_off { "off" } else { "on" };
        self.session.display_status(status);
        self.last_action = format!("display {status}");
    }

    fn step_slider(&mut self, delta: f64, scroll: ScrollKind) {
        self.slider = (self.slider + delta).clamp(0.0, 40.0);
        self.session.dispatch(LockEvent::SliderStep {
            scroll,
            value: self.slider,
        });
        self.last_action = format!("slider step to {:.1}", self.slider);
    }

    fn release_slider(&mut self) {
        self.session.dispatch(LockEvent::SliderReleased(self.slider));
        self.last_action = format!("slider released at {:.1}", self.slider);
        if let Some(state) = self.session.snapshot().slider {
            self.slider = state.position;
        }
    }

    fn render(&mut self, stdout: &mut impl Write) -> DriverResult<()> {
        let snap = self.session.snapshot();
        let heard: Vec<String> = self
            .heard
            .borrow()
            .iter()
            .rev()
            .take(6)
            .map(|reason| format!("{reason:?}({})", reason.code()))
            .collect();

        let mut lines = vec![
            format!("mode           {}", snap.mode),
            format!(
                "grab owner     {}",
                snap.grab_owner.as_deref().unwrap_or("-")
            ),
            format!("one-input      {:?} / eater {:?}", snap.one_input, snap.eater),
            format!(
                "teardown       active={} deferred={} display_off={}",
                snap.teardown_active, snap.teardown_deferred, snap.display_off
            ),
            format!(
                "slider         {:.1} {}",
                self.slider,
                snap.slider
                    .map(|state| format!("{:?}", state.status))
                    .unwrap_or_else(|| "-".to_string())
            ),
            format!("callback heard {}", heard.join(" ")),
            format!("last action    {}", self.last_action),
            String::new(),
        ];
        lines.extend(HELP.iter().map(|line| line.to_string()));

        execute!(stdout, Clear(ClearType::All))?;
        for (row, line) in lines.iter().enumerate() {
            execute!(stdout, MoveTo(0, row as u16))?;
            write!(stdout, "{line}")?;
        }
        stdout.flush()?;
        Ok(())
    }

    fn enter(&self, stdout: &mut impl Write) -> DriverResult<()> {
        terminal::enable_raw_mode().map_err(|err| ConsoleDriverError::Terminal(err.to_string()))?;
        execute!(stdout, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        Ok(())
    }

    fn exit(&self, stdout: &mut impl Write) {
        execute!(stdout, Show, LeaveAlternateScreen).ok();
        terminal::disable_raw_mode().ok();
    }
}
