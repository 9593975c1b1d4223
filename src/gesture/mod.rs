use crate::config::SliderSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliderStatus {
    Idle,
    Pressed,
    /// Latched until the surface is recreated.
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderState {
    pub position: f64,
    pub status: SliderStatus,
}

/// How a `change_value` step was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKind {
    Jump,
    StepForward,
    StepBackward,
    PageForward,
    PageBackward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliderOutcome {
    /// The gesture just completed. Emitted at most once per recognizer.
    Unlocked,
    /// Released short of the end stop; knob went back to rest.
    Reset,
    Tracking { position: f64 },
    Ignored,
}

pub struct GestureRecognizer {
    settings: SliderSettings,
    state: SliderState,
}

impl GestureRecognizer {
    pub fn new(settings: SliderSettings) -> Self {
        let rest = settings.rest;
        Self {
            settings,
            state: SliderState {
                position: rest,
                status: SliderStatus::Idle,
            },
        }
    }

    pub fn state(&self) -> SliderState {
        self.state
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.status == SliderStatus::Unlocked
    }

    /// The slider settled at `value` (end of a drag).
    pub fn value_changed(&mut self, value: f64) -> SliderOutcome {
        if self.is_unlocked() {
            return SliderOutcome::Ignored;
        }
        let value = self.clamp(value);
        if (self.settings.upper - value).abs() < self.settings.drag_unlock_distance {
            return self.latch();
        }
        self.reset();
        SliderOutcome::Reset
    }

    /// A discrete step moved the slider to `value`. Every scroll kind is
    /// judged by where it lands.
    pub fn change_value(&mut self, _scroll: ScrollKind, value: f64) -> SliderOutcome {
        if self.is_unlocked() {
            return SliderOutcome::Ignored;
        }
        let value = self.clamp(value);
        if value - self.settings.rest <= self.settings.step_min_travel {
            // Steps near the start, backward ones included, are not intent.
            return SliderOutcome::Ignored;
        }
        if (value - self.settings.upper).abs() < self.settings.step_unlock_distance {
            return self.latch();
        }
        self.state.status = SliderStatus::Pressed;
        self.state.position = value;
        SliderOutcome::Tracking { position: value }
    }

    fn latch(&mut self) -> SliderOutcome {
        self.state = SliderState {
            position: self.settings.upper,
            status: SliderStatus::Unlocked,
        };
        SliderOutcome::Unlocked
    }

    fn reset(&mut self) {
        self.state = SliderState {
            position: self.settings.rest,
            status: SliderStatus::Idle,
        };
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.settings.lower, self.settings.upper)
    }
}
