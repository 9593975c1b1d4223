use std::fmt;

use crate::{Result, TklockError};

/// Which lock presentation is active. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    #[default]
    None,
    /// Invisible grab-only lock.
    Enabled,
    /// Slider lock screen.
    EnabledVisual,
    /// Single-gesture gate shown while the display is blanked.
    OneInput,
}

impl LockMode {
    /// Value used on the host boundary.
    pub const fn wire_value(self) -> u32 {
        match self {
            LockMode::None => 0,
            LockMode::Enabled => 1,
            LockMode::OneInput => 4,
            LockMode::EnabledVisual => 5,
        }
    }

    pub fn from_wire(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(LockMode::None),
            1 => Ok(LockMode::Enabled),
            4 => Ok(LockMode::OneInput),
            5 => Ok(LockMode::EnabledVisual),
            other => Err(TklockError::UnsupportedMode(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LockMode::None => "none",
            LockMode::Enabled => "enabled",
            LockMode::EnabledVisual => "enabled_visual",
            LockMode::OneInput => "one_input",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_host_protocol() {
        for mode in [
            LockMode::None,
            LockMode::Enabled,
            LockMode::OneInput,
            LockMode::EnabledVisual,
        ] {
            assert_eq!(LockMode::from_wire(mode.wire_value()).unwrap(), mode);
        }
    }

    #[test]
    fn unknown_values_are_rejected() {
        for raw in [2, 3, 6, 42, u32::MAX] {
            assert!(matches!(
                LockMode::from_wire(raw),
                Err(TklockError::UnsupportedMode(v)) if v == raw
            ));
        }
    }
}
