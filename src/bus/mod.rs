use std::cell::RefCell;
use std::rc::Rc;

/// Status string the power service sends when the panel goes dark.
pub const DISPLAY_OFF: &str = "off";

/// Hardware keycodes forwarded while the grab-only lock owns the keyboard.
pub const MEDIA_KEYCODES: [u32; 11] = [73, 74, 121, 122, 123, 171, 172, 173, 174, 208, 209];

/// Keysym value of `Execute`; the power key reports it and is never forwarded.
pub const KEYSYM_EXECUTE: u32 = 0xff62;

pub fn is_forwarded_media_key(hardware_keycode: u32, keyval: u32) -> bool {
    keyval != KEYSYM_EXECUTE && MEDIA_KEYCODES.contains(&hardware_keycode)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Off,
    /// Anything other than "off": on, dimmed, or an unknown value.
    Awake,
}

impl DisplayStatus {
    pub fn parse(status: &str) -> Self {
        if status == DISPLAY_OFF {
            DisplayStatus::Off
        } else {
            DisplayStatus::Awake
        }
    }

    pub fn is_off(self) -> bool {
        matches!(self, DisplayStatus::Off)
    }
}

/// Fire-and-forget requests to the power service and media daemons.
pub trait SystemBus {
    fn request_display_on(&mut self);
    fn request_tklock_unlocked(&mut self);
    fn send_mm_key_press(&mut self, hardware_keycode: u32, keyval: u32);
}

/// Ask for the display to come on and report the touch lock as unlocked.
/// The two requests always travel together.
pub fn request_unlock(bus: &mut dyn SystemBus) {
    bus.request_display_on();
    bus.request_tklock_unlocked();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessage {
    DisplayOn,
    TklockUnlocked,
    MmKeyPress { hardware_keycode: u32, keyval: u32 },
}

/// Bus that records every outbound message. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingBus {
    sent: Rc<RefCell<Vec<BusMessage>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        self.sent.borrow().clone()
    }

    /// Completed unlock requests (display-on followed by unlocked).
    pub fn unlock_requests(&self) -> usize {
        self.sent
            .borrow()
            .windows(2)
            .filter(|pair| *pair == [BusMessage::DisplayOn, BusMessage::TklockUnlocked])
            .count()
    }

    pub fn forwarded_keys(&self) -> Vec<(u32, u32)> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|message| match message {
                BusMessage::MmKeyPress {
                    hardware_keycode,
                    keyval,
                } => Some((*hardware_keycode, *keyval)),
                _ => None,
            })
            .collect()
    }
}

impl SystemBus for RecordingBus {
    fn request_display_on(&mut self) {
        self.sent.borrow_mut().push(BusMessage::DisplayOn);
    }

    fn request_tklock_unlocked(&mut self) {
        self.sent.borrow_mut().push(BusMessage::TklockUnlocked);
    }

    fn send_mm_key_press(&mut self, hardware_keycode: u32, keyval: u32) {
        self.sent.borrow_mut().push(BusMessage::MmKeyPress {
            hardware_keycode,
            keyval,
        });
    }
}
