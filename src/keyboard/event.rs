//! Key events decoded from the kernel event stream

use evdev::{EventType, InputEvent, InputEventKind, Key};

/// Kernel value of an EV_KEY event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    /// Key was released (value 0)
    Release,
    /// Key was pressed down (value 1)
    Press,
    /// Kernel autorepeat while held (value 2)
    Repeat,
}

impl KeyAction {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Release),
            1 => Some(Self::Press),
            2 => Some(Self::Repeat),
            _ => None,
        }
    }

    pub fn from_pressed(pressed: bool) -> Self {
        if pressed {
            Self::Press
        } else {
            Self::Release
        }
    }

    pub fn value(self) -> i32 {
        match self {
            Self::Release => 0,
            Self::Press => 1,
            Self::Repeat => 2,
        }
    }

    /// Whether the key is down after this event
    pub fn is_down(self) -> bool {
        !matches!(self, Self::Release)
    }
}

/// A single key-state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn new(key: Key, action: KeyAction) -> Self {
        Self { key, action }
    }

    pub fn press(key: Key) -> Self {
        Self::new(key, KeyAction::Press)
    }

    pub fn release(key: Key) -> Self {
        Self::new(key, KeyAction::Release)
    }

    /// Decode a raw kernel event. Anything that isn't EV_KEY (including the
    /// device's own SYN_REPORT markers) yields `None`.
    pub fn from_input(event: &InputEvent) -> Option<Self> {
        match event.kind() {
            InputEventKind::Key(key) => {
                KeyAction::from_value(event.value()).map(|action| Self::new(key, action))
            }
            _ => None,
        }
    }

    /// Raw kernel event for this change, without a sync marker
    pub fn to_input(self) -> InputEvent {
        InputEvent::new(EventType::KEY, self.key.code(), self.action.value())
    }
}
