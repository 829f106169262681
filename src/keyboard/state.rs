//! Held-key bookkeeping for the hardware loop

use super::{KeyAction, KeyEvent};
use evdev::Key;
use std::collections::HashSet;

/// Keys that count as modifiers for pass-through purposes
pub const MODIFIER_KEYS: [Key; 8] = [
    Key::KEY_LEFTSHIFT,
    Key::KEY_RIGHTSHIFT,
    Key::KEY_LEFTCTRL,
    Key::KEY_RIGHTCTRL,
    Key::KEY_LEFTALT,
    Key::KEY_RIGHTALT,
    Key::KEY_LEFTMETA,
    Key::KEY_RIGHTMETA,
];

pub fn is_modifier(key: Key) -> bool {
    MODIFIER_KEYS.contains(&key)
}

/// Physical key state as seen by the hardware loop
#[derive(Debug, Default)]
pub struct KeyboardState {
    /// Modifiers currently held on the physical device
    held_modifiers: HashSet<Key>,
    /// Suppressed keys whose press was let through because a modifier was held
    passed_through: HashSet<Key>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update modifier state from a physical event
    pub fn process_event(&mut self, event: &KeyEvent) {
        if !is_modifier(event.key) {
            return;
        }
        match event.action {
            KeyAction::Press | KeyAction::Repeat => {
                self.held_modifiers.insert(event.key);
            }
            KeyAction::Release => {
                self.held_modifiers.remove(&event.key);
            }
        }
    }

    pub fn any_modifier_held(&self) -> bool {
        !self.held_modifiers.is_empty()
    }

    /// Remember that this key's press went to the virtual device
    pub fn mark_passed_through(&mut self, key: Key) {
        self.passed_through.insert(key);
    }

    /// Whether the key's press was passed through. A release clears the mark.
    pub fn take_passed_through(&mut self, event: &KeyEvent) -> bool {
        match event.action {
            KeyAction::Release => self.passed_through.remove(&event.key),
            _ => self.passed_through.contains(&event.key),
        }
    }

    pub fn reset(&mut self) {
        self.held_modifiers.clear();
        self.passed_through.clear();
    }
}
