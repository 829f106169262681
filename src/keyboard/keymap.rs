//! Key catalog: the wire key-id space and its mapping to evdev keys
//!
//! A key-id is the index of an entry in [`CATALOG`]. The client library
//! keeps an identical table, so entries may only ever be appended; moving
//! or removing one silently changes what every id on the wire means.
//!
//! For the first 128 entries the index equals the kernel scancode, which is
//! what lets the daemon and client agree without negotiating anything.

use evdev::Key;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// A key-id as carried by the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub u16);

impl KeyId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// The evdev key this id stands for
    pub fn key(self) -> Result<Key, CatalogError> {
        key_of(self)
    }
}

impl From<u16> for KeyId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown key-id {0}")]
    UnknownKey(u16),
    #[error("key {0:?} has no key-id")]
    UnmappedKey(Key),
    #[error("unknown key name {0:?}")]
    UnknownName(String),
}

/// One catalog entry
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    /// Name used by the client library
    pub name: &'static str,
    /// Platform key identifier
    pub key: Key,
}

impl KeyInfo {
    const fn new(name: &'static str, key: Key) -> Self {
        Self { name, key }
    }
}

/// The catalog table, indexed by key-id. Append only.
pub static CATALOG: [KeyInfo; 128] = [
    KeyInfo::new("Reserved", Key::KEY_RESERVED),
    // Main block
    KeyInfo::new("Escape", Key::KEY_ESC),
    KeyInfo::new("1", Key::KEY_1),
    KeyInfo::new("2", Key::KEY_2),
    KeyInfo::new("3", Key::KEY_3),
    KeyInfo::new("4", Key::KEY_4),
    KeyInfo::new("5", Key::KEY_5),
    KeyInfo::new("6", Key::KEY_6),
    KeyInfo::new("7", Key::KEY_7),
    KeyInfo::new("8", Key::KEY_8),
    KeyInfo::new("9", Key::KEY_9),
    KeyInfo::new("0", Key::KEY_0),
    KeyInfo::new("-", Key::KEY_MINUS),
    KeyInfo::new("=", Key::KEY_EQUAL),
    KeyInfo::new("BackSpace", Key::KEY_BACKSPACE),
    KeyInfo::new("Tab", Key::KEY_TAB),
    KeyInfo::new("q", Key::KEY_Q),
    KeyInfo::new("w", Key::KEY_W),
    KeyInfo::new("e", Key::KEY_E),
    KeyInfo::new("r", Key::KEY_R),
    KeyInfo::new("t", Key::KEY_T),
    KeyInfo::new("y", Key::KEY_Y),
    KeyInfo::new("u", Key::KEY_U),
    KeyInfo::new("i", Key::KEY_I),
    KeyInfo::new("o", Key::KEY_O),
    KeyInfo::new("p", Key::KEY_P),
    KeyInfo::new("[", Key::KEY_LEFTBRACE),
    KeyInfo::new("]", Key::KEY_RIGHTBRACE),
    KeyInfo::new("Return", Key::KEY_ENTER),
    KeyInfo::new("control_l", Key::KEY_LEFTCTRL),
    KeyInfo::new("a", Key::KEY_A),
    KeyInfo::new("s", Key::KEY_S),
    KeyInfo::new("d", Key::KEY_D),
    KeyInfo::new("f", Key::KEY_F),
    KeyInfo::new("g", Key::KEY_G),
    KeyInfo::new("h", Key::KEY_H),
    KeyInfo::new("j", Key::KEY_J),
    KeyInfo::new("k", Key::KEY_K),
    KeyInfo::new("l", Key::KEY_L),
    KeyInfo::new(";", Key::KEY_SEMICOLON),
    KeyInfo::new("'", Key::KEY_APOSTROPHE),
    KeyInfo::new("`", Key::KEY_GRAVE),
    KeyInfo::new("shift_l", Key::KEY_LEFTSHIFT),
    KeyInfo::new("\\", Key::KEY_BACKSLASH),
    KeyInfo::new("z", Key::KEY_Z),
    KeyInfo::new("x", Key::KEY_X),
    KeyInfo::new("c", Key::KEY_C),
    KeyInfo::new("v", Key::KEY_V),
    KeyInfo::new("b", Key::KEY_B),
    KeyInfo::new("n", Key::KEY_N),
    KeyInfo::new("m", Key::KEY_M),
    KeyInfo::new(",", Key::KEY_COMMA),
    KeyInfo::new(".", Key::KEY_DOT),
    KeyInfo::new("/", Key::KEY_SLASH),
    KeyInfo::new("shift_r", Key::KEY_RIGHTSHIFT),
    KeyInfo::new("_*", Key::KEY_KPASTERISK),
    KeyInfo::new("alt_l", Key::KEY_LEFTALT),
    KeyInfo::new("space", Key::KEY_SPACE),
    KeyInfo::new("CapsLock", Key::KEY_CAPSLOCK),
    // Function row
    KeyInfo::new("F1", Key::KEY_F1),
    KeyInfo::new("F2", Key::KEY_F2),
    KeyInfo::new("F3", Key::KEY_F3),
    KeyInfo::new("F4", Key::KEY_F4),
    KeyInfo::new("F5", Key::KEY_F5),
    KeyInfo::new("F6", Key::KEY_F6),
    KeyInfo::new("F7", Key::KEY_F7),
    KeyInfo::new("F8", Key::KEY_F8),
    KeyInfo::new("F9", Key::KEY_F9),
    KeyInfo::new("F10", Key::KEY_F10),
    KeyInfo::new("NumLock", Key::KEY_NUMLOCK),
    KeyInfo::new("ScrollLock", Key::KEY_SCROLLLOCK),
    // Keypad
    KeyInfo::new("_7", Key::KEY_KP7),
    KeyInfo::new("_8", Key::KEY_KP8),
    KeyInfo::new("_9", Key::KEY_KP9),
    KeyInfo::new("_-", Key::KEY_KPMINUS),
    KeyInfo::new("_4", Key::KEY_KP4),
    KeyInfo::new("_5", Key::KEY_KP5),
    KeyInfo::new("_6", Key::KEY_KP6),
    KeyInfo::new("_+", Key::KEY_KPPLUS),
    KeyInfo::new("_1", Key::KEY_KP1),
    KeyInfo::new("_2", Key::KEY_KP2),
    KeyInfo::new("_3", Key::KEY_KP3),
    KeyInfo::new("_0", Key::KEY_KP0),
    KeyInfo::new("_.", Key::KEY_KPDOT),
    // Unassigned scancode 84
    KeyInfo::new("_", Key::new(84)),
    // International and extended keys
    KeyInfo::new("ZenkakuHankaku", Key::KEY_ZENKAKUHANKAKU),
    KeyInfo::new("102nd", Key::KEY_102ND),
    KeyInfo::new("F11", Key::KEY_F11),
    KeyInfo::new("F12", Key::KEY_F12),
    KeyInfo::new("RO", Key::KEY_RO),
    KeyInfo::new("Katakana", Key::KEY_KATAKANA),
    KeyInfo::new("Hiragana", Key::KEY_HIRAGANA),
    KeyInfo::new("Henkan", Key::KEY_HENKAN),
    KeyInfo::new("KatakanaHiragana", Key::KEY_KATAKANAHIRAGANA),
    KeyInfo::new("Muhenkan", Key::KEY_MUHENKAN),
    KeyInfo::new("_JP,", Key::KEY_KPJPCOMMA),
    KeyInfo::new("_Return", Key::KEY_KPENTER),
    KeyInfo::new("control_r", Key::KEY_RIGHTCTRL),
    KeyInfo::new("_/", Key::KEY_KPSLASH),
    KeyInfo::new("SysRq", Key::KEY_SYSRQ),
    KeyInfo::new("alt_r", Key::KEY_RIGHTALT),
    KeyInfo::new("LineFeed", Key::KEY_LINEFEED),
    // Navigation cluster
    KeyInfo::new("Home", Key::KEY_HOME),
    KeyInfo::new("Up", Key::KEY_UP),
    KeyInfo::new("PageUp", Key::KEY_PAGEUP),
    KeyInfo::new("Left", Key::KEY_LEFT),
    KeyInfo::new("Right", Key::KEY_RIGHT),
    KeyInfo::new("End", Key::KEY_END),
    KeyInfo::new("Down", Key::KEY_DOWN),
    KeyInfo::new("PageDown", Key::KEY_PAGEDOWN),
    KeyInfo::new("Insert", Key::KEY_INSERT),
    KeyInfo::new("Delete", Key::KEY_DELETE),
    KeyInfo::new("Macro", Key::KEY_MACRO),
    // Media and misc
    KeyInfo::new("Mute", Key::KEY_MUTE),
    KeyInfo::new("VolumeDown", Key::KEY_VOLUMEDOWN),
    KeyInfo::new("VolumeUp", Key::KEY_VOLUMEUP),
    KeyInfo::new("Power", Key::KEY_POWER),
    KeyInfo::new("_=", Key::KEY_KPEQUAL),
    KeyInfo::new("_+/-", Key::KEY_KPPLUSMINUS),
    KeyInfo::new("Pause", Key::KEY_PAUSE),
    KeyInfo::new("Scale", Key::KEY_SCALE),
    KeyInfo::new("_,", Key::KEY_KPCOMMA),
    KeyInfo::new("Hangeul", Key::KEY_HANGEUL),
    KeyInfo::new("Hanja", Key::KEY_HANJA),
    KeyInfo::new("Yen", Key::KEY_YEN),
    KeyInfo::new("super_l", Key::KEY_LEFTMETA),
    KeyInfo::new("super_r", Key::KEY_RIGHTMETA),
    KeyInfo::new("Compose", Key::KEY_COMPOSE),
];

static BY_KEY: LazyLock<HashMap<Key, KeyId>> = LazyLock::new(|| {
    CATALOG
        .iter()
        .enumerate()
        .map(|(id, info)| (info.key, KeyId(id as u16)))
        .collect()
});

static BY_NAME: LazyLock<HashMap<&'static str, KeyId>> = LazyLock::new(|| {
    CATALOG
        .iter()
        .enumerate()
        .map(|(id, info)| (info.name, KeyId(id as u16)))
        .collect()
});

/// Number of key-ids in the catalog
pub fn len() -> usize {
    CATALOG.len()
}

/// Look up the catalog entry for a key-id
pub fn info(id: KeyId) -> Result<&'static KeyInfo, CatalogError> {
    CATALOG
        .get(id.0 as usize)
        .ok_or(CatalogError::UnknownKey(id.0))
}

/// key-id -> evdev key
pub fn key_of(id: KeyId) -> Result<Key, CatalogError> {
    info(id).map(|info| info.key)
}

/// evdev key -> key-id
pub fn id_of(key: Key) -> Result<KeyId, CatalogError> {
    BY_KEY.get(&key).copied().ok_or(CatalogError::UnmappedKey(key))
}

/// key-id -> client-side name
pub fn name_of(id: KeyId) -> Result<&'static str, CatalogError> {
    info(id).map(|info| info.name)
}

/// Client-side name -> key-id
pub fn id_by_name(name: &str) -> Result<KeyId, CatalogError> {
    BY_NAME
        .get(name)
        .copied()
        .ok_or_else(|| CatalogError::UnknownName(name.to_string()))
}
