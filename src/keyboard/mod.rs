//! Keyboard catalog, events, state, and device discovery

mod event;
mod state;
pub mod keymap;
pub mod locator;

pub use event::{KeyAction, KeyEvent};
pub use state::{is_modifier, KeyboardState, MODIFIER_KEYS};
pub use keymap::{CatalogError, KeyId, KeyInfo, CATALOG};
pub use locator::{find_keyboard, is_keyboard, KeyboardDevice};
