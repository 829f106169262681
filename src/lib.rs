//! evdev-keyd - keyboard diversion daemon
//!
//! Grabs a physical keyboard, replays it through a uinput clone, and hands
//! a client-chosen subset of keys to that client over a line protocol. The
//! client can also inject key presses through the same virtual keyboard.

pub mod config;
pub mod daemon;
pub mod error;
pub mod hardware;
pub mod keyboard;
pub mod output;
pub mod protocol;
pub mod server;
pub mod suppression;

pub use config::Config;
pub use daemon::{Context, Daemon, Transport};
pub use error::DaemonError;
