//! Daemon-level error kinds
//!
//! Per-record protocol problems live in [`crate::protocol::ProtocolError`]
//! and never reach this type; they are logged and the session carries on.

use crate::config::ConfigError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Nothing on the system looks like a keyboard
    #[error("No keyboards found")]
    NoKeyboardFound,

    /// The grabbed keyboard stopped delivering events
    #[error("Keyboard {} was lost: {source}", .path.display())]
    DeviceLost {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The rendezvous socket could not be created
    #[error("Cannot bind socket {}: {source}", .path.display())]
    SocketBindFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Opening, grabbing, or cloning an input device failed
    #[error("Input device {}: {source}", .path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Failure to find, open, grab, or clone a keyboard
    pub fn is_device_error(&self) -> bool {
        matches!(self, DaemonError::NoKeyboardFound | DaemonError::Device { .. })
    }

    pub(crate) fn device(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DaemonError::Device {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
