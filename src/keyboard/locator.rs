//! Physical keyboard discovery and exclusive acquisition

use crate::error::{DaemonError, Result};
use evdev::{AttributeSetRef, Device, Key};
use log::{debug, info, warn};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Decide whether a device looks like a real keyboard.
///
/// It must report EV_KEY with KEY_A, and it must not be the virtual
/// device this daemon creates (a previous instance may have left one).
pub fn is_keyboard(name: Option<&str>, keys: Option<&AttributeSetRef<Key>>, own_name: &str) -> bool {
    if name == Some(own_name) {
        return false;
    }
    keys.map(|k| k.contains(Key::KEY_A)).unwrap_or(false)
}

/// Find the first keyboard on the system
pub fn find_keyboard(own_name: &str) -> Result<PathBuf> {
    for (path, dev) in evdev::enumerate() {
        let eligible = is_keyboard(dev.name(), dev.supported_keys(), own_name);
        debug!(
            "Considering {} ({}): {}",
            path.display(),
            dev.name().unwrap_or("unnamed"),
            if eligible { "keyboard" } else { "skipped" }
        );
        if eligible {
            return Ok(path);
        }
    }
    Err(DaemonError::NoKeyboardFound)
}

/// A physical keyboard held under an exclusive grab.
///
/// The grab is released when this value is dropped, on every exit path.
pub struct KeyboardDevice {
    path: PathBuf,
    device: Device,
}

impl KeyboardDevice {
    /// Open the device at `path` and grab it
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut device = Device::open(path).map_err(|e| DaemonError::device(path, e))?;
        device.grab().map_err(|e| DaemonError::device(path, e))?;
        info!(
            "Using device: {} {}",
            path.display(),
            device.name().unwrap_or("unnamed")
        );
        Ok(Self {
            path: path.to_path_buf(),
            device,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.device.name().unwrap_or("unnamed")
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }
}

impl AsRawFd for KeyboardDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl Drop for KeyboardDevice {
    fn drop(&mut self) {
        // Fails with ENODEV when the device was unplugged, which also ends the grab
        match self.device.ungrab() {
            Ok(()) => info!("Released {}", self.path.display()),
            Err(e) => warn!("Ungrab of {} failed: {}", self.path.display(), e),
        }
    }
}
