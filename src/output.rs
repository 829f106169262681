//! Virtual output keyboard and the guard serialising writes to it
//!
//! Both the hardware loop and the protocol server write here. Every write is
//! one key change plus its SYN_REPORT, done under a single lock so a reader
//! of the virtual device never sees two changes inside one sync frame.

use crate::keyboard::{keymap, CatalogError, KeyAction, KeyEvent, KeyId};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, Device, UinputAbsSetup};
use log::info;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    /// No virtual device exists right now (startup, or the keyboard was lost)
    #[error("Virtual keyboard is not available")]
    Unavailable,
    #[error(transparent)]
    UnknownKey(#[from] CatalogError),
    #[error("Virtual keyboard write failed: {0}")]
    Io(#[from] io::Error),
}

/// Something that accepts key changes, one sync frame each
pub trait KeySink: Send {
    /// Write `event` followed by a SYN_REPORT
    fn write_key(&mut self, event: KeyEvent) -> io::Result<()>;
}

/// uinput device cloned from a physical keyboard
pub struct VirtualKeyboard {
    device: VirtualDevice,
}

impl VirtualKeyboard {
    /// Create a virtual device with the same capabilities as `source`.
    ///
    /// Keys, axes, switches, misc events and properties are copied. LEDs are
    /// not: uinput in evdev 0.12 has no way to declare them, so lock-state
    /// lights stay on the physical keyboard.
    pub fn from_device(source: &Device, name: &str) -> io::Result<Self> {
        let mut builder = VirtualDeviceBuilder::new()?
            .name(name)
            .input_id(source.input_id())
            .with_properties(source.properties())?;

        if let Some(keys) = source.supported_keys() {
            builder = builder.with_keys(keys)?;
        }
        if let Some(axes) = source.supported_absolute_axes() {
            let state = source.get_abs_state()?;
            for axis in axes.iter() {
                let info = &state[axis.0 as usize];
                let absinfo = AbsInfo::new(
                    info.value,
                    info.minimum,
                    info.maximum,
                    info.fuzz,
                    info.flat,
                    info.resolution,
                );
                builder = builder.with_absolute_axis(&UinputAbsSetup::new(axis, absinfo))?;
            }
        }
        if let Some(axes) = source.supported_relative_axes() {
            builder = builder.with_relative_axes(axes)?;
        }
        if let Some(switches) = source.supported_switches() {
            builder = builder.with_switches(switches)?;
        }
        if let Some(misc) = source.misc_properties() {
            builder = builder.with_msc(misc)?;
        }

        let device = builder.build()?;
        info!("Created virtual keyboard {:?}", name);
        Ok(Self { device })
    }
}

impl KeySink for VirtualKeyboard {
    fn write_key(&mut self, event: KeyEvent) -> io::Result<()> {
        // emit() terminates the batch with SYN_REPORT in the same write
        self.device.emit(&[event.to_input()])
    }
}

/// Shared, lock-guarded slot for the current output sink
pub struct OutputGuard<S> {
    sink: Mutex<Option<S>>,
}

impl<S: KeySink> Default for OutputGuard<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: KeySink> OutputGuard<S> {
    /// An empty guard; writes fail with `Unavailable` until `install`
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    pub fn with_sink(sink: S) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Put a sink in place, returning the previous one
    pub fn install(&self, sink: S) -> Option<S> {
        self.lock().replace(sink)
    }

    /// Take the sink out; later writes fail with `Unavailable`
    pub fn remove(&self) -> Option<S> {
        self.lock().take()
    }

    pub fn is_available(&self) -> bool {
        self.lock().is_some()
    }

    /// Forward a key change unchanged
    pub fn send(&self, event: KeyEvent) -> Result<(), OutputError> {
        let mut slot = self.lock();
        let sink = slot.as_mut().ok_or(OutputError::Unavailable)?;
        sink.write_key(event)?;
        Ok(())
    }

    /// Press or release the key named by a catalog id
    pub fn emit(&self, id: KeyId, pressed: bool) -> Result<(), OutputError> {
        let key = keymap::key_of(id)?;
        self.send(KeyEvent::new(key, KeyAction::from_pressed(pressed)))
    }

    /// Run `f` against the sink while holding the guard
    pub fn with_sink_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    fn lock(&self) -> MutexGuard<'_, Option<S>> {
        // A panic mid-write leaves at worst a half-written frame; the slot is still valid
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::{AttributeSet, Key, MiscType};
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Written {
        Key(KeyEvent),
        Sync,
    }

    #[derive(Default)]
    struct Recorder {
        log: Vec<Written>,
    }

    impl KeySink for Recorder {
        fn write_key(&mut self, event: KeyEvent) -> io::Result<()> {
            self.log.push(Written::Key(event));
            thread::yield_now();
            self.log.push(Written::Sync);
            Ok(())
        }
    }

    #[test]
    fn emit_writes_key_then_sync() {
        let guard = OutputGuard::with_sink(Recorder::default());
        guard.emit(KeyId(42), true).unwrap();
        guard.emit(KeyId(42), false).unwrap();

        let log = guard.with_sink_mut(|r| r.log.clone()).unwrap();
        assert_eq!(
            log,
            vec![
                Written::Key(KeyEvent::press(Key::KEY_LEFTSHIFT)),
                Written::Sync,
                Written::Key(KeyEvent::release(Key::KEY_LEFTSHIFT)),
                Written::Sync,
            ]
        );
    }

    #[test]
    fn empty_guard_is_unavailable() {
        let guard: OutputGuard<Recorder> = OutputGuard::new();
        assert!(!guard.is_available());
        assert!(matches!(guard.emit(KeyId(30), true), Err(OutputError::Unavailable)));
    }

    #[test]
    fn unknown_key_is_rejected_before_writing() {
        let guard = OutputGuard::with_sink(Recorder::default());
        assert!(matches!(
            guard.emit(KeyId(999), true),
            Err(OutputError::UnknownKey(_))
        ));
        assert_eq!(guard.with_sink_mut(|r| r.log.len()), Some(0));
    }

    #[test]
    fn install_and_remove() {
        let guard = OutputGuard::new();
        assert!(guard.install(Recorder::default()).is_none());
        assert!(guard.is_available());
        assert!(guard.remove().is_some());
        assert!(guard.remove().is_none());
    }

    #[test]
    fn concurrent_writers_never_interleave_frames() {
        let guard = Arc::new(OutputGuard::with_sink(Recorder::default()));

        let handles: Vec<_> = [Key::KEY_A, Key::KEY_B]
            .into_iter()
            .map(|key| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || {
                    for i in 0..500 {
                        let action = KeyAction::from_pressed(i % 2 == 0);
                        guard.send(KeyEvent::new(key, action)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let log = guard.with_sink_mut(|r| r.log.clone()).unwrap();
        assert_eq!(log.len(), 2000);
        for frame in log.chunks(2) {
            assert!(matches!(frame[0], Written::Key(_)));
            assert_eq!(frame[1], Written::Sync);
        }

        // Per-key order survives
        for key in [Key::KEY_A, Key::KEY_B] {
            let actions: Vec<_> = log
                .iter()
                .filter_map(|w| match w {
                    Written::Key(e) if e.key == key => Some(e.action),
                    _ => None,
                })
                .collect();
            assert_eq!(actions.len(), 500);
            for (i, action) in actions.iter().enumerate() {
                assert_eq!(*action, KeyAction::from_pressed(i % 2 == 0));
            }
        }
    }

    fn dev_node(device: &mut VirtualDevice) -> std::path::PathBuf {
        device
            .enumerate_dev_nodes_blocking()
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
    }

    #[test]
    #[ignore = "needs write access to /dev/uinput"]
    fn clone_keeps_key_and_misc_capabilities() {
        let mut keys = AttributeSet::<Key>::new();
        keys.insert(Key::KEY_A);
        let mut misc = AttributeSet::<MiscType>::new();
        misc.insert(MiscType::MSC_SCAN);

        let mut source = VirtualDeviceBuilder::new()
            .unwrap()
            .name("evdev-keyd test source")
            .with_keys(&keys)
            .unwrap()
            .with_msc(&misc)
            .unwrap()
            .build()
            .unwrap();
        let source = Device::open(dev_node(&mut source)).unwrap();

        let mut clone = VirtualKeyboard::from_device(&source, "evdev-keyd test clone").unwrap();
        let cloned = Device::open(dev_node(&mut clone.device)).unwrap();

        assert!(cloned
            .supported_keys()
            .is_some_and(|k| k.contains(Key::KEY_A)));
        assert!(cloned
            .misc_properties()
            .is_some_and(|m| m.contains(MiscType::MSC_SCAN)));
    }
}
