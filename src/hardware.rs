//! Hardware event loop
//!
//! Reads the grabbed keyboard and sends every key change to exactly one
//! place: the virtual keyboard, or (for suppressed keys) the client. Events
//! are handled strictly in arrival order. The device's own SYN_REPORTs are
//! dropped; each forwarded change gets its own sync frame from the output.

use crate::daemon::Context;
use crate::error::{DaemonError, Result};
use crate::keyboard::{keymap, KeyAction, KeyEvent, KeyboardDevice, KeyboardState};
use crate::output::KeySink;
use crate::protocol::Notification;
use crate::server::Notifier;
use crate::suppression::SuppressionSet;
use evdev::InputEvent;
use log::{debug, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// How long one wait for input may last before the stop flag is rechecked
const POLL_INTERVAL_MS: u16 = 100;

/// Where a physical key change goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Replay on the virtual keyboard
    Forward(KeyEvent),
    /// Report to the client instead
    Divert(Notification),
}

/// Per-event forwarding decision
#[derive(Debug, Default)]
pub struct Router {
    state: KeyboardState,
    modifier_passthrough: bool,
}

impl Router {
    pub fn new(modifier_passthrough: bool) -> Self {
        Self {
            state: KeyboardState::new(),
            modifier_passthrough,
        }
    }

    pub fn route(&mut self, event: KeyEvent, suppressed: &SuppressionSet) -> Route {
        let modifier_held = self.state.any_modifier_held();
        self.state.process_event(&event);

        // A passed-through press keeps its repeats and release on the output,
        // whatever the set says now
        if self.state.take_passed_through(&event) {
            return Route::Forward(event);
        }

        // Keys outside the catalog can never be suppressed
        let id = match keymap::id_of(event.key) {
            Ok(id) if suppressed.contains(id) => id,
            _ => return Route::Forward(event),
        };

        if self.modifier_passthrough {
            if event.action == KeyAction::Press && modifier_held {
                self.state.mark_passed_through(event.key);
                return Route::Forward(event);
            }
        }

        Route::Divert(Notification::from_action(id, event.action))
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

/// Applies routing decisions to the shared output and the notifier channel
pub struct EventPump<'a, S> {
    ctx: &'a Context<S>,
    router: Router,
    notifier: Notifier,
}

impl<'a, S: KeySink> EventPump<'a, S> {
    pub fn new(ctx: &'a Context<S>, router: Router, notifier: Notifier) -> Self {
        Self {
            ctx,
            router,
            notifier,
        }
    }

    /// Handle one raw kernel event; non-key events are ignored
    pub fn handle_input(&mut self, raw: &InputEvent) {
        if let Some(event) = KeyEvent::from_input(raw) {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: KeyEvent) {
        match self.router.route(event, &self.ctx.suppression) {
            Route::Forward(event) => {
                debug!("Forwarding {:?} {:?}", event.key, event.action);
                if let Err(e) = self.ctx.output.send(event) {
                    warn!("Dropped {:?} {:?}: {}", event.key, event.action, e);
                }
            }
            Route::Divert(notification) => {
                debug!("Diverting {}", notification);
                // Never blocks; the notifier thread owns the socket write
                if !self.notifier.notify(notification) {
                    warn!("Notifier queue unavailable, dropping {}", notification);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.router.reset();
    }
}

/// Something the hardware loop can wait on and drain
pub trait EventSource: AsRawFd {
    /// Device node, for error reports
    fn path(&self) -> &Path;

    /// Hand every pending event to `handle`. Called only after the fd
    /// polled readable.
    fn read_events(&mut self, handle: &mut dyn FnMut(&InputEvent)) -> io::Result<()>;
}

impl EventSource for KeyboardDevice {
    fn path(&self) -> &Path {
        KeyboardDevice::path(self)
    }

    fn read_events(&mut self, handle: &mut dyn FnMut(&InputEvent)) -> io::Result<()> {
        for raw in self.device_mut().fetch_events()? {
            handle(&raw);
        }
        Ok(())
    }
}

/// Pump events from `source` until `stop` is set or the device fails.
///
/// Returns `Ok(())` on stop and `DeviceLost` when reading fails.
pub fn run<D: EventSource, S: KeySink>(
    source: &mut D,
    pump: &mut EventPump<'_, S>,
    stop: &AtomicBool,
) -> Result<()> {
    let lost = |path: &Path, err: io::Error| DaemonError::DeviceLost {
        path: path.to_path_buf(),
        source: err,
    };

    while !stop.load(Ordering::Relaxed) {
        let fd = source.as_raw_fd();
        // SAFETY: fd is owned by `source`, which outlives this poll call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(lost(source.path(), io::Error::from(e))),
        }

        match source.read_events(&mut |raw: &InputEvent| pump.handle_input(raw)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(lost(source.path(), e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KeyId;
    use evdev::Key;
    use std::io::{Read, Write};
    use std::os::unix::io::RawFd;
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use crate::server;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn suppressing(ids: &[u16]) -> SuppressionSet {
        let set = SuppressionSet::new();
        set.replace(ids.iter().copied().map(KeyId));
        set
    }

    #[test]
    fn unsuppressed_keys_are_forwarded() {
        let set = suppressing(&[5, 9]);
        let mut router = Router::new(false);
        let press = KeyEvent::press(Key::new(7));
        assert_eq!(router.route(press, &set), Route::Forward(press));
    }

    #[test]
    fn suppressed_keys_are_diverted() {
        let set = suppressing(&[5, 9]);
        let mut router = Router::new(false);
        assert_eq!(
            router.route(KeyEvent::press(Key::new(5)), &set),
            Route::Divert(Notification::KeyDown(KeyId(5)))
        );
        assert_eq!(
            router.route(KeyEvent::release(Key::new(5)), &set),
            Route::Divert(Notification::KeyUp(KeyId(5)))
        );
    }

    #[test]
    fn repeats_of_suppressed_keys_report_key_down() {
        let set = suppressing(&[30]);
        let mut router = Router::new(false);
        let repeat = KeyEvent::new(Key::KEY_A, KeyAction::Repeat);
        assert_eq!(
            router.route(repeat, &set),
            Route::Divert(Notification::KeyDown(KeyId(30)))
        );
    }

    #[test]
    fn keys_outside_catalog_always_forward() {
        let set = suppressing(&[5]);
        let mut router = Router::new(false);
        let f13 = KeyEvent::press(Key::KEY_F13);
        assert_eq!(router.route(f13, &set), Route::Forward(f13));
    }

    #[test]
    fn modifiers_ignored_without_passthrough() {
        let set = suppressing(&[31]);
        let mut router = Router::new(false);
        router.route(KeyEvent::press(Key::KEY_LEFTCTRL), &set);
        assert!(matches!(
            router.route(KeyEvent::press(Key::KEY_S), &set),
            Route::Divert(_)
        ));
    }

    #[test]
    fn modifier_passthrough_forwards_whole_press() {
        let set = suppressing(&[31]);
        let mut router = Router::new(true);

        let ctrl = KeyEvent::press(Key::KEY_LEFTCTRL);
        assert_eq!(router.route(ctrl, &set), Route::Forward(ctrl));

        let s_down = KeyEvent::press(Key::KEY_S);
        assert_eq!(router.route(s_down, &set), Route::Forward(s_down));

        // Ctrl released before S: S's release must follow its press
        router.route(KeyEvent::release(Key::KEY_LEFTCTRL), &set);
        let s_up = KeyEvent::release(Key::KEY_S);
        assert_eq!(router.route(s_up, &set), Route::Forward(s_up));

        // Next plain press is diverted again
        assert_eq!(
            router.route(KeyEvent::press(Key::KEY_S), &set),
            Route::Divert(Notification::KeyDown(KeyId(31)))
        );
    }

    #[test]
    fn passthrough_mark_cleared_when_set_changes_mid_press() {
        let set = suppressing(&[31]);
        let mut router = Router::new(true);

        router.route(KeyEvent::press(Key::KEY_LEFTCTRL), &set);
        let s_down = KeyEvent::press(Key::KEY_S);
        assert_eq!(router.route(s_down, &set), Route::Forward(s_down));

        set.clear();
        router.route(KeyEvent::release(Key::KEY_S), &set);
        router.route(KeyEvent::release(Key::KEY_LEFTCTRL), &set);

        set.replace([KeyId(31)]);
        assert_eq!(
            router.route(KeyEvent::press(Key::KEY_S), &set),
            Route::Divert(Notification::KeyDown(KeyId(31)))
        );
    }

    #[test]
    fn suppressed_modifier_does_not_pass_itself_through() {
        let set = suppressing(&[42]);
        let mut router = Router::new(true);
        assert_eq!(
            router.route(KeyEvent::press(Key::KEY_LEFTSHIFT), &set),
            Route::Divert(Notification::KeyDown(KeyId(42)))
        );
    }

    #[test]
    fn set_replacement_applies_to_next_event() {
        let set = suppressing(&[]);
        let mut router = Router::new(false);
        let down = KeyEvent::press(Key::new(5));
        assert_eq!(router.route(down, &set), Route::Forward(down));

        set.replace([KeyId(5)]);
        assert_eq!(
            router.route(KeyEvent::release(Key::new(5)), &set),
            Route::Divert(Notification::KeyUp(KeyId(5)))
        );
    }

    /// Socket-backed device: each byte from the peer is a press of that code
    struct FakeDevice {
        stream: UnixStream,
        path: PathBuf,
    }

    impl AsRawFd for FakeDevice {
        fn as_raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }
    }

    impl EventSource for FakeDevice {
        fn path(&self) -> &Path {
            &self.path
        }

        fn read_events(&mut self, handle: &mut dyn FnMut(&InputEvent)) -> io::Result<()> {
            let mut buf = [0u8; 64];
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                // ENODEV, as an unplugged keyboard reports
                return Err(io::Error::from_raw_os_error(19));
            }
            for &code in &buf[..n] {
                handle(&KeyEvent::press(Key::new(code.into())).to_input());
            }
            Ok(())
        }
    }

    fn fake_device() -> (FakeDevice, UnixStream) {
        let (stream, peer) = UnixStream::pair().unwrap();
        let device = FakeDevice {
            stream,
            path: PathBuf::from("/dev/input/event-fake"),
        };
        (device, peer)
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<KeyEvent>>>);

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl KeySink for Recorder {
        fn write_key(&mut self, event: KeyEvent) -> io::Result<()> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[test]
    fn run_returns_ok_once_stopped() {
        let ctx: Context<Recorder> = Context::new();
        let (notifier, _handle) = server::spawn_notifier(Arc::clone(&ctx.client)).unwrap();
        let mut pump = EventPump::new(&ctx, Router::new(false), notifier);
        let (mut device, _peer) = fake_device();

        let stop = Arc::new(AtomicBool::new(false));
        let setter = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                stop.store(true, Ordering::Relaxed);
            })
        };

        let start = Instant::now();
        assert!(run(&mut device, &mut pump, &stop).is_ok());
        assert!(start.elapsed() < Duration::from_secs(2));
        setter.join().unwrap();
    }

    #[test]
    fn run_routes_events_then_reports_lost_device() {
        let ctx: Context<Recorder> = Context::new();
        let output = Recorder::default();
        ctx.output.install(output.clone());
        ctx.suppression.replace([KeyId(31)]);

        let client = SharedBuf::default();
        ctx.client.attach(client.clone());
        let (notifier, handle) = server::spawn_notifier(Arc::clone(&ctx.client)).unwrap();
        let mut pump = EventPump::new(&ctx, Router::new(false), notifier);
        let (mut device, mut peer) = fake_device();

        peer.write_all(&[30, 31]).unwrap();
        drop(peer);

        let stop = AtomicBool::new(false);
        match run(&mut device, &mut pump, &stop) {
            Err(DaemonError::DeviceLost { path, .. }) => {
                assert_eq!(path, PathBuf::from("/dev/input/event-fake"))
            }
            other => panic!("expected DeviceLost, got {:?}", other),
        }

        assert_eq!(*output.0.lock().unwrap(), vec![KeyEvent::press(Key::KEY_A)]);

        // Dropping the pump drops the last notifier handle
        drop(pump);
        handle.join().unwrap();
        assert_eq!(&*client.0.lock().unwrap(), b"d31\n");
    }
}
