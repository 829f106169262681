//! Daemon wiring: shared context, startup, supervision, shutdown
//!
//! Three threads share one [`Context`]:
//! - the hardware loop (on the caller's thread) reads the grabbed keyboard;
//! - the protocol server serves one client at a time;
//! - the notifier writes diversion records to that client.
//!
//! The output guard is the only lock the two event paths contend on.

use crate::config::{Config, PolicyConfig};
use crate::error::{DaemonError, Result};
use crate::hardware::{self, EventPump, Router};
use crate::keyboard::{locator, KeyboardDevice};
use crate::output::{KeySink, OutputGuard, VirtualKeyboard};
use crate::server::{self, ClientLink, Notifier, Server, SessionPolicy};
use crate::suppression::SuppressionSet;
use log::{error, info, warn};
use std::fs;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// State shared by the hardware loop, the server, and the notifier
pub struct Context<S> {
    pub suppression: SuppressionSet,
    pub output: OutputGuard<S>,
    pub client: Arc<ClientLink>,
}

impl<S: KeySink> Context<S> {
    pub fn new() -> Self {
        Self {
            suppression: SuppressionSet::new(),
            output: OutputGuard::new(),
            client: Arc::new(ClientLink::new()),
        }
    }
}

impl<S: KeySink> Default for Context<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// How the client reaches the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Unix socket at the configured path, one client at a time
    Socket,
    /// A single session over stdin/stdout; the daemon stops when stdin closes
    Stdio,
}

pub struct Daemon {
    config: Config,
    ctx: Arc<Context<VirtualKeyboard>>,
    stop: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ctx: Arc::new(Context::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends the daemon when set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until stopped or a fatal error occurs.
    ///
    /// The keyboard grab is released before this returns, on every path.
    pub fn run(self, transport: Transport) -> Result<()> {
        let (notifier, _) = server::spawn_notifier(Arc::clone(&self.ctx.client))?;

        let policy = SessionPolicy {
            reset_suppression_on_disconnect: self.config.policy.reset_suppression_on_disconnect,
        };
        let server = Server::new(Arc::clone(&self.ctx), policy);

        match transport {
            Transport::Socket => {
                let listener =
                    server::bind(&self.config.daemon.socket_path, self.config.daemon.socket_mode)?;
                thread::Builder::new()
                    .name("protocol".into())
                    .spawn(move || server.run(&listener))?;
            }
            Transport::Stdio => {
                let stop = Arc::clone(&self.stop);
                thread::Builder::new()
                    .name("protocol".into())
                    .spawn(move || {
                        server.serve(BufReader::new(io::stdin().lock()), io::stdout());
                        info!("stdin closed, shutting down");
                        stop.store(true, Ordering::Relaxed);
                    })?;
            }
        }

        let result = self.run_hardware(notifier);

        if transport == Transport::Socket {
            let path = &self.config.daemon.socket_path;
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
        result
    }

    /// Starting -> Running -> ShuttingDown, repeated after device loss
    fn run_hardware(&self, notifier: Notifier) -> Result<()> {
        let mut restarting = false;

        loop {
            if !sleep_unless_stopped(&self.stop, self.config.startup_delay()) {
                return Ok(());
            }

            let (mut keyboard, virtual_keyboard) = match self.start() {
                Ok(started) => started,
                Err(e) if should_restart(&e, restarting, &self.config.policy) => {
                    warn!("{}, retrying in {:?}", e, self.config.rescan_interval());
                    if !sleep_unless_stopped(&self.stop, self.config.rescan_interval()) {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.ctx.output.install(virtual_keyboard);

            let router = Router::new(self.config.policy.modifier_passthrough);
            let mut pump = EventPump::new(&self.ctx, router, notifier.clone());
            let result = hardware::run(&mut keyboard, &mut pump, &self.stop);

            // ShuttingDown: ungrab first, then destroy the virtual device
            drop(keyboard);
            self.ctx.output.remove();

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("{}", e);
                    if !should_restart(&e, restarting, &self.config.policy) {
                        return Err(e);
                    }
                    info!("Restarting");
                    restarting = true;
                }
            }
        }
    }

    /// Grab the keyboard and build its virtual clone
    fn start(&self) -> Result<(KeyboardDevice, VirtualKeyboard)> {
        let keyboard = self.acquire()?;
        let virtual_keyboard =
            VirtualKeyboard::from_device(keyboard.device(), &self.config.daemon.virtual_device_name)
                .map_err(|e| DaemonError::device(keyboard.path(), e))?;
        Ok((keyboard, virtual_keyboard))
    }

    fn acquire(&self) -> Result<KeyboardDevice> {
        let path = match &self.config.daemon.device_path {
            Some(path) => path.clone(),
            None => locator::find_keyboard(&self.config.daemon.virtual_device_name)?,
        };
        KeyboardDevice::acquire(&path)
    }
}

/// Whether supervision goes back to Starting after `err`.
///
/// Losing the keyboard restarts when the policy allows it. Once restarting,
/// failing to find, open, grab, or clone a keyboard is retried as well; on
/// the first start those failures are fatal.
pub fn should_restart(err: &DaemonError, restarting: bool, policy: &PolicyConfig) -> bool {
    if !policy.restart_on_device_loss {
        return false;
    }
    match err {
        DaemonError::DeviceLost { .. } => true,
        e => restarting && e.is_device_error(),
    }
}

/// Sleep for `duration`, waking early if `stop` is set.
///
/// Returns false when stopped.
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    const STEP: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(STEP.min(deadline - now));
    }
}
