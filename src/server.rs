//! Protocol server loop and the client link
//!
//! One client at a time: connections are accepted and served sequentially,
//! so a second client waits in the listen backlog until the first closes.
//! Diversion records reach the client through a separate notifier thread
//! that owns every write to it; see [`spawn_notifier`].

use crate::daemon::Context;
use crate::error::{DaemonError, Result};
use crate::output::KeySink;
use crate::protocol::{read_record, Command, Notification};
use log::{debug, info, warn};
use std::fs::{self, Permissions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Diversion records waiting for the notifier before new ones are dropped
pub const NOTIFY_QUEUE_DEPTH: usize = 256;

/// Write half of the connected client, if there is one
#[derive(Default)]
pub struct ClientLink {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Bumped under the writer lock on every attach and detach
    session: AtomicU64,
}

impl ClientLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `writer` the destination for notifications
    pub fn attach(&self, writer: impl Write + Send + 'static) {
        let mut slot = self.lock();
        self.session.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Box::new(writer));
    }

    /// Drop the current client, returning whether there was one
    pub fn detach(&self) -> bool {
        let mut slot = self.lock();
        self.session.fetch_add(1, Ordering::SeqCst);
        slot.take().is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Current session stamp; lock-free so the hardware loop can read it
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Write one record and flush it.
    ///
    /// Returns `Ok(false)` when no client is attached or the record was
    /// produced in an earlier session. A failed write detaches the client
    /// before the error is returned.
    pub fn deliver(&self, session: u64, notification: &Notification) -> io::Result<bool> {
        let mut slot = self.lock();
        if self.session.load(Ordering::SeqCst) != session {
            return Ok(false);
        }
        let Some(writer) = slot.as_mut() else {
            return Ok(false);
        };
        let result = writer
            .write_all(notification.encode().as_bytes())
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            self.session.fetch_add(1, Ordering::SeqCst);
            *slot = None;
            return Err(e);
        }
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Write + Send>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Pending {
    session: u64,
    notification: Notification,
}

/// Hardware-side handle to the notifier thread
#[derive(Clone)]
pub struct Notifier {
    queue: SyncSender<Pending>,
    link: Arc<ClientLink>,
}

impl Notifier {
    /// Queue a record for the client attached right now.
    ///
    /// Never blocks. Returns false when the queue is full or the notifier
    /// thread is gone, in which case the record is dropped.
    pub fn notify(&self, notification: Notification) -> bool {
        let pending = Pending {
            session: self.link.session(),
            notification,
        };
        self.queue.try_send(pending).is_ok()
    }
}

/// Start the thread that writes diversion records to the client.
///
/// It runs until every [`Notifier`] is dropped. Records are stamped with the
/// client session at queue time, so one produced with no client, or for a
/// client that has since gone, is never delivered to a later one.
pub fn spawn_notifier(link: Arc<ClientLink>) -> io::Result<(Notifier, JoinHandle<()>)> {
    let (queue, pending) = mpsc::sync_channel::<Pending>(NOTIFY_QUEUE_DEPTH);
    let notifier = Notifier {
        queue,
        link: Arc::clone(&link),
    };
    let handle = thread::Builder::new()
        .name("notifier".into())
        .spawn(move || {
            for Pending {
                session,
                notification,
            } in pending
            {
                match link.deliver(session, &notification) {
                    Ok(true) => {}
                    Ok(false) => debug!("No client for {}, dropping it", notification),
                    Err(e) => warn!("Client write failed, dropping {}: {}", notification, e),
                }
            }
        })?;
    Ok((notifier, handle))
}

/// Create the rendezvous socket, replacing a stale one
pub fn bind(path: &Path, mode: u32) -> Result<UnixListener> {
    let bind_failure = |source: io::Error| DaemonError::SocketBindFailure {
        path: path.to_path_buf(),
        source,
    };

    match fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_failure(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_failure)?;
    // TODO: restrict to the client's user once it runs unprivileged
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(bind_failure)?;
    info!("Listening on: {}", path.display());
    Ok(listener)
}

/// Session behaviour that outlives any one connection
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicy {
    /// Empty the suppression set when a client disconnects
    pub reset_suppression_on_disconnect: bool,
}

/// Serves client sessions against the shared context
pub struct Server<S> {
    ctx: Arc<Context<S>>,
    policy: SessionPolicy,
}

impl<S: KeySink> Server<S> {
    pub fn new(ctx: Arc<Context<S>>, policy: SessionPolicy) -> Self {
        Self { ctx, policy }
    }

    /// Accept and serve connections one after another, forever
    pub fn run(&self, listener: &UnixListener) {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            let writer = match stream.try_clone() {
                Ok(writer) => writer,
                Err(e) => {
                    warn!("Cannot clone client stream: {}", e);
                    continue;
                }
            };
            info!("Client connected");
            self.serve(BufReader::new(stream), writer);
        }
    }

    /// Serve one session until the peer closes or sends a blank line
    pub fn serve<R: BufRead>(&self, mut reader: R, writer: impl Write + Send + 'static) {
        self.ctx.client.attach(writer);

        let mut buf = Vec::new();
        loop {
            match read_record(&mut reader, &mut buf) {
                Ok(Some(Ok(line))) => match line.parse::<Command>() {
                    Ok(command) => self.apply(command),
                    Err(e) => warn!("{}", e),
                },
                Ok(Some(Err(e))) => warn!("{}", e),
                Ok(None) => break,
                Err(e) => {
                    warn!("Client read failed: {}", e);
                    break;
                }
            }
        }

        self.ctx.client.detach();
        if self.policy.reset_suppression_on_disconnect {
            self.ctx.suppression.clear();
            info!("Client disconnected, suppression cleared");
        } else {
            info!("Client disconnected");
        }
    }

    /// Carry out one parsed record
    pub fn apply(&self, command: Command) {
        match command {
            Command::Suppress(ids) => {
                self.ctx.suppression.replace(ids);
                info!("Suppressing keys: {:?}", self.ctx.suppression.snapshot());
            }
            Command::KeyDown(id) => {
                if let Err(e) = self.ctx.output.emit(id, true) {
                    warn!("Key down {} failed: {}", id, e);
                }
            }
            Command::KeyUp(id) => {
                if let Err(e) = self.ctx.output.emit(id, false) {
                    warn!("Key up {} failed: {}", id, e);
                }
            }
        }
    }
}
