//! Connection lifecycle manager.
//!
//! Owns the listening socket, runs the accept loop on its own thread, spawns
//! one worker thread per accepted connection and performs the shutdown
//! protocol:
//!
//! 1. clear the running flag,
//! 2. shut down the listening socket (unblocks `accept`) and join the accept
//!    thread,
//! 3. shut down every client socket (unblocks each worker's `receive` and any
//!    broadcast blocked on a stalled peer), then clear the registry under its
//!    lock,
//! 4. join every worker, outside the registry lock.
//!
//! Client sockets are reached through the worker list for step 3, so a
//! broadcaster holding the registry lock cannot delay it.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use kairo_shared::time::{elapsed_millis, timestamp_to_jst_rfc3339};
use parking_lot::Mutex;

use crate::{
    connection::{Connection, ConnectionRef, ConnectionRegistry},
    error::{ServerError, SocketError},
    handler::MessageHandler,
    line::{Frame, LineBuffer, normalize_line},
    socket::{SocketConfig, TransportSocket},
};

/// Sent to every client right after it connects.
pub const GREETING: &[u8] = b"Welcome to chat! Type '/quit' to quit.\n";
/// Sent in reply to [`QUIT_COMMAND`] before the connection is closed.
pub const GOODBYE: &[u8] = b"Goodbye!\n";
/// Disconnect command, compared case-sensitively after trimming.
pub const QUIT_COMMAND: &[u8] = b"/quit";
/// Listen backlog used unless configured otherwise.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Lifecycle states of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Created => "created",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
            ManagerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start/stop contract the server facade drives.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionLifecycle: Send + Sync {
    /// Bind, listen and start accepting on `address:port`.
    fn start(&self, address: &str, port: u16) -> Result<(), ServerError>;

    /// Stop accepting, close every connection and join every thread.
    /// Idempotent.
    fn stop(&self);

    /// Address the listening socket is bound to, once started.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// State shared with the accept thread and the workers.
struct Shared {
    listener: TransportSocket,
    registry: ConnectionRegistry,
    handler: Arc<dyn MessageHandler>,
    running: AtomicBool,
    workers: Mutex<Vec<Worker>>,
}

/// A worker thread and the connection it serves.
struct Worker {
    connection: ConnectionRef,
    handle: JoinHandle<()>,
}

/// Why a worker left its receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Quit,
    PeerClosed,
    Stopped,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disconnect::Quit => "quit command",
            Disconnect::PeerClosed => "peer closed the connection",
            Disconnect::Stopped => "server stopping",
        })
    }
}

/// Accepts connections and runs one worker thread per connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    backlog: i32,
    state: Mutex<ManagerState>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    stop_requested: AtomicBool,
}

impl ConnectionManager {
    /// Create the listening socket and wire the handler.
    ///
    /// `registry` must be the same registry any registry-aware handler (e.g.
    /// [`BroadcastHandler`](crate::handler::BroadcastHandler)) was built with.
    ///
    /// # Errors
    ///
    /// Fails if the listening socket cannot be created.
    pub fn new(
        config: SocketConfig,
        handler: Arc<dyn MessageHandler>,
        registry: ConnectionRegistry,
    ) -> Result<Self, SocketError> {
        let listener = TransportSocket::create(config)?;

        Ok(Self {
            shared: Arc::new(Shared {
                listener,
                registry,
                handler,
                running: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
            backlog: DEFAULT_BACKLOG,
            state: Mutex::new(ManagerState::Created),
            accept_thread: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.shared.registry.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Bind, listen and launch the accept thread.
    ///
    /// # Errors
    ///
    /// * [`ServerError::InvalidState`] unless the manager is `Created`.
    /// * [`ServerError::StartFailed`] if bind or listen fails; the manager
    ///   stays `Created` and [`stop`](Self::stop) remains safe to call.
    /// * [`ServerError::ThreadSpawn`] if the accept thread cannot be spawned.
    pub fn start(&self, address: &str, port: u16) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        if *state != ManagerState::Created {
            return Err(ServerError::InvalidState(state.as_str()));
        }

        self.shared.listener.bind(address, port)?;
        self.shared.listener.listen(self.backlog)?;
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("kairo-accept".to_string())
            .spawn(move || accept_loop(shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                ServerError::ThreadSpawn(e)
            })?;
        *self.accept_thread.lock() = Some(handle);
        *state = ManagerState::Running;

        match self.shared.listener.local_addr() {
            Some(addr) => tracing::info!("Chat server listening on {}", addr),
            None => tracing::info!("Chat server listening on {}:{}", address, port),
        }
        Ok(())
    }

    /// Shut everything down. Only the first call does any work.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = ManagerState::Stopping;
        tracing::info!("Stopping chat server");

        self.shared.running.store(false, Ordering::Release);

        self.shared.listener.shutdown();
        // The accept thread may be waiting on the registry lock in admit().
        self.shutdown_worker_connections();
        let accept_thread = self.accept_thread.lock().take();
        if let Some(handle) = accept_thread
            && handle.join().is_err()
        {
            tracing::error!("Accept thread panicked");
        }

        self.shutdown_worker_connections();
        let closed = self.shared.registry.shutdown_all();
        tracing::debug!("Cleared {} client connection(s) from the registry", closed);

        let workers = std::mem::take(&mut *self.shared.workers.lock());
        let count = workers.len();
        for worker in workers {
            if worker.handle.join().is_err() {
                tracing::warn!("Worker thread panicked");
            }
        }

        *self.state.lock() = ManagerState::Stopped;
        tracing::info!("Chat server stopped ({} worker(s) joined)", count);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.listener.local_addr()
    }

    fn shutdown_worker_connections(&self) {
        for worker in self.shared.workers.lock().iter() {
            worker.connection.shutdown();
        }
    }
}

impl ConnectionLifecycle for ConnectionManager {
    fn start(&self, address: &str, port: u16) -> Result<(), ServerError> {
        ConnectionManager::start(self, address, port)
    }

    fn stop(&self) {
        ConnectionManager::stop(self)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        ConnectionManager::local_addr(self)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

fn accept_loop(shared: Arc<Shared>) {
    tracing::debug!("Accept loop started");

    while shared.running.load(Ordering::Acquire) {
        let socket = match shared.listener.accept() {
            Ok(socket) => socket,
            Err(_) if !shared.running.load(Ordering::Acquire) => break,
            Err(e) => {
                tracing::error!("Accept loop terminated: {}", e);
                break;
            }
        };

        if !shared.running.load(Ordering::Acquire) {
            socket.shutdown();
            break;
        }

        let connection = Arc::new(Connection::new(socket));
        if let Err(e) = shared.registry.admit(Arc::clone(&connection), GREETING) {
            tracing::warn!("Failed to greet client {}: {}", connection, e);
            connection.shutdown();
            continue;
        }
        tracing::info!(
            "Client {} connected at {}",
            connection,
            timestamp_to_jst_rfc3339(connection.connected_at()).unwrap_or_default()
        );

        spawn_worker(&shared, connection);
    }

    tracing::debug!("Accept loop finished");
}

fn spawn_worker(shared: &Arc<Shared>, connection: ConnectionRef) {
    let worker_shared = Arc::clone(shared);
    let worker_connection = Arc::clone(&connection);
    let spawned = thread::Builder::new()
        .name(format!("kairo-worker-{}", connection.id().simple()))
        .spawn(move || run_worker(worker_shared, worker_connection));

    match spawned {
        Ok(handle) => {
            let mut workers = shared.workers.lock();
            workers.retain(|w| !w.handle.is_finished());
            workers.push(Worker { connection, handle });
        }
        Err(e) => {
            tracing::warn!("Failed to spawn worker for {}: {}", connection, e);
            connection.shutdown();
            shared.registry.remove(&connection);
        }
    }
}

/// Closes and unregisters a connection when its worker exits, panics
/// included.
struct WorkerCleanup<'a> {
    shared: &'a Shared,
    connection: &'a ConnectionRef,
}

impl Drop for WorkerCleanup<'_> {
    fn drop(&mut self) {
        // Both are no-ops if stop() got here first.
        self.connection.shutdown();
        self.shared.registry.remove(self.connection);
        tracing::debug!(
            "Client {} session lasted {} ms",
            self.connection.id(),
            elapsed_millis(self.connection.connected_at())
        );
    }
}

fn run_worker(shared: Arc<Shared>, connection: ConnectionRef) {
    let _cleanup = WorkerCleanup {
        shared: &shared,
        connection: &connection,
    };

    match serve_connection(&shared, &connection) {
        Ok(reason) => tracing::info!("Client {} disconnected: {}", connection, reason),
        Err(SocketError::SocketClosed) => {
            tracing::debug!("Client {} closed by shutdown", connection)
        }
        Err(e) => tracing::warn!("Client {} dropped: {}", connection, e),
    }
}

fn serve_connection(
    shared: &Shared,
    connection: &ConnectionRef,
) -> Result<Disconnect, SocketError> {
    let mut lines = LineBuffer::default();
    loop {
        let chunk = connection.receive()?;
        if !shared.running.load(Ordering::Acquire) {
            return Ok(Disconnect::Stopped);
        }

        if chunk.is_empty() {
            if let Some(rest) = lines.take_remainder()
                && let Some(reason) = process_frame(shared, connection, rest)?
            {
                return Ok(reason);
            }
            return Ok(Disconnect::PeerClosed);
        }

        lines.push(&chunk);
        while let Some(frame) = lines.next_frame() {
            if !shared.running.load(Ordering::Acquire) {
                return Ok(Disconnect::Stopped);
            }
            if let Some(reason) = process_frame(shared, connection, frame)? {
                return Ok(reason);
            }
        }
    }
}

/// Handle one frame. Returns `Some` if the worker should exit.
///
/// A whole or final frame is normalized and gets a single `\n`. A fragment of
/// an overlong line is passed on unchanged, so the pieces rejoin into the
/// sender's line on the receiving side.
fn process_frame(
    shared: &Shared,
    connection: &ConnectionRef,
    frame: Frame,
) -> Result<Option<Disconnect>, SocketError> {
    if frame.is_whole_line() && normalize_line(&frame.bytes).trim_ascii() == QUIT_COMMAND {
        // Client writes share the registry lock with broadcasts.
        shared
            .registry
            .with_connections(|_| connection.send(GOODBYE))?;
        return Ok(Some(Disconnect::Quit));
    }

    let message = if frame.ends_line {
        let line = normalize_line(&frame.bytes);
        let mut message = Vec::with_capacity(line.len() + 1);
        message.extend_from_slice(line);
        message.push(b'\n');
        message
    } else {
        frame.bytes
    };

    tracing::debug!(
        "Received from {}: {}",
        connection,
        String::from_utf8_lossy(normalize_line(&message))
    );
    if !shared.handler.handle(connection, &message) {
        tracing::warn!(
            "{}",
            ServerError::UnhandledMessage {
                connection: connection.id()
            }
        );
    }
    Ok(None)
}
