//! Relay server core: shared state and the TCP accept loop.
//!
//! Each accepted connection gets its own task running a
//! [`Session`](crate::session::Session); there is no global lock around
//! message processing. The [`Registry`] is the only state shared between
//! sessions.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyperchat_proto::frame::DEFAULT_CHUNK_SIZE;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;

use crate::file_relay::FileRelay;
use crate::notice;
use crate::registry::Registry;
use crate::router::Router;
use crate::session::{Session, SessionError};

/// Default maximum accepted file size in bytes (100 MiB).
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// How long shutdown waits for writers to flush their queues.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared relay server state holding the connection registry and limits.
pub struct RelayState {
    /// Live connections keyed by handle.
    pub registry: Arc<Registry>,
    /// Routing over `registry`.
    pub router: Router,
    /// Largest file the relay forwards.
    max_file_size: u64,
    /// Read size for file payloads.
    chunk_size: usize,
    /// Flipped to `true` once the relay starts shutting down.
    shutdown: watch::Sender<bool>,
    /// Writer tasks of live and recently closed connections.
    writers: Mutex<JoinSet<()>>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FILE_SIZE, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a relay state with custom file size and chunk size limits.
    #[must_use]
    pub fn with_config(max_file_size: u64, chunk_size: usize) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            router: Router::new(Arc::clone(&registry)),
            registry,
            max_file_size,
            chunk_size: chunk_size.max(1),
            shutdown: watch::Sender::new(false),
            writers: Mutex::new(JoinSet::new()),
        }
    }

    /// A file relay bound to this state's router and limits.
    #[must_use]
    pub const fn file_relay(&self) -> FileRelay<'_> {
        FileRelay::new(&self.router, self.max_file_size, self.chunk_size)
    }

    /// Subscribes to the shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Spawns a connection's writer task so shutdown can wait for it.
    pub async fn spawn_writer<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut writers = self.writers.lock().await;
        while writers.try_join_next().is_some() {}
        writers.spawn(task);
    }

    /// Tells every connected client the relay is going away, then signals
    /// every session to close.
    ///
    /// The notice is queued before the signal, so each client's writer
    /// sends it ahead of the end of stream.
    pub async fn close_all_connections(&self) {
        let notified = self.router.announce(notice::SHUTTING_DOWN).await;
        tracing::info!(clients = notified, "sent shutdown notice to clients");
        self.shutdown.send_replace(true);
    }

    /// Waits up to `grace` for every writer task to drain its queue.
    /// Writers still running after that are aborted.
    pub async fn wait_for_writers(&self, grace: Duration) {
        let mut writers = std::mem::take(&mut *self.writers.lock().await);
        let pending = writers.len();
        let drained = tokio::time::timeout(grace, async {
            while writers.join_next().await.is_some() {}
        })
        .await;
        match drained {
            Ok(()) => tracing::debug!(writers = pending, "all writers drained"),
            Err(_) => {
                tracing::warn!(remaining = writers.len(), "writers still busy after grace period, aborting");
                writers.shutdown().await;
            }
        }
    }
}

/// Runs one client's session over a TCP stream.
///
/// # Errors
///
/// Returns the [`SessionError`] that ended the session, if any.
pub async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) -> Result<(), SessionError> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();
    Session::new(state, BufReader::new(read_half), BufWriter::new(write_half))
        .run()
        .await
}

/// Accepts connections on `listener` until `shutdown` resolves.
///
/// On shutdown every client is sent a notice and its session closed; this
/// returns once their writers have flushed or the grace period ran out.
pub async fn serve<F>(listener: TcpListener, state: Arc<RelayState>, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("relay shutting down");
                state.close_all_connections().await;
                state.wait_for_writers(SHUTDOWN_GRACE).await;
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => spawn_session(stream, peer, &state),
                Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
            },
        }
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    tracing::debug!(peer = %peer, "accepted connection");
    let state = Arc::clone(state);
    tokio::spawn(async move {
        match handle_connection(stream, state).await {
            Ok(()) => tracing::debug!(peer = %peer, "session closed"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "session closed with error"),
        }
    });
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// The server runs until the returned task is aborted.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(serve(listener, state, std::future::pending::<()>()));

    Ok((bound_addr, handle))
}
