//! Per-connection control loop.
//!
//! A session moves through three states:
//!
//! 1. `Handshaking`: the first line is taken as the handle. The connection
//!    is registered, welcomed, and announced to everyone else.
//! 2. `Active`: lines are read and dispatched one at a time, so units from
//!    the same client are never handled concurrently.
//! 3. `Closed`: reached on `:quit`, end of stream, a read error, or a write
//!    error. The handle is unregistered and its departure announced; the
//!    transport halves are released when the reader and writer task drop
//!    them.

use std::fmt;
use std::sync::Arc;

use hyperchat_proto::codec::{FrameError, StreamReader, StreamWriter};
use hyperchat_proto::line::{Command, IncomingUnit};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::connection::{self, Connection, ConnectionClosed, Outbound};
use crate::notice;
use crate::relay::RelayState;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshaking => write!(f, "handshaking"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Reading from or writing to the client failed.
    #[error("transport error: {0}")]
    Transport(#[from] FrameError),
    /// The announced handle is held by another connection.
    #[error("handle '{0}' is already in use")]
    DuplicateHandle(String),
    /// The client's writer task stopped while the session was still active.
    #[error(transparent)]
    WriterClosed(#[from] ConnectionClosed),
}

/// One client's session over a split transport.
pub struct Session<R, W> {
    relay: Arc<RelayState>,
    reader: StreamReader<R>,
    writer: StreamWriter<W>,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps the two halves of a client's transport.
    pub const fn new(relay: Arc<RelayState>, reader: R, writer: W) -> Self {
        Self {
            relay,
            reader: StreamReader::new(reader),
            writer: StreamWriter::new(writer),
        }
    }

    /// Drives the session until it is closed.
    ///
    /// Registry cleanup and the departure notice happen here, on every exit
    /// path after a successful handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] describing why the session ended abnormally.
    /// `:quit` and a clean end of stream return `Ok`.
    pub async fn run(self) -> Result<(), SessionError> {
        let Self {
            relay,
            mut reader,
            writer,
        } = self;
        let mut state = SessionState::Handshaking;
        let shutdown = relay.shutdown_signal();

        let (connection, outbound) = match handshake(&relay, &mut reader).await {
            Ok(Some(registered)) => registered,
            Ok(None) => {
                transition(&mut state, SessionState::Closed, None);
                return Ok(());
            }
            Err(SessionError::DuplicateHandle(handle)) => {
                transition(&mut state, SessionState::Closed, Some(&handle));
                reject(writer, &handle).await;
                return Err(SessionError::DuplicateHandle(handle));
            }
            Err(e) => {
                transition(&mut state, SessionState::Closed, None);
                return Err(e);
            }
        };
        let handle = connection.handle().to_string();
        transition(&mut state, SessionState::Active, Some(&handle));

        relay.router.broadcast(&handle, &notice::joined(&handle)).await;

        let (done_tx, done_rx) = oneshot::channel();
        let writer_handle = handle.clone();
        relay
            .spawn_writer(async move {
                let result = connection::run_writer(writer, outbound, writer_handle).await;
                done_tx.send(result).ok();
            })
            .await;

        let result = tokio::select! {
            result = serve(&relay, &mut reader, &connection) => result,
            written = done_rx => match written {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SessionError::Transport(e)),
                Err(_) => {
                    tracing::error!(handle = %handle, "writer task stopped without a result");
                    Ok(())
                }
            },
            () = shutdown_requested(shutdown) => {
                tracing::info!(handle = %handle, "closing session for relay shutdown");
                Ok(())
            }
        };

        transition(&mut state, SessionState::Closed, Some(&handle));
        relay.registry.unregister(&handle).await;
        drop(connection);
        relay.router.broadcast(&handle, &notice::left(&handle)).await;
        result
    }
}

/// Resolves once the relay starts shutting down.
async fn shutdown_requested(mut signal: watch::Receiver<bool>) {
    if signal.wait_for(|&stop| stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn transition(state: &mut SessionState, next: SessionState, handle: Option<&str>) {
    tracing::debug!(handle = ?handle, from = %state, to = %next, "session state change");
    *state = next;
}

/// Reads the handle and registers the connection.
///
/// The welcome line is queued before registration so it is the first line
/// the client receives. Returns `Ok(None)` if the stream ends before a
/// handle arrives.
async fn handshake<R>(
    relay: &RelayState,
    reader: &mut StreamReader<R>,
) -> Result<Option<(Connection, mpsc::UnboundedReceiver<Outbound>)>, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(handle) = reader.read_line().await? else {
        tracing::debug!("connection closed before handshake");
        return Ok(None);
    };

    let (tx, rx) = mpsc::unbounded_channel();
    if tx.send(Outbound::Line(notice::welcome(&handle))).is_err() {
        tracing::debug!(handle = %handle, "outbound queue closed before welcome");
    }
    let connection = Connection::new(relay.registry.next_id(), handle, tx);
    match relay.registry.register(connection.clone()).await {
        Ok(()) => {
            tracing::info!(handle = %connection.handle(), id = connection.id(), "client registered");
            Ok(Some((connection, rx)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejected handshake");
            Err(SessionError::DuplicateHandle(connection.handle().to_string()))
        }
    }
}

/// Tells a rejected client why and closes its write half.
async fn reject<W>(mut writer: StreamWriter<W>, handle: &str)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = writer.write_line(&notice::handle_taken(handle)).await {
        tracing::debug!(handle = %handle, error = %e, "failed to send rejection");
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(handle = %handle, error = %e, "failed to close rejected transport");
    }
}

/// The `Active` loop: one unit at a time until quit or end of stream.
async fn serve<R>(
    relay: &RelayState,
    reader: &mut StreamReader<R>,
    me: &Connection,
) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let handle = me.handle();
    while let Some(line) = reader.read_line().await? {
        match IncomingUnit::parse(&line) {
            IncomingUnit::PlainText(body) => {
                relay
                    .router
                    .broadcast(handle, &notice::chat(handle, &body))
                    .await;
            }
            IncomingUnit::Directed { to, body } => {
                if let Err(e) = relay
                    .router
                    .direct(handle, &to, &notice::chat(handle, &body))
                    .await
                {
                    tracing::debug!(handle = %handle, error = %e, "directed message not delivered");
                }
            }
            IncomingUnit::Command(Command::Quit) => {
                tracing::info!(handle = %handle, "client quit");
                return Ok(());
            }
            IncomingUnit::Command(Command::List) => {
                let handles = relay.router.list_active().await;
                me.send_line(notice::active_users(&handles))?;
            }
            IncomingUnit::Command(Command::File { to }) => {
                let outcome = relay
                    .file_relay()
                    .relay(reader, handle, to.as_deref())
                    .await?;
                tracing::debug!(handle = %handle, outcome = ?outcome, "file dispatch finished");
            }
            IncomingUnit::Command(Command::Unknown(name)) => {
                tracing::debug!(handle = %handle, command = %name, "unrecognised command");
                me.send_line(notice::INVALID_COMMAND)?;
            }
        }
    }
    tracing::info!(handle = %handle, "client disconnected");
    Ok(())
}
