//! A registered participant and the task that writes to its socket.
//!
//! Nothing writes to a client's transport directly. Every line or file
//! destined for a client is queued on its [`Connection`] and written, in
//! queue order, by that client's writer task. A slow or dead client
//! therefore never blocks the session that produced the message.
//!
//! The queue is unbounded: a client that stops reading makes its queue grow
//! without limit. There is no backpressure. A queued file also blocks the
//! lines behind it until its sender finishes or goes away.

use bytes::Bytes;
use hyperchat_proto::codec::{FrameError, StreamWriter};
use hyperchat_proto::frame::FileHeader;
use hyperchat_proto::line::FILE_MARKER;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::notice;

/// Registration-order identifier, unique for the relay's lifetime.
pub type ConnectionId = u64;

/// Zero padding written when a file ends short of its declared size.
const PAD: [u8; 4096] = [0; 4096];

/// One unit queued for a client's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// A text line (the newline is added by the writer).
    Line(String),
    /// A file: marker line, header, then the chunks as they arrive.
    File {
        /// Name and declared size.
        header: FileHeader,
        /// Payload chunks. Closing the channel early means the sender
        /// went away mid-transfer.
        chunks: mpsc::UnboundedReceiver<Bytes>,
    },
}

/// The outbound queue was closed because the client's writer stopped.
#[derive(Debug, thiserror::Error)]
#[error("connection '{0}' is closed")]
pub struct ConnectionClosed(pub String);

/// A participant's identity plus the sending half of its outbound queue.
///
/// Cheap to clone; the registry and in-flight routing hold clones. The
/// transport itself is owned by the session and writer task only.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    handle: String,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    #[must_use]
    pub const fn new(
        id: ConnectionId,
        handle: String,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id,
            handle,
            outbound,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Queues a text line.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] if the writer task has stopped.
    pub fn send_line(&self, text: impl Into<String>) -> Result<(), ConnectionClosed> {
        self.outbound
            .send(Outbound::Line(text.into()))
            .map_err(|_| ConnectionClosed(self.handle.clone()))
    }

    /// Queues a file and returns the sink its payload chunks are fed into.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] if the writer task has stopped.
    pub fn send_file(&self, header: FileHeader) -> Result<FileSink, ConnectionClosed> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound
            .send(Outbound::File { header, chunks: rx })
            .map_err(|_| ConnectionClosed(self.handle.clone()))?;
        Ok(FileSink {
            handle: self.handle.clone(),
            chunks: tx,
        })
    }
}

/// Feeds payload chunks to one destination's queued file.
#[derive(Debug)]
pub struct FileSink {
    handle: String,
    chunks: mpsc::UnboundedSender<Bytes>,
}

impl FileSink {
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Forwards one chunk. `Bytes` clones share the same allocation.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] if the destination's writer has stopped.
    pub fn send(&self, chunk: Bytes) -> Result<(), ConnectionClosed> {
        self.chunks
            .send(chunk)
            .map_err(|_| ConnectionClosed(self.handle.clone()))
    }
}

/// Drains a client's outbound queue onto its transport.
///
/// Returns once every queue sender is gone, or with the first write error.
///
/// # Errors
///
/// Returns [`FrameError`] if writing to the client fails.
pub async fn run_writer<W>(
    mut writer: StreamWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    handle: String,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Line(text) => writer.write_line(&text).await?,
            Outbound::File { header, chunks } => {
                write_file(&mut writer, &header, chunks, &handle).await?;
            }
        }
    }
    tracing::debug!(handle = %handle, "outbound queue closed, shutting down writer");
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(handle = %handle, error = %e, "transport shutdown failed");
    }
    Ok(())
}

/// Writes one file frame followed by a completion notice.
///
/// The destination always receives exactly `header.size` bytes. If the
/// chunk channel closes early the remainder is zero-filled and the notice
/// reports failure.
async fn write_file<W>(
    writer: &mut StreamWriter<W>,
    header: &FileHeader,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
    handle: &str,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_line(FILE_MARKER).await?;
    writer.write_file_header(header).await?;

    let mut forwarded: u64 = 0;
    while forwarded < header.size {
        let Some(chunk) = chunks.recv().await else {
            break;
        };
        let room = header.size - forwarded;
        let take = usize::try_from(room).map_or(chunk.len(), |r| r.min(chunk.len()));
        writer.write_chunk(&chunk[..take]).await?;
        forwarded += take as u64;
    }

    let complete = forwarded == header.size;
    let mut missing = header.size - forwarded;
    while missing > 0 {
        let take = usize::try_from(missing).map_or(PAD.len(), |m| m.min(PAD.len()));
        writer.write_chunk(&PAD[..take]).await?;
        missing -= take as u64;
    }
    writer.flush().await?;

    if complete {
        tracing::debug!(handle = %handle, name = %header.name, size = header.size, "file delivered");
        writer.write_line(notice::FILE_SENT).await
    } else {
        tracing::warn!(
            handle = %handle,
            name = %header.name,
            expected = header.size,
            forwarded,
            "file ended short of declared size"
        );
        writer.write_line(notice::FILE_NOT_SENT).await
    }
}
