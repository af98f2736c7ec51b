//! Streams a file from one connection to its destinations.
//!
//! The sender's payload is read in chunks and each chunk is handed to every
//! destination's writer as it arrives. Whatever happens to destinations, the
//! sender's stream is always consumed up to the declared size so that its
//! next line is read from the right byte.
//!
//! Known limitations (see also the queue notes in [`crate::connection`]):
//!
//! - Chunk channels are unbounded. A destination that reads slower than the
//!   sender writes buffers the unsent part of the file in memory, up to the
//!   whole file.
//! - A destination's writer handles one queued file at a time. If the sender
//!   stalls mid-file, every destination waits on it, and lines queued behind
//!   the file from other senders wait too.

use hyperchat_proto::codec::{FrameError, StreamReader};
use hyperchat_proto::frame::FileHeader;
use tokio::io::AsyncBufRead;

use crate::connection::{Connection, FileSink};
use crate::notice;
use crate::router::Router;

/// How a file announcement was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The payload was read in full and streamed to `destinations`
    /// connections.
    Forwarded {
        /// The announced header.
        header: FileHeader,
        /// Destinations still accepting chunks at the end.
        destinations: usize,
    },
    /// The declared size exceeded the limit; the payload was discarded.
    TooLarge(FileHeader),
    /// A directed transfer named an absent handle; the payload was
    /// discarded.
    RecipientNotFound(String),
}

/// Relays files read from one connection's stream.
pub struct FileRelay<'a> {
    router: &'a Router,
    max_file_size: u64,
    chunk_size: usize,
}

impl<'a> FileRelay<'a> {
    #[must_use]
    pub const fn new(router: &'a Router, max_file_size: u64, chunk_size: usize) -> Self {
        Self {
            router,
            max_file_size,
            chunk_size,
        }
    }

    /// Reads one file frame from `reader` (the marker line has already been
    /// consumed) and forwards it.
    ///
    /// With `to` set the file goes only to that handle; otherwise to every
    /// connection except `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the sender's stream fails or ends before
    /// the declared size. Destinations already receiving the file are then
    /// padded to the declared size and told the transfer failed.
    pub async fn relay<R>(
        &self,
        reader: &mut StreamReader<R>,
        sender: &str,
        to: Option<&str>,
    ) -> Result<FileOutcome, FrameError>
    where
        R: AsyncBufRead + Unpin,
    {
        let header = reader.read_file_header().await?;
        tracing::debug!(sender = %sender, name = %header.name, size = header.size, "file announced");

        if header.size > self.max_file_size {
            reader.file_body(header.size, self.chunk_size).discard().await?;
            tracing::warn!(
                sender = %sender,
                size = header.size,
                max = self.max_file_size,
                "file exceeds size limit"
            );
            self.router
                .notify(sender, &notice::file_too_large(header.size, self.max_file_size))
                .await;
            return Ok(FileOutcome::TooLarge(header));
        }

        let destinations = match to {
            None => self.router.broadcast_set(sender).await,
            Some(recipient) => match self.router.resolve(recipient).await {
                Ok(conn) => vec![conn],
                Err(e) => {
                    reader.file_body(header.size, self.chunk_size).discard().await?;
                    tracing::debug!(sender = %sender, error = %e, "directed file dropped");
                    self.router.notify(sender, notice::USER_NOT_FOUND).await;
                    return Ok(FileOutcome::RecipientNotFound(recipient.to_string()));
                }
            },
        };

        let mut sinks = open_sinks(&destinations, sender, &header);

        let mut body = reader.file_body(header.size, self.chunk_size);
        while let Some(chunk) = body.next_chunk().await? {
            sinks.retain(|sink| match sink.send(chunk.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "destination dropped mid-transfer");
                    false
                }
            });
        }

        tracing::info!(
            sender = %sender,
            name = %header.name,
            size = header.size,
            destinations = sinks.len(),
            "file relayed"
        );
        Ok(FileOutcome::Forwarded {
            destinations: sinks.len(),
            header,
        })
    }
}

/// Announces the file to each destination and queues its frame.
fn open_sinks(destinations: &[Connection], sender: &str, header: &FileHeader) -> Vec<FileSink> {
    destinations
        .iter()
        .filter_map(|conn| {
            conn.send_line(notice::file_announce(sender, &header.name)).ok()?;
            conn.send_file(header.clone()).ok()
        })
        .collect()
}
