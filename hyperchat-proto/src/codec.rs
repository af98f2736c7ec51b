//! Stream reader and writer for the interleaved line/file protocol.
//!
//! A single [`StreamReader`] owns the buffered read side of a connection.
//! It reads lines until the caller switches it into binary mode with
//! [`StreamReader::file_body`]; the returned [`FileBody`] borrows the reader
//! mutably, so no line can be read until the declared number of file bytes
//! has been consumed. [`StreamWriter`] is the mirror image for the write
//! side.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{self, FileHeader, MAX_NAME_LEN};
use crate::line;

/// Error type for reading or writing the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// The stream ended before the declared file size was reached.
    #[error("stream ended after {received} of {expected} file bytes")]
    Truncated {
        /// Declared file size.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },
    /// The file name was not valid UTF-8.
    #[error("file name is not valid UTF-8")]
    InvalidName,
    /// The file name does not fit the 16-bit length prefix.
    #[error("file name too long: {0} bytes (max {MAX_NAME_LEN})")]
    NameTooLong(usize),
}

/// Read side of a connection.
pub struct StreamReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R> StreamReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wraps a buffered reader.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
        }
    }

    /// Reads the next line with its line ending removed.
    ///
    /// Returns `Ok(None)` at end of stream. Invalid UTF-8 is replaced
    /// rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the transport fails.
    pub async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        self.line.clear();
        let read = self.inner.read_until(b'\n', &mut self.line).await?;
        if read == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&self.line);
        Ok(Some(line::trim_line_ending(&text).to_string()))
    }

    /// Reads a file header. Must only be called right after a file marker
    /// line.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the stream fails or ends inside the
    /// header, or [`FrameError::InvalidName`] for a non-UTF-8 name.
    pub async fn read_file_header(&mut self) -> Result<FileHeader, FrameError> {
        let name_len = self.inner.read_u16().await?;
        let mut name = vec![0; usize::from(name_len)];
        self.inner.read_exact(&mut name).await?;
        let name = frame::decode_name(name)?;
        let size = self.inner.read_u64().await?;
        Ok(FileHeader { name, size })
    }

    /// Switches to binary mode for a payload of exactly `size` bytes.
    pub fn file_body(&mut self, size: u64, chunk_size: usize) -> FileBody<'_, R> {
        FileBody {
            reader: &mut self.inner,
            expected: size,
            received: 0,
            buf: vec![0; chunk_size.max(1)],
        }
    }
}

/// A file payload being read off the stream.
///
/// Reads never go past the declared size, so the line stream resumes at
/// the right byte once the body is exhausted.
pub struct FileBody<'a, R> {
    reader: &'a mut R,
    expected: u64,
    received: u64,
    buf: Vec<u8>,
}

impl<R> FileBody<'_, R>
where
    R: AsyncBufRead + Unpin,
{
    /// Reads the next chunk, or `Ok(None)` once the declared size has been
    /// reached. Chunks may be shorter than the chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] if the stream ends early, or
    /// [`FrameError::Io`] on transport failure.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, FrameError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        let want = usize::try_from(remaining).map_or(self.buf.len(), |r| r.min(self.buf.len()));
        let read = self.reader.read(&mut self.buf[..want]).await?;
        if read == 0 {
            return Err(FrameError::Truncated {
                expected: self.expected,
                received: self.received,
            });
        }
        self.received += read as u64;
        Ok(Some(Bytes::copy_from_slice(&self.buf[..read])))
    }

    /// Bytes still expected.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.expected - self.received
    }

    /// Bytes received so far.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Reads and drops the rest of the payload, returning the total size.
    ///
    /// # Errors
    ///
    /// Same as [`FileBody::next_chunk`].
    pub async fn discard(mut self) -> Result<u64, FrameError> {
        while self.next_chunk().await?.is_some() {}
        Ok(self.received)
    }

    /// Collects the rest of the payload into memory.
    ///
    /// # Errors
    ///
    /// Same as [`FileBody::next_chunk`].
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(usize::try_from(self.remaining()).unwrap_or(0));
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Write side of a connection.
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps a writer.
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one newline-terminated line and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the transport fails.
    pub async fn write_line(&mut self, text: &str) -> Result<(), FrameError> {
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Writes a file header. The caller writes the marker line first.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NameTooLong`] or [`FrameError::Io`].
    pub async fn write_file_header(&mut self, header: &FileHeader) -> Result<(), FrameError> {
        let encoded = header.encode()?;
        self.inner.write_all(&encoded).await?;
        Ok(())
    }

    /// Writes raw payload bytes without flushing.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the transport fails.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        self.inner.write_all(chunk).await?;
        Ok(())
    }

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the transport fails.
    pub async fn flush(&mut self) -> Result<(), FrameError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Sends a complete file: marker line, header, then `data` in
    /// `chunk_size` pieces.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NameTooLong`] or [`FrameError::Io`].
    pub async fn send_file(
        &mut self,
        marker: &str,
        name: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<(), FrameError> {
        let header = FileHeader::new(name, data.len() as u64);
        self.write_line(marker).await?;
        self.write_file_header(&header).await?;
        for chunk in data.chunks(chunk_size.max(1)) {
            self.write_chunk(chunk).await?;
        }
        self.flush().await
    }

    /// Shuts down the write half of the transport.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] if the transport fails.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
