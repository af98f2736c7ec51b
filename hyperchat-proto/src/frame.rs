//! Binary file frame that follows a [`crate::line::FILE_MARKER`] line.
//!
//! Wire format: `[u16 name length (BE)][name bytes (UTF-8)][u64 size (BE)]`
//! followed by exactly `size` raw bytes, in chunks of any size.

use crate::codec::FrameError;

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Longest file name the length prefix can describe.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Name and declared size of a file in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// File name as announced by the sender.
    pub name: String,
    /// Number of payload bytes that follow the header. Authoritative.
    pub size: u64,
}

impl FileHeader {
    /// Creates a header for a file of `size` bytes.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Encodes the header (not the payload) into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NameTooLong`] if the name does not fit the
    /// 16-bit length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let name = self.name.as_bytes();
        let len = u16::try_from(name.len()).map_err(|_| FrameError::NameTooLong(name.len()))?;
        let mut out = Vec::with_capacity(2 + name.len() + 8);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.size.to_be_bytes());
        Ok(out)
    }
}

/// Validates raw name bytes read off the wire.
pub(crate) fn decode_name(bytes: Vec<u8>) -> Result<String, FrameError> {
    String::from_utf8(bytes).map_err(|_| FrameError::InvalidName)
}
