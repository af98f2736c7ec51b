//! Shared protocol definitions for the `HyperChat` wire format.
//!
//! A connection carries two interleaved sub-streams over one byte stream:
//! newline-terminated text lines, and a length-prefixed binary file frame
//! that may only follow a [`line::FILE_MARKER`] line.

pub mod codec;
pub mod frame;
pub mod line;
