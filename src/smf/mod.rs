//! Standard MIDI File encoding and decoding.
//!
//! Decoding is strict about structure (header, chunk lengths, variable-length
//! quantities) and lenient about content: events it cannot represent are
//! skipped and reported in [`Decoded::skipped`] rather than failing the load.

mod reader;
pub mod vlq;
mod writer;

use crate::timing::Sequence;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Omit repeated channel status bytes.
    pub running_status: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            running_status: true,
        }
    }
}

#[derive(Debug)]
pub struct Decoded {
    pub sequence: Sequence,
    /// One entry per event that was stepped over.
    pub skipped: Vec<Error>,
}

pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    reader::decode(bytes)
}

/// Fails only when two consecutive events of a track are further apart than
/// a delta time can express.
pub fn encode(sequence: &Sequence, options: &WriteOptions) -> Result<Vec<u8>> {
    writer::encode(sequence, options)
}
