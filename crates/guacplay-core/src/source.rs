//! Random-access recording sources.
//!
//! A recording is an immutable text blob of Guacamole instructions, read in
//! chunks by ingest and in per-frame ranges by replay. The instruction
//! grammar is length-prefixed in Unicode code points, and every offset the
//! engine computes is a sum of those lengths, so sources measure offsets
//! and sizes in code points as well. Recordings produced by real servers
//! are ASCII, where the two units coincide.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Read granularity for background ingest, in code points.
pub const BLOCK_SIZE: usize = 262_144;

/// Random-access read of a recording blob.
///
/// The blob is immutable but may still be growing: `size` is re-read by
/// ingest before every chunk. Implementations must tolerate concurrent
/// reads and must not hold a lock across I/O.
#[async_trait]
pub trait RecordingSource: Send + Sync + 'static {
    /// Current size of the blob, in code points.
    fn size(&self) -> usize;

    /// Read the half-open range `[start, end)` as text.
    ///
    /// # Errors
    ///
    /// [`Error::Range`] when the range falls outside the blob, or an
    /// implementation-specific read failure.
    async fn read(&self, start: usize, end: usize) -> Result<String>;
}

/// In-memory recording source.
pub struct MemorySource {
    text: String,
    /// Byte offset of each code point, plus a one-past-the-end sentinel,
    /// for O(1) range reads on non-ASCII recordings.
    offsets: Vec<usize>,
}

impl MemorySource {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self { text, offsets }
    }

    /// Load a recording file into memory.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on read failure, [`Error::Utf8`] when the file is not
    /// valid UTF-8.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Utf8(e.utf8_error().valid_up_to()))?;
        Ok(Self::new(text))
    }
}

#[async_trait]
impl RecordingSource for MemorySource {
    fn size(&self) -> usize {
        self.offsets.len() - 1
    }

    async fn read(&self, start: usize, end: usize) -> Result<String> {
        if start > end || end > self.size() {
            return Err(Error::Range {
                start,
                end,
                size: self.size(),
            });
        }
        Ok(self.text[self.offsets[start]..self.offsets[end]].to_string())
    }
}
