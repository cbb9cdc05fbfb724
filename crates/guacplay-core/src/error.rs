//! Error types for recording ingest and playback.

/// Errors surfaced while reading, parsing, or replaying a recording.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed instruction grammar.
    #[error("malformed instruction: {0}")]
    Parse(String),

    /// An element declared a length beyond the sane bound.
    #[error("element length {length} exceeds maximum {max}")]
    ElementTooLong {
        /// Declared length, in code points.
        length: usize,
        /// The enforced bound.
        max: usize,
    },

    /// A read fell outside the recording blob.
    #[error("range {start}..{end} out of bounds for source of size {size}")]
    Range {
        /// Requested start offset.
        start: usize,
        /// Requested end offset.
        end: usize,
        /// Source size at the time of the read.
        size: usize,
    },

    /// The recording bytes are not valid UTF-8.
    #[error("recording is not valid UTF-8 (first invalid byte at offset {0})")]
    Utf8(usize),

    /// I/O error from a file-backed source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for recording operations.
pub type Result<T> = std::result::Result<T, Error>;
