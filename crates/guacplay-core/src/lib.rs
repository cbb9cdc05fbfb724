//! guacplay-core: playback engine for Guacamole session recordings.
//!
//! A session recording is the text stream of Guacamole protocol instructions
//! captured from a live connection. This crate ingests such a stream, indexes
//! it into `sync`-delimited frames, and drives a display client that
//! reconstructs the session's visual state at any requested point in time.
//!
//! # Architecture
//!
//! ```text
//! RecordingSource → InstructionParser → Indexer → frame table
//!                                                     ↓
//!                     SessionRecording (play / pause / seek)
//!                                                     ↓
//!                      PlaybackTunnel → DisplayClient (+ keyframe snapshots)
//! ```
//!
//! Ingest runs as a background task from construction. Playback re-reads
//! frame byte ranges on demand, re-parses them, and feeds the instructions
//! through an inert tunnel into the display client. Keyframe-eligible frames
//! capture an opaque snapshot of client state on first replay, making later
//! seeks sublinear: a seek restores the nearest snapshot at or before the
//! target and replays only the gap.
//!
//! # Modules
//!
//! - `source`: random-access recording blobs
//! - `parser`: the length-prefixed instruction grammar
//! - `index`: frame table construction and timestamp search
//! - `events`: engine event stream
//! - `client`: display client contract and reference implementations
//! - `tunnel`: inert tunnel bridging replay into the client
//! - `recording`: the playback engine itself
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod events;
pub mod index;
pub mod parser;
pub mod recording;
pub mod source;
pub mod tunnel;

pub use client::{DisplayClient, HeadlessDisplay, TranscriptDisplay};
pub use error::{Error, Result};
pub use events::{EventReceiver, RecordingEvent};
pub use index::{Frame, FrameIndex, KEYFRAME_CHAR_INTERVAL, KEYFRAME_TIME_INTERVAL};
pub use parser::{element_size, Instruction, InstructionParser, MAX_ELEMENT_LENGTH, SYNC_OPCODE};
pub use recording::{PlaybackOptions, RecordingInfo, SessionRecording};
pub use source::{MemorySource, RecordingSource, BLOCK_SIZE};
pub use tunnel::{PlaybackTunnel, Tunnel};
