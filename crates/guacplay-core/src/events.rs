//! Engine event stream.
//!
//! The engine reports state changes as tagged events on an unbounded
//! channel rather than via callback slots. Consumers react from their own
//! task, so an event handler is free to call straight back into the engine
//! (`seek` from inside a `Seek` handler, `cancel` from `Progress`, and so
//! on) without re-entering engine locks. A dropped receiver is tolerated
//! silently.

use serde::{Deserialize, Serialize};

/// Events emitted by a [`SessionRecording`](crate::SessionRecording).
///
/// Delivery order equals emission order; within one play run, `Seek`
/// events arrive in strictly increasing frame order, culminating in
/// `Pause` when the end of the indexed stream is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordingEvent {
    /// Ingest reached the end of the blob; the frame table is complete.
    Load,
    /// Ingest or replay failed. Already-indexed frames remain playable.
    Error { message: String },
    /// Ingest was aborted. Emitted exactly once, terminal for ingest only.
    Abort,
    /// A frame was indexed. `duration_ms` is the recording's duration so
    /// far; `parsed` the offset one past the new frame.
    Progress { duration_ms: u64, parsed: usize },
    /// Playback started.
    Play,
    /// Playback stopped, by request or at end of stream.
    Pause,
    /// The engine finished rendering a frame during a seek or playback
    /// step: `step` of `total` frames into the current replay pass.
    Seek {
        position_ms: u64,
        step: usize,
        total: usize,
    },
}

/// Receiving half of a recording's event stream.
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<RecordingEvent>;

pub(crate) type EventSender = tokio::sync::mpsc::UnboundedSender<RecordingEvent>;
