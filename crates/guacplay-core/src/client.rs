//! Display client contract and reference implementations.
//!
//! The display client is the external collaborator that turns replayed
//! instructions into pixels. The engine never inspects its state: snapshots
//! are an opaque associated type, stored at keyframes and handed back
//! unchanged on restore.

use async_trait::async_trait;

use crate::parser::Instruction;

/// A Guacamole display client driven by the playback engine.
///
/// The engine holds the client exclusively: it connects it once at
/// construction, hides the cursor until the recording shows it, and feeds
/// every replayed instruction through
/// [`handle_instruction`](Self::handle_instruction). A client is expected
/// to present a blank display immediately after [`connect`](Self::connect).
#[async_trait]
pub trait DisplayClient: Send + 'static {
    /// Opaque snapshot of the client's full visual state, restorable via
    /// [`import_state`](Self::import_state).
    type State: Clone + Send + 'static;

    /// Called when the playback tunnel is attached. Re-connecting returns
    /// the display to its blank initial state.
    fn connect(&mut self);

    /// Show or hide the local cursor layer.
    fn show_cursor(&mut self, visible: bool);

    /// Apply one replayed instruction.
    fn handle_instruction(&mut self, instruction: &Instruction);

    /// Capture a snapshot of the current state. May complete
    /// asynchronously; the engine awaits it before advancing.
    async fn export_state(&mut self) -> Self::State;

    /// Restore a previously captured snapshot. Synchronous.
    fn import_state(&mut self, state: &Self::State);
}

/// Display client that discards instructions. Useful for headless index
/// warm-up and tests that only exercise engine state.
#[derive(Debug, Default)]
pub struct HeadlessDisplay;

#[async_trait]
impl DisplayClient for HeadlessDisplay {
    type State = ();

    fn connect(&mut self) {}

    fn show_cursor(&mut self, _visible: bool) {}

    fn handle_instruction(&mut self, _instruction: &Instruction) {}

    async fn export_state(&mut self) -> Self::State {}

    fn import_state(&mut self, _state: &Self::State) {}
}

/// Display client that records every instruction it is handed.
///
/// Its snapshot is the full transcript, so two replay paths that should
/// produce the same display state can be compared directly. The cumulative
/// [`instructions_applied`](Self::instructions_applied) counter is not part
/// of the snapshot, which makes snapshot-based seek shortcuts observable.
#[derive(Debug, Default)]
pub struct TranscriptDisplay {
    transcript: Vec<Instruction>,
    instructions_applied: u64,
    cursor_visible: bool,
}

impl TranscriptDisplay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The instructions that produce the current display state, as if the
    /// recording had been played linearly from the start.
    #[must_use]
    pub fn transcript(&self) -> &[Instruction] {
        &self.transcript
    }

    /// Total instructions applied over the client's lifetime, across all
    /// seeks and restores.
    #[must_use]
    pub fn instructions_applied(&self) -> u64 {
        self.instructions_applied
    }

    #[must_use]
    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }
}

#[async_trait]
impl DisplayClient for TranscriptDisplay {
    type State = Vec<Instruction>;

    fn connect(&mut self) {
        self.transcript.clear();
    }

    fn show_cursor(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    fn handle_instruction(&mut self, instruction: &Instruction) {
        self.transcript.push(instruction.clone());
        self.instructions_applied += 1;
    }

    async fn export_state(&mut self) -> Self::State {
        self.transcript.clone()
    }

    fn import_state(&mut self, state: &Self::State) {
        self.transcript = state.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transcript_snapshot_round_trip() {
        let mut display = TranscriptDisplay::new();
        display.handle_instruction(&Instruction::new("size", vec!["0".into()]));
        let snapshot = display.export_state().await;

        display.handle_instruction(&Instruction::new("sync", vec!["10".into()]));
        assert_eq!(display.transcript().len(), 2);

        display.import_state(&snapshot);
        assert_eq!(display.transcript().len(), 1);
        // The lifetime counter is unaffected by restores.
        assert_eq!(display.instructions_applied(), 2);
    }

    #[test]
    fn reconnect_blanks_the_transcript() {
        let mut display = TranscriptDisplay::new();
        display.handle_instruction(&Instruction::new("rect", vec![]));
        display.connect();
        assert!(display.transcript().is_empty());
    }
}
