//! Inert tunnel bridging replayed instructions into the display client.
//!
//! A live Guacamole client sits behind a tunnel that carries instructions
//! both ways. During playback there is no remote end: the tunnel's
//! transport operations are no-ops and instructions flow one way, from the
//! replay loop into the client.

use crate::client::DisplayClient;
use crate::parser::Instruction;

/// Transport-facing contract of a Guacamole tunnel.
pub trait Tunnel {
    fn connect(&mut self);
    fn send_message(&mut self, instruction: &Instruction);
    fn disconnect(&mut self);
}

/// Degenerate tunnel feeding replayed instructions straight into the
/// display client.
///
/// The client is connected once, when the tunnel is built, and never
/// disconnected; its cursor starts hidden and stays so until the recording
/// shows it.
pub struct PlaybackTunnel<C: DisplayClient> {
    client: C,
}

impl<C: DisplayClient> PlaybackTunnel<C> {
    #[must_use]
    pub fn new(mut client: C) -> Self {
        client.connect();
        client.show_cursor(false);
        Self { client }
    }

    /// Hand one replayed instruction to the display client.
    pub fn receive_instruction(&mut self, instruction: &Instruction) {
        self.client.handle_instruction(instruction);
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

impl<C: DisplayClient> Tunnel for PlaybackTunnel<C> {
    fn connect(&mut self) {}

    fn send_message(&mut self, _instruction: &Instruction) {}

    fn disconnect(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TranscriptDisplay;

    #[test]
    fn connects_client_with_cursor_hidden() {
        let tunnel = PlaybackTunnel::new(TranscriptDisplay::new());
        assert!(!tunnel.client().cursor_visible());
    }

    #[test]
    fn forwards_instructions() {
        let mut tunnel = PlaybackTunnel::new(TranscriptDisplay::new());
        tunnel.receive_instruction(&Instruction::new("rect", vec!["0".into()]));
        assert_eq!(tunnel.client().transcript().len(), 1);
    }

    #[test]
    fn transport_operations_are_inert() {
        let mut tunnel = PlaybackTunnel::new(TranscriptDisplay::new());
        tunnel.send_message(&Instruction::new("mouse", vec![]));
        Tunnel::connect(&mut tunnel);
        tunnel.disconnect();
        assert!(tunnel.client().transcript().is_empty());
    }
}
