//! # Relay Module
//!
//! Binds exactly one client channel to exactly one provider session and owns
//! the wiring between them: client audio packets flow up to the provider,
//! provider transcripts and error signals flow back down to the client, and
//! teardown runs exactly once no matter which side disconnects first.

pub mod manager;   // Per-session state machine and event wiring

pub use manager::{RelaySessionManager, RelayState};

/// Outbound capability of one client channel.
///
/// The relay manager never talks to a transport directly; it emits through
/// this seam. The WebSocket actor implements it over its own mailbox, and
/// tests implement it with a recording fake.
pub trait ClientSink {
    /// Deliver one utterance to the client (`print-transcript`).
    fn emit_transcript(&self, utterance: &str);

    /// Signal an upstream failure to the client (`error`, no detail —
    /// upstream diagnostics are never leaked).
    fn emit_error(&self);
}
