//! # Transcription Provider Module
//!
//! Wraps one streaming connection to the external speech-to-text provider.
//! The provider is treated as an opaque duplex WebSocket endpoint: audio
//! bytes go up, JSON transcript payloads come down.
//!
//! ## Key Components:
//! - **ProviderHandle**: The capability a relay session holds on an upstream
//!   session (`send`, `close`, `ready_state`). Implemented by the live
//!   Deepgram session and by test doubles.
//! - **ProviderEvent**: Inbound event stream of a session (opened, transcript,
//!   error, closed).
//! - **Transcript parsing**: Extracting utterance text from the provider's
//!   nested payload shape.
//!
//! ## Session Contract:
//! - `send` is valid only while the session is `Open`; at any other time it
//!   is a silent no-op, never an error and never a queue. Audio that arrives
//!   outside the handshake window is unusable live data.
//! - `close` is idempotent; calling it on an already-closed session is a no-op.
//! - An `Error` event does NOT imply the session closed. Only a `Closed`
//!   event terminates the stream, and it fires exactly once.

pub mod deepgram;     // Live WebSocket session to the provider
pub mod transcript;   // Transcript payload parsing

pub use deepgram::DeepgramSession;

use serde_json::Value;

/// Readiness state of an upstream provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in flight; audio sent now is dropped
    Connecting,
    /// Handshake complete; audio flows
    Open,
    /// Stream terminated (locally or by the provider)
    Closed,
    /// A transport fault was observed; the stream may still be up
    Errored,
}

/// Events emitted by a provider session over its event channel.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Upstream handshake completed; fires once per session
    Opened,
    /// One raw transcript payload as received from the provider
    Transcript(Value),
    /// Protocol or transport fault; does not imply the stream closed
    Error(ProviderFault),
    /// Stream terminated; fires once, whether closed locally or remotely
    Closed,
}

/// Provider-defined fault information carried by an `Error` event.
#[derive(Debug, Clone)]
pub struct ProviderFault {
    /// Fault category (e.g. "connect", "transport")
    pub kind: String,
    /// Provider- or transport-supplied detail string
    pub detail: String,
}

/// Options sent to the provider when opening a live session.
///
/// These map to the provider's live-transcription query parameters.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub language: String,
    pub punctuate: bool,
    pub smart_format: bool,
    pub model: String,
}

impl ProviderOptions {
    /// Encode the options as a URL query string.
    pub fn to_query_string(&self) -> String {
        format!(
            "language={}&punctuate={}&smart_format={}&model={}",
            self.language, self.punctuate, self.smart_format, self.model
        )
    }
}

/// The capability a relay session holds on one upstream provider session.
///
/// ## Contract:
/// - `send` no-ops unless `ready_state()` is `Open` (live-relay semantics:
///   drop, never queue).
/// - `close` is safe to call any number of times; only the first has effect.
pub trait ProviderHandle {
    /// Forward one audio chunk upstream. Silent no-op while not `Open`.
    fn send(&self, chunk: Vec<u8>);

    /// Terminate the upstream session. Idempotent.
    fn close(&self);

    /// Current readiness state of the session.
    fn ready_state(&self) -> ReadyState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_query_string() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: true,
            smart_format: true,
            model: "nova".to_string(),
        };

        assert_eq!(
            options.to_query_string(),
            "language=en&punctuate=true&smart_format=true&model=nova"
        );
    }
}
