//! # Live Provider Session
//!
//! One WebSocket connection to the provider's live-transcription endpoint.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: `open()` returns immediately; the upstream handshake
//!    runs in a background task. Audio sent in this window is dropped.
//! 2. **Open**: handshake completed, signaled by `ProviderEvent::Opened` on
//!    the event channel (never by the return value of `open()`).
//! 3. **Closed**: stream ended, by local `close()` or remote termination.
//!    Signaled once by `ProviderEvent::Closed`.
//!
//! ## Task Layout:
//! A single background task owns the socket: it splits the stream and
//! `select!`s between outbound frames (audio, close) and inbound provider
//! messages. The `DeepgramSession` handle only touches the shared readiness
//! state and the outbound channel, so `send` and `close` never block.

use crate::provider::{ProviderEvent, ProviderFault, ProviderHandle, ProviderOptions, ReadyState};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, warn};

/// Frames the session handle pushes to the socket-owning task.
enum OutboundFrame {
    /// One audio chunk for the provider
    Audio(Vec<u8>),
    /// Terminate the stream with a close frame
    Close,
}

/// Handle on one live provider session.
///
/// Cheap to move into a relay session; the actual socket lives in a
/// background task that exits when the stream ends.
pub struct DeepgramSession {
    state: Arc<RwLock<ReadyState>>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    close_requested: Arc<AtomicBool>,
}

impl DeepgramSession {
    /// Open a live session against the provider.
    ///
    /// Returns the session handle and its event channel immediately; the
    /// handshake completes asynchronously and is signaled by
    /// `ProviderEvent::Opened`. An `Err` here means the request itself could
    /// not be built (bad endpoint URL), not that the connection failed —
    /// connection failures arrive as `Error` + `Closed` events.
    pub fn open(
        endpoint: &str,
        api_key: &str,
        options: &ProviderOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProviderEvent>)> {
        let url = format!("{}?{}", endpoint, options.to_query_string());
        let request = build_ws_request(&url, api_key)?;

        let state = Arc::new(RwLock::new(ReadyState::Connecting));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(request, state.clone(), events_tx, outbound_rx));

        let session = Self {
            state,
            outbound: outbound_tx,
            close_requested: Arc::new(AtomicBool::new(false)),
        };

        Ok((session, events_rx))
    }
}

impl ProviderHandle for DeepgramSession {
    /// Forward one audio chunk upstream.
    ///
    /// No-ops unless the session is `Open`: audio arriving before or after
    /// the handshake window is unusable and must not be buffered or retried.
    fn send(&self, chunk: Vec<u8>) {
        if self.ready_state() != ReadyState::Open {
            return;
        }

        // Receiver gone means the socket task already exited; nothing to do
        let _ = self.outbound.send(OutboundFrame::Audio(chunk));
    }

    /// Request stream termination. Only the first call has effect.
    fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.outbound.send(OutboundFrame::Close);
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.read().unwrap()
    }
}

/// Build the upgrade request for the provider endpoint.
///
/// The provider authenticates live sessions with a `Token` authorization
/// header on the upgrade request.
fn build_ws_request(url: &str, api_key: &str) -> Result<tungstenite::http::Request<()>> {
    use tungstenite::client::IntoClientRequest;
    use tungstenite::http::header::{HeaderValue, AUTHORIZATION};

    let mut request = url
        .into_client_request()
        .context("failed to build provider upgrade request")?;

    let token = HeaderValue::from_str(&format!("Token {}", api_key))
        .context("provider API key is not a valid header value")?;
    request.headers_mut().insert(AUTHORIZATION, token);

    Ok(request)
}

fn set_state(state: &Arc<RwLock<ReadyState>>, new_state: ReadyState) {
    *state.write().unwrap() = new_state;
}

/// Socket-owning task for one provider session.
///
/// Runs until the outbound channel closes, a close frame is requested, or
/// the upstream stream ends. Always finishes by marking the session closed
/// and emitting exactly one `Closed` event.
async fn run_session(
    request: tungstenite::http::Request<()>,
    state: Arc<RwLock<ReadyState>>,
    events: mpsc::UnboundedSender<ProviderEvent>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            error!(error = %err, "provider handshake failed");
            set_state(&state, ReadyState::Errored);
            let _ = events.send(ProviderEvent::Error(ProviderFault {
                kind: "connect".to_string(),
                detail: err.to_string(),
            }));
            set_state(&state, ReadyState::Closed);
            let _ = events.send(ProviderEvent::Closed);
            return;
        }
    };

    debug!("provider stream open");
    set_state(&state, ReadyState::Open);
    let _ = events.send(ProviderEvent::Opened);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Audio(chunk)) => {
                    if let Err(err) = sink.send(tungstenite::Message::Binary(chunk)).await {
                        // A failed send is a fault, not a close: the read
                        // side decides when the stream is actually done
                        warn!(error = %err, "provider send failed");
                        set_state(&state, ReadyState::Errored);
                        let _ = events.send(ProviderEvent::Error(ProviderFault {
                            kind: "transport".to_string(),
                            detail: err.to_string(),
                        }));
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    // Best-effort close frame; stale audio is discarded, not drained
                    let _ = sink.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(payload) => {
                            let _ = events.send(ProviderEvent::Transcript(payload));
                        }
                        Err(err) => {
                            warn!(error = %err, raw = %text, "provider sent non-JSON text frame");
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    debug!(?frame, "provider closed the stream");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by the protocol layer; binary unexpected
                }
                Some(Err(err)) => {
                    error!(error = %err, "provider stream error");
                    set_state(&state, ReadyState::Errored);
                    let _ = events.send(ProviderEvent::Error(ProviderFault {
                        kind: "transport".to_string(),
                        detail: err.to_string(),
                    }));
                    // Read errors end the stream; Closed follows below
                    break;
                }
                None => break,
            },
        }
    }

    set_state(&state, ReadyState::Closed);
    let _ = events.send(ProviderEvent::Closed);
    debug!("provider stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_starts_connecting() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: true,
            smart_format: true,
            model: "nova".to_string(),
        };

        let (session, _events) =
            DeepgramSession::open("wss://127.0.0.1:9", "test-key", &options).unwrap();

        // The handshake runs in the background; the handle starts connecting
        assert_eq!(session.ready_state(), ReadyState::Connecting);
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: false,
            smart_format: false,
            model: "nova".to_string(),
        };

        let (session, _events) =
            DeepgramSession::open("wss://127.0.0.1:9", "test-key", &options).unwrap();

        // Must not panic, block, or queue
        session.send(vec![0u8; 320]);
        assert_ne!(session.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_error_then_closed() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: true,
            smart_format: true,
            model: "nova".to_string(),
        };

        // Port 9 (discard) with nothing listening; the connect task fails fast
        let (session, mut events) =
            DeepgramSession::open("ws://127.0.0.1:9", "test-key", &options).unwrap();

        let first = events.recv().await.expect("expected an error event");
        assert!(matches!(first, ProviderEvent::Error(_)));

        let second = events.recv().await.expect("expected a closed event");
        assert!(matches!(second, ProviderEvent::Closed));

        assert_eq!(session.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: true,
            smart_format: true,
            model: "nova".to_string(),
        };

        let (session, _events) =
            DeepgramSession::open("wss://127.0.0.1:9", "test-key", &options).unwrap();

        session.close();
        session.close();
        assert!(session.close_requested.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bad_endpoint_is_rejected_up_front() {
        let options = ProviderOptions {
            language: "en".to_string(),
            punctuate: true,
            smart_format: true,
            model: "nova".to_string(),
        };

        assert!(DeepgramSession::open("not a url", "key", &options).is_err());
    }
}
