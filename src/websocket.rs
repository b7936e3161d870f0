//! # WebSocket Client Channel
//!
//! One full-duplex channel per connected browser client, handled as an
//! Actix actor. Clients connect to `/ws/audio` and stream raw audio; the
//! relay forwards it to the transcription provider and sends utterance text
//! back as it arrives.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: binary frames carrying raw audio chunks
//!   (`packet-sent`); closing the socket is the `disconnect` event
//! - **Server → Client**: JSON text frames:
//!   - `{"type": "print-transcript", "text": ...}` — utterance text
//!   - `{"type": "error"}` — opaque upstream-failure signal
//!   - `{"type": "ping"/"pong", "timestamp": ...}` — heartbeat
//!
//! ## Actor Model:
//! Each connection is an independent actor that exclusively owns its relay
//! session manager, so all events for one client are processed in arrival
//! order on one task and sessions share no mutable state. Provider events
//! are pumped from the session's event channel into the actor mailbox.

use crate::error::AppError;
use crate::provider::{DeepgramSession, ProviderEvent};
use crate::relay::{ClientSink, RelaySessionManager};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// JSON messages exchanged with the client over text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Utterance text from the provider
    #[serde(rename = "print-transcript")]
    PrintTranscript {
        /// Recognized utterance text
        text: String,
    },

    /// Upstream failure signal; carries no detail by design
    #[serde(rename = "error")]
    Error,

    /// Heartbeat ping
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    /// Heartbeat pong response
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// WebSocket actor for one client channel.
pub struct RelayWebSocket {
    /// Connection id registered for this channel
    connection_id: Uuid,

    /// Shared application state
    state: AppState,

    /// The relay session bound to this channel (created on start)
    manager: Option<RelaySessionManager>,

    /// Last sign of life from the client
    last_heartbeat: Instant,
}

impl RelayWebSocket {
    pub fn new(connection_id: Uuid, state: AppState) -> Self {
        Self {
            connection_id,
            state,
            manager: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Open a provider session and bind it to this channel.
    ///
    /// Eager by design: the provider session is created as soon as the
    /// client channel is accepted, not on the first audio packet. The
    /// handshake completes in the background; until the `Opened` event
    /// arrives the relay stays in `Binding` and drops audio.
    fn connect_provider(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let config = self.state.get_config();

        match DeepgramSession::open(
            &config.provider.url,
            &config.provider.api_key,
            &config.provider.options(),
        ) {
            Ok((session, events)) => {
                if let Some(manager) = &mut self.manager {
                    manager.bind(Box::new(session));
                }
                self.spawn_event_pump(events, ctx);
            }
            Err(err) => {
                error!(
                    connection_id = %self.connection_id,
                    error = %err,
                    "could not build provider session"
                );
                self.send_message(ctx, &RelayMessage::Error);
            }
        }
    }

    /// Pump provider events from the session's channel into the actor
    /// mailbox, preserving their order. The pump ends when the provider
    /// session's task drops its sender; notices sent after the actor stops
    /// are discarded by the dead mailbox.
    fn spawn_event_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<ProviderEvent>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let addr = ctx.address();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                addr.do_send(ProviderNotice(event));
            }
        });
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &RelayMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "failed to serialize client message"),
        }
    }

    fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Outbound client message routed through the actor mailbox.
#[derive(Message)]
#[rtype(result = "()")]
struct Emit(RelayMessage);

/// One provider event delivered to the owning actor.
#[derive(Message)]
#[rtype(result = "()")]
struct ProviderNotice(ProviderEvent);

/// Outbound capability handed to the relay session manager.
///
/// Emissions go through the actor mailbox, so they interleave correctly
/// with everything else the actor does on its single task.
struct WsClientSink {
    addr: Addr<RelayWebSocket>,
}

impl ClientSink for WsClientSink {
    fn emit_transcript(&self, utterance: &str) {
        self.addr.do_send(Emit(RelayMessage::PrintTranscript {
            text: utterance.to_string(),
        }));
    }

    fn emit_error(&self) {
        self.addr.do_send(Emit(RelayMessage::Error));
    }
}

impl Actor for RelayWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Client channel accepted: create the relay session and eagerly bind a
    /// provider session (Init -> Binding).
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "client channel connected");
        self.state.record_connection_opened();

        let sink = WsClientSink {
            addr: ctx.address(),
        };
        self.manager = Some(RelaySessionManager::new(self.connection_id, Box::new(sink)));
        self.connect_provider(ctx);

        // Heartbeat: ping the client periodically, drop channels that have
        // gone silent past the configured timeout
        let relay_config = self.state.get_config().relay;
        let interval = Duration::from_secs(relay_config.heartbeat_interval_secs);
        let timeout = Duration::from_secs(relay_config.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(connection_id = %act.connection_id, "client heartbeat timeout, closing channel");
                ctx.stop();
            } else {
                let ping = RelayMessage::Ping {
                    timestamp: Self::now_millis(),
                };
                act.send_message(ctx, &ping);
            }
        });
    }

    /// Client channel gone: this is the `disconnect` event. Tears down the
    /// relay session (idempotently — a provider close may already have) and
    /// releases the registry slot.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(manager) = &mut self.manager {
            manager.on_client_disconnect();

            let (relayed, dropped, transcripts) = manager.counters();
            self.state
                .record_connection_closed(relayed, dropped, transcripts);
        }

        self.state
            .registry
            .write()
            .unwrap()
            .deregister(&self.connection_id);

        info!(connection_id = %self.connection_id, "client channel closed");
    }
}

/// Inbound client frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                // packet-sent: raw audio for the provider
                if let Some(manager) = &mut self.manager {
                    manager.on_packet(data.to_vec());
                }
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<RelayMessage>(&text) {
                Ok(RelayMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(RelayMessage::Ping { timestamp }) => {
                    self.last_heartbeat = Instant::now();
                    self.send_message(ctx, &RelayMessage::Pong { timestamp });
                }
                Ok(_) => {
                    warn!(connection_id = %self.connection_id, "unexpected message type from client");
                }
                Err(err) => {
                    warn!(connection_id = %self.connection_id, error = %err, "invalid JSON from client");
                }
            },
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.connection_id, ?reason, "client sent close");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "client protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Emit> for RelayWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Emit, ctx: &mut Self::Context) {
        self.send_message(ctx, &msg.0);
    }
}

impl Handler<ProviderNotice> for RelayWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ProviderNotice, _ctx: &mut Self::Context) {
        let Some(manager) = &mut self.manager else {
            return;
        };

        match msg.0 {
            ProviderEvent::Opened => manager.on_provider_opened(),
            ProviderEvent::Transcript(payload) => manager.on_provider_transcript(payload),
            ProviderEvent::Error(fault) => {
                self.state.increment_provider_errors();
                manager.on_provider_error(&fault);
            }
            ProviderEvent::Closed => manager.on_provider_closed(),
        }
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and registers the
/// new client channel.
///
/// Registration happens before the upgrade so a full server refuses the
/// channel with a regular 503 instead of accepting and then dropping it.
/// One relay session manager per accepted channel, never more.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let connection_id = Uuid::new_v4();
    info!(
        connection_id = %connection_id,
        peer = ?req.connection_info().peer_addr(),
        "new client channel request"
    );

    if let Err(message) = state.registry.write().unwrap().register(connection_id) {
        warn!(connection_id = %connection_id, %message, "client channel refused");
        return Err(AppError::CapacityExceeded(message).into());
    }

    let websocket = RelayWebSocket::new(connection_id, state.get_ref().clone());

    match ws::start(websocket, &req, stream) {
        Ok(response) => Ok(response),
        Err(err) => {
            // Upgrade failed; free the slot we just took
            state.registry.write().unwrap().deregister(&connection_id);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_transcript_serialization() {
        let message = RelayMessage::PrintTranscript {
            text: "hello world".to_string(),
        };

        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"type":"print-transcript","text":"hello world"}"#);
    }

    #[test]
    fn test_error_message_has_no_detail() {
        let json = serde_json::to_string(&RelayMessage::Error).unwrap();
        assert_eq!(json, r#"{"type":"error"}"#);
    }

    #[test]
    fn test_pong_roundtrip() {
        let json = r#"{"type":"pong","timestamp":1234}"#;
        let message: RelayMessage = serde_json::from_str(json).unwrap();

        match message {
            RelayMessage::Pong { timestamp } => assert_eq!(timestamp, 1234),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let json = r#"{"type":"packet-sent"}"#;
        assert!(serde_json::from_str::<RelayMessage>(json).is_err());
    }
}
