//! # Relay Session Manager
//!
//! One manager per connected client. It owns the client's provider session
//! exclusively and runs the per-session state machine:
//!
//! ## Session Lifecycle:
//! 1. **Init**: client channel accepted, no provider session yet
//! 2. **Binding**: provider session created and opening; packets are routed
//!    to `send`, which drops them until the handshake completes
//! 3. **Active**: provider reported `Opened`; packets forward 1:1 in order,
//!    transcripts flow back to the client
//! 4. **TornDown**: terminal. Entered on provider close or client
//!    disconnect, whichever arrives first; the loser of the race observes
//!    `TornDown` and no-ops
//!
//! ## Ordering:
//! All methods are called from the owning client channel's task (the
//! WebSocket actor), so the manager needs no interior locking and events
//! from one client are processed in arrival order. Sessions are fully
//! isolated from each other.

use crate::provider::{transcript, ProviderFault, ProviderHandle, ReadyState};
use crate::relay::ClientSink;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State of one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Client accepted, no provider session bound yet
    Init,
    /// Provider session bound and opening
    Binding,
    /// Provider open; audio and transcripts flowing
    Active,
    /// Terminal; teardown has run
    TornDown,
}

impl RelayState {
    /// Status string for logs and reports.
    pub fn as_str(&self) -> &str {
        match self {
            RelayState::Init => "init",
            RelayState::Binding => "binding",
            RelayState::Active => "active",
            RelayState::TornDown => "torn_down",
        }
    }
}

/// Binds one client channel to one provider session and owns teardown.
pub struct RelaySessionManager {
    /// Connection id of the client channel this manager serves
    connection_id: Uuid,

    /// Current session state
    state: RelayState,

    /// The provider session bound to this client (exclusively owned)
    provider: Option<Box<dyn ProviderHandle>>,

    /// Outbound capability of the client channel
    client: Box<dyn ClientSink>,

    /// Packets forwarded to the provider
    packets_relayed: u64,

    /// Packets dropped while the provider was not open
    packets_dropped: u64,

    /// Utterances delivered to the client
    transcripts_relayed: u64,
}

impl RelaySessionManager {
    /// Create a manager in `Init` for an accepted client channel.
    pub fn new(connection_id: Uuid, client: Box<dyn ClientSink>) -> Self {
        Self {
            connection_id,
            state: RelayState::Init,
            provider: None,
            client,
            packets_relayed: 0,
            packets_dropped: 0,
            transcripts_relayed: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Counters for metrics accounting when the session ends:
    /// (packets relayed, packets dropped, transcripts relayed).
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.packets_relayed,
            self.packets_dropped,
            self.transcripts_relayed,
        )
    }

    /// Bind a freshly opened provider session.
    ///
    /// ## State Transition:
    /// Init -> Binding
    pub fn bind(&mut self, provider: Box<dyn ProviderHandle>) {
        debug_assert_eq!(self.state, RelayState::Init, "bind is only valid from Init");

        self.provider = Some(provider);
        self.state = RelayState::Binding;
        debug!(connection_id = %self.connection_id, "provider session bound");
    }

    /// Rebind a fresh provider session to the same client channel.
    ///
    /// This is the only supported retry path and is caller-triggered, never
    /// automatic. Any previous binding is torn down first so no stale wiring
    /// survives the swap.
    ///
    /// ## State Transition:
    /// any -> Binding
    pub fn rebind(&mut self, provider: Box<dyn ProviderHandle>) {
        if self.state != RelayState::TornDown {
            self.teardown();
        }

        self.provider = Some(provider);
        self.state = RelayState::Binding;
        info!(connection_id = %self.connection_id, "provider session rebound");
    }

    /// Handle one inbound audio packet from the client.
    ///
    /// Forwarded to the provider only while its session is open; otherwise
    /// dropped on the floor. Live-relay semantics: never queued, never an
    /// error.
    pub fn on_packet(&mut self, chunk: Vec<u8>) {
        let provider = match self.state {
            RelayState::Binding | RelayState::Active => match &self.provider {
                Some(provider) => provider,
                None => {
                    self.packets_dropped += 1;
                    return;
                }
            },
            RelayState::Init | RelayState::TornDown => {
                self.packets_dropped += 1;
                return;
            }
        };

        if provider.ready_state() == ReadyState::Open {
            provider.send(chunk);
            self.packets_relayed += 1;
        } else {
            self.packets_dropped += 1;
        }
    }

    /// The provider completed its handshake.
    ///
    /// ## State Transition:
    /// Binding -> Active
    pub fn on_provider_opened(&mut self) {
        match self.state {
            RelayState::Binding => {
                self.state = RelayState::Active;
                info!(connection_id = %self.connection_id, "relay session active");
            }
            // A late Opened after teardown raced ahead; close was already
            // requested on the provider, nothing to do
            RelayState::TornDown => {}
            other => {
                warn!(
                    connection_id = %self.connection_id,
                    state = other.as_str(),
                    "unexpected provider open"
                );
            }
        }
    }

    /// One raw transcript payload arrived from the provider.
    ///
    /// On a parseable payload the utterance is forwarded 1:1 to the client;
    /// on a structural mismatch the event is suppressed and the raw payload
    /// logged. A parse failure never reaches the client.
    pub fn on_provider_transcript(&mut self, payload: Value) {
        if self.state == RelayState::TornDown {
            return;
        }

        match transcript::extract_utterance(&payload) {
            Some(utterance) => {
                self.client.emit_transcript(&utterance);
                self.transcripts_relayed += 1;
                info!(connection_id = %self.connection_id, utterance = %utterance, "new utterance");
            }
            None => {
                warn!(
                    connection_id = %self.connection_id,
                    payload = %payload,
                    "suppressed transcript payload with unexpected shape"
                );
            }
        }
    }

    /// The provider reported a protocol or transport fault.
    ///
    /// The client gets an opaque error signal; the session is NOT torn down.
    /// An error does not imply the stream closed — only a `closed` event
    /// forces teardown, so a transient upstream warning never kills a live
    /// session. An errored-but-never-closed provider session stays bound
    /// until the client disconnects.
    pub fn on_provider_error(&mut self, fault: &ProviderFault) {
        warn!(
            connection_id = %self.connection_id,
            kind = %fault.kind,
            detail = %fault.detail,
            "provider error"
        );

        if self.state == RelayState::TornDown {
            return;
        }

        self.client.emit_error();
    }

    /// The provider stream terminated.
    pub fn on_provider_closed(&mut self) {
        if self.teardown() {
            info!(connection_id = %self.connection_id, "relay torn down: provider closed");
        }
    }

    /// The client channel disconnected.
    pub fn on_client_disconnect(&mut self) {
        if self.teardown() {
            info!(connection_id = %self.connection_id, "relay torn down: client disconnected");
        }
    }

    /// Run teardown exactly once.
    ///
    /// The first trigger (provider close or client disconnect) transitions
    /// to `TornDown` and closes the provider session; any later trigger
    /// observes `TornDown` and no-ops. Returns whether this call performed
    /// the teardown.
    fn teardown(&mut self) -> bool {
        if self.state == RelayState::TornDown {
            return false;
        }

        self.state = RelayState::TornDown;

        if let Some(provider) = &self.provider {
            provider.close();
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, RwLock};

    /// Spy provider session recording every call that reaches it.
    #[derive(Clone)]
    struct SpyProvider {
        sends: Arc<Mutex<Vec<Vec<u8>>>>,
        close_calls: Arc<AtomicUsize>,
        state: Arc<RwLock<ReadyState>>,
    }

    impl SpyProvider {
        fn new(state: ReadyState) -> Self {
            Self {
                sends: Arc::new(Mutex::new(Vec::new())),
                close_calls: Arc::new(AtomicUsize::new(0)),
                state: Arc::new(RwLock::new(state)),
            }
        }

        fn set_state(&self, state: ReadyState) {
            *self.state.write().unwrap() = state;
        }

        fn send_count(&self) -> usize {
            self.sends.lock().unwrap().len()
        }

        fn close_count(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    impl ProviderHandle for SpyProvider {
        fn send(&self, chunk: Vec<u8>) {
            self.sends.lock().unwrap().push(chunk);
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn ready_state(&self) -> ReadyState {
            *self.state.read().unwrap()
        }
    }

    /// Fake client channel recording everything emitted to it.
    #[derive(Clone, Default)]
    struct FakeClient {
        transcripts: Arc<Mutex<Vec<String>>>,
        error_signals: Arc<AtomicUsize>,
    }

    impl FakeClient {
        fn transcripts(&self) -> Vec<String> {
            self.transcripts.lock().unwrap().clone()
        }

        fn error_count(&self) -> usize {
            self.error_signals.load(Ordering::SeqCst)
        }
    }

    impl ClientSink for FakeClient {
        fn emit_transcript(&self, utterance: &str) {
            self.transcripts.lock().unwrap().push(utterance.to_string());
        }

        fn emit_error(&self) {
            self.error_signals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager_with(client: &FakeClient) -> RelaySessionManager {
        RelaySessionManager::new(Uuid::new_v4(), Box::new(client.clone()))
    }

    #[test]
    fn test_bind_enters_binding() {
        let client = FakeClient::default();
        let mut manager = manager_with(&client);
        assert_eq!(manager.state(), RelayState::Init);

        manager.bind(Box::new(SpyProvider::new(ReadyState::Connecting)));
        assert_eq!(manager.state(), RelayState::Binding);
    }

    #[test]
    fn test_packets_before_open_never_reach_provider() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Connecting);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));

        manager.on_packet(vec![1]);
        manager.on_packet(vec![2]);
        manager.on_packet(vec![3]);

        assert_eq!(spy.send_count(), 0);
        let (relayed, dropped, _) = manager.counters();
        assert_eq!(relayed, 0);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_packets_after_open_forward_in_order() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Connecting);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));

        spy.set_state(ReadyState::Open);
        manager.on_provider_opened();
        assert_eq!(manager.state(), RelayState::Active);

        manager.on_packet(vec![1]);
        manager.on_packet(vec![2]);
        manager.on_packet(vec![3]);

        assert_eq!(
            *spy.sends.lock().unwrap(),
            vec![vec![1], vec![2], vec![3]]
        );
    }

    #[test]
    fn test_packets_after_teardown_are_dropped() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));
        manager.on_provider_opened();

        manager.on_client_disconnect();
        manager.on_packet(vec![9]);

        assert_eq!(spy.send_count(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));
        manager.on_provider_opened();

        manager.on_client_disconnect();
        manager.on_client_disconnect();

        assert_eq!(spy.close_count(), 1);
        assert_eq!(manager.state(), RelayState::TornDown);
    }

    #[test]
    fn test_racing_close_runs_one_teardown() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));
        manager.on_provider_opened();

        // Provider close and client disconnect race; the second trigger
        // observes TornDown and no-ops
        manager.on_provider_closed();
        manager.on_client_disconnect();

        assert_eq!(spy.close_count(), 1);
        assert_eq!(manager.state(), RelayState::TornDown);
    }

    #[test]
    fn test_malformed_payloads_emit_nothing() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy));
        manager.on_provider_opened();

        manager.on_provider_transcript(json!({}));
        manager.on_provider_transcript(json!({"channel": {}}));
        manager.on_provider_transcript(json!({"channel": {"alternatives": []}}));

        assert!(client.transcripts().is_empty());
        assert_eq!(client.error_count(), 0);
    }

    #[test]
    fn test_well_formed_payload_emits_once() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy));
        manager.on_provider_opened();

        manager.on_provider_transcript(json!({
            "channel": {"alternatives": [{"transcript": "hello world"}]}
        }));

        assert_eq!(client.transcripts(), vec!["hello world".to_string()]);
    }

    #[test]
    fn test_provider_error_is_surfaced_but_not_fatal() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));
        manager.on_provider_opened();

        manager.on_provider_error(&ProviderFault {
            kind: "transport".to_string(),
            detail: "interrupted".to_string(),
        });

        // Client sees an opaque error; the session stays up
        assert_eq!(client.error_count(), 1);
        assert_eq!(manager.state(), RelayState::Active);
        assert_eq!(spy.close_count(), 0);
    }

    #[test]
    fn test_full_session_scenario() {
        // Connect -> provider opens -> 3 packets -> 1 transcript -> disconnect
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Connecting);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));

        spy.set_state(ReadyState::Open);
        manager.on_provider_opened();

        manager.on_packet(vec![1]);
        manager.on_packet(vec![2]);
        manager.on_packet(vec![3]);

        manager.on_provider_transcript(json!({
            "channel": {"alternatives": [{"transcript": "testing one two"}]}
        }));

        manager.on_client_disconnect();

        assert_eq!(spy.send_count(), 3);
        assert_eq!(client.transcripts().len(), 1);
        assert_eq!(spy.close_count(), 1);
        assert_eq!(manager.state(), RelayState::TornDown);

        let (relayed, dropped, transcripts) = manager.counters();
        assert_eq!((relayed, dropped, transcripts), (3, 0, 1));
    }

    #[test]
    fn test_rebind_closes_previous_provider() {
        let client = FakeClient::default();
        let first = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(first.clone()));
        manager.on_provider_opened();

        let second = SpyProvider::new(ReadyState::Connecting);
        manager.rebind(Box::new(second.clone()));

        // Old binding is torn down, new one starts fresh in Binding
        assert_eq!(first.close_count(), 1);
        assert_eq!(manager.state(), RelayState::Binding);

        second.set_state(ReadyState::Open);
        manager.on_provider_opened();
        manager.on_packet(vec![7]);

        assert_eq!(first.send_count(), 0);
        assert_eq!(second.send_count(), 1);
    }

    #[test]
    fn test_rebind_after_teardown_supports_retry() {
        let client = FakeClient::default();
        let first = SpyProvider::new(ReadyState::Open);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(first.clone()));
        manager.on_provider_opened();
        manager.on_provider_closed();
        assert_eq!(manager.state(), RelayState::TornDown);

        let second = SpyProvider::new(ReadyState::Connecting);
        manager.rebind(Box::new(second.clone()));

        // No double-close of the already torn down provider
        assert_eq!(first.close_count(), 1);
        assert_eq!(manager.state(), RelayState::Binding);
    }

    #[test]
    fn test_late_open_after_teardown_is_ignored() {
        let client = FakeClient::default();
        let spy = SpyProvider::new(ReadyState::Connecting);
        let mut manager = manager_with(&client);
        manager.bind(Box::new(spy.clone()));

        manager.on_client_disconnect();
        manager.on_provider_opened();

        assert_eq!(manager.state(), RelayState::TornDown);
    }
}
