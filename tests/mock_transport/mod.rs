//! In-memory peer transport for exercising the session controller without
//! a media stack.
//!
//! - `MockTransport` records every call and lets tests inject transport
//!   events as the media library would
//! - `MockTransportFactory` hands out one `MockTransport` per attempt
//! - `RecordingListener` captures listener notifications in order
//! - `mount_realtime` wires the token and SDP endpoints on a wiremock server

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_voice::core::realtime::{
    DataChannelState, IceConnectionState, PeerTransport, PeerTransportFactory, TrackKind,
    TransportEvent, TransportEventSender, VoiceError, VoiceResult, VoiceSessionListener,
};

pub const MOCK_OFFER: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n";
pub const MOCK_ANSWER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const MOCK_TOKEN: &str = "ek_mock_token";

// =============================================================================
// Mock Transport
// =============================================================================

/// Failure injection for a `MockTransport`.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_remote_description: bool,
    pub offer_delay: Option<Duration>,
}

pub struct MockTransport {
    events: TransportEventSender,
    behavior: MockBehavior,
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    enabled_tracks: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockTransport {
    /// Deliver `event` as if raised by the media library.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_ice(&self, state: IceConnectionState) {
        self.emit(TransportEvent::IceStateChanged(state));
    }

    pub fn emit_channel(&self, state: DataChannelState) {
        self.emit(TransportEvent::DataChannelStateChanged(state));
    }

    pub fn emit_message(&self, value: Value) {
        self.emit(TransportEvent::DataChannelMessage(Bytes::from(
            value.to_string(),
        )));
    }

    pub fn emit_audio_track(&self, id: &str) {
        self.emit(TransportEvent::RemoteTrack {
            id: id.to_string(),
            kind: TrackKind::Audio,
        });
    }

    /// Connect ICE and open the data channel.
    pub fn bring_up(&self) {
        self.emit_ice(IceConnectionState::Connected);
        self.emit_channel(DataChannelState::Open);
    }

    /// Names of the `PeerTransport` methods called so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Every text frame written to the data channel, parsed as JSON.
    pub fn sent_events(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, event_type: &str) -> Vec<Value> {
        self.sent_events()
            .into_iter()
            .filter(|event| event["type"] == event_type)
            .collect()
    }

    pub fn enabled_tracks(&self) -> Vec<String> {
        self.enabled_tracks.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_local_audio_track(&self) -> VoiceResult<()> {
        self.record("add_local_audio_track");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> VoiceResult<()> {
        self.record(&format!("create_data_channel:{label}"));
        Ok(())
    }

    async fn create_offer(&self) -> VoiceResult<String> {
        self.record("create_offer");
        if let Some(delay) = self.behavior.offer_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(MOCK_OFFER.to_string())
    }

    async fn set_local_description(&self, _sdp: &str) -> VoiceResult<()> {
        self.record("set_local_description");
        Ok(())
    }

    async fn set_remote_description(&self, _sdp: &str) -> VoiceResult<()> {
        self.record("set_remote_description");
        if self.behavior.fail_remote_description {
            return Err(VoiceError::Transport("invalid answer".to_string()));
        }
        Ok(())
    }

    async fn enable_remote_track(&self, track_id: &str) -> VoiceResult<()> {
        self.enabled_tracks.lock().push(track_id.to_string());
        Ok(())
    }

    async fn send_text(&self, text: &str) -> VoiceResult<()> {
        if self.is_closed() {
            return Err(VoiceError::Transport("data channel closed".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> VoiceResult<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates `MockTransport`s and keeps a handle to each.
#[derive(Default)]
pub struct MockTransportFactory {
    behavior: MockBehavior,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl PeerTransportFactory for MockTransportFactory {
    async fn create(&self, events: TransportEventSender) -> VoiceResult<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockTransport {
            events,
            behavior: self.behavior.clone(),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            enabled_tracks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// =============================================================================
// Recording Listener
// =============================================================================

/// Records listener notifications as short strings, e.g. `connected` or
/// `error:timeout: ...`.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == name).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("error:").map(str::to_string))
            .collect()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

#[async_trait]
impl VoiceSessionListener for RecordingListener {
    async fn on_connected(&self) {
        self.push("connected");
    }

    async fn on_disconnected(&self) {
        self.push("disconnected");
    }

    async fn on_speaking_started(&self) {
        self.push("speaking_started");
    }

    async fn on_speaking_stopped(&self) {
        self.push("speaking_stopped");
    }

    async fn on_audio_received(&self) {
        self.push("audio_received");
    }

    async fn on_error(&self, message: String) {
        self.push(format!("error:{message}"));
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Mount successful token and SDP endpoints.
pub async fn mount_realtime(server: &MockServer) {
    mount_session_token(server).await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(header("content-type", "application/sdp"))
        .respond_with(ResponseTemplate::new(201).set_body_string(MOCK_ANSWER))
        .mount(server)
        .await;
}

/// Mount a successful token endpoint only.
pub async fn mount_session_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_secret": { "value": MOCK_TOKEN, "expires_at": 4102444800u64 },
            "model": "gpt-4o-mini-realtime-preview-2024-12-17"
        })))
        .mount(server)
        .await;
}
