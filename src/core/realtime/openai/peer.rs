//! Peer session controller.
//!
//! Drives one voice call end to end: credential, local audio track, data
//! channel, SDP offer/answer, ICE state tracking, control events and audio
//! routing.
//!
//! # Lifecycle
//!
//! ```text
//! New ──► Negotiating ──► Connected ──► Disconnected ──► (disconnect) Closed
//!  │           │              │
//!  │           └──────────────┴──► Failed
//!  └──► Closed (credential failure or disconnect)
//! ```
//!
//! Negotiation is a single awaitable pipeline. Every suspension point has
//! its own bound and the offer-to-answer span has an overall bound. A
//! `disconnect` during negotiation cancels the pipeline through a
//! `CancellationToken`.
//!
//! Transport callbacks arrive as [`TransportEvent`]s and are applied by one
//! event-loop task per attempt, started only after the remote description
//! has been applied.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{DATA_CHANNEL_LABEL, PeerSessionConfig};
use super::credentials::SessionCredential;
use super::messages::{EventCodec, SessionSettings, TurnDetectionConfig, VoiceEvent};
use super::signaling::SignalingClient;
use crate::core::audio::AudioRouteCoordinator;
use crate::core::realtime::base::{
    DataChannelState, NegotiationError, PeerConnectionState, SharedListener, SignalingError,
    VoiceError, VoiceResult,
};
use crate::core::realtime::listener::{ListenerEvent, ListenerNotifier};
use crate::core::realtime::transport::{
    IceConnectionState, PeerTransport, PeerTransportFactory, TrackKind, TransportEvent,
    TransportEventReceiver,
};

/// Await `fut`, failing with `VoiceError::Timeout` after `limit`.
async fn with_timeout<T>(
    stage: &str,
    limit: Duration,
    fut: impl Future<Output = VoiceResult<T>>,
) -> VoiceResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(VoiceError::Timeout(format!(
            "{stage} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    notifier: ListenerNotifier,
    transport: Option<Arc<dyn PeerTransport>>,
    settings: SessionSettings,
    session_configured: bool,
}

struct SessionShared {
    state: PeerConnectionState,
    channel_state: DataChannelState,
    auto_respond: bool,
    attempt: Option<Attempt>,
}

impl SessionShared {
    fn current(&self, attempt_id: u64) -> Option<&Attempt> {
        self.attempt.as_ref().filter(|a| a.id == attempt_id)
    }

    fn current_mut(&mut self, attempt_id: u64) -> Option<&mut Attempt> {
        self.attempt.as_mut().filter(|a| a.id == attempt_id)
    }
}

struct ControllerInner {
    config: PeerSessionConfig,
    factory: Arc<dyn PeerTransportFactory>,
    signaling: SignalingClient,
    audio_route: Arc<AudioRouteCoordinator>,
    codec: EventCodec,
    shared: Mutex<SessionShared>,
    next_attempt: AtomicU64,
}

// =============================================================================
// Peer Session Controller
// =============================================================================

/// Owns the peer-connection lifecycle of one voice session.
///
/// Exactly one peer connection, audio track and data channel exist at a
/// time. A new `connect` is rejected while an attempt is active.
pub struct PeerSessionController {
    inner: Arc<ControllerInner>,
}

impl PeerSessionController {
    pub fn new(
        config: PeerSessionConfig,
        factory: Arc<dyn PeerTransportFactory>,
        audio_route: Arc<AudioRouteCoordinator>,
    ) -> VoiceResult<Self> {
        let signaling = SignalingClient::new(config.base_url.clone(), config.http_timeout)?;
        let auto_respond = config.auto_respond;

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                factory,
                signaling,
                audio_route,
                codec: EventCodec::new(),
                shared: Mutex::new(SessionShared {
                    state: PeerConnectionState::New,
                    channel_state: DataChannelState::Connecting,
                    auto_respond,
                    attempt: None,
                }),
                next_attempt: AtomicU64::new(0),
            }),
        })
    }

    pub fn state(&self) -> PeerConnectionState {
        self.inner.shared.lock().state
    }

    pub fn data_channel_state(&self) -> DataChannelState {
        self.inner.shared.lock().channel_state
    }

    /// Whether automatic responses are disabled.
    pub fn is_listening_mode(&self) -> bool {
        !self.inner.shared.lock().auto_respond
    }

    pub fn audio_route(&self) -> &Arc<AudioRouteCoordinator> {
        &self.inner.audio_route
    }

    /// Connect with an already negotiated credential.
    pub async fn connect(
        &self,
        credential: SessionCredential,
        instructions: &str,
        listener: SharedListener,
    ) -> VoiceResult<()> {
        self.connect_with(async move { Ok(credential) }, instructions, listener)
            .await
    }

    /// Connect, obtaining the credential from `credential` as the first
    /// step of the pipeline so it shares the attempt's timeout and
    /// cancellation.
    pub async fn connect_with<F>(
        &self,
        credential: F,
        instructions: &str,
        listener: SharedListener,
    ) -> VoiceResult<()>
    where
        F: Future<Output = VoiceResult<SessionCredential>> + Send,
    {
        let inner = &self.inner;
        let (attempt_id, cancel, notifier) = inner.begin_attempt(instructions, listener)?;
        info!(attempt_id, "Starting realtime voice connection");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VoiceError::Cancelled),
            result = inner.negotiate(attempt_id, credential) => result,
        };

        let still_current = inner.shared.lock().current(attempt_id).is_some();
        match result {
            Ok(()) if still_current => {
                info!(attempt_id, "Negotiation complete, waiting for ICE");
                Ok(())
            }
            Ok(()) | Err(VoiceError::Cancelled) => {
                info!(attempt_id, "Connection attempt cancelled");
                Err(VoiceError::Cancelled)
            }
            Err(_) if !still_current => {
                info!(attempt_id, "Connection attempt cancelled");
                Err(VoiceError::Cancelled)
            }
            Err(err) => {
                error!(attempt_id, "Connection attempt failed: {err}");
                if err.reaches_listener() {
                    notifier.error(err.to_string());
                }
                let final_state = match inner.shared.lock().state {
                    PeerConnectionState::New => PeerConnectionState::Closed,
                    _ => PeerConnectionState::Failed,
                };
                inner.teardown(attempt_id, final_state).await;
                Err(err)
            }
        }
    }

    /// End the call. Idempotent; notifies `Disconnected` once per `connect`.
    pub async fn disconnect(&self) {
        let attempt_id = self.inner.shared.lock().attempt.as_ref().map(|a| a.id);
        match attempt_id {
            Some(attempt_id) => {
                self.inner
                    .teardown(attempt_id, PeerConnectionState::Closed)
                    .await
            }
            None => {
                let mut shared = self.inner.shared.lock();
                if shared.state.is_terminal() && shared.state != PeerConnectionState::Closed {
                    shared.state = PeerConnectionState::Closed;
                }
                debug!("Disconnect requested with no active attempt");
            }
        }
    }

    /// Encode and send `event` if the data channel is open. Returns whether
    /// the event was written.
    pub async fn send_control_event(&self, event: VoiceEvent) -> bool {
        self.inner.send_control_event(&event).await
    }

    /// Toggle automatic responses. Sends a `session.update` when connected;
    /// otherwise the setting applies to the next post-connect update.
    pub async fn set_turn_detection(&self, auto_respond: bool) -> bool {
        let update = {
            let mut shared = self.inner.shared.lock();
            shared.auto_respond = auto_respond;
            let connected = shared.state == PeerConnectionState::Connected;
            shared.attempt.as_mut().and_then(|attempt| {
                attempt.settings.turn_detection = TurnDetectionConfig::server_vad(auto_respond);
                connected.then(|| attempt.settings.clone())
            })
        };

        info!(auto_respond, "Turn detection updated");
        match update {
            Some(settings) => {
                self.inner
                    .send_control_event(&VoiceEvent::SessionUpdate(settings))
                    .await
            }
            None => false,
        }
    }

    /// Ask the model to respond now.
    pub async fn request_manual_response(&self) -> bool {
        if !self.is_listening_mode() {
            debug!("Manual response requested while automatic responses are enabled");
        }
        self.inner
            .send_control_event(&VoiceEvent::ResponseCreate)
            .await
    }
}

// =============================================================================
// Negotiation
// =============================================================================

impl ControllerInner {
    fn begin_attempt(
        &self,
        instructions: &str,
        listener: SharedListener,
    ) -> VoiceResult<(u64, CancellationToken, ListenerNotifier)> {
        let mut shared = self.shared.lock();
        if shared.attempt.is_some() {
            warn!(state = %shared.state, "Rejecting connect while another attempt is active");
            return Err(VoiceError::AlreadyInProgress);
        }

        let id = self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let notifier = ListenerNotifier::spawn(listener);

        shared.state = PeerConnectionState::New;
        shared.channel_state = DataChannelState::Connecting;
        shared.attempt = Some(Attempt {
            id,
            cancel: cancel.clone(),
            notifier: notifier.clone(),
            transport: None,
            settings: SessionSettings {
                instructions: instructions.to_string(),
                voice: self.config.voice.as_str().to_string(),
                temperature: self.config.temperature,
                turn_detection: TurnDetectionConfig::server_vad(shared.auto_respond),
            },
            session_configured: false,
        });

        Ok((id, cancel, notifier))
    }

    async fn negotiate<F>(self: &Arc<Self>, attempt_id: u64, credential: F) -> VoiceResult<()>
    where
        F: Future<Output = VoiceResult<SessionCredential>> + Send,
    {
        let timeouts = self.config.timeouts;
        let credential = with_timeout("credential fetch", timeouts.credential, credential).await?;
        if credential.is_expired() {
            return Err(NegotiationError::new(None, "session token already expired").into());
        }
        debug!(attempt_id, model = credential.model(), "Credential ready");

        {
            let mut shared = self.shared.lock();
            if shared.current(attempt_id).is_none() {
                return Err(VoiceError::Cancelled);
            }
            shared.state = PeerConnectionState::Negotiating;
            if !self.audio_route.begin_call() {
                warn!(attempt_id, "Continuing with degraded audio routing");
            }
        }

        with_timeout(
            "negotiation",
            timeouts.overall,
            self.negotiate_peer(attempt_id, &credential),
        )
        .await
    }

    async fn negotiate_peer(
        self: &Arc<Self>,
        attempt_id: u64,
        credential: &SessionCredential,
    ) -> VoiceResult<()> {
        let timeouts = self.config.timeouts;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = self.factory.create(events_tx).await?;
        let registered = match self.shared.lock().current_mut(attempt_id) {
            Some(attempt) => {
                attempt.transport = Some(Arc::clone(&transport));
                true
            }
            None => false,
        };
        if !registered {
            if let Err(e) = transport.close().await {
                warn!(attempt_id, "Failed to close orphaned transport: {e}");
            }
            return Err(VoiceError::Cancelled);
        }

        transport.add_local_audio_track().await?;
        transport.create_data_channel(DATA_CHANNEL_LABEL).await?;

        let offer = with_timeout("offer creation", timeouts.offer, async {
            let sdp = transport.create_offer().await?;
            transport.set_local_description(&sdp).await?;
            Ok(sdp)
        })
        .await?;
        debug!(attempt_id, "Local description set");

        let answer = with_timeout("signaling exchange", timeouts.signaling, async {
            self.signaling
                .exchange(credential, &offer)
                .await
                .map_err(VoiceError::from)
        })
        .await?;

        transport
            .set_remote_description(&answer)
            .await
            .map_err(|e| {
                VoiceError::Signaling(SignalingError::new(
                    None,
                    format!("remote description rejected: {e}"),
                ))
            })?;
        debug!(attempt_id, "Remote description set");

        self.spawn_event_loop(attempt_id, events_rx)
    }

    fn spawn_event_loop(
        self: &Arc<Self>,
        attempt_id: u64,
        mut events: TransportEventReceiver,
    ) -> VoiceResult<()> {
        let cancel = self
            .shared
            .lock()
            .current(attempt_id)
            .map(|attempt| attempt.cancel.clone())
            .ok_or(VoiceError::Cancelled)?;

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => inner.handle_transport_event(attempt_id, event).await,
                        None => break,
                    },
                }
            }
            debug!(attempt_id, "Session event loop stopped");
        });
        Ok(())
    }

    /// Release every resource of `attempt_id` and move to `final_state`.
    /// Does nothing if the attempt is no longer current.
    async fn teardown(&self, attempt_id: u64, final_state: PeerConnectionState) {
        let attempt = {
            let mut shared = self.shared.lock();
            if shared.current(attempt_id).is_none() {
                return;
            }
            shared.state = final_state;
            shared.channel_state = DataChannelState::Closed;
            shared.attempt.take()
        };
        let Some(attempt) = attempt else {
            return;
        };

        attempt.cancel.cancel();
        if let Some(transport) = attempt.transport {
            if let Err(e) = transport.close().await {
                warn!(attempt_id, "Failed to close transport: {e}");
            }
        }
        self.audio_route.end_call();
        attempt.notifier.notify(ListenerEvent::Disconnected);

        info!(attempt_id, state = %final_state, "Voice session torn down");
    }
}

// =============================================================================
// Transport Events
// =============================================================================

impl ControllerInner {
    async fn handle_transport_event(&self, attempt_id: u64, event: TransportEvent) {
        match event {
            TransportEvent::IceStateChanged(state) => self.on_ice_state(attempt_id, state).await,
            TransportEvent::DataChannelStateChanged(state) => {
                self.on_channel_state(attempt_id, state).await
            }
            TransportEvent::DataChannelMessage(data) => self.on_channel_message(attempt_id, &data),
            TransportEvent::RemoteTrack { id, kind } => {
                self.on_remote_track(attempt_id, &id, kind).await
            }
        }
    }

    async fn on_ice_state(&self, attempt_id: u64, ice_state: IceConnectionState) {
        debug!(attempt_id, ?ice_state, "ICE state");

        if ice_state.is_connected() {
            let notifier = {
                let mut shared = self.shared.lock();
                if shared.state != PeerConnectionState::Negotiating {
                    return;
                }
                let Some(attempt) = shared.current(attempt_id) else {
                    return;
                };
                let notifier = attempt.notifier.clone();
                shared.state = PeerConnectionState::Connected;
                notifier
            };
            info!(attempt_id, "Realtime voice session connected");
            notifier.notify(ListenerEvent::Connected);
            self.configure_session(attempt_id).await;
            return;
        }

        match ice_state {
            IceConnectionState::Failed => {
                let notifier = {
                    let shared = self.shared.lock();
                    match shared.current(attempt_id) {
                        Some(attempt) => attempt.notifier.clone(),
                        None => return,
                    }
                };
                let err = VoiceError::Transport("ICE connection failed".to_string());
                error!(attempt_id, "{err}");
                notifier.error(err.to_string());
                self.teardown(attempt_id, PeerConnectionState::Failed).await;
            }
            IceConnectionState::Disconnected => {
                info!(attempt_id, "ICE disconnected, tearing down session");
                self.teardown(attempt_id, PeerConnectionState::Disconnected)
                    .await;
            }
            _ => {}
        }
    }

    async fn on_channel_state(&self, attempt_id: u64, channel_state: DataChannelState) {
        let unexpected_close = {
            let mut shared = self.shared.lock();
            let Some(attempt) = shared.current(attempt_id) else {
                return;
            };
            if shared.channel_state == DataChannelState::Closed {
                debug!(attempt_id, %channel_state, "Ignoring data channel state after close");
                return;
            }
            let notifier = attempt.notifier.clone();
            shared.channel_state = channel_state;
            if channel_state != DataChannelState::Closed {
                None
            } else {
                // Negotiating never recovers a closed channel; Connected ends
                // like an ICE disconnect.
                match shared.state {
                    PeerConnectionState::Negotiating => {
                        Some((notifier, PeerConnectionState::Failed))
                    }
                    PeerConnectionState::Connected => {
                        Some((notifier, PeerConnectionState::Disconnected))
                    }
                    _ => None,
                }
            }
        };
        debug!(attempt_id, %channel_state, "Data channel state");

        if channel_state == DataChannelState::Open {
            self.configure_session(attempt_id).await;
        } else if let Some((notifier, final_state)) = unexpected_close {
            let err = VoiceError::Transport("data channel closed".to_string());
            warn!(attempt_id, state = %final_state, "{err}");
            notifier.error(err.to_string());
            self.teardown(attempt_id, final_state).await;
        }
    }

    fn on_channel_message(&self, attempt_id: u64, data: &[u8]) {
        let notifier = {
            let shared = self.shared.lock();
            let Some(attempt) = shared.current(attempt_id) else {
                debug!(attempt_id, "Dropping message for a finished attempt");
                return;
            };
            if shared.channel_state == DataChannelState::Closed {
                warn!(attempt_id, "Dropping message received after data channel closed");
                return;
            }
            attempt.notifier.clone()
        };

        match self.codec.decode(data) {
            VoiceEvent::Error { message } => {
                error!(attempt_id, "Realtime endpoint error: {message}");
                notifier.error(message);
            }
            VoiceEvent::SpeakingStarted => {
                debug!(attempt_id, "Assistant started speaking");
                notifier.notify(ListenerEvent::SpeakingStarted);
            }
            VoiceEvent::SpeakingStopped => {
                debug!(attempt_id, "Assistant stopped speaking");
                notifier.notify(ListenerEvent::SpeakingStopped);
            }
            VoiceEvent::ItemCreated { id, role } => {
                if role.as_deref() == Some("assistant") {
                    info!(attempt_id, item_id = %id, "Assistant item created");
                } else {
                    debug!(attempt_id, item_id = %id, ?role, "Conversation item created");
                }
            }
            VoiceEvent::SessionUpdate(_) | VoiceEvent::ResponseCreate => {
                debug!(attempt_id, "Ignoring client-side event received from endpoint");
            }
            VoiceEvent::Unknown { raw_type } => {
                debug!(attempt_id, event_type = %raw_type, "Realtime event");
            }
        }
    }

    async fn on_remote_track(&self, attempt_id: u64, track_id: &str, kind: TrackKind) {
        if kind != TrackKind::Audio {
            debug!(attempt_id, track_id, ?kind, "Ignoring non-audio remote track");
            return;
        }

        let (transport, notifier) = {
            let shared = self.shared.lock();
            match shared.current(attempt_id) {
                Some(Attempt {
                    transport: Some(transport),
                    notifier,
                    ..
                }) => (Arc::clone(transport), notifier.clone()),
                _ => return,
            }
        };

        if let Err(e) = transport.enable_remote_track(track_id).await {
            warn!(attempt_id, track_id, "Failed to enable remote track: {e}");
        }
        info!(attempt_id, track_id, "Remote audio track enabled");
        notifier.notify(ListenerEvent::AudioReceived);
        self.audio_route.reassert_route();
        self.audio_route.log_state();
    }

    /// Send the post-connect `session.update` once the session is connected
    /// and the data channel is open.
    async fn configure_session(&self, attempt_id: u64) {
        let pending = {
            let mut shared = self.shared.lock();
            let ready = shared.state == PeerConnectionState::Connected
                && shared.channel_state == DataChannelState::Open;
            match shared.current_mut(attempt_id) {
                Some(attempt) if ready && !attempt.session_configured => {
                    attempt.session_configured = true;
                    attempt
                        .transport
                        .clone()
                        .map(|transport| (transport, attempt.settings.clone()))
                }
                _ => None,
            }
        };

        if let Some((transport, settings)) = pending {
            info!(attempt_id, voice = %settings.voice, "Configuring realtime session");
            self.write_event(&*transport, &VoiceEvent::SessionUpdate(settings))
                .await;
        }
    }

    async fn send_control_event(&self, event: &VoiceEvent) -> bool {
        let transport = {
            let shared = self.shared.lock();
            if shared.channel_state != DataChannelState::Open {
                debug!(
                    event_type = event.event_type(),
                    channel_state = %shared.channel_state,
                    "Data channel not open, event not sent"
                );
                return false;
            }
            match shared.attempt.as_ref().and_then(|a| a.transport.clone()) {
                Some(transport) => transport,
                None => return false,
            }
        };
        self.write_event(&*transport, event).await
    }

    async fn write_event(&self, transport: &dyn PeerTransport, event: &VoiceEvent) -> bool {
        let payload = match self.codec.encode(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_type = event.event_type(), "Failed to encode event: {e}");
                return false;
            }
        };
        let text = match std::str::from_utf8(&payload) {
            Ok(text) => text,
            Err(e) => {
                warn!("Encoded event is not UTF-8: {e}");
                return false;
            }
        };

        match transport.send_text(text).await {
            Ok(()) => {
                debug!(event_type = event.event_type(), "Sent control event");
                true
            }
            Err(e) => {
                warn!(event_type = event.event_type(), "Failed to send control event: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::VirtualAudioHardware;
    use crate::core::realtime::base::NoopListener;
    use crate::core::realtime::transport::WebRtcTransportFactory;

    fn controller() -> PeerSessionController {
        let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(
            VirtualAudioHardware::new(),
        )));
        PeerSessionController::new(
            PeerSessionConfig::default(),
            Arc::new(WebRtcTransportFactory::new(Vec::new())),
            audio,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let controller = controller();
        assert_eq!(controller.state(), PeerConnectionState::New);
        assert_eq!(controller.data_channel_state(), DataChannelState::Connecting);
        assert!(!controller.is_listening_mode());
    }

    #[tokio::test]
    async fn test_send_without_connection_is_noop() {
        let controller = controller();
        assert!(!controller.send_control_event(VoiceEvent::ResponseCreate).await);
        assert!(!controller.request_manual_response().await);
    }

    #[tokio::test]
    async fn test_turn_detection_recorded_before_connect() {
        let controller = controller();
        assert!(!controller.set_turn_detection(false).await);
        assert!(controller.is_listening_mode());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let controller = controller();
        controller.disconnect().await;
        controller.disconnect().await;
        assert_eq!(controller.state(), PeerConnectionState::New);
    }

    #[tokio::test]
    async fn test_credential_timeout_closes_attempt() {
        let mut config = PeerSessionConfig::default();
        config.timeouts.credential = Duration::from_millis(20);
        let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(
            VirtualAudioHardware::new(),
        )));
        let controller = PeerSessionController::new(
            config,
            Arc::new(WebRtcTransportFactory::new(Vec::new())),
            audio,
        )
        .unwrap();

        let result = controller
            .connect_with(
                std::future::pending::<VoiceResult<SessionCredential>>(),
                "hi",
                Arc::new(NoopListener),
            )
            .await;

        assert!(matches!(result, Err(VoiceError::Timeout(_))));
        assert_eq!(controller.state(), PeerConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_with_timeout_message() {
        let err = with_timeout("offer creation", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "timeout: offer creation exceeded 5ms");
    }
}
