//! OpenAI Realtime voice session over WebRTC.
//!
//! # API Reference
//!
//! - Token: `POST {base}/v1/realtime/sessions` with the API key
//! - SDP: `POST {base}/v1/realtime?model=<model>` with the ephemeral token
//! - Media: Opus over SRTP; control events as JSON on the `events` data channel

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::config::{DEFAULT_REALTIME_MODEL, PeerSessionConfig};
use super::credentials::CredentialNegotiator;
use super::peer::PeerSessionController;
use crate::core::audio::{AudioRouteCoordinator, RouteMode};
use crate::core::realtime::TransportKind;
use crate::core::realtime::base::{
    NoopListener, PeerConnectionState, SharedListener, VoiceError, VoiceResult, VoiceSession,
};
use crate::core::realtime::transport::{PeerTransportFactory, WebRtcTransportFactory};

/// `VoiceSession` backed by the OpenAI Realtime API.
pub struct OpenAIVoiceSession {
    negotiator: CredentialNegotiator,
    controller: PeerSessionController,
    listener: RwLock<SharedListener>,
}

impl OpenAIVoiceSession {
    /// Create a session using real WebRTC peer connections.
    pub fn new(
        config: PeerSessionConfig,
        audio_route: Arc<AudioRouteCoordinator>,
    ) -> VoiceResult<Self> {
        let factory = Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone()));
        Self::with_factory(config, factory, audio_route)
    }

    /// Create a session with a custom peer transport factory.
    pub fn with_factory(
        config: PeerSessionConfig,
        factory: Arc<dyn PeerTransportFactory>,
        audio_route: Arc<AudioRouteCoordinator>,
    ) -> VoiceResult<Self> {
        let negotiator = CredentialNegotiator::new(config.base_url.clone(), config.http_timeout)?;
        let controller = PeerSessionController::new(config, factory, audio_route)?;

        Ok(Self {
            negotiator,
            controller,
            listener: RwLock::new(Arc::new(NoopListener)),
        })
    }

    pub fn controller(&self) -> &PeerSessionController {
        &self.controller
    }
}

#[async_trait]
impl VoiceSession for OpenAIVoiceSession {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::OpenAI
    }

    fn set_listener(&self, listener: SharedListener) {
        *self.listener.write() = listener;
    }

    async fn connect(&self, api_key: &str, model: &str, instructions: &str) -> VoiceResult<()> {
        let model = if model.trim().is_empty() {
            DEFAULT_REALTIME_MODEL
        } else {
            model
        };
        let listener = self.listener.read().clone();
        info!(model, "Connecting OpenAI realtime session");

        let credential = async {
            self.negotiator
                .fetch_session_credential(api_key, model)
                .await
                .map_err(VoiceError::from)
        };
        self.controller
            .connect_with(credential, instructions, listener)
            .await
    }

    async fn disconnect(&self) {
        self.controller.disconnect().await;
    }

    async fn set_listening_mode(&self, enabled: bool) -> bool {
        self.controller.set_turn_detection(!enabled).await
    }

    async fn request_response(&self) -> bool {
        self.controller.request_manual_response().await
    }

    fn set_speaker_mode(&self, enabled: bool) {
        self.controller
            .audio_route()
            .set_route(RouteMode::from_speaker(enabled));
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.controller.state()
    }

    fn audio_state(&self) -> String {
        self.controller.audio_route().describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::VirtualAudioHardware;

    fn session(hardware: Arc<VirtualAudioHardware>) -> OpenAIVoiceSession {
        let audio = Arc::new(AudioRouteCoordinator::new(hardware));
        OpenAIVoiceSession::new(PeerSessionConfig::default(), audio).unwrap()
    }

    #[tokio::test]
    async fn test_transport_kind() {
        let session = session(Arc::new(VirtualAudioHardware::new()));
        assert_eq!(session.transport_kind(), TransportKind::OpenAI);
        assert_eq!(session.connection_state(), PeerConnectionState::New);
    }

    #[tokio::test]
    async fn test_empty_api_key_closes_session() {
        let session = session(Arc::new(VirtualAudioHardware::new()));
        let result = session.connect("", "", "You are Pip.").await;

        match result {
            Err(VoiceError::Negotiation(err)) => assert_eq!(err.http_status, None),
            other => panic!("expected negotiation error, got {other:?}"),
        }
        assert_eq!(session.connection_state(), PeerConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_listening_mode_before_connect() {
        let session = session(Arc::new(VirtualAudioHardware::new()));
        assert!(!session.set_listening_mode(true).await);
        assert!(session.controller().is_listening_mode());
        assert!(!session.request_response().await);
    }

    #[tokio::test]
    async fn test_speaker_mode_outside_call_does_not_touch_hardware() {
        let hardware = Arc::new(VirtualAudioHardware::new());
        let session = session(Arc::clone(&hardware));
        session.set_speaker_mode(false);
        assert_eq!(hardware.speaker_writes(), 0);
        assert!(session.audio_state().starts_with("Mode: NORMAL"));
    }
}
