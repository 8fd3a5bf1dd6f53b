use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::core::audio::{AudioRouteCoordinator, RouteMode};
use crate::core::realtime::TransportKind;
use crate::core::realtime::base::{
    NoopListener, PeerConnectionState, SharedListener, VoiceError, VoiceResult, VoiceSession,
};
use crate::core::realtime::listener::{ListenerEvent, ListenerNotifier};

struct GeminiState {
    connection: PeerConnectionState,
    notifier: Option<ListenerNotifier>,
}

/// `VoiceSession` for the Gemini transport.
///
/// `connect` begins the audio call and reports `Connected` immediately;
/// `disconnect` ends it.
pub struct GeminiVoiceSession {
    audio_route: Arc<AudioRouteCoordinator>,
    listener: RwLock<SharedListener>,
    state: Mutex<GeminiState>,
}

impl GeminiVoiceSession {
    pub fn new(audio_route: Arc<AudioRouteCoordinator>) -> Self {
        Self {
            audio_route,
            listener: RwLock::new(Arc::new(NoopListener)),
            state: Mutex::new(GeminiState {
                connection: PeerConnectionState::New,
                notifier: None,
            }),
        }
    }
}

#[async_trait]
impl VoiceSession for GeminiVoiceSession {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Gemini
    }

    fn set_listener(&self, listener: SharedListener) {
        *self.listener.write() = listener;
    }

    async fn connect(&self, api_key: &str, model: &str, _instructions: &str) -> VoiceResult<()> {
        if api_key.trim().is_empty() {
            return Err(VoiceError::InvalidConfiguration(
                "Gemini API key is empty".to_string(),
            ));
        }

        let notifier = {
            let mut state = self.state.lock();
            if state.notifier.is_some() {
                warn!("Rejecting connect while a Gemini call is active");
                return Err(VoiceError::AlreadyInProgress);
            }
            if !self.audio_route.begin_call() {
                warn!("Continuing Gemini call with degraded audio routing");
            }
            let notifier = ListenerNotifier::spawn(self.listener.read().clone());
            state.connection = PeerConnectionState::Connected;
            state.notifier = Some(notifier.clone());
            notifier
        };

        info!(model, "Gemini voice session started");
        notifier.notify(ListenerEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let notifier = {
            let mut state = self.state.lock();
            state.connection = PeerConnectionState::Closed;
            state.notifier.take()
        };

        if let Some(notifier) = notifier {
            self.audio_route.end_call();
            notifier.notify(ListenerEvent::Disconnected);
            info!("Gemini voice session ended");
        }
    }

    async fn set_listening_mode(&self, enabled: bool) -> bool {
        info!(enabled, "Listening mode is not supported on the Gemini transport");
        false
    }

    async fn request_response(&self) -> bool {
        info!("Manual responses are not supported on the Gemini transport");
        false
    }

    fn set_speaker_mode(&self, enabled: bool) {
        self.audio_route.set_route(RouteMode::from_speaker(enabled));
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    fn audio_state(&self) -> String {
        self.audio_route.describe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::core::audio::{AudioHardware, AudioMode, VirtualAudioHardware};
    use crate::core::realtime::base::VoiceSessionListener;

    #[derive(Default)]
    struct Counter {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    #[async_trait]
    impl VoiceSessionListener for Counter {
        async fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_call_lifecycle() {
        let hardware = Arc::new(VirtualAudioHardware::new());
        let audio = Arc::new(AudioRouteCoordinator::new(hardware.clone()));
        let session = GeminiVoiceSession::new(audio);
        let counter = Arc::new(Counter::default());
        session.set_listener(counter.clone());

        session.connect("key", "gemini", "hi").await.unwrap();
        assert_eq!(session.connection_state(), PeerConnectionState::Connected);
        assert_eq!(hardware.mode().unwrap(), AudioMode::InCommunication);
        assert!(matches!(
            session.connect("key", "gemini", "hi").await,
            Err(VoiceError::AlreadyInProgress)
        ));

        session.disconnect().await;
        session.disconnect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.connection_state(), PeerConnectionState::Closed);
        assert_eq!(hardware.mode().unwrap(), AudioMode::Normal);
        assert_eq!(counter.connected.load(Ordering::SeqCst), 1);
        assert_eq!(counter.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_controls() {
        let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(
            VirtualAudioHardware::new(),
        )));
        let session = GeminiVoiceSession::new(audio);
        assert!(!session.set_listening_mode(true).await);
        assert!(!session.request_response().await);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(
            VirtualAudioHardware::new(),
        )));
        let session = GeminiVoiceSession::new(audio);
        assert!(matches!(
            session.connect(" ", "gemini", "hi").await,
            Err(VoiceError::InvalidConfiguration(_))
        ));
        assert_eq!(session.connection_state(), PeerConnectionState::New);
    }
}
