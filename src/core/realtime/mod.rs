//! Realtime voice sessions.
//!
//! This module provides the [`VoiceSession`] facade and its transports.
//!
//! # Supported Transports
//!
//! - **OpenAI Realtime API** - WebRTC media with JSON control events on a
//!   data channel, authorized by an ephemeral session token
//! - **Gemini** - local call lifecycle and audio routing only
//!
//! # Architecture
//!
//! - `base`: error taxonomy, state machines, listener and facade traits
//! - `transport`: the [`PeerTransport`] seam and its `webrtc` implementation
//! - `openai`: credential negotiation, signaling, codec and peer controller
//! - `gemini`: the Gemini session
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_voice::config::VoiceConfig;
//! use waav_voice::core::audio::{AudioRouteCoordinator, VirtualAudioHardware};
//! use waav_voice::core::realtime::{create_voice_session, TransportKind};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = VoiceConfig::from_env().unwrap();
//!     let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(VirtualAudioHardware::new())));
//!
//!     let session = create_voice_session(TransportKind::OpenAI, &config, audio).unwrap();
//!     session
//!         .connect(config.api_key().unwrap_or_default(), &config.model, &config.instructions())
//!         .await
//!         .unwrap();
//! }
//! ```

mod base;
pub mod gemini;
mod listener;
pub mod openai;
pub mod transport;

use std::sync::Arc;

pub use base::{
    BoxedVoiceSession, DataChannelState, NegotiationError, NoopListener, PeerConnectionState,
    ProtocolError, SharedListener, SignalingError, VoiceError, VoiceResult, VoiceSession,
    VoiceSessionListener,
};
pub use gemini::GeminiVoiceSession;
pub use openai::{OpenAIRealtimeVoice, OpenAIVoiceSession, PeerSessionController, VoiceEvent};
pub use transport::{
    AudioFrame, IceConnectionState, LocalAudioSource, PeerTransport, PeerTransportFactory,
    RemoteAudioSink, TrackKind, TransportEvent, TransportEventReceiver, TransportEventSender,
    WebRtcTransportFactory,
};

use crate::config::VoiceConfig;
use crate::core::audio::AudioRouteCoordinator;

/// Supported voice transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// OpenAI Realtime API over WebRTC
    #[default]
    OpenAI,
    /// Gemini
    Gemini,
}

impl TransportKind {
    /// Parse transport from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai_realtime" | "openai-realtime" => Some(TransportKind::OpenAI),
            "gemini" | "google" => Some(TransportKind::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::OpenAI => write!(f, "openai"),
            TransportKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// Create a voice session for `kind`.
///
/// The audio coordinator is shared with the caller so it can react to
/// platform focus changes while the call runs.
pub fn create_voice_session(
    kind: TransportKind,
    config: &VoiceConfig,
    audio_route: Arc<AudioRouteCoordinator>,
) -> VoiceResult<BoxedVoiceSession> {
    match kind {
        TransportKind::OpenAI => Ok(Box::new(OpenAIVoiceSession::new(
            config.peer_session_config(),
            audio_route,
        )?)),
        TransportKind::Gemini => Ok(Box::new(GeminiVoiceSession::new(audio_route))),
    }
}

/// Get list of supported transports.
pub fn get_supported_transports() -> Vec<&'static str> {
    vec!["openai", "gemini"]
}
