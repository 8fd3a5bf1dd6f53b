//! OpenAI Realtime API over WebRTC.
//!
//! A call is set up in three steps:
//!
//! 1. `credentials`: exchange the API key for an ephemeral client secret
//! 2. `signaling`: POST the local SDP offer, receive the SDP answer
//! 3. `peer`: run the peer connection, the `events` data channel and the
//!    audio route for the duration of the call
//!
//! Control events on the data channel are encoded and decoded by
//! [`EventCodec`].
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_voice::core::audio::{AudioRouteCoordinator, VirtualAudioHardware};
//! use waav_voice::core::realtime::VoiceSession;
//! use waav_voice::core::realtime::openai::{OpenAIVoiceSession, PeerSessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let audio = Arc::new(AudioRouteCoordinator::new(Arc::new(VirtualAudioHardware::new())));
//!     let session = OpenAIVoiceSession::new(PeerSessionConfig::default(), audio).unwrap();
//!
//!     session.connect("sk-...", "", "You are Pip.").await.unwrap();
//!     session.set_listening_mode(true).await;
//!     session.request_response().await;
//!     session.disconnect().await;
//! }
//! ```

mod client;
mod config;
mod credentials;
mod messages;
mod peer;
mod signaling;

pub use client::OpenAIVoiceSession;
pub use config::{
    DATA_CHANNEL_LABEL, DEFAULT_ICE_SERVERS, DEFAULT_REALTIME_MODEL, DEFAULT_TEMPERATURE,
    NegotiationTimeouts, OPENAI_API_BASE_URL, OpenAIRealtimeVoice, PeerSessionConfig,
    REALTIME_SESSIONS_PATH, REALTIME_SIGNALING_PATH,
};
pub use credentials::{CredentialNegotiator, SessionCredential};
pub use messages::{
    EventCodec, SessionSettings, TurnDetectionConfig, TurnDetectionMode, VoiceEvent,
};
pub use peer::PeerSessionController;
pub use signaling::{SDP_CONTENT_TYPE, SignalingClient};
