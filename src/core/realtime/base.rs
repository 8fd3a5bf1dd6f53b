//! Base traits and types for realtime voice sessions.
//!
//! This module defines the foundational abstractions shared by every voice
//! transport: the error taxonomy, the peer-connection and data-channel state
//! machines, the listener capability through which a session reports
//! progress, and the `VoiceSession` facade trait.
//!
//! # Supported Transports
//!
//! - OpenAI Realtime API over WebRTC (ephemeral token + SDP exchange)
//! - Gemini (local audio call lifecycle only)

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::TransportKind;

// =============================================================================
// Error Types
// =============================================================================

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

/// Failure to exchange an API key for an ephemeral session token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Negotiation failed{}: {message}", status_suffix(.http_status))]
pub struct NegotiationError {
    /// HTTP status returned by the session endpoint, if a response was received
    pub http_status: Option<u16>,
    /// Human-readable reason
    pub message: String,
}

impl NegotiationError {
    pub fn new(http_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
        }
    }
}

/// Failure of the SDP offer/answer exchange, including malformed answers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Signaling failed{}: {message}", status_suffix(.http_status))]
pub struct SignalingError {
    /// HTTP status returned by the signaling endpoint, if a response was received
    pub http_status: Option<u16>,
    /// Human-readable reason
    pub message: String,
}

impl SignalingError {
    pub fn new(http_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
        }
    }
}

/// Malformed inbound control event. Never fatal: the codec logs it and
/// downgrades the message to `VoiceEvent::Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Protocol error: {0}")]
pub struct ProtocolError(pub String);

/// Errors that can occur while establishing or running a voice session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// Credential exchange failed
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// SDP exchange failed
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// ICE failure, data-channel close or a media library error
    #[error("Transport error: {0}")]
    Transport(String),

    /// A suspension point exceeded its bound
    #[error("timeout: {0}")]
    Timeout(String),

    /// `connect` was called while another attempt is active
    #[error("Connection already in progress")]
    AlreadyInProgress,

    /// The attempt was cancelled by `disconnect`
    #[error("Connection cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl VoiceError {
    /// Whether this error is reported through `VoiceSessionListener::on_error`.
    ///
    /// Cancellation and caller mistakes are returned to the caller only.
    pub fn reaches_listener(&self) -> bool {
        matches!(
            self,
            VoiceError::Negotiation(_)
                | VoiceError::Signaling(_)
                | VoiceError::Transport(_)
                | VoiceError::Timeout(_)
        )
    }
}

impl From<webrtc::Error> for VoiceError {
    fn from(e: webrtc::Error) -> Self {
        VoiceError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            VoiceError::InvalidConfiguration(format!("HTTP client: {e}"))
        } else {
            VoiceError::Transport(e.to_string())
        }
    }
}

/// Result type for voice session operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of one peer connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    /// Attempt created, credential not yet obtained
    #[default]
    New,
    /// Offer/answer exchange and ICE in progress
    Negotiating,
    /// ICE connected and remote description applied
    Connected,
    /// ICE reported a disconnect; resources have been released
    Disconnected,
    /// The attempt failed; a new `connect` is required
    Failed,
    /// Explicitly closed
    Closed,
}

impl PeerConnectionState {
    /// Whether no further transitions happen without a new `connect`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected
                | PeerConnectionState::Failed
                | PeerConnectionState::Closed
        )
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerConnectionState::New => write!(f, "New"),
            PeerConnectionState::Negotiating => write!(f, "Negotiating"),
            PeerConnectionState::Connected => write!(f, "Connected"),
            PeerConnectionState::Disconnected => write!(f, "Disconnected"),
            PeerConnectionState::Failed => write!(f, "Failed"),
            PeerConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// State of the control-event data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataChannelState {
    #[default]
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataChannelState::Connecting => write!(f, "Connecting"),
            DataChannelState::Open => write!(f, "Open"),
            DataChannelState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Capability through which a session reports progress to its caller.
///
/// Calls for one session are delivered in order and never overlap, so
/// implementations may call back into the session (for example to
/// `disconnect` from `on_error`).
#[async_trait]
pub trait VoiceSessionListener: Send + Sync {
    /// The media path is up and the remote endpoint can hear the caller.
    async fn on_connected(&self) {}

    /// The session ended. Delivered exactly once per `connect` call.
    async fn on_disconnected(&self) {}

    /// The remote endpoint started producing audio.
    async fn on_speaking_started(&self) {}

    /// The remote endpoint stopped producing audio.
    async fn on_speaking_stopped(&self) {}

    /// A remote audio track arrived and was enabled for playback.
    async fn on_audio_received(&self) {}

    /// A negotiation, signaling, transport or timeout error, or an error
    /// event sent by the remote endpoint.
    async fn on_error(&self, _message: String) {}
}

/// Shared handle to a registered listener.
pub type SharedListener = Arc<dyn VoiceSessionListener>;

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

#[async_trait]
impl VoiceSessionListener for NoopListener {}

// =============================================================================
// Session Facade
// =============================================================================

/// Entry point other code uses to drive a voice call.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use waav_voice::core::realtime::{create_voice_session, TransportKind};
///
/// #[tokio::main]
/// async fn main() {
///     let session = create_voice_session(TransportKind::OpenAI, &config, audio_route)?;
///     session.set_listener(Arc::new(MyListener));
///     session
///         .connect("sk-...", "gpt-4o-mini-realtime-preview-2024-12-17", "You are Pip.")
///         .await?;
///
///     session.set_listening_mode(true).await;
///     session.request_response().await;
///
///     session.disconnect().await;
/// }
/// ```
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Transport this session is built on.
    fn transport_kind(&self) -> TransportKind;

    /// Register the listener used by subsequent `connect` calls.
    fn set_listener(&self, listener: SharedListener);

    /// Start a call. Resolves once negotiation completes; `on_connected`
    /// follows when the media path is up.
    async fn connect(&self, api_key: &str, model: &str, instructions: &str) -> VoiceResult<()>;

    /// End the call. Idempotent.
    async fn disconnect(&self);

    /// Toggle "listen only": when enabled the remote endpoint no longer
    /// responds automatically at the end of a user turn.
    ///
    /// Returns whether an update was delivered to the remote endpoint.
    async fn set_listening_mode(&self, enabled: bool) -> bool;

    /// Ask the remote endpoint to respond now.
    async fn request_response(&self) -> bool;

    /// Route call audio to the loudspeaker (`true`) or the earpiece.
    fn set_speaker_mode(&self, enabled: bool);

    /// Current connection state.
    fn connection_state(&self) -> PeerConnectionState;

    /// Human-readable audio routing state.
    fn audio_state(&self) -> String;
}

/// Boxed voice session for dynamic dispatch.
pub type BoxedVoiceSession = Box<dyn VoiceSession>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_error_display() {
        let err = NegotiationError::new(Some(401), "invalid api key");
        assert_eq!(err.to_string(), "Negotiation failed (HTTP 401): invalid api key");

        let err = NegotiationError::new(None, "connection refused");
        assert_eq!(err.to_string(), "Negotiation failed: connection refused");
    }

    #[test]
    fn test_voice_error_display() {
        let err = VoiceError::Timeout("signaling exchange exceeded 200ms".to_string());
        assert!(err.to_string().starts_with("timeout"));

        let err: VoiceError = SignalingError::new(Some(400), "bad offer").into();
        assert_eq!(err.to_string(), "Signaling failed (HTTP 400): bad offer");
    }

    #[test]
    fn test_reaches_listener() {
        assert!(VoiceError::Transport("ice failed".into()).reaches_listener());
        assert!(VoiceError::Timeout("x".into()).reaches_listener());
        assert!(VoiceError::from(NegotiationError::new(Some(401), "x")).reaches_listener());
        assert!(!VoiceError::Cancelled.reaches_listener());
        assert!(!VoiceError::AlreadyInProgress.reaches_listener());
    }

    #[test]
    fn test_peer_connection_state() {
        assert_eq!(PeerConnectionState::default(), PeerConnectionState::New);
        assert!(!PeerConnectionState::Negotiating.is_terminal());
        assert!(!PeerConnectionState::Connected.is_terminal());
        assert!(PeerConnectionState::Failed.is_terminal());
        assert!(PeerConnectionState::Closed.is_terminal());
        assert_eq!(format!("{}", PeerConnectionState::Disconnected), "Disconnected");
    }

    #[test]
    fn test_data_channel_state_display() {
        assert_eq!(DataChannelState::default(), DataChannelState::Connecting);
        assert_eq!(format!("{}", DataChannelState::Open), "Open");
    }
}
