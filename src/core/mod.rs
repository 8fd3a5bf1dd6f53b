pub mod audio;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{AudioHardware, AudioRouteCoordinator, RouteMode, VirtualAudioHardware};

pub use realtime::{
    BoxedVoiceSession, NoopListener, PeerConnectionState, SharedListener, TransportKind,
    VoiceError, VoiceResult, VoiceSession, VoiceSessionListener, create_voice_session,
    get_supported_transports,
};
