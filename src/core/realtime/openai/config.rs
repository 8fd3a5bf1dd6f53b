//! OpenAI Realtime WebRTC configuration types.
//!
//! This module contains:
//! - Endpoint constants for credential negotiation and SDP signaling
//! - Voice selection
//! - Per-stage negotiation timeouts
//! - `PeerSessionConfig`, the settings one peer session is built from

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base URL of the OpenAI REST API.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com";

/// Path of the ephemeral session token endpoint.
pub const REALTIME_SESSIONS_PATH: &str = "/v1/realtime/sessions";

/// Path of the SDP signaling endpoint.
pub const REALTIME_SIGNALING_PATH: &str = "/v1/realtime";

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";

/// Label of the control-event data channel.
pub const DATA_CHANNEL_LABEL: &str = "events";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Public STUN servers used when none are configured.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

// =============================================================================
// Voices
// =============================================================================

/// Available voices for the OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    /// Shimmer voice (default)
    #[default]
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Timeouts
// =============================================================================

/// Bounds on each suspension point of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationTimeouts {
    /// Ephemeral token request
    pub credential: Duration,
    /// Offer creation and local description
    pub offer: Duration,
    /// SDP POST round trip
    pub signaling: Duration,
    /// Offer through remote description, end to end
    pub overall: Duration,
}

impl Default for NegotiationTimeouts {
    fn default() -> Self {
        Self {
            credential: Duration::from_secs(30),
            offer: Duration::from_secs(10),
            signaling: Duration::from_secs(10),
            overall: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Peer Session Config
// =============================================================================

/// Settings a peer session is built from.
#[derive(Debug, Clone)]
pub struct PeerSessionConfig {
    /// REST base URL; tests point this at a mock server
    pub base_url: String,
    /// Voice used in the post-connect session update
    pub voice: OpenAIRealtimeVoice,
    /// Sampling temperature used in the post-connect session update
    pub temperature: f32,
    /// Initial turn detection behaviour; `false` starts in listening mode
    pub auto_respond: bool,
    /// Per-stage negotiation bounds
    pub timeouts: NegotiationTimeouts,
    /// Request timeout of the HTTP client
    pub http_timeout: Duration,
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,
}

impl Default for PeerSessionConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_API_BASE_URL.to_string(),
            voice: OpenAIRealtimeVoice::default(),
            temperature: DEFAULT_TEMPERATURE,
            auto_respond: true,
            timeouts: NegotiationTimeouts::default(),
            http_timeout: Duration::from_secs(30),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
