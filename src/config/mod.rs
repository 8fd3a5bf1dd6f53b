//! Configuration for voice sessions.
//!
//! Configuration is loaded from a YAML file, environment variables and
//! defaults. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_voice::config::VoiceConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = VoiceConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = VoiceConfig::from_file(Path::new("voice.yaml"))?;
//!
//! println!("Instructions: {}", config.instructions());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::audio::{AudioHardware, AudioRouteCoordinator, RouteMode};
use crate::core::realtime::TransportKind;
use crate::core::realtime::openai::{
    DEFAULT_ICE_SERVERS, DEFAULT_REALTIME_MODEL, DEFAULT_TEMPERATURE, NegotiationTimeouts,
    OPENAI_API_BASE_URL, OpenAIRealtimeVoice, PeerSessionConfig,
};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default companion name used in session instructions.
pub const DEFAULT_COMPANION_NAME: &str = "Smol Uni";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Read(String),

    #[error("{0}")]
    Parse(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("{0}")]
    Validation(String),
}

/// Voice session configuration
///
/// Contains everything needed to place a call:
/// - Transport selection and API keys
/// - OpenAI Realtime endpoint, model, voice and temperature
/// - Companion persona used for the session instructions
/// - Negotiation bounds and ICE servers
/// - Audio routing preferences
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub transport: TransportKind,

    // Provider API keys
    /// OpenAI API key, exchanged for an ephemeral token per call
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,

    // OpenAI Realtime settings
    pub base_url: String,
    pub model: String,
    pub voice: OpenAIRealtimeVoice,
    pub temperature: f32,

    // Persona
    pub companion_name: String,
    pub companion_personality: String,

    // Negotiation
    /// Bound on offer creation, the SDP exchange and the whole offer/answer span
    pub negotiation_timeout: Duration,
    /// Request timeout of the HTTP client
    pub http_timeout: Duration,
    pub ice_servers: Vec<String>,

    // Audio
    /// Route call audio to the loudspeaker by default
    pub speaker_default: bool,
    /// Voice-call volume as a fraction of the maximum; `None` leaves it alone
    pub call_volume: Option<f32>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let timeouts = NegotiationTimeouts::default();
        Self {
            transport: TransportKind::OpenAI,
            openai_api_key: None,
            gemini_api_key: None,
            base_url: OPENAI_API_BASE_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: OpenAIRealtimeVoice::default(),
            temperature: DEFAULT_TEMPERATURE,
            companion_name: DEFAULT_COMPANION_NAME.to_string(),
            companion_personality: String::new(),
            negotiation_timeout: timeouts.overall,
            http_timeout: Duration::from_secs(30),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            speaker_default: true,
            call_volume: None,
        }
    }
}

/// Zeroize API keys when the configuration is dropped.
impl Drop for VoiceConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.gemini_api_key {
            key.zeroize();
        }
    }
}

impl VoiceConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// `.env` files are loaded by the binary at startup, so their values
    /// are visible here as ordinary environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        env::apply_env(&mut config)?;
        merge::apply_yaml(&mut config, yaml_config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Session instructions composed from the companion persona.
    pub fn instructions(&self) -> String {
        compose_instructions(&self.companion_name, &self.companion_personality)
    }

    /// API key of the selected transport.
    pub fn api_key(&self) -> Option<&str> {
        match self.transport {
            TransportKind::OpenAI => self.openai_api_key.as_deref(),
            TransportKind::Gemini => self.gemini_api_key.as_deref(),
        }
    }

    pub fn default_route(&self) -> RouteMode {
        RouteMode::from_speaker(self.speaker_default)
    }

    /// Settings for the OpenAI peer session controller.
    pub fn peer_session_config(&self) -> PeerSessionConfig {
        PeerSessionConfig {
            base_url: self.base_url.clone(),
            voice: self.voice,
            temperature: self.temperature,
            auto_respond: true,
            timeouts: NegotiationTimeouts {
                offer: self.negotiation_timeout,
                signaling: self.negotiation_timeout,
                overall: self.negotiation_timeout,
                ..NegotiationTimeouts::default()
            },
            http_timeout: self.http_timeout,
            ice_servers: self.ice_servers.clone(),
        }
    }

    /// Audio coordinator for `hardware` with the configured route and volume.
    pub fn audio_route(&self, hardware: Arc<dyn AudioHardware>) -> AudioRouteCoordinator {
        let coordinator =
            AudioRouteCoordinator::new(hardware).with_default_route(self.default_route());
        match self.call_volume {
            Some(ratio) => coordinator.with_call_volume(ratio),
            None => coordinator,
        }
    }
}

/// `You are <name>, an adorable and helpful smart companion. <personality>`
pub fn compose_instructions(name: &str, personality: &str) -> String {
    let base = format!("You are {name}, an adorable and helpful smart companion.");
    let personality = personality.trim();
    if personality.is_empty() {
        base
    } else {
        format!("{base} {personality}")
    }
}
