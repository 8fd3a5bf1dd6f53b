use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; values present here override environment
/// variables.
///
/// # Example YAML structure
/// ```yaml
/// transport: openai
///
/// openai:
///   api_key: "sk-..."
///   base_url: "https://api.openai.com"
///   model: "gpt-4o-mini-realtime-preview-2024-12-17"
///   voice: "shimmer"
///   temperature: 0.8
///
/// gemini:
///   api_key: "..."
///
/// companion:
///   name: "Pip"
///   personality: "You love puns."
///
/// negotiation:
///   timeout_ms: 10000
///   http_timeout_ms: 30000
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// audio:
///   speaker_default: true
///   call_volume: 0.8
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub transport: Option<String>,
    pub openai: Option<OpenAIYaml>,
    pub gemini: Option<GeminiYaml>,
    pub companion: Option<CompanionYaml>,
    pub negotiation: Option<NegotiationYaml>,
    pub audio: Option<AudioYaml>,
}

/// OpenAI Realtime settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub temperature: Option<f32>,
}

/// Gemini settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
}

/// Persona used to compose session instructions
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CompanionYaml {
    pub name: Option<String>,
    pub personality: Option<String>,
}

/// Connection setup bounds and ICE servers
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NegotiationYaml {
    pub timeout_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub ice_servers: Option<Vec<String>>,
}

/// Audio routing preferences
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub speaker_default: Option<bool>,
    pub call_volume: Option<f32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Read(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML config: {e}")))
    }
}
