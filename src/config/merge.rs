use std::time::Duration;

use super::env::{parse_transport, parse_voice};
use super::yaml::YamlConfig;
use super::{ConfigError, VoiceConfig};

/// Apply values present in `yaml` on top of `config`.
pub(super) fn apply_yaml(config: &mut VoiceConfig, yaml: YamlConfig) -> Result<(), ConfigError> {
    if let Some(raw) = yaml.transport {
        config.transport = parse_transport("transport", &raw)?;
    }

    if let Some(openai) = yaml.openai {
        if let Some(key) = openai.api_key {
            config.openai_api_key = Some(key);
        }
        if let Some(url) = openai.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = openai.model {
            config.model = model;
        }
        if let Some(raw) = openai.voice {
            config.voice = parse_voice("openai.voice", &raw)?;
        }
        if let Some(temperature) = openai.temperature {
            config.temperature = temperature;
        }
    }

    if let Some(key) = yaml.gemini.and_then(|g| g.api_key) {
        config.gemini_api_key = Some(key);
    }

    if let Some(companion) = yaml.companion {
        if let Some(name) = companion.name {
            config.companion_name = name;
        }
        if let Some(personality) = companion.personality {
            config.companion_personality = personality;
        }
    }

    if let Some(negotiation) = yaml.negotiation {
        if let Some(ms) = negotiation.timeout_ms {
            config.negotiation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = negotiation.http_timeout_ms {
            config.http_timeout = Duration::from_millis(ms);
        }
        if let Some(servers) = negotiation.ice_servers {
            config.ice_servers = servers;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(speaker) = audio.speaker_default {
            config.speaker_default = speaker;
        }
        if let Some(volume) = audio.call_volume {
            config.call_volume = Some(volume);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::TransportKind;
    use crate::core::realtime::openai::OpenAIRealtimeVoice;

    #[test]
    fn test_yaml_overrides_existing_values() {
        let mut config = VoiceConfig::default();
        config.openai_api_key = Some("from-env".to_string());
        config.companion_name = "Env Name".to_string();

        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
transport: gemini
openai:
  api_key: "from-yaml"
  voice: "sage"
companion:
  name: "Yaml Name"
"#,
        )
        .unwrap();

        apply_yaml(&mut config, yaml).unwrap();
        assert_eq!(config.transport, TransportKind::Gemini);
        assert_eq!(config.openai_api_key.as_deref(), Some("from-yaml"));
        assert_eq!(config.voice, OpenAIRealtimeVoice::Sage);
        assert_eq!(config.companion_name, "Yaml Name");
    }

    #[test]
    fn test_missing_sections_keep_values() {
        let mut config = VoiceConfig::default();
        config.call_volume = Some(0.4);

        apply_yaml(&mut config, YamlConfig::default()).unwrap();
        assert_eq!(config.call_volume, Some(0.4));
    }

    #[test]
    fn test_unknown_voice_rejected() {
        let mut config = VoiceConfig::default();
        let yaml: YamlConfig = serde_yaml::from_str("openai:\n  voice: nova\n").unwrap();
        let err = apply_yaml(&mut config, yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
