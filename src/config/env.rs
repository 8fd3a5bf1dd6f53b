use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::{ConfigError, VoiceConfig};
use crate::core::realtime::TransportKind;
use crate::core::realtime::openai::OpenAIRealtimeVoice;

/// Read a non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        None => Ok(None),
    }
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off`.
pub(super) fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}

pub(super) fn parse_transport(name: &str, raw: &str) -> Result<TransportKind, ConfigError> {
    TransportKind::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("unknown transport '{raw}' (expected openai or gemini)"),
    })
}

pub(super) fn parse_voice(name: &str, raw: &str) -> Result<OpenAIRealtimeVoice, ConfigError> {
    OpenAIRealtimeVoice::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("unknown voice '{raw}'"),
    })
}

/// Split a comma separated list, dropping empty entries.
pub(super) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Overlay environment variables on `config`.
pub(super) fn apply_env(config: &mut VoiceConfig) -> Result<(), ConfigError> {
    if let Some(raw) = env_var("VOICE_TRANSPORT") {
        config.transport = parse_transport("VOICE_TRANSPORT", &raw)?;
    }

    if let Some(key) = env_var("OPENAI_API_KEY") {
        config.openai_api_key = Some(key);
    }
    if let Some(key) = env_var("GEMINI_API_KEY") {
        config.gemini_api_key = Some(key);
    }

    if let Some(url) = env_var("OPENAI_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(model) = env_var("OPENAI_REALTIME_MODEL") {
        config.model = model;
    }
    if let Some(raw) = env_var("VOICE_NAME") {
        config.voice = parse_voice("VOICE_NAME", &raw)?;
    }
    if let Some(temperature) = parse_var::<f32>("VOICE_TEMPERATURE")? {
        config.temperature = temperature;
    }

    if let Some(name) = env_var("COMPANION_NAME") {
        config.companion_name = name;
    }
    if let Some(personality) = env_var("COMPANION_PERSONALITY") {
        config.companion_personality = personality;
    }

    if let Some(ms) = parse_var::<u64>("VOICE_NEGOTIATION_TIMEOUT_MS")? {
        config.negotiation_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_var::<u64>("VOICE_HTTP_TIMEOUT_MS")? {
        config.http_timeout = Duration::from_millis(ms);
    }
    if let Some(raw) = env_var("VOICE_ICE_SERVERS") {
        config.ice_servers = split_list(&raw);
    }

    if let Some(raw) = env_var("VOICE_SPEAKER_DEFAULT") {
        config.speaker_default = parse_bool("VOICE_SPEAKER_DEFAULT", &raw)?;
    }
    if let Some(volume) = parse_var::<f32>("VOICE_CALL_VOLUME")? {
        config.call_volume = Some(volume);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "yes").unwrap());
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("stun:a:1, ,stun:b:2,"),
            vec!["stun:a:1".to_string(), "stun:b:2".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_transport_error_names_variable() {
        let err = parse_transport("VOICE_TRANSPORT", "hume").unwrap_err();
        assert!(err.to_string().contains("VOICE_TRANSPORT"));
    }
}
