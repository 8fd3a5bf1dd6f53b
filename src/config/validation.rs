use std::time::Duration;

use super::{ConfigError, VoiceConfig};
use crate::core::realtime::TransportKind;

/// Validate a fully merged configuration.
pub(super) fn validate(config: &VoiceConfig) -> Result<(), ConfigError> {
    validate_temperature(config.temperature)?;
    validate_timeout("negotiation timeout", config.negotiation_timeout)?;
    validate_timeout("HTTP timeout", config.http_timeout)?;
    if let Some(volume) = config.call_volume {
        validate_call_volume(volume)?;
    }
    validate_api_key(config.transport, config.openai_api_key.as_deref())?;
    Ok(())
}

fn validate_temperature(temperature: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "temperature must be between 0.0 and 2.0, got {temperature}"
        )));
    }
    Ok(())
}

fn validate_timeout(name: &str, timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::Validation(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

fn validate_call_volume(volume: f32) -> Result<(), ConfigError> {
    if !(volume > 0.0 && volume <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "call volume must be in (0.0, 1.0], got {volume}"
        )));
    }
    Ok(())
}

/// The OpenAI transport cannot negotiate a session without an API key.
fn validate_api_key(transport: TransportKind, openai_api_key: Option<&str>) -> Result<(), ConfigError> {
    if transport == TransportKind::OpenAI && openai_api_key.is_none_or(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "OPENAI_API_KEY is required for the openai transport".to_string(),
        ));
    }
    Ok(())
}
