//! Ephemeral session token negotiation.
//!
//! A long-lived API key is exchanged for a short-lived client secret via
//! `POST /v1/realtime/sessions`. The secret authorizes exactly one SDP
//! exchange and is never cached: every connection attempt fetches a new one.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroize;

use super::config::REALTIME_SESSIONS_PATH;
use crate::core::realtime::base::{NegotiationError, VoiceResult};

// =============================================================================
// Session Credential
// =============================================================================

/// Short-lived token authorizing one realtime media session.
pub struct SessionCredential {
    token: String,
    model: String,
    issued_at: SystemTime,
    expires_at: Option<SystemTime>,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            model: model.into(),
            issued_at: SystemTime::now(),
            expires_at: None,
        }
    }

    /// Attach an expiry expressed in Unix seconds.
    pub fn with_expiry(mut self, expires_at_unix: u64) -> Self {
        self.expires_at = Some(UNIX_EPOCH + Duration::from_secs(expires_at_unix));
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Whether the server-reported expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| SystemTime::now() >= expires_at)
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("model", &self.model)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for SessionCredential {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
}

// =============================================================================
// Credential Negotiator
// =============================================================================

/// Exchanges API keys for ephemeral session credentials.
///
/// Holds no mutable state; one negotiator can serve concurrent requests.
/// No retries are performed.
#[derive(Debug, Clone)]
pub struct CredentialNegotiator {
    client: Client,
    base_url: String,
}

impl CredentialNegotiator {
    /// Create a negotiator against `base_url` (for example
    /// `https://api.openai.com`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a negotiator sharing an existing HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}{}", self.base_url, REALTIME_SESSIONS_PATH)
    }

    /// Request a fresh session credential for `model`.
    pub async fn fetch_session_credential(
        &self,
        api_key: &str,
        model: &str,
    ) -> Result<SessionCredential, NegotiationError> {
        if api_key.trim().is_empty() {
            return Err(NegotiationError::new(None, "API key is empty"));
        }

        debug!(model, "Requesting realtime session credential");

        let response = self
            .client
            .post(self.sessions_url())
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&SessionRequest { model })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NegotiationError::new(None, "session request timed out")
                } else {
                    NegotiationError::new(None, format!("session request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            NegotiationError::new(
                Some(status.as_u16()),
                format!("failed to read session response: {e}"),
            )
        })?;

        if !status.is_success() {
            return Err(NegotiationError::new(
                Some(status.as_u16()),
                format!("OpenAI API error: {} - {}", status.as_u16(), body),
            ));
        }

        let parsed: SessionResponse = serde_json::from_str(&body).map_err(|e| {
            NegotiationError::new(
                Some(status.as_u16()),
                format!("malformed session response: {e}"),
            )
        })?;

        let secret = parsed.client_secret.ok_or_else(|| {
            NegotiationError::new(Some(status.as_u16()), "session response has no client_secret")
        })?;

        let token = secret
            .value
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                NegotiationError::new(Some(status.as_u16()), "session response has an empty token")
            })?;

        let model = parsed.model.unwrap_or_else(|| model.to_string());
        let mut credential = SessionCredential::new(token, model);
        if let Some(expires_at) = secret.expires_at {
            credential = credential.with_expiry(expires_at);
        }

        info!(model = credential.model(), "Obtained realtime session credential");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = SessionCredential::new("ek_secret", "gpt-4o-mini-realtime-preview");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("ek_secret"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(credential.token(), "ek_secret");
    }

    #[test]
    fn test_credential_expiry() {
        let credential = SessionCredential::new("ek", "m");
        assert!(!credential.is_expired());
        assert!(credential.expires_at().is_none());

        let expired = SessionCredential::new("ek", "m").with_expiry(1);
        assert!(expired.is_expired());
    }

    #[test]
    fn test_sessions_url_trims_trailing_slash() {
        let negotiator =
            CredentialNegotiator::new("https://api.openai.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            negotiator.sessions_url(),
            "https://api.openai.com/v1/realtime/sessions"
        );
    }

    #[tokio::test]
    async fn test_empty_api_key_rejected_without_request() {
        let negotiator =
            CredentialNegotiator::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = negotiator
            .fetch_session_credential("  ", "gpt-4o-mini-realtime-preview")
            .await
            .unwrap_err();
        assert_eq!(err.http_status, None);
        assert!(err.message.contains("empty"));
    }
}
