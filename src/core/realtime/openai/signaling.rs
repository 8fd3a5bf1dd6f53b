//! SDP offer/answer exchange with the realtime endpoint.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use super::config::REALTIME_SIGNALING_PATH;
use super::credentials::SessionCredential;
use crate::core::realtime::base::{SignalingError, VoiceResult};

/// Content type of the offer body. Must not carry a charset parameter.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Posts local SDP offers and returns the remote SDP answer.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: Client,
    base_url: String,
}

impl SignalingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Signaling URL for `model`, with the model as a query parameter.
    pub fn endpoint(&self, model: &str) -> Result<Url, SignalingError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, REALTIME_SIGNALING_PATH))
            .map_err(|e| SignalingError::new(None, format!("invalid signaling URL: {e}")))?;
        url.query_pairs_mut().append_pair("model", model);
        Ok(url)
    }

    /// Send `offer_sdp` and return the answer SDP.
    pub async fn exchange(
        &self,
        credential: &SessionCredential,
        offer_sdp: &str,
    ) -> Result<String, SignalingError> {
        let url = self.endpoint(credential.model())?;
        debug!(%url, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", credential.token()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SignalingError::new(None, format!("SDP exchange failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SignalingError::new(Some(status.as_u16()), format!("failed to read SDP answer: {e}"))
        })?;

        if !status.is_success() {
            return Err(SignalingError::new(
                Some(status.as_u16()),
                format!("SDP exchange rejected: {} - {}", status.as_u16(), body),
            ));
        }

        let answer = body.trim_start();
        if !answer.starts_with("v=") {
            return Err(SignalingError::new(
                Some(status.as_u16()),
                "malformed SDP answer",
            ));
        }

        debug!(answer_len = answer.len(), "Received SDP answer");
        Ok(answer.to_string())
    }
}
