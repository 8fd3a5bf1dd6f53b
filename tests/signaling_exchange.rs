//! Integration tests for the SDP offer/answer exchange
//!
//! These tests verify:
//! - The offer is posted raw with the ephemeral token and SDP content type
//! - The model travels as a query parameter
//! - Rejections and malformed answers map to `SignalingError`

use std::time::Duration;

use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_voice::core::realtime::openai::{SessionCredential, SignalingClient};

const MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n";
const ANSWER: &str = "v=0\r\no=- 9 2 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\n";

fn client(server: &MockServer) -> SignalingClient {
    SignalingClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

fn credential() -> SessionCredential {
    SessionCredential::new("ek_token", MODEL)
}

#[tokio::test]
async fn test_exchange_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(query_param("model", MODEL))
        .and(header("authorization", "Bearer ek_token"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(OFFER))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
        .expect(1)
        .mount(&server)
        .await;

    let answer = client(&server).exchange(&credential(), OFFER).await.unwrap();
    assert_eq!(answer, ANSWER);
}

#[tokio::test]
async fn test_leading_whitespace_is_trimmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(201).set_body_string(format!("\r\n{ANSWER}")))
        .mount(&server)
        .await;

    let answer = client(&server).exchange(&credential(), OFFER).await.unwrap();
    assert!(answer.starts_with("v=0"));
}

#[tokio::test]
async fn test_rejection_maps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired token"))
        .mount(&server)
        .await;

    let err = client(&server)
        .exchange(&credential(), OFFER)
        .await
        .unwrap_err();
    assert_eq!(err.http_status, Some(401));
    assert!(err.message.contains("expired token"));
}

#[tokio::test]
async fn test_empty_answer_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let err = client(&server)
        .exchange(&credential(), OFFER)
        .await
        .unwrap_err();
    assert_eq!(err.message, "malformed SDP answer");
}

#[tokio::test]
async fn test_non_sdp_answer_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&server)
        .await;

    let err = client(&server)
        .exchange(&credential(), OFFER)
        .await
        .unwrap_err();
    assert_eq!(err.http_status, Some(200));
    assert_eq!(err.message, "malformed SDP answer");
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let client = SignalingClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
    let err = client.exchange(&credential(), OFFER).await.unwrap_err();
    assert_eq!(err.http_status, None);
}
