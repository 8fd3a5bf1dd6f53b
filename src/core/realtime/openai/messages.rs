//! Control events exchanged over the realtime data channel.
//!
//! Every message is a JSON object discriminated by its `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Instructions, voice, temperature and turn detection
//! - response.create - Ask the model to respond now
//!
//! Server events (received from server):
//! - error - Error reported by the remote endpoint
//! - output_audio_buffer.started - Model audio playback started
//! - output_audio_buffer.stopped - Model audio playback finished
//! - output_audio_buffer.cleared - Model audio interrupted
//! - conversation.item.created - Item added to the conversation
//!
//! Anything else decodes to [`VoiceEvent::Unknown`]; the codec never fails a
//! decode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::realtime::base::ProtocolError;

// =============================================================================
// Domain Events
// =============================================================================

/// Turn detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurnDetectionMode {
    /// Server-side voice activity detection
    #[default]
    #[serde(rename = "server_vad")]
    ServerVad,
}

/// Turn detection settings carried by `session.update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnDetectionConfig {
    pub mode: TurnDetectionMode,
    /// Whether the model responds automatically when the user stops talking.
    /// `false` is "listening mode": responses only follow `response.create`.
    pub auto_respond: bool,
}

impl TurnDetectionConfig {
    pub fn server_vad(auto_respond: bool) -> Self {
        Self {
            mode: TurnDetectionMode::ServerVad,
            auto_respond,
        }
    }
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self::server_vad(true)
    }
}

/// Session settings pushed to the remote endpoint after connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub instructions: String,
    pub voice: String,
    pub temperature: f32,
    pub turn_detection: TurnDetectionConfig,
}

/// A control event, independent of its wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Update the remote session configuration
    SessionUpdate(SessionSettings),
    /// Ask the model to respond now
    ResponseCreate,
    /// Error reported by the remote endpoint
    Error { message: String },
    /// Model audio started playing
    SpeakingStarted,
    /// Model audio stopped or was cleared
    SpeakingStopped,
    /// A conversation item was created
    ItemCreated { id: String, role: Option<String> },
    /// Event type this codec does not handle
    Unknown { raw_type: String },
}

impl VoiceEvent {
    /// Wire `type` discriminator of this event.
    pub fn event_type(&self) -> &str {
        match self {
            VoiceEvent::SessionUpdate(_) => "session.update",
            VoiceEvent::ResponseCreate => "response.create",
            VoiceEvent::Error { .. } => "error",
            VoiceEvent::SpeakingStarted => "output_audio_buffer.started",
            VoiceEvent::SpeakingStopped => "output_audio_buffer.stopped",
            VoiceEvent::ItemCreated { .. } => "conversation.item.created",
            VoiceEvent::Unknown { raw_type } => raw_type,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

const KNOWN_TYPES: &[&str] = &[
    "session.update",
    "response.create",
    "error",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "output_audio_buffer.cleared",
    "conversation.item.created",
];

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: WireSession,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        error: WireError,
    },
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "output_audio_buffer.cleared")]
    OutputAudioBufferCleared {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item: WireItem,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSession {
    instructions: String,
    voice: String,
    temperature: f32,
    turn_detection: WireTurnDetection,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTurnDetection {
    #[serde(rename = "type")]
    mode: TurnDetectionMode,
    create_response: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

impl From<WireEvent> for VoiceEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::SessionUpdate { session, .. } => VoiceEvent::SessionUpdate(SessionSettings {
                instructions: session.instructions,
                voice: session.voice,
                temperature: session.temperature,
                turn_detection: TurnDetectionConfig {
                    mode: session.turn_detection.mode,
                    auto_respond: session.turn_detection.create_response,
                },
            }),
            WireEvent::ResponseCreate { .. } => VoiceEvent::ResponseCreate,
            WireEvent::Error { error, .. } => VoiceEvent::Error {
                message: error.message,
            },
            WireEvent::OutputAudioBufferStarted { .. } => VoiceEvent::SpeakingStarted,
            WireEvent::OutputAudioBufferStopped { .. }
            | WireEvent::OutputAudioBufferCleared { .. } => VoiceEvent::SpeakingStopped,
            WireEvent::ConversationItemCreated { item, .. } => VoiceEvent::ItemCreated {
                id: item.id,
                role: item.role,
            },
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes and decodes control events, stamping each outbound event with a
/// unique `event_id`.
#[derive(Debug, Default)]
pub struct EventCodec {
    sequence: AtomicU64,
}

impl EventCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an id of the form `evt_<unix_millis>_<seq>`.
    ///
    /// Ids are for tracing only and carry no ordering guarantee.
    pub fn next_event_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("evt_{millis}_{seq}")
    }

    /// Serialize an event to JSON bytes.
    pub fn encode(&self, event: &VoiceEvent) -> Result<Bytes, ProtocolError> {
        let event_id = Some(self.next_event_id());

        let wire = match event {
            VoiceEvent::SessionUpdate(settings) => WireEvent::SessionUpdate {
                event_id,
                session: WireSession {
                    instructions: settings.instructions.clone(),
                    voice: settings.voice.clone(),
                    temperature: settings.temperature,
                    turn_detection: WireTurnDetection {
                        mode: settings.turn_detection.mode,
                        create_response: settings.turn_detection.auto_respond,
                    },
                },
            },
            VoiceEvent::ResponseCreate => WireEvent::ResponseCreate { event_id },
            VoiceEvent::Error { message } => WireEvent::Error {
                event_id,
                error: WireError {
                    message: message.clone(),
                    error_type: None,
                    code: None,
                },
            },
            VoiceEvent::SpeakingStarted => WireEvent::OutputAudioBufferStarted { event_id },
            VoiceEvent::SpeakingStopped => WireEvent::OutputAudioBufferStopped { event_id },
            VoiceEvent::ItemCreated { id, role } => WireEvent::ConversationItemCreated {
                event_id,
                item: WireItem {
                    id: id.clone(),
                    role: role.clone(),
                },
            },
            VoiceEvent::Unknown { raw_type } => {
                if raw_type.is_empty() {
                    return Err(ProtocolError(
                        "cannot encode an event without a type".to_string(),
                    ));
                }
                if KNOWN_TYPES.contains(&raw_type.as_str()) {
                    return Err(ProtocolError(format!(
                        "{raw_type} must be encoded from its typed variant"
                    )));
                }
                let value = serde_json::json!({ "type": raw_type, "event_id": event_id });
                return serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .map_err(|e| ProtocolError(e.to_string()));
            }
        };

        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| ProtocolError(e.to_string()))
    }

    /// Parse an inbound message. Never fails: unrecognized or malformed
    /// messages become [`VoiceEvent::Unknown`].
    pub fn decode(&self, data: &[u8]) -> VoiceEvent {
        match serde_json::from_slice::<WireEvent>(data) {
            Ok(wire) => wire.into(),
            Err(parse_error) => {
                let raw_type = serde_json::from_slice::<TypeProbe>(data)
                    .ok()
                    .and_then(|probe| probe.event_type);

                match raw_type {
                    Some(raw_type) if KNOWN_TYPES.contains(&raw_type.as_str()) => {
                        let err = ProtocolError(format!("malformed {raw_type} event: {parse_error}"));
                        warn!("{err}");
                        VoiceEvent::Unknown { raw_type }
                    }
                    Some(raw_type) => {
                        debug!("Unhandled realtime event type: {raw_type}");
                        VoiceEvent::Unknown { raw_type }
                    }
                    None => {
                        let err = ProtocolError(format!("unreadable event: {parse_error}"));
                        warn!("{err}");
                        VoiceEvent::Unknown {
                            raw_type: String::new(),
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
