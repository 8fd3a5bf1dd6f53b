//! Peer-connection transport abstraction.
//!
//! The peer session controller drives the media library only through
//! [`PeerTransport`]. Callbacks from the library are reported as
//! [`TransportEvent`]s on an unbounded channel, so the controller applies
//! them on its own task instead of on the library's worker threads.
//!
//! [`WebRtcTransport`] is the production implementation built on the
//! `webrtc` crate.

mod rtc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::base::{DataChannelState, VoiceResult};

pub use rtc::{WebRtcTransport, WebRtcTransportFactory};

/// ICE connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// Whether a usable media path exists.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// Kind of a remote media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Unspecified,
}

/// Notification raised by a transport callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    IceStateChanged(IceConnectionState),
    DataChannelStateChanged(DataChannelState),
    DataChannelMessage(Bytes),
    RemoteTrack { id: String, kind: TrackKind },
}

/// Sending half handed to a transport at creation.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the session event loop.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Consumer of decoded remote audio, typically the platform playback path.
pub trait RemoteAudioSink: Send + Sync {
    /// Called with the payload of every RTP packet of an enabled track.
    fn on_rtp_payload(&self, payload: Bytes);
}

/// One encoded frame of local audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Opus payload
    pub data: Bytes,
    /// Playout duration of `data`
    pub duration: Duration,
}

/// Producer of encoded microphone audio, typically the platform capture path.
#[async_trait]
pub trait LocalAudioSource: Send + Sync {
    /// Wait for the next Opus frame. `None` ends the stream.
    async fn next_frame(&self) -> Option<AudioFrame>;
}

/// One peer connection with a local audio track and a control data channel.
///
/// Every method may be called at most once per connection attempt, except
/// `send_text`, `enable_remote_track` and `close`. `close` is idempotent.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Add the outbound audio track. Frames from an attached
    /// `LocalAudioSource` are written to it until `close`.
    async fn add_local_audio_track(&self) -> VoiceResult<()>;

    /// Create the ordered control-event data channel.
    async fn create_data_channel(&self, label: &str) -> VoiceResult<()>;

    /// Generate the local SDP offer.
    async fn create_offer(&self) -> VoiceResult<String>;

    /// Apply the local SDP offer.
    async fn set_local_description(&self, sdp: &str) -> VoiceResult<()>;

    /// Apply the remote SDP answer.
    async fn set_remote_description(&self, sdp: &str) -> VoiceResult<()>;

    /// Start playback of a remote track announced by `TransportEvent::RemoteTrack`.
    async fn enable_remote_track(&self, track_id: &str) -> VoiceResult<()>;

    /// Write a text message to the data channel.
    async fn send_text(&self, text: &str) -> VoiceResult<()>;

    /// Close the data channel, release tracks and close the peer connection.
    async fn close(&self) -> VoiceResult<()>;
}

/// Creates one transport per connection attempt.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self, events: TransportEventSender) -> VoiceResult<Arc<dyn PeerTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_state_is_connected() {
        assert!(IceConnectionState::Connected.is_connected());
        assert!(IceConnectionState::Completed.is_connected());
        assert!(!IceConnectionState::Checking.is_connected());
        assert!(!IceConnectionState::Disconnected.is_connected());
    }
}
