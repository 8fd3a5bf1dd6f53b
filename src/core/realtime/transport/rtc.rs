//! `PeerTransport` implementation on top of the `webrtc` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{
    IceConnectionState, LocalAudioSource, PeerTransport, PeerTransportFactory, RemoteAudioSink,
    TrackKind, TransportEvent, TransportEventSender,
};
use crate::core::realtime::base::{DataChannelState, VoiceError, VoiceResult};

const LOCAL_TRACK_ID: &str = "audio_track";
const LOCAL_STREAM_ID: &str = "local_stream";
const OPUS_CLOCK_RATE: u32 = 48000;
const RTCP_BUFFER_SIZE: usize = 1500;

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        }
    }
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Unspecified,
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds a fresh `RTCPeerConnection` per connection attempt.
#[derive(Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
    audio_sink: Option<Arc<dyn RemoteAudioSink>>,
    audio_source: Option<Arc<dyn LocalAudioSource>>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            audio_sink: None,
            audio_source: None,
        }
    }

    /// Deliver remote audio RTP payloads to `sink`.
    pub fn with_audio_sink(mut self, sink: Arc<dyn RemoteAudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    /// Send frames produced by `source` on the local audio track.
    pub fn with_audio_source(mut self, source: Arc<dyn LocalAudioSource>) -> Self {
        self.audio_source = Some(source);
        self
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(&self, events: TransportEventSender) -> VoiceResult<Arc<dyn PeerTransport>> {
        let transport = WebRtcTransport::new(&self.ice_servers, events, self.audio_sink.clone())
            .await?
            .with_audio_source(self.audio_source.clone());
        Ok(Arc::new(transport))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// One WebRTC peer connection with an Opus send track and an ordered data
/// channel.
pub struct WebRtcTransport {
    id: Uuid,
    pc: Arc<RTCPeerConnection>,
    events: TransportEventSender,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    remote_tracks: Arc<Mutex<HashMap<String, Arc<TrackRemote>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    audio_sink: Option<Arc<dyn RemoteAudioSink>>,
    audio_source: Option<Arc<dyn LocalAudioSource>>,
    local_track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    capture: Mutex<Option<JoinHandle<()>>>,
}

impl WebRtcTransport {
    pub async fn new(
        ice_servers: &[String],
        events: TransportEventSender,
        audio_sink: Option<Arc<dyn RemoteAudioSink>>,
    ) -> VoiceResult<Self> {
        let id = Uuid::new_v4();

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            debug!(transport_id = %id, ice_state = %state, "ICE connection state changed");
            let _ = tx.send(TransportEvent::IceStateChanged(state.into()));
            Box::pin(async {})
        }));

        let remote_tracks: Arc<Mutex<HashMap<String, Arc<TrackRemote>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let tx = events.clone();
        let tracks = Arc::clone(&remote_tracks);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let track_id = track.id();
            let kind = TrackKind::from(track.kind());
            info!(
                transport_id = %id,
                track_id = %track_id,
                codec = %track.codec().capability.mime_type,
                "Remote track received"
            );
            tracks.lock().insert(track_id.clone(), track);
            let _ = tx.send(TransportEvent::RemoteTrack { id: track_id, kind });
            Box::pin(async {})
        }));

        Ok(Self {
            id,
            pc,
            events,
            data_channel: Mutex::new(None),
            remote_tracks,
            tasks: Mutex::new(Vec::new()),
            audio_sink,
            audio_source: None,
            local_track: Mutex::new(None),
            capture: Mutex::new(None),
        })
    }

    /// Write frames from `source` to the local track once it is added.
    pub fn with_audio_source(mut self, source: Option<Arc<dyn LocalAudioSource>>) -> Self {
        self.audio_source = source;
        self
    }

    /// Whether local audio is currently being pumped to the track.
    pub fn is_capturing(&self) -> bool {
        self.capture
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn data_channel(&self) -> VoiceResult<Arc<RTCDataChannel>> {
        self.data_channel
            .lock()
            .clone()
            .ok_or_else(|| VoiceError::Transport("data channel not created".to_string()))
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_local_audio_track(&self) -> VoiceResult<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            LOCAL_TRACK_ID.to_owned(),
            LOCAL_STREAM_ID.to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP must be drained for interceptors (NACK, reports) to run.
        let handle = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        self.tasks.lock().push(handle);

        if let Some(source) = self.audio_source.clone() {
            let pump = spawn_capture_pump(self.id, source, Arc::clone(&track));
            *self.capture.lock() = Some(pump);
        } else {
            debug!(transport_id = %self.id, "No local audio source attached");
        }
        *self.local_track.lock() = Some(track);

        debug!(transport_id = %self.id, "Local audio track added");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> VoiceResult<()> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;

        let tx = self.events.clone();
        dc.on_open(Box::new(move || {
            let _ = tx.send(TransportEvent::DataChannelStateChanged(DataChannelState::Open));
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        dc.on_close(Box::new(move || {
            let _ = tx.send(TransportEvent::DataChannelStateChanged(
                DataChannelState::Closed,
            ));
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = tx.send(TransportEvent::DataChannelMessage(msg.data));
            Box::pin(async {})
        }));

        *self.data_channel.lock() = Some(dc);
        debug!(transport_id = %self.id, label, "Data channel created");
        Ok(())
    }

    async fn create_offer(&self) -> VoiceResult<String> {
        let offer = self.pc.create_offer(None).await?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: &str) -> VoiceResult<()> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())?;
        self.pc.set_local_description(offer).await?;
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> VoiceResult<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn enable_remote_track(&self, track_id: &str) -> VoiceResult<()> {
        let track = self
            .remote_tracks
            .lock()
            .get(track_id)
            .cloned()
            .ok_or_else(|| VoiceError::Transport(format!("unknown remote track {track_id}")))?;

        let sink = self.audio_sink.clone();
        let transport_id = self.id;
        let handle = tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                if let Some(sink) = &sink {
                    sink.on_rtp_payload(packet.payload);
                }
            }
            debug!(transport_id = %transport_id, "Remote track ended");
        });
        self.tasks.lock().push(handle);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> VoiceResult<()> {
        let dc = self.data_channel()?;
        dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    async fn close(&self) -> VoiceResult<()> {
        if let Some(pump) = self.capture.lock().take() {
            pump.abort();
        }
        self.local_track.lock().take();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.remote_tracks.lock().clear();

        let dc = self.data_channel.lock().take();
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                warn!(transport_id = %self.id, "Failed to close data channel: {e}");
            }
        }

        self.pc.close().await?;
        info!(transport_id = %self.id, "Peer connection closed");
        Ok(())
    }
}

/// Pull frames from `source` and write them to `track` until the source
/// ends or a write fails.
fn spawn_capture_pump(
    transport_id: Uuid,
    source: Arc<dyn LocalAudioSource>,
    track: Arc<TrackLocalStaticSample>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = source.next_frame().await {
            let sample = Sample {
                data: frame.data,
                duration: frame.duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                warn!(transport_id = %transport_id, "Failed to write local audio: {e}");
                break;
            }
        }
        debug!(transport_id = %transport_id, "Local audio capture stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::core::realtime::transport::AudioFrame;

    /// Endless 20ms frames, counting how many were taken.
    #[derive(Default)]
    struct ToneSource {
        pulled: AtomicUsize,
    }

    #[async_trait]
    impl LocalAudioSource for ToneSource {
        async fn next_frame(&self) -> Option<AudioFrame> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.pulled.fetch_add(1, Ordering::SeqCst);
            Some(AudioFrame {
                data: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
                duration: Duration::from_millis(20),
            })
        }
    }

    async fn wait_for_pulls(source: &ToneSource, count: usize) -> bool {
        for _ in 0..200 {
            if source.pulled.load(Ordering::SeqCst) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_capture_pump_runs_until_close() {
        let source = Arc::new(ToneSource::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WebRtcTransport::new(&[], tx, None)
            .await
            .unwrap()
            .with_audio_source(Some(source.clone()));
        assert!(!transport.is_capturing());

        transport.add_local_audio_track().await.unwrap();
        assert!(transport.is_capturing());
        assert!(wait_for_pulls(&source, 3).await);

        transport.close().await.unwrap();
        assert!(!transport.is_capturing());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = source.pulled.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.pulled.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_no_capture_without_source() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WebRtcTransport::new(&[], tx, None).await.unwrap();

        transport.add_local_audio_track().await.unwrap();
        assert!(!transport.is_capturing());
        transport.close().await.unwrap();
    }
}
