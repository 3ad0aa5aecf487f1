//! Peer media transport: the seam between session negotiation and webrtc-rs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use relive_common::{IceCandidate, SdpKind, SessionDescription};
use relive_media::{LiveStream, MediaPacket};

/// RTP clock rate used by video payload formats.
const VIDEO_CLOCK_RATE: u64 = 90_000;

/// Connectivity state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

#[derive(Debug)]
pub enum PeerEventKind {
    /// A local connectivity candidate was gathered.
    LocalCandidate(IceCandidate),
    /// Media started arriving. Sent at most once per transport.
    StreamStarted(LiveStream),
    StateChanged(PeerState),
}

/// Something a transport reported, tagged with the session generation that created it.
#[derive(Debug)]
pub struct PeerEvent {
    pub generation: u64,
    pub kind: PeerEventKind,
}

/// Where a transport posts its events.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event. Dropped silently once nobody is listening.
    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// One negotiated media connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Generate the local answer and apply it.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds a fresh transport for each negotiation.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Box<dyn PeerTransport>>;
}

/// webrtc-rs backed transport with a single receive-only video transceiver.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[derive(Debug, Clone)]
pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Box<dyn PeerTransport>> {
        let peer = WebRtcPeer::new(&self.ice_servers, events).await?;
        Ok(Box::new(peer))
    }
}

impl WebRtcPeer {
    pub async fn new(ice_servers: &[String], events: PeerEventSink) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(m).build();

        let config = RTCConfiguration {
            ice_servers: if ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: ice_servers.to_vec(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = c else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.emit(PeerEventKind::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
                events.emit(PeerEventKind::StateChanged(state.into()));
            })
        }));

        let started = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let started = Arc::clone(&started);
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    debug!("ignoring {} track {}", track.kind(), track.id());
                    return;
                }
                if started.swap(true, Ordering::AcqRel) {
                    warn!("ignoring additional video track {}", track.id());
                    return;
                }
                info!(
                    "Receiving video track {} ({})",
                    track.id(),
                    track.codec().capability.mime_type
                );
                tokio::spawn(forward_track(track, events));
            })
        }));

        Ok(Self { pc })
    }
}

/// Pump RTP payloads from `track` into a live stream until the track ends.
async fn forward_track(track: Arc<TrackRemote>, events: PeerEventSink) {
    let stream = LiveStream::new(events.generation());
    let is_h264 = track
        .codec()
        .capability
        .mime_type
        .eq_ignore_ascii_case(MIME_TYPE_H264);
    let mut first_timestamp: Option<u32> = None;
    let mut announced = false;

    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!("Track {} ended: {}", track.id(), e);
                break;
            }
        };
        if packet.payload.is_empty() {
            continue;
        }

        let base = *first_timestamp.get_or_insert(packet.header.timestamp);
        let ticks = packet.header.timestamp.wrapping_sub(base) as u64;
        let keyframe = is_h264 && is_h264_keyframe(&packet.payload);
        let media = MediaPacket::new(ticks * 1_000_000 / VIDEO_CLOCK_RATE, keyframe, packet.payload);

        if !announced {
            announced = true;
            events.emit(PeerEventKind::StreamStarted(stream.clone()));
        }
        stream.publish(media);
    }
}

/// Whether an H.264 RTP payload carries (the start of) an IDR slice.
fn is_h264_keyframe(payload: &[u8]) -> bool {
    const IDR: u8 = 5;
    let Some(&header) = payload.first() else {
        return false;
    };
    match header & 0x1F {
        IDR => true,
        // STAP-A: walk the aggregated NAL units.
        24 => {
            let mut offset = 1;
            while offset + 2 < payload.len() {
                let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                if payload[offset + 2] & 0x1F == IDR {
                    return true;
                }
                offset += 2 + size;
            }
            false
        }
        // FU-A: only the start fragment counts.
        28 => payload
            .get(1)
            .is_some_and(|fu| fu & 0x80 != 0 && fu & 0x1F == IDR),
        _ => false,
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
            SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
            SdpKind::Rollback => return Err(anyhow!("rollback descriptions are not supported")),
        };
        self.pc.set_remote_description(remote).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
