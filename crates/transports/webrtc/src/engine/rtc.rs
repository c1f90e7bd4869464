//! webrtc-rs backed transport engine

use super::{LinkEventKind, LinkEventSink, PeerLink, TransportEngine, TransportState};
use crate::channels::ChannelKind;
use crate::config::{DataChannelMode, SessionConfig};
use crate::media::{LocalMedia, LocalTrack, RemoteStream, TrackKind};
use crate::peer::{PeerId, Role};
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type ChannelSlots = Arc<Mutex<HashMap<ChannelKind, Arc<RTCDataChannel>>>>;

/// Creates webrtc-rs peer connections configured from the session config
pub struct RtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    stroke_mode: DataChannelMode,
}

impl RtcEngine {
    /// Build the webrtc-rs API (default codecs and interceptors)
    ///
    /// # Arguments
    ///
    /// * `config` - STUN/TURN servers and stroke channel delivery mode
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Ok(Self {
            api,
            ice_servers,
            stroke_mode: config.stroke_channel.mode,
        })
    }

    fn channel_init(kind: ChannelKind, stroke_mode: DataChannelMode) -> RTCDataChannelInit {
        let mode = match kind {
            ChannelKind::Sync => DataChannelMode::Reliable,
            ChannelKind::Stroke => stroke_mode,
        };
        RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for RtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcEngine")
            .field("ice_servers", &self.ice_servers.len())
            .field("stroke_mode", &self.stroke_mode)
            .finish()
    }
}

#[async_trait]
impl TransportEngine for RtcEngine {
    #[instrument(skip(self, events), fields(peer_id = %peer_id))]
    async fn create_link(
        &self,
        peer_id: &PeerId,
        role: Role,
        events: LinkEventSink,
    ) -> Result<Box<dyn PeerLink>> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        let channels: ChannelSlots = Arc::new(Mutex::new(HashMap::new()));
        install_handlers(&pc, &channels, &events);

        if role.is_initiator() {
            for kind in ChannelKind::ALL {
                let init = Self::channel_init(kind, self.stroke_mode);
                let dc = pc
                    .create_data_channel(kind.label(), Some(init))
                    .await
                    .map_err(|e| {
                        Error::DataChannelError(format!(
                            "Failed to create {} channel: {}",
                            kind.label(),
                            e
                        ))
                    })?;
                wire_channel(dc, kind, &channels, &events);
            }
        }

        info!("Peer link created");
        Ok(Box::new(RtcLink {
            peer_id: peer_id.clone(),
            pc,
            channels,
        }))
    }
}

/// Forward peer connection callbacks onto the session queue
fn install_handlers(pc: &Arc<RTCPeerConnection>, channels: &ChannelSlots, events: &LinkEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                trace!(peer_id = %sink.peer_id(), "ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => sink.emit(LinkEventKind::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => warn!(peer_id = %sink.peer_id(), "Failed to encode candidate: {}", e),
            }
        })
    }));

    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(peer_id = %sink.peer_id(), "Peer connection state: {}", s);
            let state = match s {
                RTCPeerConnectionState::Connected => TransportState::Connected,
                RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                RTCPeerConnectionState::Failed => TransportState::Failed,
                RTCPeerConnectionState::Closed => TransportState::Closed,
                _ => return,
            };
            sink.emit(LinkEventKind::StateChanged(state));
        })
    }));

    let sink = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            trace!(peer_id = %sink.peer_id(), "ICE connection state: {}", s);
            if s == RTCIceConnectionState::Failed {
                sink.emit(LinkEventKind::IceFailed);
            }
        })
    }));

    let sink = events.clone();
    let slots = Arc::clone(channels);
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let sink = sink.clone();
        let slots = Arc::clone(&slots);
        Box::pin(async move {
            match ChannelKind::from_label(dc.label()) {
                Some(kind) => wire_channel(dc, kind, &slots, &sink),
                None => warn!(peer_id = %sink.peer_id(), "Ignoring unknown data channel {}", dc.label()),
            }
        })
    }));

    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                info!(peer_id = %sink.peer_id(), kind = ?kind, "Remote track received");
                sink.emit(LinkEventKind::RemoteTrack(RemoteStream {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind,
                    track: Some(track),
                }));
            })
        },
    ));
}

/// Store a data channel and forward its open/close/message callbacks
fn wire_channel(
    dc: Arc<RTCDataChannel>,
    kind: ChannelKind,
    channels: &ChannelSlots,
    events: &LinkEventSink,
) {
    let sink = events.clone();
    dc.on_open(Box::new(move || {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(peer_id = %sink.peer_id(), channel = kind.label(), "Data channel open");
            sink.emit(LinkEventKind::ChannelOpen(kind));
        })
    }));

    let sink = events.clone();
    dc.on_close(Box::new(move || {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(peer_id = %sink.peer_id(), channel = kind.label(), "Data channel closed");
            sink.emit(LinkEventKind::ChannelClosed(kind));
        })
    }));

    let sink = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = sink.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => sink.emit(LinkEventKind::Message {
                    channel: kind,
                    text,
                }),
                Err(e) => warn!(
                    peer_id = %sink.peer_id(),
                    channel = kind.label(),
                    "Dropping non-UTF-8 frame: {}",
                    e
                ),
            }
        })
    }));

    channels.lock().insert(kind, dc);
}

/// One webrtc-rs peer connection and its two data channels
pub struct RtcLink {
    peer_id: PeerId,
    pc: Arc<RTCPeerConnection>,
    channels: ChannelSlots,
}

impl RtcLink {
    fn channel(&self, kind: ChannelKind) -> Result<Arc<RTCDataChannel>> {
        self.channels.lock().get(&kind).cloned().ok_or_else(|| {
            Error::DataChannelError(format!("{} channel not established", kind.label()))
        })
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::NegotiationError("No local description".to_string()))?;

        match desc.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
            other => Err(Error::NegotiationError(format!(
                "Unexpected local description type: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create offer: {}", e)))?;

        self.pc.set_local_description(offer).await.map_err(|e| {
            Error::NegotiationError(format!("Failed to set local description: {}", e))
        })?;

        debug!(peer_id = %self.peer_id, ice_restart, "Created SDP offer");
        self.local_description().await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;

        self.pc.set_local_description(answer).await.map_err(|e| {
            Error::NegotiationError(format!("Failed to set local description: {}", e))
        })?;

        debug!(peer_id = %self.peer_id, "Created SDP answer");
        self.local_description().await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| Error::NegotiationError(format!("Invalid remote SDP: {}", e)))?;

        self.pc.set_remote_description(desc).await.map_err(|e| {
            Error::NegotiationError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn rollback(&self) -> Result<()> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to roll back offer: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceFailure(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn send(&self, channel: ChannelKind, text: &str) -> Result<()> {
        let dc = self.channel(channel)?;
        dc.send_text(text.to_string()).await.map_err(|e| {
            Error::DataChannelError(format!("Failed to send on {}: {}", channel.label(), e))
        })?;
        Ok(())
    }

    async fn buffered_amount(&self, channel: ChannelKind) -> Result<usize> {
        let dc = self.channel(channel)?;
        Ok(dc.buffered_amount().await)
    }

    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        for track in media.tracks() {
            let rtc_track = Arc::clone(track.rtc_track()) as Arc<dyn TrackLocal + Send + Sync>;
            self.pc.add_track(rtc_track).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to add {:?} track: {}", track.kind(), e))
            })?;
        }
        debug!(peer_id = %self.peer_id, tracks = media.tracks().len(), "Local media attached");
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<usize> {
        let mut replaced = 0;
        for sender in self.pc.get_senders().await {
            let is_video = sender
                .track()
                .await
                .is_some_and(|current| current.kind() == RTPCodecType::Video);
            if !is_video {
                continue;
            }

            let rtc_track = Arc::clone(track.rtc_track()) as Arc<dyn TrackLocal + Send + Sync>;
            sender.replace_track(Some(rtc_track)).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to replace video track: {}", e))
            })?;
            replaced += 1;
        }
        debug!(peer_id = %self.peer_id, track_id = track.id(), replaced, "Video track replaced");
        Ok(replaced)
    }

    async fn close(&self) -> Result<()> {
        let channels: Vec<_> = self.channels.lock().drain().map(|(_, dc)| dc).collect();
        for dc in channels {
            if let Err(e) = dc.close().await {
                trace!(peer_id = %self.peer_id, "Data channel close failed: {}", e);
            }
        }

        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        info!(peer_id = %self.peer_id, "Peer link closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_channel_is_always_reliable() {
        let init = RtcEngine::channel_init(ChannelKind::Sync, DataChannelMode::Unreliable);
        assert_eq!(init.ordered, Some(true));
        assert_eq!(init.max_retransmits, None);
    }

    #[test]
    fn test_stroke_channel_follows_configured_mode() {
        let init =
            RtcEngine::channel_init(ChannelKind::Stroke, DataChannelMode::BoundedRetransmit(3));
        assert_eq!(init.ordered, Some(true));
        assert_eq!(init.max_retransmits, Some(3));

        let init = RtcEngine::channel_init(ChannelKind::Stroke, DataChannelMode::Unreliable);
        assert_eq!(init.ordered, Some(false));
        assert_eq!(init.max_retransmits, Some(0));
    }

    #[test]
    fn test_engine_builds_ice_servers_from_config() {
        let config = SessionConfig::default().with_turn_servers(vec![
            crate::config::TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            },
        ]);
        let engine = RtcEngine::new(&config).unwrap();
        assert_eq!(engine.ice_servers.len(), 3);
        assert_eq!(engine.ice_servers[2].username, "user");
    }
}
