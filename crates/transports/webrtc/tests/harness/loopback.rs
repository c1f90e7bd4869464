//! Loopback peer links
//!
//! Links live in a shared `Network` keyed by (owner, remote). A pair
//! connects when the offering side applies the answer: both ends then see
//! `Connected` and both data channels open. Sends on one end arrive as
//! messages on the other.

use async_trait::async_trait;
use parking_lot::Mutex;
use sketchboard_webrtc::channels::ChannelKind;
use sketchboard_webrtc::engine::{
    LinkEventKind, LinkEventSink, PeerLink, TransportEngine, TransportState,
};
use sketchboard_webrtc::media::{LocalMedia, LocalTrack, RemoteStream, TrackKind};
use sketchboard_webrtc::peer::{PeerId, Role};
use sketchboard_webrtc::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use sketchboard_webrtc::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

type LinkKey = (PeerId, PeerId);

struct LinkState {
    serial: u64,
    sink: LinkEventSink,
    role: Role,
    local: Option<SdpKind>,
    remote: Option<SdpKind>,
    remote_set: bool,
    connected: bool,
    channels_open: bool,
    closed: bool,
    next_candidate: u32,
    applied_candidates: Vec<IceCandidate>,
    remote_descriptions: usize,
    rollbacks: usize,
    offers: usize,
    restart_offers: usize,
    buffered: HashMap<ChannelKind, usize>,
    sent: Vec<(ChannelKind, String)>,
    outgoing_tracks: Vec<RemoteStream>,
    video_senders: usize,
    video_replacements: Vec<String>,
}

impl LinkState {
    fn emit_candidate(&mut self, owner: &PeerId) {
        self.next_candidate += 1;
        self.sink.emit(LinkEventKind::LocalCandidate(IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                owner,
                40000 + self.next_candidate
            ),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));
    }
}

/// Point-in-time view of one link end
#[derive(Debug, Clone)]
pub struct LinkStats {
    pub role: Role,
    pub connected: bool,
    pub closed: bool,
    pub applied_candidates: Vec<IceCandidate>,
    pub remote_descriptions: usize,
    pub rollbacks: usize,
    pub offers: usize,
    pub restart_offers: usize,
    pub sent: Vec<(ChannelKind, String)>,
    /// Track IDs swapped onto the video senders, in order
    pub video_replacements: Vec<String>,
}

impl LinkStats {
    pub fn sent_on(&self, channel: ChannelKind) -> Vec<String> {
        self.sent
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[derive(Default)]
struct NetworkState {
    next_serial: u64,
    links: HashMap<LinkKey, LinkState>,
    unreachable: bool,
    out_of_ports: bool,
}

impl NetworkState {
    fn open_pair(&mut self, a: &PeerId, b: &PeerId) {
        if self.unreachable {
            return;
        }
        let ends = [(a.clone(), b.clone()), (b.clone(), a.clone())];
        if !ends
            .iter()
            .all(|key| self.links.get(key).is_some_and(|l| !l.closed))
        {
            return;
        }

        for key in &ends {
            if let Some(link) = self.links.get_mut(key) {
                link.connected = true;
                link.sink
                    .emit(LinkEventKind::StateChanged(TransportState::Connected));
                if !link.channels_open {
                    link.channels_open = true;
                    for kind in ChannelKind::ALL {
                        link.sink.emit(LinkEventKind::ChannelOpen(kind));
                    }
                }
            }
        }

        for (from, to) in [(a, b), (b, a)] {
            let tracks = self
                .links
                .get_mut(&(from.clone(), to.clone()))
                .map(|l| std::mem::take(&mut l.outgoing_tracks))
                .unwrap_or_default();
            if let Some(receiver) = self.links.get(&(to.clone(), from.clone())) {
                for stream in tracks {
                    receiver.sink.emit(LinkEventKind::RemoteTrack(stream));
                }
            }
        }
    }
}

/// Shared loopback network
#[derive(Clone, Default)]
pub struct Network {
    state: Arc<Mutex<NetworkState>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine creating links owned by `owner`
    pub fn engine(&self, owner: &PeerId) -> Arc<LoopbackEngine> {
        Arc::new(LoopbackEngine {
            owner: owner.clone(),
            network: self.clone(),
        })
    }

    /// Report an ICE failure on both ends of a connected pair
    ///
    /// With `recoverable` the next applied answer reconnects the pair;
    /// otherwise the network stays down until `heal`.
    pub fn fail_ice(&self, a: &PeerId, b: &PeerId, recoverable: bool) {
        let mut state = self.state.lock();
        state.unreachable = !recoverable;
        for key in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
            if let Some(link) = state.links.get_mut(&key) {
                link.connected = false;
                link.sink.emit(LinkEventKind::IceFailed);
            }
        }
    }

    pub fn heal(&self) {
        self.state.lock().unreachable = false;
    }

    /// Make link creation fail with a local I/O error
    pub fn exhaust_ports(&self, exhausted: bool) {
        self.state.lock().out_of_ports = exhausted;
    }

    /// Pretend `bytes` are queued on a channel of `owner`'s link to `remote`
    pub fn set_buffered(&self, owner: &PeerId, remote: &PeerId, channel: ChannelKind, bytes: usize) {
        if let Some(link) = self
            .state
            .lock()
            .links
            .get_mut(&(owner.clone(), remote.clone()))
        {
            link.buffered.insert(channel, bytes);
        }
    }

    pub fn stats(&self, owner: &PeerId, remote: &PeerId) -> Option<LinkStats> {
        self.state
            .lock()
            .links
            .get(&(owner.clone(), remote.clone()))
            .map(|l| LinkStats {
                role: l.role,
                connected: l.connected,
                closed: l.closed,
                applied_candidates: l.applied_candidates.clone(),
                remote_descriptions: l.remote_descriptions,
                rollbacks: l.rollbacks,
                offers: l.offers,
                restart_offers: l.restart_offers,
                sent: l.sent.clone(),
                video_replacements: l.video_replacements.clone(),
            })
    }

    /// Link ends currently registered, closed ones included
    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }
}

/// Transport engine over the loopback network
pub struct LoopbackEngine {
    owner: PeerId,
    network: Network,
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
    async fn create_link(
        &self,
        peer_id: &PeerId,
        role: Role,
        events: LinkEventSink,
    ) -> Result<Box<dyn PeerLink>> {
        let mut state = self.network.state.lock();
        if state.out_of_ports {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "no free ports",
            )));
        }
        state.next_serial += 1;
        let serial = state.next_serial;
        state.links.insert(
            (self.owner.clone(), peer_id.clone()),
            LinkState {
                serial,
                sink: events,
                role,
                local: None,
                remote: None,
                remote_set: false,
                connected: false,
                channels_open: false,
                closed: false,
                next_candidate: 0,
                applied_candidates: Vec::new(),
                remote_descriptions: 0,
                rollbacks: 0,
                offers: 0,
                restart_offers: 0,
                buffered: HashMap::new(),
                sent: Vec::new(),
                outgoing_tracks: Vec::new(),
                video_senders: 0,
                video_replacements: Vec::new(),
            },
        );

        Ok(Box::new(LoopbackLink {
            owner: self.owner.clone(),
            remote: peer_id.clone(),
            serial,
            network: self.network.clone(),
        }))
    }
}

/// One end of a loopback pair
pub struct LoopbackLink {
    owner: PeerId,
    remote: PeerId,
    serial: u64,
    network: Network,
}

impl LoopbackLink {
    fn key(&self) -> LinkKey {
        (self.owner.clone(), self.remote.clone())
    }

    fn with_link<T>(&self, f: impl FnOnce(&mut LinkState) -> Result<T>) -> Result<T> {
        let mut state = self.network.state.lock();
        match state.links.get_mut(&self.key()) {
            Some(link) if link.serial == self.serial && !link.closed => f(link),
            _ => Err(Error::WebRtcError("link closed".to_string())),
        }
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let owner = self.owner.clone();
        self.with_link(|link| {
            link.local = Some(SdpKind::Offer);
            link.offers += 1;
            if ice_restart {
                link.restart_offers += 1;
            }
            link.emit_candidate(&owner);
            Ok(SessionDescription::offer(format!(
                "v=0\r\no={} {} IN IP4 127.0.0.1\r\n",
                owner, link.offers
            )))
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let owner = self.owner.clone();
        self.with_link(|link| {
            if link.remote != Some(SdpKind::Offer) {
                return Err(Error::NegotiationError(
                    "no remote offer to answer".to_string(),
                ));
            }
            link.local = Some(SdpKind::Answer);
            link.emit_candidate(&owner);
            Ok(SessionDescription::answer(format!(
                "v=0\r\no={} answer IN IP4 127.0.0.1\r\n",
                owner
            )))
        })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let completes = self.with_link(|link| {
            match description.kind {
                SdpKind::Offer if link.local == Some(SdpKind::Offer) => {
                    return Err(Error::NegotiationError(
                        "remote offer while a local offer is pending".to_string(),
                    ));
                }
                SdpKind::Answer if link.local != Some(SdpKind::Offer) => {
                    return Err(Error::NegotiationError(
                        "answer without a local offer".to_string(),
                    ));
                }
                _ => {}
            }
            link.remote = Some(description.kind);
            link.remote_set = true;
            link.remote_descriptions += 1;
            if description.kind == SdpKind::Answer {
                link.local = None;
                return Ok(true);
            }
            Ok(false)
        })?;

        if completes {
            self.network.state.lock().open_pair(&self.owner, &self.remote);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.with_link(|link| {
            if link.local != Some(SdpKind::Offer) {
                return Err(Error::NegotiationError("nothing to roll back".to_string()));
            }
            link.local = None;
            link.rollbacks += 1;
            Ok(())
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.with_link(|link| {
            if !link.remote_set {
                return Err(Error::IceFailure(
                    "candidate before remote description".to_string(),
                ));
            }
            link.applied_candidates.push(candidate);
            Ok(())
        })
    }

    async fn send(&self, channel: ChannelKind, text: &str) -> Result<()> {
        let mut state = self.network.state.lock();
        match state.links.get_mut(&self.key()) {
            Some(link) if link.serial == self.serial && link.connected => {
                link.sent.push((channel, text.to_string()));
            }
            _ => {
                return Err(Error::DataChannelError(format!(
                    "{} channel not open",
                    channel.label()
                )))
            }
        }

        if let Some(peer) = state.links.get(&(self.remote.clone(), self.owner.clone())) {
            if peer.connected {
                peer.sink.emit(LinkEventKind::Message {
                    channel,
                    text: text.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn buffered_amount(&self, channel: ChannelKind) -> Result<usize> {
        self.with_link(|link| Ok(link.buffered.get(&channel).copied().unwrap_or(0)))
    }

    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        self.with_link(|link| {
            for track in media.tracks() {
                if track.kind() == TrackKind::Video {
                    link.video_senders += 1;
                }
                link.outgoing_tracks.push(RemoteStream {
                    stream_id: media.stream_id().to_string(),
                    track_id: format!("{:?}-{}", track.kind(), media.stream_id()),
                    kind: track.kind(),
                    track: None,
                });
            }
            Ok(())
        })
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<usize> {
        self.with_link(|link| {
            if link.video_senders > 0 {
                link.video_replacements.push(track.id().to_string());
            }
            Ok(link.video_senders)
        })
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.network.state.lock();
        let was_connected = match state.links.get_mut(&self.key()) {
            Some(link) if link.serial == self.serial => {
                let was_connected = link.connected;
                link.closed = true;
                link.connected = false;
                was_connected
            }
            _ => return Ok(()),
        };

        if was_connected {
            if let Some(peer) = state
                .links
                .get_mut(&(self.remote.clone(), self.owner.clone()))
            {
                if peer.connected {
                    peer.connected = false;
                    peer.sink
                        .emit(LinkEventKind::StateChanged(TransportState::Closed));
                }
            }
        }
        Ok(())
    }
}
