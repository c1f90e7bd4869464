//! Per-peer connection record
//!
//! Owns the peer link, its channel set, the remote ICE queue and the
//! negotiation flags the session re-validates before every step.

use super::lifecycle::IceRestartPolicy;
use super::{PeerId, Role};
use crate::channels::{ChannelSet, StrokeEvent, WireMessage};
use crate::config::SessionConfig;
use crate::engine::{LinkId, PeerLink};
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Which half of an offer/answer exchange is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Local offer sent, waiting for the answer
    Offering,
    /// Remote offer answered, waiting for the transport
    Answering,
}

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, nothing exchanged yet
    Idle,
    /// Offer/answer exchange in progress
    Negotiating(NegotiationPhase),
    /// Transport connected
    Connected,
    /// Connected, one ICE restart in flight
    Recovering,
    /// Torn down
    Closed,
}

impl ConnectionState {
    /// Connected or recovering from an ICE failure
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Recovering)
    }
}

/// Connection to one remote peer
pub struct PeerConnection {
    peer_id: PeerId,
    role: Role,
    link_id: LinkId,
    state: ConnectionState,
    link: Box<dyn PeerLink>,
    channels: ChannelSet,

    /// A local offer is outstanding
    pending_offer: bool,

    /// A remote description has been applied at least once
    remote_description_set: bool,

    /// Remote candidates received before the remote description
    ice_queue: VecDeque<IceCandidate>,

    restart: IceRestartPolicy,

    /// `on_connected` has fired for this connection
    announced: bool,

    /// Push page structure and the current snapshot once connected
    sync_on_connect: bool,

    /// The push above has happened
    initial_sync_sent: bool,

    created_at: Instant,
    connected_at: Option<Instant>,
}

impl PeerConnection {
    /// Wrap a freshly created link
    ///
    /// # Arguments
    ///
    /// * `peer_id` - Remote peer
    /// * `role` - Elected role for this pair
    /// * `link_id` - Unique ID of `link`
    /// * `link` - Transport link
    /// * `config` - Session configuration (channel thresholds, restart deadline)
    pub fn new(
        peer_id: PeerId,
        role: Role,
        link_id: LinkId,
        link: Box<dyn PeerLink>,
        config: &SessionConfig,
    ) -> Self {
        info!(peer_id = %peer_id, ?role, link_id, "Creating peer connection");

        Self {
            peer_id,
            role,
            link_id,
            state: ConnectionState::Idle,
            link,
            channels: ChannelSet::new(config),
            pending_offer: false,
            remote_description_set: false,
            ice_queue: VecDeque::new(),
            restart: IceRestartPolicy::new(config.ice_restart_timeout()),
            announced: false,
            sync_on_connect: false,
            initial_sync_sent: false,
            created_at: Instant::now(),
            connected_at: None,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn link(&self) -> &dyn PeerLink {
        self.link.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Set the connection state
    pub fn set_state(&mut self, new_state: ConnectionState) {
        let old_state = self.state;
        if old_state != new_state {
            debug!(
                "Peer {} state transition: {:?} -> {:?}",
                self.peer_id, old_state, new_state
            );
            self.state = new_state;

            if new_state == ConnectionState::Connected && self.connected_at.is_none() {
                self.connected_at = Some(Instant::now());
            }
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelSet {
        &mut self.channels
    }

    pub fn restart_policy(&self) -> &IceRestartPolicy {
        &self.restart
    }

    pub fn restart_policy_mut(&mut self) -> &mut IceRestartPolicy {
        &mut self.restart
    }

    pub fn has_pending_offer(&self) -> bool {
        self.pending_offer
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Remote candidates waiting for the remote description
    pub fn queued_candidates(&self) -> usize {
        self.ice_queue.len()
    }

    /// Mark `on_connected` as fired; returns false if it already was
    pub fn announce(&mut self) -> bool {
        !std::mem::replace(&mut self.announced, true)
    }

    pub fn was_announced(&self) -> bool {
        self.announced
    }

    /// Push local state to this peer once it connects
    pub fn set_sync_on_connect(&mut self, enabled: bool) {
        self.sync_on_connect = enabled;
    }

    /// True once, when the initial state push should happen
    pub fn needs_initial_sync(&self) -> bool {
        self.sync_on_connect
            && !self.initial_sync_sent
            && self.state.is_connected()
            && self.channels.sync.is_open()
    }

    pub fn mark_initial_sync_sent(&mut self) {
        self.initial_sync_sent = true;
    }

    /// Time since the transport first connected
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.elapsed())
    }

    /// Time since this connection was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Create and apply a local offer
    ///
    /// Enters `Negotiating(Offering)` unless already connected (ICE restart
    /// and renegotiation keep the connected super-state).
    #[instrument(skip(self), fields(peer_id = %self.peer_id))]
    pub async fn start_offer(&mut self, ice_restart: bool) -> Result<SessionDescription> {
        let offer = self.link.create_offer(ice_restart).await?;
        self.pending_offer = true;

        if !self.state.is_connected() {
            self.set_state(ConnectionState::Negotiating(NegotiationPhase::Offering));
        }

        debug!("Created SDP offer for peer {}", self.peer_id);
        Ok(offer)
    }

    /// Apply a remote offer and produce the answer
    ///
    /// An outstanding local offer is rolled back first. Callers decide
    /// beforehand whether the offer should be accepted at all.
    #[instrument(skip(self, offer), fields(peer_id = %self.peer_id))]
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.kind != SdpKind::Offer {
            return Err(Error::NegotiationError(format!(
                "Expected an offer from {}, got {:?}",
                self.peer_id, offer.kind
            )));
        }

        if self.pending_offer {
            debug!("Rolling back local offer for peer {}", self.peer_id);
            self.link.rollback().await?;
            self.pending_offer = false;
        }

        self.apply_remote_description(offer).await?;
        let answer = self.link.create_answer().await?;

        if !self.state.is_connected() {
            self.set_state(ConnectionState::Negotiating(NegotiationPhase::Answering));
        }

        debug!("Created SDP answer for peer {}", self.peer_id);
        Ok(answer)
    }

    /// Apply the remote answer to the outstanding offer
    #[instrument(skip(self, answer), fields(peer_id = %self.peer_id))]
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(Error::NegotiationError(format!(
                "Expected an answer from {}, got {:?}",
                self.peer_id, answer.kind
            )));
        }

        self.apply_remote_description(answer).await?;
        self.pending_offer = false;
        Ok(())
    }

    /// Apply a remote description, then flush queued candidates in order
    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.link.set_remote_description(description).await?;
        self.remote_description_set = true;
        self.flush_ice_queue().await;
        Ok(())
    }

    /// Apply or queue a remote ICE candidate
    ///
    /// Candidates are never dropped for ordering reasons: before the remote
    /// description exists they wait in FIFO order.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_description_set {
            debug!(
                peer_id = %self.peer_id,
                queued = self.ice_queue.len() + 1,
                "Queueing ICE candidate until remote description is set"
            );
            self.ice_queue.push_back(candidate);
            return Ok(());
        }

        self.link.add_ice_candidate(candidate).await
    }

    /// Apply every queued candidate in arrival order and clear the queue
    async fn flush_ice_queue(&mut self) -> usize {
        let mut applied = 0;
        while let Some(candidate) = self.ice_queue.pop_front() {
            match self.link.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!(peer_id = %self.peer_id, "Failed to apply queued ICE candidate: {}", e),
            }
        }
        if applied > 0 {
            debug!(peer_id = %self.peer_id, applied, "Flushed queued ICE candidates");
        }
        applied
    }

    /// Send a message on the reliable sync channel
    pub async fn send_sync(&mut self, message: &WireMessage) -> Result<()> {
        self.channels.sync.send(self.link.as_ref(), message).await
    }

    /// Queue a stroke event for the next flush
    pub fn enqueue_stroke(&mut self, event: StrokeEvent) {
        self.channels.stroke.enqueue(event);
    }

    /// Send queued stroke events
    pub async fn flush_strokes(&mut self) -> Result<usize> {
        self.channels.stroke.flush(self.link.as_ref()).await
    }

    /// Close channels and the transport
    pub async fn close(&mut self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);

        self.set_state(ConnectionState::Closed);
        self.channels.set_open(crate::channels::ChannelKind::Sync, false);
        self.channels.set_open(crate::channels::ChannelKind::Stroke, false);
        self.ice_queue.clear();
        self.link.close().await
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("link_id", &self.link_id)
            .field("state", &self.state)
            .field("pending_offer", &self.pending_offer)
            .field("queued_candidates", &self.ice_queue.len())
            .finish()
    }
}
