//! Relay signals and transport events
//!
//! Every handler re-reads the connection from the map and re-checks its
//! state before acting: a transport event may have been queued behind a
//! negotiation step that replaced or closed the connection.

use super::observer::Severity;
use super::session::Session;
use super::timers::TimerKey;
use crate::engine::{LinkEvent, LinkEventKind, TransportState};
use crate::peer::{ConnectionState, IceRestartDecision, PeerId, Role};
use crate::signaling::protocol::{
    IceCandidate, InboundSignal, OutboundSignal, RoomMember, SessionDescription,
};
use crate::Error;
use tracing::{debug, error, info, instrument, trace, warn};

impl Session {
    pub(super) async fn handle_signal(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::Welcome { peer_id } => self.on_welcome(peer_id),
            InboundSignal::UsersInRoom(members) => self.on_users_in_room(members).await,
            InboundSignal::UserJoined(member) => {
                if self.local_id.as_ref() != Some(&member.peer_id) {
                    self.on_member_arrived(member, true).await;
                }
            }
            InboundSignal::Offer { caller, sdp } => self.on_remote_offer(caller, sdp).await,
            InboundSignal::Answer { answerer, sdp } => self.on_remote_answer(answerer, sdp).await,
            InboundSignal::IceCandidate { sender, candidate } => {
                self.on_remote_candidate(sender, candidate).await
            }
            InboundSignal::UserDisconnected(peer_id) => {
                info!(peer_id = %peer_id, "Member left the room");
                self.peers.discard_held_candidates(&peer_id);
                self.teardown(&peer_id, "left the room").await;
                if let Some(room) = self.room.as_mut() {
                    room.remove_member(&peer_id);
                }
            }
            InboundSignal::RoomFull => {
                warn!("Room is full");
                self.status("Room is full, try another room", Severity::Error);
            }
        }
    }

    fn on_welcome(&mut self, peer_id: PeerId) {
        match &self.local_id {
            None => {
                info!(local_id = %peer_id, "Relay assigned local identity");
                self.local_id = Some(peer_id);
            }
            Some(local) if *local != peer_id => {
                warn!(configured = %local, assigned = %peer_id, "Keeping configured peer ID");
            }
            Some(_) => {}
        }
    }

    async fn on_users_in_room(&mut self, members: Vec<RoomMember>) {
        let Some(local) = self.local_id.clone() else {
            warn!("Member list received before local identity is known");
            return;
        };

        let remote: Vec<RoomMember> = members
            .into_iter()
            .filter(|m| m.peer_id != local)
            .collect();

        if remote.is_empty() {
            self.status("Waiting for someone to join...", Severity::Info);
            return;
        }

        self.status(
            format!("Found {} peer(s) in the room", remote.len()),
            Severity::Info,
        );
        for member in remote {
            self.on_member_arrived(member, false).await;
        }
    }

    /// A remote member is present; connect to it unless already connected
    ///
    /// `joined_after_us` decides who pushes its pages on connect: members
    /// already in the room share their board with newcomers, never the
    /// other way round.
    async fn on_member_arrived(&mut self, member: RoomMember, joined_after_us: bool) {
        let Some(local) = self.local_id.clone() else {
            warn!(peer_id = %member.peer_id, "Member event before local identity is known");
            return;
        };
        let Some(room) = self.room.as_mut() else {
            debug!(peer_id = %member.peer_id, "Member event outside a room ignored");
            return;
        };
        room.add_member(&member);

        let peer_id = member.peer_id;
        if self.peers.contains(&peer_id) {
            debug!(peer_id = %peer_id, "Already connected or connecting");
            return;
        }

        let role = Role::elect(&local, &peer_id);
        info!(peer_id = %peer_id, ?role, "Connecting to member");
        self.status(
            format!("Connecting to {}...", self.label_of(&peer_id)),
            Severity::Info,
        );

        if let Err(e) = self.open_connection(&peer_id, role, joined_after_us).await {
            self.negotiation_failed(&peer_id, e).await;
            return;
        }
        if role.is_initiator() {
            self.send_offer(&peer_id, false).await;
        }
    }

    /// Create an offer and send it to the relay
    pub(super) async fn send_offer(&mut self, peer_id: &PeerId, ice_restart: bool) {
        let Some(connection) = self.peers.get_mut(peer_id) else {
            return;
        };
        match connection.start_offer(ice_restart).await {
            Ok(sdp) => self.signal(OutboundSignal::Offer {
                target: peer_id.clone(),
                sdp,
            }),
            Err(e) => self.negotiation_failed(peer_id, e).await,
        }
    }

    #[instrument(skip(self, sdp), fields(peer_id = %caller))]
    async fn on_remote_offer(&mut self, caller: PeerId, sdp: SessionDescription) {
        let Some(local) = self.local_id.clone() else {
            warn!("Offer received before local identity is known");
            return;
        };
        if self.room.is_none() {
            debug!("Offer outside a room ignored");
            return;
        }

        if !self.peers.contains(&caller) {
            if let Some(room) = self.room.as_mut().filter(|r| !r.contains(&caller)) {
                room.add_member(&RoomMember::new(caller.clone()));
            }
            let role = Role::elect(&local, &caller);
            if let Err(e) = self.open_connection(&caller, role, false).await {
                self.negotiation_failed(&caller, e).await;
                return;
            }
        }

        let Some(connection) = self.peers.get_mut(&caller) else {
            return;
        };
        if connection.state() == ConnectionState::Closed {
            debug!("Offer for closed connection dropped");
            return;
        }
        if connection.has_pending_offer() && connection.role().is_initiator() {
            info!("Glare: keeping local offer, ignoring remote offer");
            return;
        }

        match connection.accept_offer(sdp).await {
            Ok(answer) => self.signal(OutboundSignal::Answer {
                target: caller,
                sdp: answer,
            }),
            Err(e) => self.negotiation_failed(&caller, e).await,
        }
    }

    async fn on_remote_answer(&mut self, answerer: PeerId, sdp: SessionDescription) {
        let Some(connection) = self.peers.get_mut(&answerer) else {
            debug!(peer_id = %answerer, "Answer from unknown peer dropped");
            return;
        };
        if !connection.has_pending_offer() {
            debug!(peer_id = %answerer, state = ?connection.state(), "Stale answer dropped");
            return;
        }

        if let Err(e) = connection.accept_answer(sdp).await {
            self.negotiation_failed(&answerer, e).await;
        }
    }

    async fn on_remote_candidate(&mut self, sender: PeerId, candidate: IceCandidate) {
        match self.peers.get_mut(&sender) {
            Some(connection) => {
                if let Err(e) = connection.add_remote_candidate(candidate).await {
                    warn!(peer_id = %sender, "Failed to apply ICE candidate: {}", e);
                }
            }
            None => {
                if !self.peers.hold_candidate(sender.clone(), candidate) {
                    warn!(peer_id = %sender, "ICE candidate dropped");
                }
            }
        }
    }

    pub(super) async fn handle_signaling_error(&mut self, message: String) {
        warn!("Signaling error: {}", message);
        self.status(format!("Signaling error: {}", message), Severity::Error);

        let negotiating: Vec<PeerId> = self
            .peers
            .list_all_peers()
            .into_iter()
            .filter(|p| !p.state.is_connected())
            .map(|p| p.peer_id)
            .collect();
        for peer_id in negotiating {
            self.teardown(&peer_id, "signaling failed").await;
        }
    }

    /// Drop the connection to `peer_id` after `error`
    ///
    /// Errors that are not scoped to the peer (local I/O, serialization)
    /// are also reported as a session error.
    async fn negotiation_failed(&mut self, peer_id: &PeerId, error: Error) {
        if error.is_peer_error() {
            warn!(peer_id = %peer_id, "Negotiation failed: {}", error);
        } else {
            error!(peer_id = %peer_id, "Session error while negotiating: {}", error);
            self.status(format!("Session error: {}", error), Severity::Error);
        }

        if self.peers.contains(peer_id) {
            self.teardown(peer_id, &error.to_string()).await;
        } else {
            self.status(
                format!("Could not connect to {}: {}", self.label_of(peer_id), error),
                Severity::Warning,
            );
        }
    }

    pub(super) async fn handle_link_event(&mut self, event: LinkEvent) {
        let LinkEvent {
            peer_id,
            link_id,
            kind,
        } = event;

        match self.peers.get(&peer_id) {
            Some(connection) if connection.link_id() == link_id => {}
            _ => {
                trace!(peer_id = %peer_id, link_id, "Event from stale link ignored");
                return;
            }
        }

        match kind {
            LinkEventKind::LocalCandidate(candidate) => self.signal(OutboundSignal::IceCandidate {
                target: peer_id,
                candidate,
            }),
            LinkEventKind::StateChanged(TransportState::Connected) => {
                self.on_transport_connected(&peer_id).await
            }
            LinkEventKind::StateChanged(TransportState::Failed) | LinkEventKind::IceFailed => {
                self.on_ice_failed(&peer_id).await
            }
            LinkEventKind::StateChanged(TransportState::Disconnected) => {
                let recovering = self
                    .peers
                    .get(&peer_id)
                    .is_some_and(|c| c.state() == ConnectionState::Recovering);
                if recovering {
                    debug!(peer_id = %peer_id, "Disconnected while recovering");
                } else {
                    self.teardown(&peer_id, "transport disconnected").await;
                }
            }
            LinkEventKind::StateChanged(TransportState::Closed) => {
                self.teardown(&peer_id, "transport closed").await
            }
            LinkEventKind::ChannelOpen(channel) => {
                if let Some(connection) = self.peers.get_mut(&peer_id) {
                    debug!(peer_id = %peer_id, channel = channel.label(), "Data channel open");
                    connection.channels_mut().set_open(channel, true);
                }
                self.push_initial_state(&peer_id).await;
            }
            LinkEventKind::ChannelClosed(channel) => {
                if let Some(connection) = self.peers.get_mut(&peer_id) {
                    debug!(peer_id = %peer_id, channel = channel.label(), "Data channel closed");
                    connection.channels_mut().set_open(channel, false);
                }
            }
            LinkEventKind::Message { channel, text } => {
                self.on_channel_message(&peer_id, channel, &text)
            }
            LinkEventKind::RemoteTrack(stream) => {
                info!(peer_id = %peer_id, track_id = %stream.track_id, "Remote track added");
                self.observer.on_remote_stream(&peer_id, stream);
            }
        }
    }

    async fn on_transport_connected(&mut self, peer_id: &PeerId) {
        let label = self.label_of(peer_id);
        let Some(connection) = self.peers.get_mut(peer_id) else {
            return;
        };

        match connection.state() {
            ConnectionState::Recovering => {
                connection.set_state(ConnectionState::Connected);
                let took = connection.restart_policy_mut().on_recovered();
                self.timers.cancel(&TimerKey::IceRestart(peer_id.clone()));
                info!(peer_id = %peer_id, ?took, "ICE restart succeeded");
                self.status(
                    format!("Connection to {} recovered", label),
                    Severity::Success,
                );
            }
            ConnectionState::Idle | ConnectionState::Negotiating(_) => {
                connection.set_state(ConnectionState::Connected);
                let first = connection.announce();
                info!(peer_id = %peer_id, "Peer connected");
                if first {
                    self.observer.on_connected(peer_id);
                    self.status(format!("Connected to {}", label), Severity::Success);
                }
                self.push_initial_state(peer_id).await;
            }
            ConnectionState::Connected | ConnectionState::Closed => {}
        }
    }

    async fn on_ice_failed(&mut self, peer_id: &PeerId) {
        let label = self.label_of(peer_id);
        let Some(connection) = self.peers.get_mut(peer_id) else {
            return;
        };

        match connection.state() {
            ConnectionState::Connected => match connection.restart_policy_mut().on_ice_failure() {
                IceRestartDecision::Restart => {
                    connection.set_state(ConnectionState::Recovering);
                    let deadline = connection.restart_policy().timeout();
                    self.timers
                        .arm(TimerKey::IceRestart(peer_id.clone()), deadline);
                    warn!(peer_id = %peer_id, ?deadline, "ICE failed, restarting");
                    self.status(
                        format!("Connection to {} lost, trying to reconnect...", label),
                        Severity::Warning,
                    );
                    self.send_offer(peer_id, true).await;
                }
                IceRestartDecision::GiveUp => {
                    self.teardown(peer_id, "ICE failed after restart").await;
                }
            },
            ConnectionState::Recovering => {
                debug!(peer_id = %peer_id, "ICE failure while already recovering");
            }
            ConnectionState::Idle | ConnectionState::Negotiating(_) => {
                self.teardown(peer_id, "ICE failed during negotiation").await;
            }
            ConnectionState::Closed => {}
        }
    }

    pub(super) async fn on_ice_restart_timeout(&mut self, peer_id: &PeerId) {
        let recovering = self
            .peers
            .get(peer_id)
            .is_some_and(|c| c.state() == ConnectionState::Recovering);
        if recovering {
            warn!(peer_id = %peer_id, "ICE restart timed out");
            self.teardown(peer_id, "ICE restart timed out").await;
        }
    }
}
