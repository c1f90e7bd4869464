//! In-memory signaling relay
//!
//! Mirrors the room server: join order lists, a capacity limit, and
//! one-to-one forwarding of offers, answers and candidates. Every frame is
//! round-tripped through its JSON wire form.

use parking_lot::Mutex;
use sketchboard_webrtc::peer::PeerId;
use sketchboard_webrtc::session::SessionEvent;
use sketchboard_webrtc::signaling::protocol::{InboundSignal, OutboundSignal, RoomMember};
use sketchboard_webrtc::signaling::SignalingSink;
use sketchboard_webrtc::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct RelayState {
    capacity: usize,
    sessions: HashMap<PeerId, mpsc::UnboundedSender<SessionEvent>>,
    rooms: HashMap<String, Vec<RoomMember>>,
    holding: HashSet<PeerId>,
    held: HashMap<PeerId, Vec<InboundSignal>>,
    sent: Vec<(PeerId, OutboundSignal)>,
}

impl RelayState {
    fn deliver(&mut self, to: &PeerId, signal: InboundSignal) -> Result<()> {
        let text = signal.to_json()?;
        let signal = InboundSignal::from_json(&text)?;

        if self.holding.contains(to) {
            self.held.entry(to.clone()).or_default().push(signal);
            return Ok(());
        }
        match self.sessions.get(to) {
            Some(tx) => {
                let _ = tx.send(SessionEvent::Signal(signal));
            }
            None => debug!(peer_id = %to, "No session for relay frame"),
        }
        Ok(())
    }

    fn route(&mut self, from: &PeerId, signal: OutboundSignal) -> Result<()> {
        match signal {
            OutboundSignal::JoinRoom {
                room_id,
                display_label,
            } => {
                let members = self.rooms.get(&room_id).cloned().unwrap_or_default();
                if members.len() >= self.capacity {
                    return self.deliver(from, InboundSignal::RoomFull);
                }

                let joiner = RoomMember {
                    peer_id: from.clone(),
                    display_label: Some(display_label),
                };
                self.deliver(from, InboundSignal::UsersInRoom(members.clone()))?;
                for member in &members {
                    self.deliver(&member.peer_id, InboundSignal::UserJoined(joiner.clone()))?;
                }
                self.rooms.entry(room_id).or_default().push(joiner);
                Ok(())
            }
            OutboundSignal::Offer { target, sdp } => self.deliver(
                &target,
                InboundSignal::Offer {
                    caller: from.clone(),
                    sdp,
                },
            ),
            OutboundSignal::Answer { target, sdp } => self.deliver(
                &target,
                InboundSignal::Answer {
                    answerer: from.clone(),
                    sdp,
                },
            ),
            OutboundSignal::IceCandidate { target, candidate } => self.deliver(
                &target,
                InboundSignal::IceCandidate {
                    sender: from.clone(),
                    candidate,
                },
            ),
        }
    }
}

/// Shared relay; clones refer to the same rooms
#[derive(Clone)]
pub struct Relay {
    state: Arc<Mutex<RelayState>>,
}

impl Relay {
    /// Relay whose rooms admit at most `capacity` members
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                capacity,
                ..Default::default()
            })),
        }
    }

    /// Attach a session and greet it with its identity
    pub fn register(
        &self,
        peer_id: &PeerId,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<RelaySink>> {
        let mut state = self.state.lock();
        state.sessions.insert(peer_id.clone(), events);
        state.deliver(
            peer_id,
            InboundSignal::Welcome {
                peer_id: peer_id.clone(),
            },
        )?;
        Ok(Arc::new(RelaySink {
            peer_id: peer_id.clone(),
            relay: self.clone(),
        }))
    }

    /// Push a frame straight to a session, as if a peer had sent it
    pub fn deliver(&self, to: &PeerId, signal: InboundSignal) -> Result<()> {
        self.state.lock().deliver(to, signal)
    }

    /// Stop delivering to `peer_id` until `release`
    pub fn hold(&self, peer_id: &PeerId) {
        self.state.lock().holding.insert(peer_id.clone());
    }

    /// Deliver held frames in order and resume normal delivery
    pub fn release(&self, peer_id: &PeerId) -> Result<()> {
        let mut state = self.state.lock();
        state.holding.remove(peer_id);
        let held = state.held.remove(peer_id).unwrap_or_default();
        for signal in held {
            state.deliver(peer_id, signal)?;
        }
        Ok(())
    }

    /// Drop a member from every room and tell the others
    pub fn disconnect(&self, peer_id: &PeerId) -> Result<()> {
        let mut state = self.state.lock();
        state.sessions.remove(peer_id);

        let mut notify = Vec::new();
        for members in state.rooms.values_mut() {
            if members.iter().any(|m| &m.peer_id == peer_id) {
                members.retain(|m| &m.peer_id != peer_id);
                notify.extend(members.iter().map(|m| m.peer_id.clone()));
            }
        }
        for other in notify {
            state.deliver(&other, InboundSignal::UserDisconnected(peer_id.clone()))?;
        }
        Ok(())
    }

    /// Fail the relay connection of a session
    pub fn break_connection(&self, peer_id: &PeerId) {
        if let Some(tx) = self.state.lock().sessions.get(peer_id) {
            let _ = tx.send(SessionEvent::SignalingError(
                "relay closed the connection".to_string(),
            ));
        }
    }

    /// Signals sent by `peer_id`, in order
    pub fn sent_by(&self, peer_id: &PeerId) -> Vec<OutboundSignal> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(from, _)| from == peer_id)
            .map(|(_, signal)| signal.clone())
            .collect()
    }

    /// Number of answers `peer_id` sent
    pub fn answers_sent_by(&self, peer_id: &PeerId) -> usize {
        self.sent_by(peer_id)
            .iter()
            .filter(|s| matches!(s, OutboundSignal::Answer { .. }))
            .count()
    }

    /// Number of offers `peer_id` sent
    pub fn offers_sent_by(&self, peer_id: &PeerId) -> usize {
        self.sent_by(peer_id)
            .iter()
            .filter(|s| matches!(s, OutboundSignal::Offer { .. }))
            .count()
    }
}

/// One session's connection to the relay
pub struct RelaySink {
    peer_id: PeerId,
    relay: Relay,
}

impl SignalingSink for RelaySink {
    fn send(&self, signal: OutboundSignal) -> Result<()> {
        let text = signal.to_json()?;
        let signal: OutboundSignal = serde_json::from_str(&text)
            .map_err(|e| Error::SignalingError(format!("Relay rejected frame: {}", e)))?;

        let mut state = self.relay.state.lock();
        if !state.sessions.contains_key(&self.peer_id) {
            return Err(Error::SignalingError("relay connection closed".to_string()));
        }
        state.sent.push((self.peer_id.clone(), signal.clone()));
        state.route(&self.peer_id, signal)
    }
}
