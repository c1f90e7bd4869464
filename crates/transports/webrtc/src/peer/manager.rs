//! Peer connection map

use super::connection::{ConnectionState, PeerConnection};
use super::{PeerId, Role};
use crate::signaling::protocol::IceCandidate;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Candidates held per peer before its connection exists
pub const MAX_HELD_CANDIDATES: usize = 32;

/// Information about a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer identifier
    pub peer_id: PeerId,

    /// Elected role for the pair
    pub role: Role,

    /// Connection state
    pub state: ConnectionState,

    /// Connection duration (if connected)
    pub duration_secs: Option<u64>,
}

/// Owns every peer connection of a session, at most one per remote peer
///
/// Only the session event loop touches the map, so it needs no lock.
pub struct PeerManager {
    /// Map of peer ID to connection, ordered for deterministic broadcasts
    peers: BTreeMap<PeerId, PeerConnection>,

    /// Candidates that arrived before any connection existed for the peer
    held_candidates: HashMap<PeerId, Vec<IceCandidate>>,

    /// Maximum number of peers allowed
    max_peers: u32,
}

impl PeerManager {
    /// Create a new peer manager
    ///
    /// # Arguments
    ///
    /// * `max_peers` - Maximum number of simultaneous peer connections (1-10)
    pub fn new(max_peers: u32) -> Result<Self> {
        if max_peers == 0 || max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                max_peers
            )));
        }

        Ok(Self {
            peers: BTreeMap::new(),
            held_candidates: HashMap::new(),
            max_peers,
        })
    }

    /// Add a connection, tearing down any existing one for the same peer
    ///
    /// # Errors
    ///
    /// Returns `NegotiationError` if the mesh is full. The rejected
    /// connection is closed before returning.
    pub async fn insert(&mut self, mut connection: PeerConnection) -> Result<()> {
        let peer_id = connection.peer_id().clone();

        if let Some(mut old) = self.peers.remove(&peer_id) {
            info!(peer_id = %peer_id, "Replacing existing connection");
            if let Err(e) = old.close().await {
                warn!("Error closing replaced connection for {}: {}", peer_id, e);
            }
        }

        if self.peers.len() >= self.max_peers as usize {
            if let Err(e) = connection.close().await {
                warn!("Error closing rejected connection for {}: {}", peer_id, e);
            }
            return Err(Error::NegotiationError(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }

        debug!(peer_id = %peer_id, "Adding peer to manager");
        self.peers.insert(peer_id, connection);
        Ok(())
    }

    /// Detach a connection without closing it
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerConnection> {
        self.peers.remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerConnection> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(peer_id)
    }

    /// Check if a peer exists
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Get the number of peers in the manager
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    /// Peers whose transport is connected (including those recovering)
    pub fn connected_peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|c| c.state().is_connected())
            .map(|c| c.peer_id().clone())
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.peers.values_mut()
    }

    /// List all peers regardless of state
    pub fn list_all_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .values()
            .map(|c| PeerInfo {
                peer_id: c.peer_id().clone(),
                role: c.role(),
                state: c.state(),
                duration_secs: c.connection_duration().map(|d| d.as_secs()),
            })
            .collect()
    }

    /// Hold a candidate for a peer that has no connection yet
    ///
    /// At most `MAX_HELD_CANDIDATES` are kept per peer, for at most
    /// `max_peers` peers. Returns false when the candidate was dropped.
    pub fn hold_candidate(&mut self, peer_id: PeerId, candidate: IceCandidate) -> bool {
        if !self.held_candidates.contains_key(&peer_id)
            && self.held_candidates.len() >= self.max_peers as usize
        {
            debug!(peer_id = %peer_id, "Too many peers with held candidates, dropping");
            return false;
        }

        let held = self.held_candidates.entry(peer_id.clone()).or_default();
        if held.len() >= MAX_HELD_CANDIDATES {
            debug!(peer_id = %peer_id, "Held candidate limit reached, dropping");
            return false;
        }
        debug!(peer_id = %peer_id, "Holding ICE candidate for unknown peer");
        held.push(candidate);
        true
    }

    /// Take the held candidates for a peer, in arrival order
    pub fn take_held_candidates(&mut self, peer_id: &PeerId) -> Vec<IceCandidate> {
        self.held_candidates.remove(peer_id).unwrap_or_default()
    }

    /// Forget held candidates for a peer that left
    pub fn discard_held_candidates(&mut self, peer_id: &PeerId) {
        self.held_candidates.remove(peer_id);
    }

    /// Remove all peers and close their connections
    pub async fn clear(&mut self) -> Vec<PeerConnection> {
        debug!("Clearing all peers from manager");
        self.held_candidates.clear();

        let mut closed = Vec::with_capacity(self.peers.len());
        while let Some((peer_id, mut connection)) = self.peers.pop_first() {
            debug!("Closing connection for peer: {}", peer_id);
            if let Err(e) = connection.close().await {
                warn!("Error closing peer {}: {}", peer_id, e);
            }
            closed.push(connection);
        }
        closed
    }
}
