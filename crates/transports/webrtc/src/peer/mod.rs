//! Peer identity, role election and per-peer connection state
//!
//! Handles the connection lifecycle (offer/answer/ICE), the ICE restart
//! policy and the connection map.

pub mod connection;
pub mod lifecycle;
pub mod manager;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use connection::{ConnectionState, NegotiationPhase, PeerConnection};
pub use lifecycle::{IceRestartDecision, IceRestartPolicy};
pub use manager::{PeerInfo, PeerManager};

/// Relay-assigned peer identifier
///
/// Totally ordered by byte-wise comparison of the underlying string.
/// The ordering is used only for role election.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which side of a pair creates the offer and the data channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer immediately
    Initiator,
    /// Waits for the remote offer
    Responder,
}

impl Role {
    /// Elect the local role for the pair (local, remote)
    ///
    /// The local peer initiates iff its ID sorts strictly before the remote
    /// one, so both sides reach complementary answers without coordination.
    pub fn elect(local: &PeerId, remote: &PeerId) -> Self {
        if local < remote {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    /// Check if this is the initiating side
    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Initiator)
    }
}
