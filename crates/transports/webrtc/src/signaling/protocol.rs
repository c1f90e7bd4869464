//! Relay signaling protocol types
//!
//! Every relay frame is a JSON text message shaped
//! `{"event": "<name>", "data": <payload>}`. Session descriptions and ICE
//! candidates use the browser JSON shapes so the relay can forward them to
//! web clients unchanged.

use crate::peer::PeerId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// SDP type carried in a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer from the negotiating side
    Offer,
    /// Answer to a remote offer
    Answer,
}

/// Session description (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate (`{candidate, sdpMid, sdpMLineIndex, usernameFragment}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// A room member as listed by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    /// Relay-assigned identifier
    pub peer_id: PeerId,

    /// Human readable label chosen at join time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_label: Option<String>,
}

impl RoomMember {
    /// Create a member with no label
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_label: None,
        }
    }
}

/// Messages sent to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundSignal {
    /// Join (or create) a room
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join
        room_id: String,
        /// Label shown to other members
        display_label: String,
    },

    /// Forward an offer to `target`
    Offer {
        /// Receiving peer
        target: PeerId,
        /// Local offer
        sdp: SessionDescription,
    },

    /// Forward an answer to `target`
    Answer {
        /// Receiving peer
        target: PeerId,
        /// Local answer
        sdp: SessionDescription,
    },

    /// Forward a local ICE candidate to `target`
    IceCandidate {
        /// Receiving peer
        target: PeerId,
        /// Gathered candidate
        candidate: IceCandidate,
    },
}

impl OutboundSignal {
    /// Serialize to a relay text frame
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize signal: {}", e))
        })
    }

    /// Peer this signal is addressed to, if any
    pub fn target(&self) -> Option<&PeerId> {
        match self {
            OutboundSignal::JoinRoom { .. } => None,
            OutboundSignal::Offer { target, .. }
            | OutboundSignal::Answer { target, .. }
            | OutboundSignal::IceCandidate { target, .. } => Some(target),
        }
    }
}

/// Messages received from the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundSignal {
    /// Identity assigned to this connection by the relay
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Local peer ID
        peer_id: PeerId,
    },

    /// Members already present when the local peer joined
    UsersInRoom(Vec<RoomMember>),

    /// A member joined after the local peer
    UserJoined(RoomMember),

    /// Remote offer
    Offer {
        /// Offering peer
        caller: PeerId,
        /// Remote offer
        sdp: SessionDescription,
    },

    /// Remote answer
    Answer {
        /// Answering peer
        answerer: PeerId,
        /// Remote answer
        sdp: SessionDescription,
    },

    /// Remote ICE candidate
    IceCandidate {
        /// Peer that gathered the candidate
        sender: PeerId,
        /// Remote candidate
        candidate: IceCandidate,
    },

    /// A member left the room
    UserDisconnected(PeerId),

    /// The room has reached its capacity
    RoomFull,
}

impl InboundSignal {
    /// Parse a relay text frame
    ///
    /// # Errors
    ///
    /// Returns `SignalingError` for malformed or unknown payloads.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::SignalingError(format!("Malformed relay payload: {}", e)))
    }

    /// Serialize to a relay text frame (used by in-process relays)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize signal: {}", e))
        })
    }
}
