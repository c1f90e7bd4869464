//! Application callbacks

use crate::channels::WireMessage;
use crate::media::RemoteStream;
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Severity of a user-facing status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// Callbacks fired by the session event loop
///
/// All methods run on the event loop and must not block. Every method has a
/// no-op default so applications implement only what they display.
pub trait SessionObserver: Send + Sync {
    /// A peer connection reached `Connected` for the first time
    fn on_connected(&self, _peer_id: &PeerId) {}

    /// A previously connected peer was closed
    fn on_disconnected(&self, _peer_id: &PeerId) {}

    /// A remote peer added a media track
    fn on_remote_stream(&self, _peer_id: &PeerId, _stream: RemoteStream) {}

    /// A data channel message was received and applied to the board
    fn on_data(&self, _peer_id: &PeerId, _message: &WireMessage) {}

    /// A status line for the user
    fn on_status(&self, _message: &str, _severity: Severity) {}
}

/// Observer that writes every callback to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_connected(&self, peer_id: &PeerId) {
        info!(peer_id = %peer_id, "Peer connected");
    }

    fn on_disconnected(&self, peer_id: &PeerId) {
        info!(peer_id = %peer_id, "Peer disconnected");
    }

    fn on_remote_stream(&self, peer_id: &PeerId, stream: RemoteStream) {
        info!(
            peer_id = %peer_id,
            stream_id = %stream.stream_id,
            track_id = %stream.track_id,
            kind = ?stream.kind,
            "Remote track"
        );
    }

    fn on_data(&self, peer_id: &PeerId, message: &WireMessage) {
        debug!(peer_id = %peer_id, message = message.type_name(), "Data received");
    }

    fn on_status(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => info!(%severity, "{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}
