//! Signaling relay adapter
//!
//! Translates relay frames to session events and session requests to relay
//! frames. No business logic lives here.

pub mod client;
pub mod protocol;

pub use client::SignalingClient;
pub use protocol::{InboundSignal, OutboundSignal};

use crate::Result;

/// Outbound half of the relay connection
///
/// Sends are fire-and-forget: no acknowledgement, no retransmission.
pub trait SignalingSink: Send + Sync {
    fn send(&self, signal: OutboundSignal) -> Result<()>;
}
