//! Per-peer data channels
//!
//! Each peer connection owns one `ChannelSet`: a reliable sync channel for
//! snapshots and page structure, and a low-latency stroke channel.

pub mod messages;
pub mod stroke_channel;
pub mod sync_channel;

use crate::config::SessionConfig;

pub use messages::{PageStructure, Point, SceneBlob, StrokeEvent, StrokeKind, WireMessage};
pub use stroke_channel::{StrokeChannel, StrokeCoalescer};
pub use sync_channel::SyncChannel;

/// Logical channel of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Ordered, reliable; snapshots, page structure and navigation
    Sync,
    /// Ordered, bounded retransmits; live stroke increments
    Stroke,
}

impl ChannelKind {
    /// Data channel label for the sync channel
    pub const SYNC_LABEL: &'static str = "whiteboard-sync";

    /// Data channel label for the stroke channel
    pub const STROKE_LABEL: &'static str = "whiteboard-stroke";

    /// Both channels, in creation order
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Sync, ChannelKind::Stroke];

    /// Data channel label negotiated with the remote peer
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Sync => Self::SYNC_LABEL,
            ChannelKind::Stroke => Self::STROKE_LABEL,
        }
    }

    /// Map a remote data channel label back to its kind
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            Self::SYNC_LABEL => Some(ChannelKind::Sync),
            Self::STROKE_LABEL => Some(ChannelKind::Stroke),
            _ => None,
        }
    }
}

/// Send/receive counters for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Messages handed to the transport
    pub messages_sent: u64,
    /// Messages dropped (congestion or channel not open)
    pub messages_dropped: u64,
    /// Messages received
    pub messages_received: u64,
}

/// Both channels of one peer connection
#[derive(Debug)]
pub struct ChannelSet {
    /// Reliable sync channel
    pub sync: SyncChannel,
    /// Live stroke channel
    pub stroke: StrokeChannel,
}

impl ChannelSet {
    /// Create a closed channel set with thresholds from `config`
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sync: SyncChannel::new(config.sync_channel.buffered_threshold_bytes),
            stroke: StrokeChannel::new(config.stroke_channel.buffered_threshold_bytes),
        }
    }

    /// Record that a channel opened or closed
    pub fn set_open(&mut self, kind: ChannelKind, open: bool) {
        match kind {
            ChannelKind::Sync => self.sync.set_open(open),
            ChannelKind::Stroke => self.stroke.set_open(open),
        }
    }

    /// Check if a channel is open
    pub fn is_open(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Sync => self.sync.is_open(),
            ChannelKind::Stroke => self.stroke.is_open(),
        }
    }

    /// Count an inbound message
    pub fn record_received(&mut self, kind: ChannelKind) {
        match kind {
            ChannelKind::Sync => self.sync.stats_mut().messages_received += 1,
            ChannelKind::Stroke => self.stroke.stats_mut().messages_received += 1,
        }
    }
}
