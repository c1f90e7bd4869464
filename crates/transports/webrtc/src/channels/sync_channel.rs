//! Reliable sync channel with buffered-bytes backpressure
//!
//! Sends are refused while the transport's pending-send buffer is above the
//! threshold. The dropped update is superseded by the next snapshot, so
//! nothing is queued here.

use super::{ChannelKind, ChannelStats, WireMessage};
use crate::engine::PeerLink;
use crate::{Error, Result};
use tracing::debug;

/// Send side of the reliable sync channel for one peer
#[derive(Debug)]
pub struct SyncChannel {
    open: bool,
    threshold: usize,
    stats: ChannelStats,
}

impl SyncChannel {
    /// Create a closed channel guard
    ///
    /// # Arguments
    ///
    /// * `threshold` - Buffered bytes above which sends are dropped
    pub fn new(threshold: usize) -> Self {
        Self {
            open: false,
            threshold,
            stats: ChannelStats::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut ChannelStats {
        &mut self.stats
    }

    /// Send a message if the channel is open and not congested
    ///
    /// # Errors
    ///
    /// * `DataChannelError` - channel not open yet (message dropped)
    /// * `TransportCongestion` - buffered amount above threshold (message dropped)
    /// * any error from the link's send
    pub async fn send(&mut self, link: &dyn PeerLink, message: &WireMessage) -> Result<()> {
        if !self.open {
            self.stats.messages_dropped += 1;
            return Err(Error::DataChannelError(format!(
                "{} channel is not open",
                ChannelKind::Sync.label()
            )));
        }

        let buffered = link.buffered_amount(ChannelKind::Sync).await?;
        if buffered > self.threshold {
            self.stats.messages_dropped += 1;
            debug!(
                buffered,
                threshold = self.threshold,
                message = message.type_name(),
                "Sync channel congested, dropping message"
            );
            return Err(Error::TransportCongestion {
                buffered,
                threshold: self.threshold,
            });
        }

        let text = message.to_json()?;
        link.send(ChannelKind::Sync, &text).await?;
        self.stats.messages_sent += 1;

        Ok(())
    }
}
