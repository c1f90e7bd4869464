//! Live stroke channel with pacing and move coalescing
//!
//! The first event after an idle period is sent right away. Events arriving
//! inside the pacing window are queued; consecutive `move`s of the same path
//! collapse into the most recent one. `start` and `end` are never dropped.

use super::{ChannelKind, ChannelStats, StrokeEvent, StrokeKind, WireMessage};
use crate::engine::PeerLink;
use crate::Result;
use std::collections::VecDeque;
use tracing::debug;

/// Outbound stroke queue that keeps only the latest pending move per path
#[derive(Debug, Default)]
pub struct StrokeCoalescer {
    queue: VecDeque<StrokeEvent>,
    coalesced: u64,
}

impl StrokeCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event, replacing a pending move of the same path
    pub fn push(&mut self, event: StrokeEvent) {
        if event.kind == StrokeKind::Move {
            if let Some(back) = self.queue.back_mut() {
                if back.kind == StrokeKind::Move
                    && back.path_id == event.path_id
                    && back.page_index == event.page_index
                {
                    *back = event;
                    self.coalesced += 1;
                    return;
                }
            }
        }
        self.queue.push_back(event);
    }

    pub fn front(&self) -> Option<&StrokeEvent> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<StrokeEvent> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of moves replaced by a newer one
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Drop everything queued, returning how many events were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

/// Send side of the live stroke channel for one peer
#[derive(Debug)]
pub struct StrokeChannel {
    open: bool,
    threshold: usize,
    pacing: bool,
    pending: StrokeCoalescer,
    stats: ChannelStats,
}

impl StrokeChannel {
    /// Create a closed stroke channel
    ///
    /// # Arguments
    ///
    /// * `threshold` - Buffered bytes above which the queue is held
    pub fn new(threshold: usize) -> Self {
        Self {
            open: false,
            threshold,
            pacing: false,
            pending: StrokeCoalescer::new(),
            stats: ChannelStats::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut ChannelStats {
        &mut self.stats
    }

    /// True while a pacing window is running
    pub fn is_pacing(&self) -> bool {
        self.pacing
    }

    pub fn set_pacing(&mut self, pacing: bool) {
        self.pacing = pacing;
    }

    /// Events waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of moves coalesced away so far
    pub fn coalesced(&self) -> u64 {
        self.pending.coalesced()
    }

    /// Queue an outbound event
    pub fn enqueue(&mut self, event: StrokeEvent) {
        self.pending.push(event);
    }

    /// Send queued events until the queue is empty or the link is congested
    ///
    /// Returns the number of events sent. A closed channel discards the
    /// queue. A congested channel keeps it, so later moves keep coalescing.
    pub async fn flush(&mut self, link: &dyn PeerLink) -> Result<usize> {
        if !self.open {
            let dropped = self.pending.clear();
            self.stats.messages_dropped += dropped as u64;
            return Ok(0);
        }

        let mut sent = 0;
        while let Some(event) = self.pending.front() {
            let buffered = link.buffered_amount(ChannelKind::Stroke).await?;
            if buffered > self.threshold {
                debug!(
                    buffered,
                    threshold = self.threshold,
                    pending = self.pending.len(),
                    "Stroke channel congested, holding queue"
                );
                break;
            }

            let text = WireMessage::ContinuousDrawing(event.clone()).to_json()?;
            link.send(ChannelKind::Stroke, &text).await?;
            self.pending.pop();
            self.stats.messages_sent += 1;
            sent += 1;
        }

        Ok(sent)
    }
}
