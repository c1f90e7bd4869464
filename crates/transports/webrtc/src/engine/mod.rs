//! Transport engine seam
//!
//! The session drives peer links through `PeerLink` and never touches
//! webrtc-rs directly. Links report asynchronous transport activity
//! (candidates, state changes, channel traffic, remote tracks) as
//! `LinkEvent`s on the session's single event queue.

pub mod rtc;

use crate::channels::ChannelKind;
use crate::media::{LocalMedia, LocalTrack, RemoteStream};
use crate::peer::{PeerId, Role};
use crate::session::SessionEvent;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

pub use rtc::RtcEngine;

/// Identifies one link instance; events from torn-down links are ignored
pub type LinkId = u64;

/// Transport-level connection state, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// What happened on a link
#[derive(Debug, Clone)]
pub enum LinkEventKind {
    /// A local ICE candidate was gathered
    LocalCandidate(IceCandidate),
    /// The transport changed state
    StateChanged(TransportState),
    /// ICE connectivity failed
    IceFailed,
    /// A data channel opened
    ChannelOpen(ChannelKind),
    /// A data channel closed
    ChannelClosed(ChannelKind),
    /// A text frame arrived on a data channel
    Message {
        channel: ChannelKind,
        text: String,
    },
    /// The remote peer added a media track
    RemoteTrack(RemoteStream),
}

/// Event raised by a peer link
#[derive(Debug, Clone)]
pub struct LinkEvent {
    pub peer_id: PeerId,
    pub link_id: LinkId,
    pub kind: LinkEventKind,
}

/// Handle a link uses to push events onto the session queue
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    peer_id: PeerId,
    link_id: LinkId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl LinkEventSink {
    pub fn new(peer_id: PeerId, link_id: LinkId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            peer_id,
            link_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Push an event; silently dropped once the session has stopped
    pub fn emit(&self, kind: LinkEventKind) {
        let event = LinkEvent {
            peer_id: self.peer_id.clone(),
            link_id: self.link_id,
            kind,
        };
        if self.tx.send(SessionEvent::Link(event)).is_err() {
            trace!(peer_id = %self.peer_id, "Session gone, dropping link event");
        }
    }
}

/// One peer-to-peer transport (descriptions, candidates, channels, media)
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer and apply it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer or answer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Discard an outstanding local offer
    async fn rollback(&self) -> Result<()>;

    /// Apply a remote ICE candidate (remote description must be set)
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Send a text frame on a data channel
    async fn send(&self, channel: ChannelKind, text: &str) -> Result<()>;

    /// Bytes queued on a data channel and not yet handed to the network
    async fn buffered_amount(&self, channel: ChannelKind) -> Result<usize>;

    /// Attach local tracks (triggers renegotiation on the initiator)
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()>;

    /// Swap the track on every video sender without renegotiating
    ///
    /// Returns the number of senders that now carry `track`.
    async fn replace_video_track(&self, track: &LocalTrack) -> Result<usize>;

    /// Close channels and the underlying transport
    async fn close(&self) -> Result<()>;
}

/// Factory for peer links
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Create a link to `peer_id`
    ///
    /// The initiator side creates both data channels; the responder side
    /// receives them from the remote peer.
    async fn create_link(
        &self,
        peer_id: &PeerId,
        role: Role,
        events: LinkEventSink,
    ) -> Result<Box<dyn PeerLink>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted link for unit tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Records sends and reports a settable buffered amount
    #[derive(Default)]
    pub struct ScriptedLink {
        pub sent: Mutex<Vec<(ChannelKind, String)>>,
        pub buffered: Mutex<HashMap<ChannelKind, usize>>,
    }

    impl ScriptedLink {
        pub fn set_buffered(&self, channel: ChannelKind, bytes: usize) {
            self.buffered.lock().insert(channel, bytes);
        }

        pub fn sent_on(&self, channel: ChannelKind) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PeerLink for ScriptedLink {
        async fn create_offer(&self, _ice_restart: bool) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0 scripted"))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0 scripted"))
        }

        async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            Ok(())
        }

        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }

        async fn send(&self, channel: ChannelKind, text: &str) -> Result<()> {
            self.sent.lock().push((channel, text.to_string()));
            Ok(())
        }

        async fn buffered_amount(&self, channel: ChannelKind) -> Result<usize> {
            Ok(self.buffered.lock().get(&channel).copied().unwrap_or(0))
        }

        async fn add_local_media(&self, _media: &LocalMedia) -> Result<()> {
            Ok(())
        }

        async fn replace_video_track(&self, _track: &LocalTrack) -> Result<usize> {
            Ok(0)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLink;
    use super::*;
    use crate::channels::{Point, StrokeChannel, StrokeEvent, SyncChannel, WireMessage};
    use crate::Error;

    #[tokio::test]
    async fn test_sync_send_fails_over_threshold_and_recovers_after_drain() {
        let link = ScriptedLink::default();
        let mut channel = SyncChannel::new(64 * 1024);
        channel.set_open(true);
        let msg = WireMessage::PageChange { page_index: 1 };

        link.set_buffered(ChannelKind::Sync, 64 * 1024 + 1);
        let err = channel.send(&link, &msg).await.unwrap_err();
        assert!(matches!(err, Error::TransportCongestion { .. }));
        assert!(link.sent_on(ChannelKind::Sync).is_empty());

        link.set_buffered(ChannelKind::Sync, 0);
        channel.send(&link, &msg).await.unwrap();
        assert_eq!(link.sent_on(ChannelKind::Sync).len(), 1);
        assert_eq!(channel.stats().messages_dropped, 1);
        assert_eq!(channel.stats().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_sync_send_at_exact_threshold_succeeds() {
        let link = ScriptedLink::default();
        let mut channel = SyncChannel::new(100);
        channel.set_open(true);
        link.set_buffered(ChannelKind::Sync, 100);
        assert!(channel
            .send(&link, &WireMessage::PageChange { page_index: 0 })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_sync_send_on_closed_channel_is_dropped() {
        let link = ScriptedLink::default();
        let mut channel = SyncChannel::new(100);
        let err = channel
            .send(&link, &WireMessage::PageChange { page_index: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataChannelError(_)));
        assert!(link.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stroke_flush_holds_queue_while_congested() {
        let link = ScriptedLink::default();
        let mut channel = StrokeChannel::new(1000);
        channel.set_open(true);
        channel.enqueue(StrokeEvent::start(0, "p", Point(0.0, 0.0), "#000", 2.0));
        channel.enqueue(StrokeEvent::moved(0, "p", vec![Point(1.0, 1.0)]));

        link.set_buffered(ChannelKind::Stroke, 5000);
        assert_eq!(channel.flush(&link).await.unwrap(), 0);
        assert_eq!(channel.pending(), 2);

        channel.enqueue(StrokeEvent::moved(0, "p", vec![Point(2.0, 2.0)]));
        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.coalesced(), 1);

        link.set_buffered(ChannelKind::Stroke, 0);
        assert_eq!(channel.flush(&link).await.unwrap(), 2);
        let sent = link.sent_on(ChannelKind::Stroke);
        let last = WireMessage::from_json(&sent[1]).unwrap();
        assert_eq!(
            last,
            WireMessage::ContinuousDrawing(StrokeEvent::moved(0, "p", vec![Point(2.0, 2.0)]))
        );
    }

    #[tokio::test]
    async fn test_stroke_flush_on_closed_channel_discards() {
        let link = ScriptedLink::default();
        let mut channel = StrokeChannel::new(1000);
        channel.enqueue(StrokeEvent::end(0, "p"));
        assert_eq!(channel.flush(&link).await.unwrap(), 0);
        assert_eq!(channel.pending(), 0);
        assert_eq!(channel.stats().messages_dropped, 1);
    }
}
