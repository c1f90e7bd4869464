//! Session state and event loop

use super::handle::{SessionHandle, SessionInfo};
use super::observer::{SessionObserver, Severity, TracingObserver};
use super::timers::{TimerFired, TimerKey, TimerSet};
use super::SessionEvent;
use crate::board::{RenderEngine, Whiteboard};
use crate::config::SessionConfig;
use crate::engine::{LinkEventSink, LinkId, TransportEngine};
use crate::media::{LocalMedia, LocalTrack, MediaSource, NoMediaSource};
use crate::peer::{PeerConnection, PeerId, PeerManager, Role};
use crate::room::Room;
use crate::signaling::protocol::OutboundSignal;
use crate::signaling::SignalingSink;
use crate::{Error, Result};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Assembles a session from its collaborators
///
/// The event queue exists before the session does, so a signaling client can
/// be connected to `event_sender()` and then passed in as the signaling sink.
///
/// # Example
///
/// ```no_run
/// use sketchboard_webrtc::board::SceneStore;
/// use sketchboard_webrtc::config::SessionConfig;
/// use sketchboard_webrtc::engine::RtcEngine;
/// use sketchboard_webrtc::session::SessionBuilder;
/// use sketchboard_webrtc::signaling::client::SignalingClient;
/// use std::sync::Arc;
///
/// # async fn example() -> sketchboard_webrtc::Result<()> {
/// let config = SessionConfig::default();
/// let builder = SessionBuilder::new(config.clone());
/// let signaling = SignalingClient::connect(&config.signaling_url, builder.event_sender()).await?;
///
/// let (session, handle) = builder
///     .engine(Arc::new(RtcEngine::new(&config)?))
///     .signaling(Arc::new(signaling))
///     .renderer(Box::new(SceneStore::new()))
///     .build()?;
///
/// tokio::spawn(session.run());
/// handle.join_room("x", "Ada")?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    config: SessionConfig,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    engine: Option<Arc<dyn TransportEngine>>,
    signaling: Option<Arc<dyn SignalingSink>>,
    renderer: Option<Box<dyn RenderEngine>>,
    media_source: Arc<dyn MediaSource>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            tx,
            rx,
            engine: None,
            signaling: None,
            renderer: None,
            media_source: Arc::new(NoMediaSource),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Sender for events destined to the session being built
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.tx.clone()
    }

    pub fn engine(mut self, engine: Arc<dyn TransportEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn SignalingSink>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn renderer(mut self, renderer: Box<dyn RenderEngine>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = source;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and create the session and its handle
    pub fn build(self) -> Result<(Session, SessionHandle)> {
        self.config.validate()?;

        let engine = self
            .engine
            .ok_or_else(|| Error::InvalidConfig("transport engine is required".to_string()))?;
        let signaling = self
            .signaling
            .ok_or_else(|| Error::InvalidConfig("signaling sink is required".to_string()))?;
        let renderer = self
            .renderer
            .ok_or_else(|| Error::InvalidConfig("render engine is required".to_string()))?;

        let local_id = self.config.peer_id.clone().map(PeerId::from);
        let peers = PeerManager::new(self.config.max_peers)?;

        let session = Session {
            local_id,
            room: None,
            peers,
            board: Whiteboard::new(renderer),
            timers: TimerSet::new(self.tx.clone()),
            engine,
            signaling,
            media_source: self.media_source,
            observer: self.observer,
            local_media: None,
            screen_share: None,
            events_tx: self.tx.clone(),
            events_rx: self.rx,
            next_link_id: 0,
            shut_down: false,
            config: self.config,
        };

        Ok((session, SessionHandle::new(self.tx)))
    }
}

/// A whiteboard peer session
///
/// Owns the room, every peer connection, the pages and all timers. Run it
/// with [`Session::run`]; drive it through the [`SessionHandle`].
pub struct Session {
    pub(super) config: SessionConfig,
    pub(super) local_id: Option<PeerId>,
    pub(super) room: Option<Room>,
    pub(super) peers: PeerManager,
    pub(super) board: Whiteboard,
    pub(super) timers: TimerSet,
    pub(super) engine: Arc<dyn TransportEngine>,
    pub(super) signaling: Arc<dyn SignalingSink>,
    pub(super) media_source: Arc<dyn MediaSource>,
    pub(super) observer: Arc<dyn SessionObserver>,
    pub(super) local_media: Option<LocalMedia>,
    pub(super) screen_share: Option<LocalTrack>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    next_link_id: LinkId,
    shut_down: bool,
}

impl Session {
    /// Process events until the application leaves
    pub async fn run(mut self) -> Result<()> {
        info!(local_id = ?self.local_id, "Session event loop started");

        while let Some(event) = self.events_rx.recv().await {
            if self.handle_event(event).await.is_break() {
                break;
            }
        }

        self.shutdown().await;
        info!("Session event loop stopped");
        Ok(())
    }

    async fn handle_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Signal(signal) => self.handle_signal(signal).await,
            SessionEvent::SignalingError(message) => self.handle_signaling_error(message).await,
            SessionEvent::Link(event) => self.handle_link_event(event).await,
            SessionEvent::Timer(fired) => self.handle_timer(fired).await,
            SessionEvent::Command(command) => return self.handle_command(command).await,
            SessionEvent::HandlesDropped => {
                info!("Every session handle dropped, leaving");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.take_if_current(&fired) {
            return;
        }
        match fired.key {
            TimerKey::Snapshot(page) => self.flush_snapshot(page).await,
            TimerKey::StrokeFlush(peer_id) => self.flush_strokes(&peer_id).await,
            TimerKey::IceRestart(peer_id) => self.on_ice_restart_timeout(&peer_id).await,
        }
    }

    pub(super) fn status(&self, message: impl AsRef<str>, severity: Severity) {
        self.observer.on_status(message.as_ref(), severity);
    }

    /// Fire-and-forget send to the relay
    pub(super) fn signal(&self, signal: OutboundSignal) {
        if let Err(e) = self.signaling.send(signal) {
            warn!("Failed to send signal: {}", e);
            self.status(format!("Signaling error: {}", e), Severity::Error);
        }
    }

    /// Display label of a remote member
    pub(super) fn label_of(&self, peer_id: &PeerId) -> String {
        match &self.room {
            Some(room) => room.label_of(peer_id),
            None => peer_id.to_string(),
        }
    }

    /// Create a link and connection record for `peer_id`
    ///
    /// Local media is attached right away and candidates held for the peer
    /// are queued on the new connection.
    pub(super) async fn open_connection(
        &mut self,
        peer_id: &PeerId,
        role: Role,
        sync_on_connect: bool,
    ) -> Result<()> {
        self.next_link_id += 1;
        let link_id = self.next_link_id;
        let sink = LinkEventSink::new(peer_id.clone(), link_id, self.events_tx.clone());

        let link = self.engine.create_link(peer_id, role, sink).await?;
        if let Some(media) = &self.local_media {
            if let Err(e) = link.add_local_media(media).await {
                warn!(peer_id = %peer_id, "Failed to attach local media: {}", e);
            }
        }
        if let Some(screen) = &self.screen_share {
            if let Err(e) = link.replace_video_track(screen).await {
                warn!(peer_id = %peer_id, "Failed to attach screen share: {}", e);
            }
        }

        let mut connection = PeerConnection::new(peer_id.clone(), role, link_id, link, &self.config);
        connection.set_sync_on_connect(sync_on_connect);

        self.timers.cancel_peer(peer_id);
        self.peers.insert(connection).await?;

        let held = self.peers.take_held_candidates(peer_id);
        if let Some(connection) = self.peers.get_mut(peer_id) {
            for candidate in held {
                connection.add_remote_candidate(candidate).await?;
            }
        }
        Ok(())
    }

    /// Close and forget one peer connection
    pub(super) async fn teardown(&mut self, peer_id: &PeerId, reason: &str) {
        self.timers.cancel_peer(peer_id);
        let Some(mut connection) = self.peers.remove(peer_id) else {
            return;
        };

        if let Err(e) = connection.close().await {
            warn!(peer_id = %peer_id, "Error closing connection: {}", e);
        }
        let abandoned = self.board.abandon_strokes(peer_id);
        info!(peer_id = %peer_id, reason, abandoned, "Peer connection closed");

        let label = self.label_of(peer_id);
        if connection.was_announced() {
            self.observer.on_disconnected(peer_id);
            self.status(format!("{} disconnected", label), Severity::Warning);
        } else {
            self.status(
                format!("Could not connect to {}: {}", label, reason),
                Severity::Warning,
            );
        }
    }

    /// Close every connection and forget the room
    pub(super) async fn leave_room(&mut self) {
        self.timers.cancel_all();

        for connection in self.peers.clear().await {
            self.board.abandon_strokes(connection.peer_id());
            if connection.was_announced() {
                self.observer.on_disconnected(connection.peer_id());
            }
        }

        if let Some(room) = self.room.take() {
            info!(room = room.id(), "Left room");
            self.status(format!("Left room {}", room.id()), Severity::Info);
        }
    }

    /// Stop everything; safe to call more than once
    pub(super) async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.leave_room().await;
        if let Some(screen) = self.screen_share.take() {
            screen.set_enabled(false);
        }
        if let Some(media) = self.local_media.take() {
            media.release();
        }
        debug!("Session shut down");
    }

    pub(super) fn info(&self) -> SessionInfo {
        SessionInfo {
            local_id: self.local_id.clone(),
            room_id: self.room.as_ref().map(|r| r.id().to_string()),
            members: self.room.as_ref().map(Room::members).unwrap_or_default(),
            peers: self.peers.list_all_peers(),
            page_count: self.board.page_count(),
            current_page: self.board.current_page(),
            has_local_media: self.local_media.is_some(),
            sharing_screen: self.screen_share.is_some(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_id", &self.local_id)
            .field("room", &self.room.as_ref().map(Room::id))
            .field("peers", &self.peers.len())
            .field("board", &self.board)
            .field("timers", &self.timers.len())
            .finish()
    }
}
