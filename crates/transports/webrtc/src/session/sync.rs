//! Board synchronisation and application commands

use super::handle::{BroadcastStats, Command};
use super::observer::Severity;
use super::session::Session;
use super::timers::TimerKey;
use crate::board::SnapshotOutcome;
use crate::channels::{ChannelKind, StrokeEvent, WireMessage};
use crate::media::{acquire_with_fallback, LocalTrack, MediaRequest, TrackKind};
use crate::peer::PeerId;
use crate::room::Room;
use crate::signaling::protocol::OutboundSignal;
use std::ops::ControlFlow;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl Session {
    pub(super) async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::JoinRoom {
                room_id,
                display_label,
            } => self.join_room(room_id, display_label).await,
            Command::SendFullState {
                page_index,
                scene,
                reply,
            } => {
                let result = match self.board.store_local_snapshot(page_index, scene.clone()) {
                    Ok(()) => {
                        self.timers.cancel(&TimerKey::Snapshot(page_index));
                        Ok(self
                            .broadcast(&WireMessage::CanvasChange {
                                page_index,
                                page_data: scene,
                            })
                            .await)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::SendStroke(event) => self.send_stroke(event).await,
            Command::NotifyLocalChange { page_index } => {
                let debounce = self.config.debounce();
                self.timers.arm(TimerKey::Snapshot(page_index), debounce);
            }
            Command::GoToPage { page_index, reply } => {
                let result = self.board.go_to_page(page_index);
                if result.is_ok() {
                    self.broadcast(&WireMessage::PageChange { page_index }).await;
                }
                let _ = reply.send(result);
            }
            Command::AddPage { reply } => {
                let result = self.board.add_page();
                if let Ok(page_index) = result {
                    let structure = self.board.structure();
                    self.broadcast(&WireMessage::PagesStructure {
                        page_structure: structure,
                    })
                    .await;
                    self.broadcast(&WireMessage::PageChange { page_index }).await;
                }
                let _ = reply.send(result);
            }
            Command::DeletePage { page_index, reply } => {
                let result = self.board.delete_page(page_index);
                if let Err(e) = &result {
                    self.status(e.to_string(), Severity::Warning);
                }
                let _ = reply.send(result);
            }
            Command::ClearCurrentPage => {
                let page_index = self.board.current_page();
                self.timers.cancel(&TimerKey::Snapshot(page_index));
                let scene = self.board.clear_current_page();
                self.broadcast(&WireMessage::CanvasChange {
                    page_index,
                    page_data: scene,
                })
                .await;
            }
            Command::AcquireMedia {
                video,
                audio,
                reply,
            } => {
                let acquired = self.acquire_media(MediaRequest::new(video, audio)).await;
                let _ = reply.send(acquired);
            }
            Command::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle_track(TrackKind::Video));
            }
            Command::ToggleAudio { reply } => {
                let _ = reply.send(self.toggle_track(TrackKind::Audio));
            }
            Command::ShareScreen { reply } => {
                let _ = reply.send(self.share_screen().await);
            }
            Command::StopScreenShare { reply } => {
                let _ = reply.send(self.stop_screen_share().await);
            }
            Command::Info { reply } => {
                let _ = reply.send(self.info());
            }
            Command::Leave { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn join_room(&mut self, room_id: String, display_label: String) {
        if self.room.is_some() {
            self.leave_room().await;
        }

        info!(room = %room_id, label = %display_label, "Joining room");
        self.room = Some(Room::new(room_id.clone(), display_label.clone()));
        self.signal(OutboundSignal::JoinRoom {
            room_id: room_id.clone(),
            display_label,
        });
        self.status(format!("Joining room {}...", room_id), Severity::Info);
    }

    /// Send a sync message to every connected peer
    ///
    /// Congested or closed channels drop the message for that peer only.
    pub(super) async fn broadcast(&mut self, message: &WireMessage) -> BroadcastStats {
        let start = Instant::now();
        let targets = self.peers.connected_peer_ids();
        let mut stats = BroadcastStats {
            total_peers: targets.len(),
            ..Default::default()
        };

        for peer_id in targets {
            let Some(connection) = self.peers.get_mut(&peer_id) else {
                continue;
            };
            match connection.send_sync(message).await {
                Ok(()) => stats.sent_count += 1,
                Err(e) if e.is_congestion() => {
                    stats.dropped_count += 1;
                    stats.failed_peers.push(peer_id);
                }
                Err(e) => {
                    debug!(peer_id = %peer_id, "Failed to send {}: {}", message.type_name(), e);
                    stats.failed_count += 1;
                    stats.failed_peers.push(peer_id);
                }
            }
        }

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            message = message.type_name(),
            total = stats.total_peers,
            sent = stats.sent_count,
            dropped = stats.dropped_count,
            "Broadcast complete"
        );
        stats
    }

    /// Debounce window for a page elapsed
    pub(super) async fn flush_snapshot(&mut self, page_index: usize) {
        let Some(scene) = self.board.snapshot(page_index) else {
            debug!(page = page_index, "No scene for page, snapshot skipped");
            return;
        };
        self.broadcast(&WireMessage::CanvasChange {
            page_index,
            page_data: scene,
        })
        .await;
    }

    /// Send page structure and the displayed page to a freshly connected peer
    pub(super) async fn push_initial_state(&mut self, peer_id: &PeerId) {
        let needed = self
            .peers
            .get(peer_id)
            .is_some_and(|c| c.needs_initial_sync());
        if !needed {
            return;
        }

        let page_index = self.board.current_page();
        let structure = WireMessage::PagesStructure {
            page_structure: self.board.structure(),
        };
        let snapshot = self.board.snapshot(page_index).map(|scene| WireMessage::CanvasChange {
            page_index,
            page_data: scene,
        });

        let Some(connection) = self.peers.get_mut(peer_id) else {
            return;
        };
        connection.mark_initial_sync_sent();
        info!(peer_id = %peer_id, pages = self.board.page_count(), "Pushing board to peer");

        for message in std::iter::once(structure).chain(snapshot) {
            if let Err(e) = connection.send_sync(&message).await {
                warn!(peer_id = %peer_id, "Initial {} not sent: {}", message.type_name(), e);
            }
        }
    }

    /// Queue a local stroke event for every connected peer
    ///
    /// Outside a pacing window the event goes out at once and a window
    /// starts; inside it, events wait for the window to end.
    async fn send_stroke(&mut self, event: StrokeEvent) {
        let interval = self.config.stroke_flush_interval();

        for peer_id in self.peers.connected_peer_ids() {
            let Some(connection) = self.peers.get_mut(&peer_id) else {
                continue;
            };
            connection.enqueue_stroke(event.clone());
            if connection.channels().stroke.is_pacing() {
                continue;
            }

            if let Err(e) = connection.flush_strokes().await {
                debug!(peer_id = %peer_id, "Stroke flush failed: {}", e);
            }
            connection.channels_mut().stroke.set_pacing(true);
            self.timers.arm(TimerKey::StrokeFlush(peer_id), interval);
        }
    }

    /// Pacing window for a peer elapsed
    pub(super) async fn flush_strokes(&mut self, peer_id: &PeerId) {
        let interval = self.config.stroke_flush_interval();
        let Some(connection) = self.peers.get_mut(peer_id) else {
            return;
        };

        if connection.channels().stroke.pending() == 0 {
            connection.channels_mut().stroke.set_pacing(false);
            return;
        }

        if let Err(e) = connection.flush_strokes().await {
            debug!(peer_id = %peer_id, "Stroke flush failed: {}", e);
        }
        self.timers
            .arm(TimerKey::StrokeFlush(peer_id.clone()), interval);
    }

    /// Apply an inbound data channel message to the board
    pub(super) fn on_channel_message(&mut self, peer_id: &PeerId, channel: ChannelKind, text: &str) {
        if let Some(connection) = self.peers.get_mut(peer_id) {
            connection.channels_mut().record_received(channel);
        }

        let message = match WireMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer_id = %peer_id, channel = channel.label(), "Dropping malformed message: {}", e);
                return;
            }
        };
        if message.channel() != channel {
            debug!(peer_id = %peer_id, message = message.type_name(), "Message on unexpected channel");
        }

        match &message {
            WireMessage::CanvasChange {
                page_index,
                page_data,
            } => match self.board.apply_snapshot(*page_index, page_data.clone()) {
                Ok(SnapshotOutcome::Rendered) => {
                    debug!(peer_id = %peer_id, page = page_index, "Remote snapshot rendered")
                }
                Ok(SnapshotOutcome::Cached) => {
                    debug!(peer_id = %peer_id, page = page_index, "Remote snapshot cached")
                }
                Err(e) => warn!(peer_id = %peer_id, "Snapshot rejected: {}", e),
            },
            WireMessage::PagesStructure { page_structure } => {
                self.board.apply_structure(page_structure);
            }
            WireMessage::PageChange { page_index } => {
                if let Err(e) = self.board.apply_page_change(*page_index) {
                    warn!(peer_id = %peer_id, "Page change rejected: {}", e);
                }
            }
            WireMessage::ContinuousDrawing(event) => {
                self.board.apply_stroke(peer_id, event.clone());
            }
        }

        self.observer.on_data(peer_id, &message);
    }

    /// Acquire local media with fallback and attach it to every link
    ///
    /// Connected peers are renegotiated so they receive the new tracks.
    async fn acquire_media(&mut self, request: MediaRequest) -> bool {
        if self.local_media.is_some() {
            self.status("Local media already active", Severity::Info);
            return true;
        }

        let observer = self.observer.clone();
        let media = acquire_with_fallback(self.media_source.as_ref(), request, |message, severity| {
            observer.on_status(&message, severity)
        })
        .await;
        let Some(media) = media else {
            return false;
        };

        for peer_id in self.peers.peer_ids() {
            if let Some(connection) = self.peers.get(&peer_id) {
                if let Err(e) = connection.link().add_local_media(&media).await {
                    warn!(peer_id = %peer_id, "Failed to attach local media: {}", e);
                }
            }
        }
        self.local_media = Some(media);

        for peer_id in self.peers.connected_peer_ids() {
            self.send_offer(&peer_id, false).await;
        }
        true
    }

    /// Put the screen on every video sender in place of the camera
    async fn share_screen(&mut self) -> bool {
        if self.screen_share.is_some() {
            self.status("Already sharing screen", Severity::Info);
            return true;
        }
        let Some(stream_id) = self
            .local_media
            .as_ref()
            .filter(|m| m.has(TrackKind::Video))
            .map(|m| m.stream_id().to_string())
        else {
            self.status("Screen sharing needs an active camera", Severity::Warning);
            return false;
        };

        let screen = match self.media_source.acquire_screen(&stream_id).await {
            Ok(track) => track,
            Err(e) => {
                warn!("Screen capture failed: {}", e);
                self.status(format!("Error sharing screen: {}", e), Severity::Error);
                return false;
            }
        };

        self.replace_video_everywhere(&screen).await;
        info!(track_id = screen.id(), "Screen sharing started");
        self.screen_share = Some(screen);
        self.status("Sharing screen", Severity::Success);
        true
    }

    /// Put the camera back on every video sender
    async fn stop_screen_share(&mut self) -> bool {
        let Some(screen) = self.screen_share.take() else {
            return false;
        };
        screen.set_enabled(false);

        let camera = self.local_media.as_ref().and_then(|m| m.video_track()).cloned();
        if let Some(camera) = camera {
            self.replace_video_everywhere(&camera).await;
        }
        info!("Screen sharing stopped");
        self.status("Screen sharing stopped, camera restored", Severity::Info);
        true
    }

    async fn replace_video_everywhere(&mut self, track: &LocalTrack) {
        for peer_id in self.peers.peer_ids() {
            let Some(connection) = self.peers.get(&peer_id) else {
                continue;
            };
            match connection.link().replace_video_track(track).await {
                Ok(0) => debug!(peer_id = %peer_id, "No video sender to replace"),
                Ok(_) => {}
                Err(e) => warn!(peer_id = %peer_id, "Failed to replace video track: {}", e),
            }
        }
    }

    fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        let state = self.local_media.as_ref().and_then(|m| m.toggle(kind))?;
        let what = match kind {
            TrackKind::Video => "Camera",
            TrackKind::Audio => "Microphone",
        };
        let on_off = if state { "on" } else { "off" };
        self.status(format!("{} {}", what, on_off), Severity::Info);
        Some(state)
    }
}
