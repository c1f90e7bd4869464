//! Application-facing handle to a running session

use super::SessionEvent;
use crate::channels::{SceneBlob, StrokeEvent};
use crate::peer::{PeerId, PeerInfo};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Statistics from broadcasting a sync message to every connected peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Total number of peers targeted for broadcast
    pub total_peers: usize,
    /// Number of successful transmissions
    pub sent_count: usize,
    /// Number of sends dropped because the channel was congested
    pub dropped_count: usize,
    /// Number of failed transmissions (channel closed, transport error)
    pub failed_count: usize,
    /// Peers that did not receive the message
    pub failed_peers: Vec<PeerId>,
    /// Total duration of broadcast operation in milliseconds
    pub total_duration_ms: u64,
}

/// Point-in-time view of the session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Local peer ID, once known
    pub local_id: Option<PeerId>,
    /// Joined room, if any
    pub room_id: Option<String>,
    /// Remote room members
    pub members: Vec<PeerId>,
    /// Peer connections in any state
    pub peers: Vec<PeerInfo>,
    /// Local page count
    pub page_count: usize,
    /// Displayed page
    pub current_page: usize,
    /// Local media is attached
    pub has_local_media: bool,
    /// The screen is sent in place of the camera
    pub sharing_screen: bool,
}

/// Requests from the application to the session
#[derive(Debug)]
pub enum Command {
    JoinRoom {
        room_id: String,
        display_label: String,
    },
    SendFullState {
        page_index: usize,
        scene: SceneBlob,
        reply: oneshot::Sender<Result<BroadcastStats>>,
    },
    SendStroke(StrokeEvent),
    NotifyLocalChange {
        page_index: usize,
    },
    GoToPage {
        page_index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    AddPage {
        reply: oneshot::Sender<Result<usize>>,
    },
    DeletePage {
        page_index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearCurrentPage,
    AcquireMedia {
        video: bool,
        audio: bool,
        reply: oneshot::Sender<bool>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Option<bool>>,
    },
    ToggleAudio {
        reply: oneshot::Sender<Option<bool>>,
    },
    ShareScreen {
        reply: oneshot::Sender<bool>,
    },
    StopScreenShare {
        reply: oneshot::Sender<bool>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Tells the session when the last handle is gone
#[derive(Debug)]
struct HandleLifetime {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Drop for HandleLifetime {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionEvent::HandlesDropped);
    }
}

/// Cloneable handle for driving a session from application code
///
/// Every method enqueues a command; methods returning a value wait for the
/// event loop to process it. Dropping the last clone leaves the room and
/// stops the session, as `leave()` would. Raw senders from `event_sender()`
/// do not keep the session alive.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    _lifetime: Arc<HandleLifetime>,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            _lifetime: Arc::new(HandleLifetime { tx: tx.clone() }),
            tx,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Join (or create) a room
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room to join
    /// * `display_label` - Label shown to other members
    pub fn join_room(&self, room_id: impl Into<String>, display_label: impl Into<String>) -> Result<()> {
        self.send(Command::JoinRoom {
            room_id: room_id.into(),
            display_label: display_label.into(),
        })
    }

    /// Store the application's scene for a page and push it to every peer
    pub async fn send_full_state(&self, page_index: usize, scene: SceneBlob) -> Result<BroadcastStats> {
        self.request(|reply| Command::SendFullState {
            page_index,
            scene,
            reply,
        })
        .await?
    }

    /// Send a local stroke increment to every peer
    pub fn send_stroke(&self, event: StrokeEvent) -> Result<()> {
        self.send(Command::SendStroke(event))
    }

    /// Report a local edit; a snapshot follows after the debounce window
    pub fn notify_local_change(&self, page_index: usize) -> Result<()> {
        self.send(Command::NotifyLocalChange { page_index })
    }

    pub async fn go_to_page(&self, page_index: usize) -> Result<()> {
        self.request(|reply| Command::GoToPage { page_index, reply })
            .await?
    }

    /// Append a page and navigate to it; returns its index
    pub async fn add_page(&self) -> Result<usize> {
        self.request(|reply| Command::AddPage { reply }).await?
    }

    /// Delete a page locally (peers keep it)
    pub async fn delete_page(&self, page_index: usize) -> Result<()> {
        self.request(|reply| Command::DeletePage { page_index, reply })
            .await?
    }

    pub fn clear_current_page(&self) -> Result<()> {
        self.send(Command::ClearCurrentPage)
    }

    /// Acquire camera/microphone with fallback; returns whether any media was attached
    pub async fn acquire_local_media(&self, video: bool, audio: bool) -> Result<bool> {
        self.request(|reply| Command::AcquireMedia {
            video,
            audio,
            reply,
        })
        .await
    }

    /// Flip the camera; `None` when there is no video track
    pub async fn toggle_video(&self) -> Result<Option<bool>> {
        self.request(|reply| Command::ToggleVideo { reply }).await
    }

    /// Flip the microphone; `None` when there is no audio track
    pub async fn toggle_audio(&self) -> Result<Option<bool>> {
        self.request(|reply| Command::ToggleAudio { reply }).await
    }

    /// Send the screen instead of the camera to every peer
    ///
    /// Needs local media with a video track. No renegotiation takes place.
    /// Returns whether the screen is being shared afterwards.
    pub async fn share_screen(&self) -> Result<bool> {
        self.request(|reply| Command::ShareScreen { reply }).await
    }

    /// Switch every peer back to the camera; false when nothing was shared
    pub async fn stop_screen_share(&self) -> Result<bool> {
        self.request(|reply| Command::StopScreenShare { reply }).await
    }

    pub async fn info(&self) -> Result<SessionInfo> {
        self.request(|reply| Command::Info { reply }).await
    }

    /// Close every connection and stop the session
    ///
    /// Calling it on a stopped session succeeds.
    pub async fn leave(&self) -> Result<()> {
        match self.request(|reply| Command::Leave { reply }).await {
            Ok(()) | Err(Error::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Raw sender, for wiring a signaling client to the session
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.tx.clone()
    }
}
