//! Collaborators that record what a session did

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde_json::json;
use sketchboard_webrtc::board::{RemotePath, RenderEngine};
use sketchboard_webrtc::channels::{Point, SceneBlob, WireMessage};
use sketchboard_webrtc::media::{LocalMedia, LocalTrack, MediaRequest, MediaSource, RemoteStream};
use sketchboard_webrtc::peer::PeerId;
use sketchboard_webrtc::session::{SessionObserver, Severity};
use sketchboard_webrtc::{Error, Result};
use std::sync::Arc;

/// Everything the renderer was asked to do
#[derive(Debug)]
pub struct RenderLog {
    /// Displayed scene
    pub scene: SceneBlob,
    pub loads: Vec<SceneBlob>,
    pub clears: usize,
    pub started: Vec<String>,
    pub moves: Vec<(String, Vec<Point>)>,
    pub ended: Vec<String>,
}

/// Render engine backed by a shared log
#[derive(Clone)]
pub struct RecordingRenderer {
    log: Arc<Mutex<RenderLog>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(RenderLog {
                scene: empty_scene(),
                loads: Vec::new(),
                clears: 0,
                started: Vec::new(),
                moves: Vec::new(),
                ended: Vec::new(),
            })),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, RenderLog> {
        self.log.lock()
    }

    /// Replace the displayed scene, as a local edit would
    pub fn draw(&self, scene: SceneBlob) {
        self.log.lock().scene = scene;
    }
}

pub fn empty_scene() -> SceneBlob {
    json!({"objects": []})
}

impl RenderEngine for RecordingRenderer {
    fn serialize_scene(&self) -> SceneBlob {
        self.log.lock().scene.clone()
    }

    fn load_scene(&mut self, scene: &SceneBlob) -> Result<()> {
        if !scene.get("objects").is_some_and(|o| o.is_array()) {
            return Err(Error::SerializationError(
                "scene has no objects array".to_string(),
            ));
        }
        let mut log = self.log.lock();
        log.scene = scene.clone();
        log.loads.push(scene.clone());
        Ok(())
    }

    fn clear_scene(&mut self) {
        let mut log = self.log.lock();
        log.scene = empty_scene();
        log.clears += 1;
    }

    fn apply_stroke_start(&mut self, path: &RemotePath) {
        self.log.lock().started.push(path.path_id.clone());
    }

    fn apply_stroke_move(&mut self, path_id: &str, points: &[Point]) {
        self.log
            .lock()
            .moves
            .push((path_id.to_string(), points.to_vec()));
    }

    fn apply_stroke_end(&mut self, path: &RemotePath) {
        self.log.lock().ended.push(path.path_id.clone());
    }
}

#[derive(Debug, Default)]
struct ObserverLog {
    connected: Vec<PeerId>,
    disconnected: Vec<PeerId>,
    statuses: Vec<(String, Severity)>,
    data: Vec<(PeerId, WireMessage)>,
    streams: Vec<(PeerId, RemoteStream)>,
}

/// Observer that keeps every callback
#[derive(Debug, Default)]
pub struct RecordingObserver {
    log: Mutex<ObserverLog>,
}

impl RecordingObserver {
    pub fn connected(&self) -> Vec<PeerId> {
        self.log.lock().connected.clone()
    }

    pub fn disconnected(&self) -> Vec<PeerId> {
        self.log.lock().disconnected.clone()
    }

    pub fn statuses(&self) -> Vec<(String, Severity)> {
        self.log.lock().statuses.clone()
    }

    /// A status containing `text` was reported with `severity`
    pub fn has_status(&self, text: &str, severity: Severity) -> bool {
        self.log
            .lock()
            .statuses
            .iter()
            .any(|(m, s)| m.contains(text) && *s == severity)
    }

    pub fn messages(&self) -> Vec<(PeerId, WireMessage)> {
        self.log.lock().data.clone()
    }

    /// Snapshots received, as (page, scene)
    pub fn canvas_changes(&self) -> Vec<(usize, SceneBlob)> {
        self.log
            .lock()
            .data
            .iter()
            .filter_map(|(_, m)| match m {
                WireMessage::CanvasChange {
                    page_index,
                    page_data,
                } => Some((*page_index, page_data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn streams(&self) -> Vec<(PeerId, RemoteStream)> {
        self.log.lock().streams.clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connected(&self, peer_id: &PeerId) {
        self.log.lock().connected.push(peer_id.clone());
    }

    fn on_disconnected(&self, peer_id: &PeerId) {
        self.log.lock().disconnected.push(peer_id.clone());
    }

    fn on_remote_stream(&self, peer_id: &PeerId, stream: RemoteStream) {
        self.log.lock().streams.push((peer_id.clone(), stream));
    }

    fn on_data(&self, peer_id: &PeerId, message: &WireMessage) {
        self.log.lock().data.push((peer_id.clone(), message.clone()));
    }

    fn on_status(&self, message: &str, severity: Severity) {
        self.log.lock().statuses.push((message.to_string(), severity));
    }
}

/// Media source that grants only the listed request shapes
pub struct GrantingSource {
    grants: Vec<MediaRequest>,
    screen: bool,
}

impl GrantingSource {
    pub fn new(grants: Vec<MediaRequest>) -> Self {
        Self {
            grants,
            screen: false,
        }
    }

    /// Also grant screen capture
    pub fn with_screen(mut self) -> Self {
        self.screen = true;
        self
    }
}

#[async_trait]
impl MediaSource for GrantingSource {
    async fn acquire(&self, request: MediaRequest) -> Result<LocalMedia> {
        if self.grants.contains(&request) {
            Ok(LocalMedia::for_request(request))
        } else {
            Err(Error::MediaAcquisitionError("permission denied".to_string()))
        }
    }

    async fn acquire_screen(&self, stream_id: &str) -> Result<LocalTrack> {
        if self.screen {
            Ok(LocalTrack::screen(stream_id))
        } else {
            Err(Error::MediaAcquisitionError("screen capture denied".to_string()))
        }
    }
}
