//! Reassembly of remote strokes from incremental events
//!
//! Events arrive over a bounded-retransmit channel, so duplicates and gaps
//! are expected. A path exists from its `start` until its first `end`.

use crate::channels::{Point, StrokeEvent, StrokeKind};
use crate::peer::PeerId;
use std::collections::HashMap;
use tracing::{debug, trace};

/// A path being drawn by a remote peer
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePath {
    pub path_id: String,
    pub page_index: usize,
    pub points: Vec<Point>,
    pub color: Option<String>,
    pub brush_size: Option<f32>,
    /// Points of the most recent applied `move`, for duplicate detection
    last_appended: Vec<Point>,
}

impl RemotePath {
    fn from_start(event: StrokeEvent) -> Self {
        Self {
            path_id: event.path_id,
            page_index: event.page_index,
            points: event.points,
            color: event.color,
            brush_size: event.brush_size,
            last_appended: Vec::new(),
        }
    }
}

/// Result of applying one stroke event
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeOutcome {
    /// A new path was opened
    Started(RemotePath),
    /// Points were appended to an open path
    Extended {
        path_id: String,
        page_index: usize,
        points: Vec<Point>,
    },
    /// A path was finished and removed
    Finished(RemotePath),
    /// The event had no effect
    Ignored(&'static str),
}

/// Open remote paths, keyed by sender and path ID
#[derive(Debug, Default)]
pub struct StrokeAssembler {
    open: HashMap<(PeerId, String), RemotePath>,
}

impl StrokeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event from `sender`
    pub fn apply(&mut self, sender: &PeerId, event: StrokeEvent) -> StrokeOutcome {
        let key = (sender.clone(), event.path_id.clone());

        match event.kind {
            StrokeKind::Start => {
                if self.open.contains_key(&key) {
                    debug!(peer_id = %sender, path_id = %event.path_id, "Duplicate stroke start ignored");
                    return StrokeOutcome::Ignored("duplicate start");
                }
                let path = RemotePath::from_start(event);
                self.open.insert(key, path.clone());
                StrokeOutcome::Started(path)
            }
            StrokeKind::Move => {
                let Some(path) = self.open.get_mut(&key) else {
                    trace!(peer_id = %sender, path_id = %event.path_id, "Move for unknown path dropped");
                    return StrokeOutcome::Ignored("unknown path");
                };
                if event.points.is_empty() {
                    return StrokeOutcome::Ignored("no points");
                }
                if path.last_appended == event.points {
                    trace!(path_id = %event.path_id, "Duplicate move ignored");
                    return StrokeOutcome::Ignored("duplicate move");
                }
                path.points.extend_from_slice(&event.points);
                path.last_appended = event.points.clone();
                StrokeOutcome::Extended {
                    path_id: event.path_id,
                    page_index: path.page_index,
                    points: event.points,
                }
            }
            StrokeKind::End => match self.open.remove(&key) {
                Some(path) => StrokeOutcome::Finished(path),
                None => StrokeOutcome::Ignored("path already finished"),
            },
        }
    }

    /// Number of paths still open
    pub fn open_paths(&self) -> usize {
        self.open.len()
    }

    /// Drop every open path of a peer that went away
    pub fn abandon_peer(&mut self, peer_id: &PeerId) -> usize {
        let before = self.open.len();
        self.open.retain(|(sender, _), _| sender != peer_id);
        before - self.open.len()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}
