//! Data channel message types
//!
//! Messages are JSON text frames tagged by `type`. Snapshots, page structure
//! and navigation travel on the reliable sync channel; incremental stroke
//! events travel on the live stroke channel.

use super::ChannelKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Opaque serialized scene for one page, produced by the render engine
pub type SceneBlob = serde_json::Value;

/// Canvas coordinate, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point(pub f64, pub f64);

/// Phase of a stroke event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeKind {
    /// First point of a new path
    Start,
    /// Additional points for an open path
    Move,
    /// Path finished
    End,
}

/// One incremental stroke event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeEvent {
    /// Start, move or end
    pub kind: StrokeKind,

    /// Page the stroke is drawn on
    pub page_index: usize,

    /// Sender-unique path identifier
    pub path_id: String,

    /// Points carried by this event (may be empty for `end`)
    #[serde(default)]
    pub points: Vec<Point>,

    /// Stroke color (CSS color string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Brush width in canvas units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brush_size: Option<f32>,
}

impl StrokeEvent {
    /// Start a path at `point`
    pub fn start(
        page_index: usize,
        path_id: impl Into<String>,
        point: Point,
        color: impl Into<String>,
        brush_size: f32,
    ) -> Self {
        Self {
            kind: StrokeKind::Start,
            page_index,
            path_id: path_id.into(),
            points: vec![point],
            color: Some(color.into()),
            brush_size: Some(brush_size),
        }
    }

    /// Extend an open path
    pub fn moved(page_index: usize, path_id: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            kind: StrokeKind::Move,
            page_index,
            path_id: path_id.into(),
            points,
            color: None,
            brush_size: None,
        }
    }

    /// Finish a path
    pub fn end(page_index: usize, path_id: impl Into<String>) -> Self {
        Self {
            kind: StrokeKind::End,
            page_index,
            path_id: path_id.into(),
            points: Vec::new(),
            color: None,
            brush_size: None,
        }
    }
}

/// Page list and navigation position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStructure {
    /// Scene blob per page, `null` for pages never rendered
    #[serde(default)]
    pub pages: Vec<Option<SceneBlob>>,

    /// Page the sender is viewing
    pub current_page_index: usize,

    /// Number of pages the sender has
    pub total_pages: usize,
}

/// Messages exchanged between whiteboard peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Full snapshot of one page
    #[serde(rename_all = "camelCase")]
    CanvasChange {
        /// Page the snapshot belongs to
        page_index: usize,
        /// Serialized scene
        page_data: SceneBlob,
    },

    /// Page list (only ever grows the receiver)
    #[serde(rename_all = "camelCase")]
    PagesStructure {
        /// Sender's pages
        page_structure: PageStructure,
    },

    /// Sender navigated to another page
    #[serde(rename_all = "camelCase")]
    PageChange {
        /// Target page
        page_index: usize,
    },

    /// Live stroke increment
    ContinuousDrawing(StrokeEvent),
}

impl WireMessage {
    /// Channel this message travels on
    pub fn channel(&self) -> ChannelKind {
        match self {
            WireMessage::ContinuousDrawing(_) => ChannelKind::Stroke,
            _ => ChannelKind::Sync,
        }
    }

    /// Serialize to a data channel text frame
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize message: {}", e))
        })
    }

    /// Parse a data channel text frame
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            Error::SerializationError(format!("Failed to parse message: {}", e))
        })
    }

    /// Short name used in logs
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::CanvasChange { .. } => "canvas-change",
            WireMessage::PagesStructure { .. } => "pages-structure",
            WireMessage::PageChange { .. } => "page-change",
            WireMessage::ContinuousDrawing(_) => "continuous-drawing",
        }
    }
}
