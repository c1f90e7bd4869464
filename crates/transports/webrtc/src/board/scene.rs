//! Headless scene store
//!
//! A minimal render engine for peers without a display: it keeps the scene
//! as a JSON document `{"objects": [...]}` and turns finished remote paths
//! into path objects.

use super::strokes::RemotePath;
use super::RenderEngine;
use crate::channels::{Point, SceneBlob};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

/// In-memory scene of the displayed page
#[derive(Debug, Default)]
pub struct SceneStore {
    objects: Vec<Value>,
    /// Paths being drawn, by path ID
    drawing: HashMap<String, RemotePath>,
    loads: u64,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects on the displayed page
    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    /// Number of times a scene was loaded (re-renders)
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Paths started but not finished
    pub fn drawing(&self) -> usize {
        self.drawing.len()
    }

    fn path_object(path: &RemotePath) -> Value {
        json!({
            "type": "path",
            "pathId": path.path_id,
            "points": path.points,
            "color": path.color,
            "brushSize": path.brush_size,
        })
    }
}

impl RenderEngine for SceneStore {
    fn serialize_scene(&self) -> SceneBlob {
        json!({ "objects": self.objects })
    }

    fn load_scene(&mut self, scene: &SceneBlob) -> Result<()> {
        let objects = scene
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::SerializationError("Scene has no \"objects\" array".to_string())
            })?;
        self.objects = objects.clone();
        self.drawing.clear();
        self.loads += 1;
        Ok(())
    }

    fn clear_scene(&mut self) {
        self.objects.clear();
        self.drawing.clear();
    }

    fn apply_stroke_start(&mut self, path: &RemotePath) {
        self.drawing.insert(path.path_id.clone(), path.clone());
    }

    fn apply_stroke_move(&mut self, path_id: &str, points: &[Point]) {
        if let Some(path) = self.drawing.get_mut(path_id) {
            path.points.extend_from_slice(points);
        }
    }

    fn apply_stroke_end(&mut self, path: &RemotePath) {
        self.drawing.remove(&path.path_id);
        self.objects.push(Self::path_object(path));
    }
}
