use anyhow::Result;
use std::path::Path;

use crate::db::BoundingBox;

/// A face found in an image, boxed in original-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// Face detection and embedding model.
pub trait Embedder: Send + Sync {
    fn embed(&self, path: &Path) -> Result<Vec<DetectedFace>>;
}

/// Used when no model is configured. Every image has zero faces.
pub struct NoFaces;

impl Embedder for NoFaces {
    fn embed(&self, _path: &Path) -> Result<Vec<DetectedFace>> {
        Ok(Vec::new())
    }
}
