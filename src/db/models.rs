//! Records stored in the index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Face rectangle in the coordinates of the original, unscaled media.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Inclusive on every edge.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// The same box after the image is turned clockwise by `degrees` (0, 90,
    /// 180 or 270). `width` and `height` are the unrotated image size.
    pub fn rotated(&self, degrees: u32, width: f32, height: f32) -> Self {
        match degrees {
            90 => Self::new(height - self.bottom, self.left, height - self.top, self.right),
            180 => Self::new(width - self.right, height - self.bottom, width - self.left, height - self.top),
            270 => Self::new(self.top, width - self.right, self.bottom, width - self.left),
            _ => *self,
        }
    }

    /// Map into display pixels using a photo's rescale factor.
    pub fn scaled(&self, factor: f32) -> [i32; 4] {
        [
            (self.left * factor) as i32,
            (self.top * factor) as i32,
            (self.right * factor) as i32,
            (self.bottom * factor) as i32,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub tag_id: Option<i64>,
}

impl Face {
    pub fn is_unassigned_with_embedding(&self) -> bool {
        self.tag_id.is_none() && self.embedding.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Absolute source path, also the store key.
    pub path: String,
    /// `%Y-%m-%d %H:%M:%S UTC`
    pub mtime: String,
    pub size: u64,
    /// Modification time unless the media carries a capture time.
    pub sort_key: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Folder path relative to the source root, with a trailing slash.
    pub relpath: String,
    /// `%Y-%m-%d`
    pub date: String,
    /// Display-size over original-size ratio for mapping face boxes.
    #[serde(default)]
    pub scale: Option<f32>,
    #[serde(default)]
    pub faces: Vec<Face>,
}

impl Photo {
    pub fn tag_ids(&self) -> BTreeSet<i64> {
        self.faces.iter().filter_map(|f| f.tag_id).collect()
    }

    pub fn has_tag(&self, tag_id: i64) -> bool {
        self.faces.iter().any(|f| f.tag_id == Some(tag_id))
    }

    pub fn has_untagged_embedding(&self) -> bool {
        self.faces.iter().any(Face::is_unassigned_with_embedding)
    }
}

/// Diagnostics about the cluster a tag was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub centroid: Vec<f32>,
    pub mean_dist: f32,
    pub max_dist: f32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    /// A person's name, or the id itself while unnamed.
    pub label: String,
    /// Paths of photos holding at least one face with this tag.
    #[serde(default)]
    pub photos: BTreeSet<String>,
    #[serde(default)]
    pub description: Option<ClusterDescription>,
}

impl Tag {
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            photos: BTreeSet::new(),
            description: None,
        }
    }

    /// True once someone has given the tag a real name.
    pub fn is_named(&self) -> bool {
        !self.label.is_empty() && !self.label.chars().all(|c| c.is_ascii_digit())
    }
}
