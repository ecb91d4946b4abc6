//! Photo/Face/Tag index.
//!
//! Photos own their faces. Tags keep a back-reference set of photo paths that
//! is derived from face assignments; every mutating operation here restores
//! the rule that a tag's set holds exactly the photos with at least one face
//! carrying that tag.
//!
//! Operations that name a missing photo or tag return `Ok(false)`. `Err` is
//! reserved for storage failures.

pub mod models;
pub mod store;

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

pub use models::{BoundingBox, ClusterDescription, Face, Photo, Tag};
pub use store::Store;

/// Reserved key holding the set of live tag ids.
const TAGS_KEY: &str = ".tags";

fn tag_key(tag_id: i64) -> String {
    format!(".tag{}", tag_id)
}

pub struct PhotoIndex {
    store: Store,
}

impl PhotoIndex {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_store(Store::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_store(Store::open_in_memory()?)
    }

    fn with_store(store: Store) -> Result<Self> {
        if !store.contains(TAGS_KEY)? {
            store.put(TAGS_KEY, &BTreeSet::<i64>::new())?;
        }
        Ok(Self { store })
    }

    // ========================================================================
    // Photos
    // ========================================================================

    pub fn get_photo(&self, path: &str) -> Result<Option<Photo>> {
        if path.starts_with('.') {
            return Ok(None);
        }
        self.store.get(path)
    }

    /// Insert or replace a photo record and fold its face tags into the
    /// matching back-reference sets. Tags the previous record referenced but
    /// the new one does not lose this path.
    pub fn add_photo(&self, photo: &Photo) -> Result<()> {
        let previous = self.get_photo(&photo.path)?;
        self.save_photo(photo)?;

        let current = photo.tag_ids();
        if let Some(previous) = previous {
            for stale in previous.tag_ids().difference(&current) {
                self.remove_photo_from_tag(*stale, &photo.path)?;
            }
        }
        for tag_id in current {
            if !self.add_photo_to_tag(tag_id, &photo.path)? {
                debug!("Photo {} references unknown tag {}", photo.path, tag_id);
            }
        }
        Ok(())
    }

    pub fn add_metadata(&self, path: &str, key: &str, value: serde_json::Value) -> Result<bool> {
        let Some(mut photo) = self.get_photo(path)? else {
            return Ok(false);
        };
        photo.metadata.insert(key.to_string(), value);
        self.save_photo(&photo)?;
        Ok(true)
    }

    /// Drop a photo record and every back-reference to it.
    pub fn remove_photo(&self, path: &str) -> Result<bool> {
        let Some(photo) = self.get_photo(path)? else {
            return Ok(false);
        };
        for tag_id in photo.tag_ids() {
            self.remove_photo_from_tag(tag_id, path)?;
        }
        self.store.remove(path)
    }

    pub fn filepaths(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter(|k| !k.starts_with('.'))
            .collect())
    }

    pub fn photos(&self) -> Result<Vec<Photo>> {
        let mut photos = Vec::new();
        for path in self.filepaths()? {
            if let Some(photo) = self.get_photo(&path)? {
                photos.push(photo);
            }
        }
        Ok(photos)
    }

    fn save_photo(&self, photo: &Photo) -> Result<()> {
        self.store.put(&photo.path, photo)
    }

    // ========================================================================
    // Faces
    // ========================================================================

    /// Append a face to an existing photo. When `tag_id` is given the tag must
    /// already exist.
    pub fn add_face(
        &self,
        path: &str,
        bbox: BoundingBox,
        embedding: Option<Vec<f32>>,
        tag_id: Option<i64>,
    ) -> Result<bool> {
        let Some(mut photo) = self.get_photo(path)? else {
            return Ok(false);
        };
        if let Some(tag_id) = tag_id {
            if self.get_tag(tag_id)?.is_none() {
                return Ok(false);
            }
        }

        photo.faces.push(Face {
            bbox,
            embedding,
            tag_id,
        });
        self.save_photo(&photo)?;

        if let Some(tag_id) = tag_id {
            self.add_photo_to_tag(tag_id, path)?;
        }
        Ok(true)
    }

    /// Move every eligible face holding `old_tag_id` to `new_tag_id`.
    ///
    /// With a `point`, only faces whose box contains it are eligible. `None`
    /// on either side means "untagged". Returns false when nothing matched.
    pub fn retag(
        &self,
        path: &str,
        old_tag_id: Option<i64>,
        new_tag_id: Option<i64>,
        point: Option<(f32, f32)>,
    ) -> Result<bool> {
        let Some(mut photo) = self.get_photo(path)? else {
            return Ok(false);
        };
        for tag_id in [old_tag_id, new_tag_id].into_iter().flatten() {
            if self.get_tag(tag_id)?.is_none() {
                return Ok(false);
            }
        }

        let mut matched = false;
        for face in photo.faces.iter_mut() {
            if let Some((x, y)) = point {
                if !face.bbox.contains(x, y) {
                    continue;
                }
            }
            if face.tag_id == old_tag_id {
                face.tag_id = new_tag_id;
                matched = true;
            }
        }

        if !matched {
            return Ok(false);
        }
        if old_tag_id == new_tag_id {
            return Ok(true);
        }

        self.save_photo(&photo)?;
        if let Some(old) = old_tag_id {
            if !photo.has_tag(old) {
                self.remove_photo_from_tag(old, path)?;
            }
        }
        if let Some(new) = new_tag_id {
            self.add_photo_to_tag(new, path)?;
        }
        Ok(true)
    }

    /// Tag the face at `position` in the photo's face list, if it is untagged.
    ///
    /// Unlike [`PhotoIndex::retag`] this never touches a second face, however
    /// the boxes overlap.
    pub fn tag_face(&self, path: &str, position: usize, tag_id: i64) -> Result<bool> {
        let Some(mut photo) = self.get_photo(path)? else {
            return Ok(false);
        };
        if self.get_tag(tag_id)?.is_none() {
            return Ok(false);
        }
        match photo.faces.get_mut(position) {
            Some(face) if face.tag_id.is_none() => face.tag_id = Some(tag_id),
            _ => return Ok(false),
        }

        self.save_photo(&photo)?;
        self.add_photo_to_tag(tag_id, path)?;
        Ok(true)
    }

    /// Clear `tag_id` from the matching faces of one photo.
    pub fn untag(&self, tag_id: i64, path: &str, point: Option<(f32, f32)>) -> Result<bool> {
        self.retag(path, Some(tag_id), None, point)
    }

    /// Remove `tag_id` from the matching faces of one photo.
    ///
    /// The face records are kept with their boxes and embeddings; only the tag
    /// assignment is cleared, so the faces become candidates for the next
    /// clustering pass. Use [`PhotoIndex::delete_faces`] to drop them outright.
    pub fn remove_face(&self, tag_id: i64, path: &str, point: Option<(f32, f32)>) -> Result<bool> {
        self.untag(tag_id, path, point)
    }

    /// Delete the matching faces, boxes and embeddings included.
    pub fn delete_faces(&self, tag_id: i64, path: &str, point: Option<(f32, f32)>) -> Result<bool> {
        let Some(mut photo) = self.get_photo(path)? else {
            return Ok(false);
        };

        let before = photo.faces.len();
        photo.faces.retain(|face| {
            let in_point = point.map_or(true, |(x, y)| face.bbox.contains(x, y));
            !(in_point && face.tag_id == Some(tag_id))
        });
        if photo.faces.len() == before {
            return Ok(false);
        }

        self.save_photo(&photo)?;
        if !photo.has_tag(tag_id) {
            self.remove_photo_from_tag(tag_id, path)?;
        }
        Ok(true)
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn get_tag(&self, tag_id: i64) -> Result<Option<Tag>> {
        self.store.get(&tag_key(tag_id))
    }

    fn tag_ids(&self) -> Result<BTreeSet<i64>> {
        Ok(self.store.get(TAGS_KEY)?.unwrap_or_default())
    }

    fn save_tag(&self, tag: &Tag) -> Result<()> {
        self.store.put(&tag_key(tag.id), tag)
    }

    /// Create a tag with the next free id.
    pub fn add_new_tag(&self, label: &str) -> Result<i64> {
        let mut ids = self.tag_ids()?;
        let tag_id = ids.iter().next_back().map_or(1, |max| max + 1);
        self.save_tag(&Tag::new(tag_id, label))?;
        ids.insert(tag_id);
        self.store.put(TAGS_KEY, &ids)?;
        Ok(tag_id)
    }

    /// Create a tag with a chosen id, labelled with the id itself. Returns
    /// false if it already existed.
    pub fn ensure_tag(&self, tag_id: i64) -> Result<bool> {
        let mut ids = self.tag_ids()?;
        if ids.contains(&tag_id) && self.get_tag(tag_id)?.is_some() {
            return Ok(false);
        }
        self.save_tag(&Tag::new(tag_id, tag_id.to_string()))?;
        ids.insert(tag_id);
        self.store.put(TAGS_KEY, &ids)?;
        Ok(true)
    }

    pub fn rename_tag(&self, tag_id: i64, label: &str) -> Result<bool> {
        let Some(mut tag) = self.get_tag(tag_id)? else {
            return Ok(false);
        };
        tag.label = label.to_string();
        self.save_tag(&tag)?;
        Ok(true)
    }

    pub fn set_tag_description(&self, tag_id: i64, description: ClusterDescription) -> Result<bool> {
        let Some(mut tag) = self.get_tag(tag_id)? else {
            return Ok(false);
        };
        tag.description = Some(description);
        self.save_tag(&tag)?;
        Ok(true)
    }

    /// Detach a tag from every face that carries it, then delete the tag.
    /// Photos and their faces survive.
    pub fn remove_tag(&self, tag_id: i64) -> Result<bool> {
        let mut ids = self.tag_ids()?;
        if !ids.contains(&tag_id) {
            return Ok(false);
        }
        let Some(tag) = self.get_tag(tag_id)? else {
            return Ok(false);
        };

        for path in &tag.photos {
            let Some(mut photo) = self.get_photo(path)? else {
                continue;
            };
            for face in photo.faces.iter_mut() {
                if face.tag_id == Some(tag_id) {
                    face.tag_id = None;
                }
            }
            self.save_photo(&photo)?;
        }

        self.store.remove(&tag_key(tag_id))?;
        ids.remove(&tag_id);
        self.store.put(TAGS_KEY, &ids)?;
        Ok(true)
    }

    /// Fold `from` into `into`: every face tagged `from` is retagged and the
    /// `from` tag is deleted. A real name on `from` replaces a numeric label on
    /// `into`.
    pub fn merge_tags(&self, from: i64, into: i64) -> Result<bool> {
        if from == into {
            return Ok(false);
        }
        let (Some(source), Some(mut target)) = (self.get_tag(from)?, self.get_tag(into)?) else {
            return Ok(false);
        };

        for path in &source.photos {
            let Some(mut photo) = self.get_photo(path)? else {
                continue;
            };
            for face in photo.faces.iter_mut() {
                if face.tag_id == Some(from) {
                    face.tag_id = Some(into);
                }
            }
            self.save_photo(&photo)?;
            target.photos.insert(path.clone());
        }

        if source.is_named() && !target.is_named() {
            target.label = source.label.clone();
        }
        self.save_tag(&target)?;

        let mut ids = self.tag_ids()?;
        self.store.remove(&tag_key(from))?;
        ids.remove(&from);
        self.store.put(TAGS_KEY, &ids)?;
        Ok(true)
    }

    /// All tags in id order.
    pub fn tags(&self) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        for tag_id in self.tag_ids()? {
            if let Some(tag) = self.get_tag(tag_id)? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    /// All tags, largest back-reference set first.
    pub fn tags_by_size(&self) -> Result<Vec<Tag>> {
        let mut tags = self.tags()?;
        tags.sort_by(|a, b| b.photos.len().cmp(&a.photos.len()).then(a.id.cmp(&b.id)));
        Ok(tags)
    }

    fn add_photo_to_tag(&self, tag_id: i64, path: &str) -> Result<bool> {
        let Some(mut tag) = self.get_tag(tag_id)? else {
            return Ok(false);
        };
        if tag.photos.insert(path.to_string()) {
            self.save_tag(&tag)?;
        }
        Ok(true)
    }

    fn remove_photo_from_tag(&self, tag_id: i64, path: &str) -> Result<bool> {
        let Some(mut tag) = self.get_tag(tag_id)? else {
            return Ok(false);
        };
        if tag.photos.remove(path) {
            self.save_tag(&tag)?;
        }
        Ok(true)
    }

    /// Describe every disagreement between face assignments and tag
    /// back-reference sets. Empty when the index is consistent.
    pub fn audit_back_references(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let photos = self.photos()?;
        let tags = self.tags()?;

        for photo in &photos {
            for tag_id in photo.tag_ids() {
                match tags.iter().find(|t| t.id == tag_id) {
                    Some(tag) if tag.photos.contains(&photo.path) => {}
                    Some(_) => problems.push(format!(
                        "tag {} is missing back-reference to {}",
                        tag_id, photo.path
                    )),
                    None => problems.push(format!(
                        "{} has a face tagged with unknown tag {}",
                        photo.path, tag_id
                    )),
                }
            }
        }

        for tag in &tags {
            for path in &tag.photos {
                let holds = photos
                    .iter()
                    .find(|p| &p.path == path)
                    .is_some_and(|p| p.has_tag(tag.id));
                if !holds {
                    problems.push(format!(
                        "tag {} references {} which has no face with that tag",
                        tag.id, path
                    ));
                }
            }
        }

        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const IMG1: &str = "/a/b/img1.jpg";

    fn photo(path: &str) -> Photo {
        Photo {
            path: path.to_string(),
            mtime: "2024-05-01 10:00:00 UTC".to_string(),
            size: 1234,
            sort_key: "2024-05-01 10:00:00 UTC".to_string(),
            metadata: Default::default(),
            relpath: "b/".to_string(),
            date: "2024-05-01".to_string(),
            scale: None,
            faces: Vec::new(),
        }
    }

    fn bbox(l: f32, t: f32, r: f32, b: f32) -> BoundingBox {
        BoundingBox::new(l, t, r, b)
    }

    fn assert_consistent(index: &PhotoIndex) {
        let problems = index.audit_back_references().unwrap();
        assert!(problems.is_empty(), "inconsistent index: {:?}", problems);
    }

    #[test]
    fn test_retag_by_point() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        assert!(index.ensure_tag(5).unwrap());
        assert!(index.ensure_tag(7).unwrap());
        assert!(index
            .add_face(IMG1, bbox(0.0, 0.0, 10.0, 10.0), Some(vec![0.1, 0.2]), Some(5))
            .unwrap());
        assert!(index
            .add_face(IMG1, bbox(50.0, 50.0, 60.0, 60.0), Some(vec![0.3, 0.4]), None)
            .unwrap());

        assert!(index.retag(IMG1, Some(5), Some(7), Some((5.0, 5.0))).unwrap());

        let stored = index.get_photo(IMG1).unwrap().unwrap();
        assert_eq!(stored.faces[0].tag_id, Some(7));
        assert_eq!(stored.faces[1].tag_id, None);
        assert!(!index.get_tag(5).unwrap().unwrap().photos.contains(IMG1));
        assert!(index.get_tag(7).unwrap().unwrap().photos.contains(IMG1));
        assert_consistent(&index);
    }

    #[test]
    fn test_tag_face_touches_one_face() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index.ensure_tag(3).unwrap();
        index.ensure_tag(4).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 100.0, 100.0), Some(vec![0.0]), None)
            .unwrap();
        index
            .add_face(IMG1, bbox(40.0, 40.0, 60.0, 60.0), Some(vec![1.0]), None)
            .unwrap();

        assert!(index.tag_face(IMG1, 1, 3).unwrap());
        let stored = index.get_photo(IMG1).unwrap().unwrap();
        assert_eq!(stored.faces[0].tag_id, None);
        assert_eq!(stored.faces[1].tag_id, Some(3));
        assert!(index.get_tag(3).unwrap().unwrap().photos.contains(IMG1));

        // already tagged, out of range, unknown tag, unknown photo
        assert!(!index.tag_face(IMG1, 1, 4).unwrap());
        assert!(!index.tag_face(IMG1, 2, 4).unwrap());
        assert!(!index.tag_face(IMG1, 0, 99).unwrap());
        assert!(!index.tag_face("/nope.jpg", 0, 4).unwrap());
        assert!(index.get_tag(4).unwrap().unwrap().photos.is_empty());
        assert_consistent(&index);
    }

    #[test]
    fn test_retag_no_match() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index.ensure_tag(5).unwrap();
        index.ensure_tag(7).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 10.0, 10.0), None, Some(5))
            .unwrap();

        // point outside every box
        assert!(!index.retag(IMG1, Some(5), Some(7), Some((30.0, 30.0))).unwrap());
        // nothing holds tag 7
        assert!(!index.retag(IMG1, Some(7), Some(5), None).unwrap());
        // unknown photo
        assert!(!index.retag("/nope.jpg", Some(5), Some(7), None).unwrap());
        // unknown target tag
        assert!(!index.retag(IMG1, Some(5), Some(99), None).unwrap());
        assert_eq!(
            index.get_photo(IMG1).unwrap().unwrap().faces[0].tag_id,
            Some(5)
        );
        assert_consistent(&index);
    }

    #[test]
    fn test_retag_keeps_back_reference_while_other_face_holds_tag() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index.ensure_tag(5).unwrap();
        index.ensure_tag(7).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 10.0, 10.0), None, Some(5))
            .unwrap();
        index
            .add_face(IMG1, bbox(20.0, 20.0, 30.0, 30.0), None, Some(5))
            .unwrap();

        assert!(index.retag(IMG1, Some(5), Some(7), Some((25.0, 25.0))).unwrap());
        assert!(index.get_tag(5).unwrap().unwrap().photos.contains(IMG1));
        assert!(index.get_tag(7).unwrap().unwrap().photos.contains(IMG1));
        assert_consistent(&index);

        // without a point every remaining face with tag 5 moves
        assert!(index.retag(IMG1, Some(5), Some(7), None).unwrap());
        assert!(!index.get_tag(5).unwrap().unwrap().photos.contains(IMG1));
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_tag_untags_all_photos() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(5).unwrap();
        for name in ["/p/1.jpg", "/p/2.jpg", "/p/3.jpg"] {
            index.add_photo(&photo(name)).unwrap();
            index
                .add_face(name, bbox(0.0, 0.0, 5.0, 5.0), Some(vec![1.0]), Some(5))
                .unwrap();
        }
        assert_eq!(index.get_tag(5).unwrap().unwrap().photos.len(), 3);

        assert!(index.remove_tag(5).unwrap());

        for name in ["/p/1.jpg", "/p/2.jpg", "/p/3.jpg"] {
            let stored = index.get_photo(name).unwrap().unwrap();
            assert_eq!(stored.faces.len(), 1);
            assert_eq!(stored.faces[0].tag_id, None);
            assert!(stored.faces[0].embedding.is_some());
        }
        assert!(index.tags().unwrap().iter().all(|t| t.id != 5));
        assert!(!index.remove_tag(5).unwrap());
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_tag_with_two_faces_on_one_photo() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(3).unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 5.0, 5.0), None, Some(3))
            .unwrap();
        index
            .add_face(IMG1, bbox(10.0, 10.0, 15.0, 15.0), None, Some(3))
            .unwrap();

        assert!(index.remove_tag(3).unwrap());
        let stored = index.get_photo(IMG1).unwrap().unwrap();
        assert!(stored.faces.iter().all(|f| f.tag_id.is_none()));
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_face_clears_tag_keeps_face() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(2).unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 5.0, 5.0), Some(vec![0.5]), Some(2))
            .unwrap();

        assert!(index.remove_face(2, IMG1, Some((1.0, 1.0))).unwrap());
        let stored = index.get_photo(IMG1).unwrap().unwrap();
        assert_eq!(stored.faces.len(), 1);
        assert_eq!(stored.faces[0].tag_id, None);
        assert!(stored.faces[0].is_unassigned_with_embedding());
        assert!(index.get_tag(2).unwrap().unwrap().photos.is_empty());
        assert!(!index.remove_face(2, IMG1, None).unwrap());
        assert_consistent(&index);
    }

    #[test]
    fn test_delete_faces_drops_records() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(2).unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 5.0, 5.0), None, Some(2))
            .unwrap();
        index
            .add_face(IMG1, bbox(10.0, 10.0, 15.0, 15.0), None, Some(2))
            .unwrap();

        assert!(index.delete_faces(2, IMG1, Some((12.0, 12.0))).unwrap());
        assert_eq!(index.get_photo(IMG1).unwrap().unwrap().faces.len(), 1);
        assert!(index.get_tag(2).unwrap().unwrap().photos.contains(IMG1));

        assert!(index.delete_faces(2, IMG1, None).unwrap());
        assert!(index.get_photo(IMG1).unwrap().unwrap().faces.is_empty());
        assert!(index.get_tag(2).unwrap().unwrap().photos.is_empty());
        assert_consistent(&index);
    }

    #[test]
    fn test_add_face_failures() {
        let index = PhotoIndex::open_in_memory().unwrap();
        assert!(!index
            .add_face("/missing.jpg", bbox(0.0, 0.0, 1.0, 1.0), None, None)
            .unwrap());

        index.add_photo(&photo(IMG1)).unwrap();
        assert!(!index
            .add_face(IMG1, bbox(0.0, 0.0, 1.0, 1.0), None, Some(42))
            .unwrap());
        assert!(index.get_photo(IMG1).unwrap().unwrap().faces.is_empty());
    }

    #[test]
    fn test_add_photo_replacement_drops_stale_references() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(1).unwrap();
        let mut tagged = photo(IMG1);
        tagged.faces.push(Face {
            bbox: bbox(0.0, 0.0, 1.0, 1.0),
            embedding: None,
            tag_id: Some(1),
        });
        index.add_photo(&tagged).unwrap();
        assert!(index.get_tag(1).unwrap().unwrap().photos.contains(IMG1));

        let mut rescanned = photo(IMG1);
        rescanned.size = 999;
        index.add_photo(&rescanned).unwrap();
        assert!(index.get_tag(1).unwrap().unwrap().photos.is_empty());
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_photo_cleans_back_references() {
        let index = PhotoIndex::open_in_memory().unwrap();
        index.ensure_tag(1).unwrap();
        index.add_photo(&photo(IMG1)).unwrap();
        index
            .add_face(IMG1, bbox(0.0, 0.0, 1.0, 1.0), None, Some(1))
            .unwrap();

        assert!(index.remove_photo(IMG1).unwrap());
        assert!(index.get_photo(IMG1).unwrap().is_none());
        assert!(index.get_tag(1).unwrap().unwrap().photos.is_empty());
        assert!(!index.remove_photo(IMG1).unwrap());
        assert_consistent(&index);
    }

    #[test]
    fn test_merge_tags() {
        let index = PhotoIndex::open_in_memory().unwrap();
        let alice = index.add_new_tag("Alice").unwrap();
        let unnamed = index.add_new_tag("2").unwrap();
        assert_eq!((alice, unnamed), (1, 2));

        index.add_photo(&photo("/p/1.jpg")).unwrap();
        index.add_photo(&photo("/p/2.jpg")).unwrap();
        index
            .add_face("/p/1.jpg", bbox(0.0, 0.0, 1.0, 1.0), None, Some(alice))
            .unwrap();
        index
            .add_face("/p/2.jpg", bbox(0.0, 0.0, 1.0, 1.0), None, Some(unnamed))
            .unwrap();

        assert!(index.merge_tags(alice, unnamed).unwrap());
        let merged = index.get_tag(unnamed).unwrap().unwrap();
        assert_eq!(merged.label, "Alice");
        assert_eq!(merged.photos.len(), 2);
        assert!(index.get_tag(alice).unwrap().is_none());
        assert!(!index.merge_tags(alice, unnamed).unwrap());
        assert_consistent(&index);
    }

    #[test]
    fn test_tags_by_size_and_ids() {
        let index = PhotoIndex::open_in_memory().unwrap();
        assert_eq!(index.add_new_tag("first").unwrap(), 1);
        index.ensure_tag(10).unwrap();
        assert!(!index.ensure_tag(10).unwrap());
        assert_eq!(index.add_new_tag("next").unwrap(), 11);
        assert!(index.rename_tag(10, "Ten").unwrap());
        assert!(!index.rename_tag(12, "nobody").unwrap());

        for name in ["/p/1.jpg", "/p/2.jpg"] {
            index.add_photo(&photo(name)).unwrap();
            index
                .add_face(name, bbox(0.0, 0.0, 1.0, 1.0), None, Some(11))
                .unwrap();
        }
        index
            .add_face("/p/1.jpg", bbox(5.0, 5.0, 6.0, 6.0), None, Some(10))
            .unwrap();

        let order: Vec<i64> = index.tags_by_size().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![11, 10, 1]);
        assert_eq!(index.get_tag(10).unwrap().unwrap().label, "Ten");
    }

    #[test]
    fn test_mixed_mutation_sequence_stays_consistent() {
        let index = PhotoIndex::open_in_memory().unwrap();
        for id in 1..=3 {
            index.ensure_tag(id).unwrap();
        }
        for n in 0..4 {
            let path = format!("/p/{}.jpg", n);
            index.add_photo(&photo(&path)).unwrap();
            index
                .add_face(&path, bbox(0.0, 0.0, 10.0, 10.0), None, Some(1))
                .unwrap();
            index
                .add_face(&path, bbox(20.0, 0.0, 30.0, 10.0), None, Some((n % 3) + 1))
                .unwrap();
        }

        index.retag("/p/0.jpg", Some(1), Some(2), Some((5.0, 5.0))).unwrap();
        index.remove_face(2, "/p/1.jpg", None).unwrap();
        index.retag("/p/2.jpg", Some(3), Some(1), None).unwrap();
        index.untag(1, "/p/3.jpg", Some((25.0, 5.0))).unwrap();
        assert_consistent(&index);

        index.remove_tag(1).unwrap();
        assert_consistent(&index);
        index.merge_tags(3, 2).unwrap();
        assert_consistent(&index);
    }

    #[test]
    fn test_filepaths_skip_reserved_keys() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        {
            let index = PhotoIndex::open(&db_path).unwrap();
            index.ensure_tag(1).unwrap();
            index.add_photo(&photo(IMG1)).unwrap();
            assert!(index
                .add_metadata(IMG1, "format", serde_json::json!("Jpeg"))
                .unwrap());
        }
        let index = PhotoIndex::open(&db_path).unwrap();
        assert_eq!(index.filepaths().unwrap(), vec![IMG1.to_string()]);
        assert_eq!(index.photos().unwrap().len(), 1);
        assert_eq!(
            index.get_photo(IMG1).unwrap().unwrap().metadata["format"],
            serde_json::json!("Jpeg")
        );
        assert!(index.get_photo(".tags").unwrap().is_none());
    }
}
