//! Catalog walker.
//!
//! Scanning runs in two passes. The first reads the source tree and every
//! per-folder control file without touching the index, so a malformed
//! manifest aborts the run before anything is written. The second refreshes
//! stale photo records and decides, bottom-up, which nodes changed.

pub mod change_detection;
pub mod discovery;
pub mod icons;
pub mod manifest;
pub mod metadata;

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::db::{Face, Photo, PhotoIndex};
use crate::faces::Embedder;
use change_detection::{Artifacts, FileStamp};
use discovery::EntryKind;

pub use change_detection::{format_mtime, output_names};
pub use icons::DEFAULT_ICON;
pub use metadata::{ExifExtractor, MediaMetadata, MetadataExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Note,
}

impl MediaKind {
    fn from_entry(kind: EntryKind) -> Option<Self> {
        match kind {
            EntryKind::Image => Some(Self::Image),
            EntryKind::Video => Some(Self::Video),
            EntryKind::Note => Some(Self::Note),
            EntryKind::Folder | EntryKind::Ignored => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Destination folder this entry renders into.
    pub dest_dir: PathBuf,
    /// Folder path relative to the roots, with a trailing slash.
    pub relpath: String,
    pub kind: MediaKind,
    pub name: String,
    pub output_name: String,
    pub thumb_name: String,
    pub comment: Option<String>,
    pub stamp: Option<FileStamp>,
    pub sort_key: String,
    pub date: String,
    pub changed: bool,
    pub html_only: bool,
}

impl FileEntry {
    pub fn new(path: PathBuf, dest_dir: PathBuf, relpath: String, kind: MediaKind, name: String) -> Self {
        let (output_name, thumb_name) = output_names(kind, &name);
        Self {
            path,
            dest_dir,
            relpath,
            kind,
            name,
            output_name,
            thumb_name,
            comment: None,
            stamp: None,
            sort_key: String::new(),
            date: String::new(),
            changed: false,
            html_only: false,
        }
    }

    pub fn key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn artifacts(&self) -> Artifacts {
        Artifacts::new(&self.dest_dir, self.kind, &self.output_name, &self.thumb_name)
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub path: PathBuf,
    pub dest_dir: PathBuf,
    pub relpath: String,
    pub name: String,
    pub comment: Option<String>,
    pub files: Vec<FileEntry>,
    pub subfolders: Vec<Folder>,
    /// Site-root-relative path of the representative thumbnail.
    pub icon: String,
    pub changed: bool,
    folder_icon: Option<String>,
}

impl Folder {
    pub fn new(path: PathBuf, dest_dir: PathBuf, relpath: String, name: String) -> Self {
        Self {
            path,
            dest_dir,
            relpath,
            name,
            comment: None,
            files: Vec::new(),
            subfolders: Vec::new(),
            icon: DEFAULT_ICON.to_string(),
            changed: false,
            folder_icon: None,
        }
    }

    /// Number of path segments below the site root.
    pub fn depth(&self) -> usize {
        self.relpath.matches('/').count()
    }

    /// Every file in this folder and below, depth-first.
    pub fn all_files(&self) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self.files.iter().collect();
        for sub in &self.subfolders {
            files.extend(sub.all_files());
        }
        files
    }
}

/// Per-kind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub folders: usize,
    pub images: usize,
    pub videos: usize,
    pub notes: usize,
}

impl KindCounts {
    pub fn add_file(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Image => self.images += 1,
            MediaKind::Video => self.videos += 1,
            MediaKind::Note => self.notes += 1,
        }
    }

    pub fn merge(&mut self, other: KindCounts) {
        self.folders += other.folders;
        self.images += other.images;
        self.videos += other.videos;
        self.notes += other.notes;
    }

    pub fn total(&self) -> usize {
        self.folders + self.images + self.videos + self.notes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total: KindCounts,
    pub changed: KindCounts,
    /// Ignored, excluded or unreadable entries.
    pub skipped: usize,
}

impl ScanStats {
    fn merge(&mut self, other: ScanStats) {
        self.total.merge(other.total);
        self.changed.merge(other.changed);
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub skip_videos: bool,
    pub skip_docs: bool,
    /// Re-render every page without redoing media.
    pub html_only: bool,
    pub display_size: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_videos: false,
            skip_docs: false,
            html_only: false,
            display_size: 800,
        }
    }
}

pub struct ScanResult {
    pub root: Folder,
    pub stats: ScanStats,
}

/// Node handed to a scan observer once its staleness is settled.
pub enum Visit<'a> {
    File(&'a FileEntry),
    Folder(&'a Folder),
}

pub struct Walker<'a> {
    source: &'a Path,
    dest: &'a Path,
    options: ScanOptions,
    index: &'a PhotoIndex,
    extractor: &'a dyn MetadataExtractor,
    embedder: &'a dyn Embedder,
}

impl<'a> Walker<'a> {
    pub fn new(
        source: &'a Path,
        dest: &'a Path,
        options: ScanOptions,
        index: &'a PhotoIndex,
        extractor: &'a dyn MetadataExtractor,
        embedder: &'a dyn Embedder,
    ) -> Self {
        Self {
            source,
            dest,
            options,
            index,
            extractor,
            embedder,
        }
    }

    pub fn scan(&self) -> Result<ScanResult> {
        self.scan_with(&mut |_| {})
    }

    pub fn scan_with(&self, observer: &mut dyn FnMut(Visit<'_>)) -> Result<ScanResult> {
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut root = Folder::new(
            self.source.to_path_buf(),
            self.dest.to_path_buf(),
            String::new(),
            name,
        );
        let mut stats = ScanStats::default();

        stats.skipped += self.plan_folder(&mut root)?;
        stats.merge(self.refresh_folder(&mut root, observer)?);

        Ok(ScanResult { root, stats })
    }

    /// Fill `folder` from the source tree. Returns the number of skipped
    /// entries.
    fn plan_folder(&self, folder: &mut Folder) -> Result<usize> {
        let entries = discovery::list_entries(&folder.path)?;
        let excluded = manifest::read_exclusions(&folder.path)?;
        let mut comments = manifest::read_comments(&folder.path)?;
        folder.folder_icon = manifest::read_folder_icon(&folder.path)?;

        let mut skipped = 0;
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            if manifest::is_control_file(&name) {
                continue;
            }
            if excluded.contains(&name) {
                debug!("Excluded by manifest: {:?}", entry.path());
                skipped += 1;
                continue;
            }

            let kind = match discovery::classify(&entry) {
                EntryKind::Video if self.options.skip_videos => EntryKind::Ignored,
                EntryKind::Note if self.options.skip_docs => EntryKind::Ignored,
                kind => kind,
            };

            if kind == EntryKind::Folder {
                let mut sub = Folder::new(
                    entry.path().to_path_buf(),
                    folder.dest_dir.join(&name),
                    format!("{}{}/", folder.relpath, name),
                    name.clone(),
                );
                sub.comment = comments.remove(&name);
                match self.plan_folder(&mut sub) {
                    Ok(n) => {
                        skipped += n;
                        folder.subfolders.push(sub);
                    }
                    Err(e) => match e.downcast_ref::<crate::error::BuildError>() {
                        Some(_) => return Err(e),
                        None => {
                            warn!("Skipping unreadable folder {:?}: {}", entry.path(), e);
                            skipped += 1;
                        }
                    },
                }
                continue;
            }

            let Some(kind) = MediaKind::from_entry(kind) else {
                skipped += 1;
                continue;
            };

            let mut file = FileEntry::new(
                entry.path().to_path_buf(),
                folder.dest_dir.clone(),
                folder.relpath.clone(),
                kind,
                name.clone(),
            );
            match entry.metadata() {
                Ok(metadata) => file.stamp = Some(FileStamp::from_metadata(&metadata)),
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", entry.path(), e);
                    skipped += 1;
                    continue;
                }
            }
            file.comment = comments.remove(&name);
            folder.files.push(file);
        }

        Ok(skipped)
    }

    /// Settle staleness bottom-up and rewrite stale records.
    fn refresh_folder(&self, folder: &mut Folder, observer: &mut dyn FnMut(Visit<'_>)) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut any_changed = false;

        for sub in folder.subfolders.iter_mut() {
            stats.merge(self.refresh_folder(sub, observer)?);
            any_changed |= sub.changed;
        }

        for file in folder.files.iter_mut() {
            self.refresh_file(file)?;
            stats.total.add_file(file.kind);
            if file.changed {
                stats.changed.add_file(file.kind);
                any_changed = true;
            }
            observer(Visit::File(file));
        }

        let page_missing = !change_detection::folder_page(&folder.dest_dir).exists();
        folder.changed = any_changed || page_missing || self.options.html_only;
        folder.icon = icons::select_icon(
            &folder.relpath,
            folder.folder_icon.as_deref(),
            &folder.files,
            &folder.subfolders,
        );

        stats.total.folders += 1;
        if folder.changed {
            stats.changed.folders += 1;
        }
        observer(Visit::Folder(folder));
        Ok(stats)
    }

    fn refresh_file(&self, file: &mut FileEntry) -> Result<()> {
        let key = file.key();
        let Some(stamp) = file.stamp.clone() else {
            return Ok(());
        };

        let record = self.index.get_photo(&key)?;
        let current = record.as_ref().is_some_and(|r| stamp.matches(r));
        let staleness = change_detection::assess(current, &file.artifacts(), self.options.html_only);

        let photo = match record {
            Some(record) if current => record,
            _ => {
                let photo = self.build_record(file, &stamp);
                self.index.add_photo(&photo)?;
                photo
            }
        };

        file.sort_key = photo.sort_key;
        file.date = photo.date;
        file.changed = staleness.changed;
        file.html_only = staleness.html_only;
        Ok(())
    }

    /// Fresh record for a new or modified file. Extraction failures leave an
    /// empty-metadata record.
    fn build_record(&self, file: &FileEntry, stamp: &FileStamp) -> Photo {
        let mut photo = Photo {
            path: file.key(),
            mtime: stamp.mtime.clone(),
            size: stamp.size,
            sort_key: stamp.mtime.clone(),
            metadata: BTreeMap::new(),
            relpath: file.relpath.clone(),
            date: String::new(),
            scale: None,
            faces: Vec::new(),
        };

        match self.extractor.extract(&file.path, file.kind) {
            Ok(metadata) => {
                if let Some(captured) = metadata.captured_at {
                    photo.sort_key = captured.format("%Y-%m-%d %H:%M:%S").to_string();
                }
                if let (Some(width), Some(height)) = (metadata.width, metadata.height) {
                    if width > 0 && height > 0 {
                        let display = self.options.display_size as f32;
                        photo.scale = Some((display / width as f32).min(display / height as f32));
                    }
                }
                photo.metadata = metadata.fields;
            }
            Err(e) => warn!("Failed to read metadata for {:?}: {}", file.path, e),
        }
        photo.date = photo.sort_key.get(..10).unwrap_or_default().to_string();

        if file.kind == MediaKind::Image {
            match self.embedder.embed(&file.path) {
                Ok(detected) => {
                    photo.faces = detected
                        .into_iter()
                        .map(|d| Face {
                            bbox: d.bbox,
                            embedding: Some(d.embedding),
                            tag_id: None,
                        })
                        .collect();
                }
                Err(e) => warn!("Face detection failed for {:?}: {}", file.path, e),
            }
        }

        photo
    }
}

/// Create the directories a source folder needs in the destination tree.
pub fn prepare_dest(folder: &Folder) -> Result<()> {
    fs::create_dir_all(folder.dest_dir.join("thumb"))?;
    Ok(())
}
