use anyhow::Result;
use std::path::Path;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// What a directory entry becomes in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    Image,
    Video,
    Note,
    Ignored,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "gif", "png", "tif", "tiff", "svg", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mov", "avi", "flv", "mp4", "mpeg", "mpg", "webm", "ogg"];
const NOTE_EXTENSIONS: &[&str] = &["txt", "doc", "docx", "pdf", "odt"];

/// Classify a file by extension, ignoring case.
pub fn classify_file(name: &str) -> EntryKind {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return EntryKind::Ignored;
    };
    let ext = ext.to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        EntryKind::Image
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        EntryKind::Video
    } else if NOTE_EXTENSIONS.contains(&ext.as_str()) {
        EntryKind::Note
    } else {
        EntryKind::Ignored
    }
}

pub fn classify(entry: &DirEntry) -> EntryKind {
    if entry.file_type().is_dir() {
        return EntryKind::Folder;
    }
    if !entry.path().is_file() {
        return EntryKind::Ignored;
    }
    classify_file(&entry.file_name().to_string_lossy())
}

/// Immediate children of `directory`, sorted by file name. Hidden entries
/// are dropped here. An unreadable `directory` is an error; unreadable
/// children are logged and skipped.
pub fn list_entries(directory: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                entries.push(entry);
            }
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => warn!("Skipping unreadable entry in {:?}: {}", directory, e),
        }
    }

    Ok(entries)
}
