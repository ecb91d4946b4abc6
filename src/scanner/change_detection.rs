//! Staleness detection.
//!
//! A file is stale when its stored record no longer matches the file's
//! (mtime, size), or when any output artifact it should have produced is
//! missing. The two are checked independently so that an interrupted run is
//! picked up again even though its records were already written.

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::MediaKind;
use crate::db::Photo;

pub const MTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn format_mtime(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format(MTIME_FORMAT).to_string()
}

/// The part of a file's state that decides whether its record is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime: String,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(format_mtime)
            .unwrap_or_default();
        Self {
            mtime,
            size: metadata.len(),
        }
    }

    pub fn matches(&self, record: &Photo) -> bool {
        record.mtime == self.mtime && record.size == self.size
    }
}

/// Output names for a source file: (output name, thumbnail name).
pub fn output_names(kind: MediaKind, name: &str) -> (String, String) {
    match kind {
        MediaKind::Image => {
            let lower = name.to_lowercase();
            let thumb = if [".tif", ".tiff", ".svg", ".bmp"]
                .iter()
                .any(|ext| lower.ends_with(ext))
            {
                format!("{}.jpg", name)
            } else {
                name.to_string()
            };
            (name.to_string(), thumb)
        }
        MediaKind::Video => {
            let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
            let output = format!("{}.webm", stem);
            let thumb = format!("{}.jpg", output);
            (output, thumb)
        }
        MediaKind::Note => (name.to_string(), format!("{}.png", name)),
    }
}

/// Everything a file entry is expected to leave in its destination folder.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub thumbnail: PathBuf,
    /// Display copy, transcode, or preview plus document copy.
    pub media: Vec<PathBuf>,
    pub page: PathBuf,
}

impl Artifacts {
    pub fn new(dest_folder: &Path, kind: MediaKind, output_name: &str, thumb_name: &str) -> Self {
        let media = match kind {
            MediaKind::Image | MediaKind::Video => vec![dest_folder.join(output_name)],
            MediaKind::Note => vec![dest_folder.join(thumb_name), dest_folder.join(output_name)],
        };
        Self {
            thumbnail: dest_folder.join("thumb").join(thumb_name),
            media,
            page: dest_folder.join(format!("{}.html", output_name)),
        }
    }

    pub fn media_missing(&self) -> bool {
        !self.thumbnail.exists() || self.media.iter().any(|p| !p.exists())
    }
}

/// Decision for one file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub changed: bool,
    /// Media artifacts are fine; only the page needs rendering.
    pub html_only: bool,
}

pub fn assess(record_current: bool, artifacts: &Artifacts, force_html: bool) -> Staleness {
    let mut changed = !record_current || artifacts.media_missing();
    let mut html_only = false;
    if force_html || !artifacts.page.exists() {
        html_only = !changed;
        changed = true;
    }
    Staleness { changed, html_only }
}

pub fn folder_page(dest_folder: &Path) -> PathBuf {
    dest_folder.join("index.html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn touch_all(artifacts: &Artifacts) {
        for path in std::iter::once(&artifacts.thumbnail)
            .chain(artifacts.media.iter())
            .chain(std::iter::once(&artifacts.page))
        {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            File::create(path).unwrap();
        }
    }

    #[test]
    fn test_output_names() {
        assert_eq!(
            output_names(MediaKind::Image, "a.jpg"),
            ("a.jpg".to_string(), "a.jpg".to_string())
        );
        assert_eq!(
            output_names(MediaKind::Image, "scan.TIFF"),
            ("scan.TIFF".to_string(), "scan.TIFF.jpg".to_string())
        );
        assert_eq!(
            output_names(MediaKind::Video, "clip.final.mov"),
            ("clip.final.webm".to_string(), "clip.final.webm.jpg".to_string())
        );
        assert_eq!(
            output_names(MediaKind::Note, "notes.pdf"),
            ("notes.pdf".to_string(), "notes.pdf.png".to_string())
        );
    }

    #[test]
    fn test_assess_all_present() {
        let dir = tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path(), MediaKind::Image, "a.jpg", "a.jpg");
        touch_all(&artifacts);

        assert_eq!(
            assess(true, &artifacts, false),
            Staleness { changed: false, html_only: false }
        );
        assert_eq!(
            assess(false, &artifacts, false),
            Staleness { changed: true, html_only: false }
        );
        assert_eq!(
            assess(true, &artifacts, true),
            Staleness { changed: true, html_only: true }
        );
    }

    #[test]
    fn test_assess_missing_artifacts() {
        let dir = tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path(), MediaKind::Note, "n.pdf", "n.pdf.png");
        touch_all(&artifacts);

        fs::remove_file(&artifacts.page).unwrap();
        assert_eq!(
            assess(true, &artifacts, false),
            Staleness { changed: true, html_only: true }
        );

        fs::remove_file(&artifacts.media[0]).unwrap();
        assert_eq!(
            assess(true, &artifacts, false),
            Staleness { changed: true, html_only: false }
        );
    }

    #[test]
    fn test_stamp_matches_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"abc").unwrap();
        let stamp = FileStamp::from_metadata(&fs::metadata(&path).unwrap());
        assert_eq!(stamp.size, 3);
        assert!(stamp.mtime.ends_with(" UTC"));

        let mut record = Photo {
            path: path.to_string_lossy().to_string(),
            mtime: stamp.mtime.clone(),
            size: 3,
            sort_key: stamp.mtime.clone(),
            metadata: Default::default(),
            relpath: String::new(),
            date: String::new(),
            scale: None,
            faces: Vec::new(),
        };
        assert!(stamp.matches(&record));
        record.size = 4;
        assert!(!stamp.matches(&record));
    }
}
