//! Per-folder control files.
//!
//! - `albumfiles.txt` lists `-<filename>` entries to leave out of the album.
//! - `comments.properties` maps names to captions; a trailing backslash
//!   continues the caption on the next line.
//! - `meta.properties` may carry `folderIcon=<file.jpg or subfolder>`.
//!
//! A file that exists but cannot be read or parsed is a configuration error.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

pub const EXCLUSION_MANIFEST: &str = "albumfiles.txt";
pub const COMMENTS_FILE: &str = "comments.properties";
pub const META_FILE: &str = "meta.properties";

/// Control files are never catalogued themselves.
pub fn is_control_file(name: &str) -> bool {
    matches!(name, EXCLUSION_MANIFEST | COMMENTS_FILE | META_FILE)
}

/// Contents of a control file, `None` when absent. A file that cannot be
/// read is reported through `invalid` at line 0.
fn read_optional(
    path: &Path,
    invalid: fn(&Path, usize) -> BuildError,
) -> Result<Option<String>, BuildError> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|_| invalid(path, 0))
}

fn malformed_manifest(path: &Path, line: usize) -> BuildError {
    BuildError::MalformedManifest {
        path: PathBuf::from(path),
        line,
    }
}

pub fn read_exclusions(folder: &Path) -> Result<HashSet<String>, BuildError> {
    let path = folder.join(EXCLUSION_MANIFEST);
    let Some(content) = read_optional(&path, malformed_manifest)? else {
        return Ok(HashSet::new());
    };
    parse_exclusions(&content, &path)
}

fn parse_exclusions(content: &str, path: &Path) -> Result<HashSet<String>, BuildError> {
    let mut excluded = HashSet::new();
    for (number, line) in content.lines().enumerate() {
        let Some(rest) = line.strip_prefix('-') else {
            continue;
        };
        let name = rest.split('\t').next().unwrap_or_default().trim_end();
        if name.is_empty() {
            return Err(malformed_manifest(path, number + 1));
        }
        excluded.insert(name.to_string());
    }
    Ok(excluded)
}

pub fn read_comments(folder: &Path) -> Result<HashMap<String, String>, BuildError> {
    let path = folder.join(COMMENTS_FILE);
    let Some(content) = read_optional(&path, malformed_properties)? else {
        return Ok(HashMap::new());
    };
    parse_comments(&content, &path)
}

fn malformed_properties(path: &Path, line: usize) -> BuildError {
    BuildError::MalformedProperties {
        path: PathBuf::from(path),
        line,
    }
}

fn parse_comments(content: &str, path: &Path) -> Result<HashMap<String, String>, BuildError> {
    let mut comments: HashMap<String, String> = HashMap::new();
    let mut continuing: Option<String> = None;

    for (number, raw) in content.lines().enumerate() {
        let line = raw.trim();
        let (text, continues) = match line.strip_suffix('\\') {
            Some(head) => (format!("{}\n", head), true),
            None => (line.to_string(), false),
        };

        if let Some(key) = continuing.take() {
            if let Some(comment) = comments.get_mut(&key) {
                comment.push_str(&text);
            }
            if continues {
                continuing = Some(key);
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, comment)) = text.split_once('=') else {
            return Err(malformed_properties(path, number + 1));
        };
        comments.insert(key.to_string(), comment.to_string());
        if continues {
            continuing = Some(key.to_string());
        }
    }

    Ok(comments)
}

pub fn read_folder_icon(folder: &Path) -> Result<Option<String>, BuildError> {
    let path = folder.join(META_FILE);
    let Some(content) = read_optional(&path, malformed_properties)? else {
        return Ok(None);
    };

    let mut icon = None;
    for (number, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(malformed_properties(&path, number + 1));
        };
        if key.trim() == "folderIcon" && !value.trim().is_empty() {
            icon = Some(value.trim().to_string());
        }
    }
    Ok(icon)
}
