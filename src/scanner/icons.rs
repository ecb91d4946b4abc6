use super::{FileEntry, Folder};

/// Shipped with the site resources.
pub const DEFAULT_ICON: &str = "res/album.svg";

/// Pick a folder's representative icon, as a path relative to the site root.
///
/// An explicit `folderIcon` wins: a `.jpg` name points at that thumbnail, a
/// subfolder name borrows the subfolder's own icon. Otherwise the first file,
/// then the first subfolder, then the default.
pub fn select_icon(
    relpath: &str,
    folder_icon: Option<&str>,
    files: &[FileEntry],
    subfolders: &[Folder],
) -> String {
    if let Some(configured) = folder_icon {
        if configured.to_lowercase().ends_with(".jpg") {
            return format!("{}thumb/{}", relpath, configured);
        }
        if let Some(sub) = subfolders.iter().find(|s| s.name == configured) {
            return sub.icon.clone();
        }
    }
    if let Some(first) = files.first() {
        return format!("{}thumb/{}", relpath, first.thumb_name);
    }
    if let Some(first) = subfolders.first() {
        return first.icon.clone();
    }
    DEFAULT_ICON.to_string()
}
