//! The two walks of the generate stage: dispatching media jobs, then writing
//! pages once the pool barrier has passed.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::media::{jobs_for, read_exif_rotation, MediaSettings};
use super::site::{
    Breadcrumb, FaceBox, FileLink, FilePage, FolderLink, FolderPage, ShuffleEntry, SiteRenderer,
};
use crate::db::PhotoIndex;
use crate::scanner::{prepare_dest, FileEntry, Folder, KindCounts, MediaKind};
use crate::tasks::TaskPool;

/// Previous and next items of `items[i]`.
pub fn neighbors<T>(items: &[T], i: usize) -> (Option<&T>, Option<&T>) {
    let prev = i.checked_sub(1).and_then(|p| items.get(p));
    let next = items.get(i + 1);
    (prev, next)
}

/// Files in display order: by sort key, then name.
pub fn sorted_files(folder: &Folder) -> Vec<&FileEntry> {
    let mut files: Vec<&FileEntry> = folder.files.iter().collect();
    files.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.name.cmp(&b.name)));
    files
}

pub fn sorted_subfolders(folder: &Folder) -> Vec<&Folder> {
    let mut subfolders: Vec<&Folder> = folder.subfolders.iter().collect();
    subfolders.sort_by(|a, b| a.name.cmp(&b.name));
    subfolders
}

/// Relative path from a folder page back to the site root.
pub fn root_prefix(folder: &Folder) -> String {
    "../".repeat(folder.depth())
}

/// Home plus one link per ancestor; the current folder is not a link.
pub fn breadcrumbs(relpath: &str) -> Vec<Breadcrumb> {
    let parts: Vec<&str> = relpath.split('/').filter(|p| !p.is_empty()).collect();
    let mut crumbs = vec![Breadcrumb {
        label: "Home".to_string(),
        link: Some(format!("{}index.html", "../".repeat(parts.len()))),
    }];
    for (i, part) in parts.iter().enumerate() {
        crumbs.push(Breadcrumb {
            label: part.to_string(),
            link: Some(format!("{}index.html", "../".repeat(parts.len() - (i + 1)))),
        });
    }
    if let Some(last) = crumbs.last_mut() {
        last.link = None;
    }
    crumbs
}

/// Submit media jobs for every changed file, thumbnails before conversions.
/// A folder whose destination cannot be prepared is logged, counted in
/// `failed` and skipped; its subfolders are still visited. Returns the number
/// of jobs submitted.
pub fn dispatch_jobs(
    folder: &Folder,
    pool: &mut TaskPool,
    settings: &MediaSettings,
    failed: &mut usize,
) -> Result<usize> {
    if !folder.changed {
        return Ok(0);
    }

    let mut submitted = 0;
    match prepare_dest(folder) {
        Ok(()) => {
            for file in folder.files.iter().filter(|f| f.changed) {
                for (label, job) in jobs_for(file, settings) {
                    pool.submit(label, job)?;
                    submitted += 1;
                }
            }
        }
        Err(e) => {
            warn!("Cannot prepare {:?}: {}", folder.dest_dir, e);
            *failed += 1;
        }
    }
    for sub in &folder.subfolders {
        submitted += dispatch_jobs(sub, pool, settings, failed)?;
    }
    Ok(submitted)
}

/// Copy the renderer's static resources into `<dest>/res`.
pub fn install_resources(dest: &Path, renderer: &dyn SiteRenderer) -> Result<()> {
    let res = dest.join("res");
    fs::create_dir_all(&res)?;
    for (name, content) in renderer.resources() {
        let path = res.join(name);
        let current = fs::read(&path).map(|existing| existing == content).unwrap_or(false);
        if !current {
            fs::write(&path, content)?;
        }
    }
    Ok(())
}

/// Pages written and pages that could not be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTally {
    pub generated: KindCounts,
    pub failed: usize,
}

/// Rotation and original size that turn a photo's face boxes into the
/// coordinates of its upright display copy. `None` when no turn is needed.
fn upright_transform(file: &FileEntry, metadata: &BTreeMap<String, Value>) -> Option<(u32, f32, f32)> {
    if file.kind != MediaKind::Image {
        return None;
    }
    let degrees = read_exif_rotation(&file.path);
    if degrees == 0 {
        return None;
    }
    let width = metadata.get("width")?.as_f64()? as f32;
    let height = metadata.get("height")?.as_f64()? as f32;
    Some((degrees, width, height))
}

pub struct PageWriter<'a> {
    pub index: &'a PhotoIndex,
    pub renderer: &'a dyn SiteRenderer,
}

impl<'a> PageWriter<'a> {
    /// Write pages for every changed node under `folder`. A page that cannot
    /// be written is logged and counted as failed; the walk carries on with
    /// the rest of the tree.
    pub fn render_folder(&self, folder: &Folder, tally: &mut PageTally) {
        if !folder.changed {
            return;
        }

        let files = sorted_files(folder);
        let subfolders = sorted_subfolders(folder);
        let root = root_prefix(folder);

        match self.write_folder_pages(folder, &files, &subfolders, &root) {
            Ok(()) => tally.generated.folders += 1,
            Err(e) => {
                warn!("Failed to render folder {:?}: {}", folder.dest_dir, e);
                tally.failed += 1;
            }
        }

        for (i, file) in files.iter().enumerate() {
            if !file.changed {
                continue;
            }
            let (prev, next) = neighbors(&files, i);
            match self.render_file(file, &root, prev.copied(), next.copied()) {
                Ok(()) => tally.generated.add_file(file.kind),
                Err(e) => {
                    warn!("Failed to render page for {:?}: {}", file.path, e);
                    tally.failed += 1;
                }
            }
        }

        for sub in subfolders {
            self.render_folder(sub, tally);
        }
    }

    /// The folder's `index.html` and `shuffle.html`.
    fn write_folder_pages(
        &self,
        folder: &Folder,
        files: &[&FileEntry],
        subfolders: &[&Folder],
        root: &str,
    ) -> Result<()> {
        prepare_dest(folder)?;
        let page = FolderPage {
            title: if folder.relpath.is_empty() {
                folder.name.clone()
            } else {
                folder.relpath.clone()
            },
            root: root.to_string(),
            breadcrumbs: breadcrumbs(&folder.relpath),
            comment: folder.comment.clone(),
            subfolders: subfolders
                .iter()
                .map(|sub| FolderLink {
                    name: sub.name.clone(),
                    page: format!("{}/index.html", sub.name),
                    icon: sub.icon.clone(),
                    comment: sub.comment.clone(),
                })
                .collect(),
            files: files
                .iter()
                .map(|file| FileLink {
                    name: file.name.clone(),
                    page: format!("{}.html", file.output_name),
                    thumbnail: format!("thumb/{}", file.thumb_name),
                    comment: file.comment.clone(),
                })
                .collect(),
        };
        fs::write(folder.dest_dir.join("index.html"), self.renderer.folder_page(&page))?;
        self.write_shuffle(folder, root)
    }

    fn render_file(
        &self,
        file: &FileEntry,
        root: &str,
        prev: Option<&FileEntry>,
        next: Option<&FileEntry>,
    ) -> Result<()> {
        let record = self.index.get_photo(&file.key())?;
        let mut faces = Vec::new();
        let mut metadata = Default::default();

        if let Some(photo) = record {
            let scale = photo.scale.unwrap_or(1.0);
            let upright = upright_transform(file, &photo.metadata);
            for face in &photo.faces {
                let Some(tag_id) = face.tag_id else {
                    continue;
                };
                let label = self
                    .index
                    .get_tag(tag_id)?
                    .map_or_else(|| tag_id.to_string(), |t| t.label);
                faces.push(FaceBox {
                    tag_id,
                    label,
                    bbox: match upright {
                        Some((degrees, width, height)) => {
                            face.bbox.rotated(degrees, width, height).scaled(scale)
                        }
                        None => face.bbox.scaled(scale),
                    },
                });
            }
            metadata = photo.metadata;
        }

        let (media, download) = match file.kind {
            MediaKind::Note => (file.thumb_name.clone(), Some(file.output_name.clone())),
            MediaKind::Image | MediaKind::Video => (file.output_name.clone(), None),
        };

        let page = FilePage {
            name: file.name.clone(),
            kind: file.kind,
            media,
            download,
            root: root.to_string(),
            prev: prev.map(|p| format!("{}.html", p.output_name)),
            next: next.map(|n| format!("{}.html", n.output_name)),
            comment: file.comment.clone(),
            metadata,
            faces,
        };
        let html = self.renderer.file_page(&page);
        fs::write(file.artifacts().page, html)?;
        debug!("Rendered {:?}", file.path);
        Ok(())
    }

    /// Every image at or below `folder`, paths relative to it.
    fn write_shuffle(&self, folder: &Folder, root: &str) -> Result<()> {
        let images: Vec<ShuffleEntry> = folder
            .all_files()
            .into_iter()
            .filter(|f| f.kind == MediaKind::Image)
            .map(|f| {
                let below = f.relpath.get(folder.relpath.len()..).unwrap_or_default();
                ShuffleEntry {
                    path: format!("{}{}", below, f.output_name),
                    folder: below.trim_end_matches('/').to_string(),
                    date: f.date.clone(),
                }
            })
            .collect();
        fs::write(
            folder.dest_dir.join("shuffle.html"),
            self.renderer.shuffle_page(root, &images),
        )?;
        Ok(())
    }
}
