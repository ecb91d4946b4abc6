use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::site::{FaceImage, FacesIndexEntry, FacesPage, SiteRenderer};
use crate::db::PhotoIndex;
use crate::scanner::{output_names, MediaKind};

pub const FACES_DIR: &str = "faces";

/// Links from the faces directory to a photo's page and thumbnail.
fn photo_links(source: &Path, path: &str) -> Option<FaceImage> {
    let rel = Path::new(path).strip_prefix(source).ok()?;
    let name = rel.file_name()?.to_string_lossy().to_string();
    let folder = rel
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
        .map(|p| format!("{}/", p))
        .unwrap_or_default();
    let (output, thumb) = output_names(MediaKind::Image, &name);
    Some(FaceImage {
        page: format!("../{}{}.html", folder, output),
        thumbnail: format!("../{}thumb/{}", folder, thumb),
    })
}

/// Rewrite `faces/`: one page per tag, largest first, an index page, and
/// `names.js`. The previous `names.js` is kept with a timestamp suffix.
/// Returns the number of tag pages written.
pub fn write_faces_section(
    index: &PhotoIndex,
    source: &Path,
    dest: &Path,
    renderer: &dyn SiteRenderer,
) -> Result<usize> {
    let faces_dir = dest.join(FACES_DIR);
    fs::create_dir_all(&faces_dir)?;

    // Tag ids are not stable across clustering runs
    for entry in fs::read_dir(&faces_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "html") {
            fs::remove_file(&path)?;
        }
    }

    let tags: Vec<_> = index
        .tags_by_size()?
        .into_iter()
        .filter(|t| !t.photos.is_empty())
        .collect();

    let mut entries = Vec::new();
    for (i, tag) in tags.iter().enumerate() {
        let prev = i.checked_sub(1).and_then(|p| tags.get(p)).map(|t| t.id);
        let next = tags.get(i + 1).map(|t| t.id);

        let mut images = Vec::new();
        let mut representative: Option<(usize, FaceImage)> = None;
        for path in &tag.photos {
            let Some(links) = photo_links(source, path) else {
                debug!("Tagged photo {} is outside the source tree", path);
                continue;
            };
            let face_count = index.get_photo(path)?.map_or(usize::MAX, |p| p.faces.len());
            if representative.as_ref().map_or(true, |(fewest, _)| face_count < *fewest) {
                representative = Some((face_count, links.clone()));
            }
            images.push(links);
        }

        let page = FacesPage {
            tag_id: tag.id,
            label: tag.label.clone(),
            prev,
            next,
            images,
        };
        fs::write(
            faces_dir.join(format!("{}.html", tag.id)),
            renderer.faces_page(&page),
        )?;

        if let Some((_, links)) = representative {
            entries.push(FacesIndexEntry {
                tag_id: tag.id,
                label: tag.label.clone(),
                page: format!("{}.html", tag.id),
                thumbnail: links.thumbnail,
                photos: tag.photos.len(),
            });
        }
    }

    fs::write(faces_dir.join("index.html"), renderer.faces_index(&entries))?;
    write_names(index, &faces_dir)?;

    info!("Wrote {} face pages", tags.len());
    Ok(tags.len())
}

fn write_names(index: &PhotoIndex, faces_dir: &Path) -> Result<()> {
    let names_path = faces_dir.join("names.js");
    if names_path.exists() {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        fs::rename(&names_path, faces_dir.join(format!("names-{}.js", stamp)))?;
    }

    let names: BTreeMap<i64, String> = index
        .tags()?
        .into_iter()
        .map(|t| (t.id, t.label))
        .collect();
    let json = serde_json::to_string_pretty(&names)?;
    fs::write(&names_path, format!("var names = {};\n", json))?;
    Ok(())
}
