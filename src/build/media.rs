//! Background jobs that produce a file entry's media artifacts.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::config::MediaConfig;
use crate::scanner::{FileEntry, MediaKind};
use crate::tasks::Job;

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub thumbnail_size: u32,
    pub display_size: u32,
    pub ffmpeg: String,
    pub unoconv: String,
    pub convert: String,
}

impl From<&MediaConfig> for MediaSettings {
    fn from(config: &MediaConfig) -> Self {
        Self {
            thumbnail_size: config.thumbnail_size,
            display_size: config.display_size,
            ffmpeg: config.ffmpeg.clone(),
            unoconv: config.unoconv.clone(),
            convert: config.convert.clone(),
        }
    }
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

/// Convert EXIF orientation value (1-8) to rotation degrees (0, 90, 180, 270)
fn exif_orientation_to_degrees(orientation: u16) -> u32 {
    match orientation {
        6 => 90,
        3 => 180,
        8 => 270,
        _ => 0,
    }
}

/// Clockwise rotation recorded in a file's EXIF, 0 when absent.
pub fn read_exif_rotation(path: &Path) -> u32 {
    let Ok(file) = File::open(path) else {
        return 0;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return 0;
    };

    if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        if let exif::Value::Short(ref v) = field.value {
            if let Some(&orientation) = v.first() {
                return exif_orientation_to_degrees(orientation);
            }
        }
    }
    0
}

fn load_upright(source: &Path) -> Result<DynamicImage> {
    let img = image::ImageReader::open(source)?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("Failed to decode {}", source.display()))?;
    Ok(match read_exif_rotation(source) {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    })
}

fn save(img: DynamicImage, dest: &Path) -> Result<()> {
    let is_jpeg = dest
        .extension()
        .map(|e| matches!(e.to_string_lossy().to_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false);
    // JPEG has no alpha channel
    let img = if is_jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    };
    img.save(dest)
        .with_context(|| format!("Failed to write {}", dest.display()))
}

/// Scale to cover a `size` square, then crop the center.
pub fn resize_fill(source: &Path, dest: &Path, size: u32) -> Result<()> {
    let img = load_upright(source)?;
    save(img.resize_to_fill(size, size, FilterType::Lanczos3), dest)
}

/// Scale to fit inside a `size` square, keeping the aspect ratio.
pub fn resize_fit(source: &Path, dest: &Path, size: u32) -> Result<()> {
    let img = load_upright(source)?;
    save(img.resize(size, size, FilterType::Lanczos3), dest)
}

/// Hard-link `source` to `dest`, copying when linking is not possible.
pub fn link_or_copy(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest)?;
    }
    if fs::hard_link(source, dest).is_err() {
        fs::copy(source, dest)
            .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
    }
    Ok(())
}

/// Quote a path for `sh -c`.
pub fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Jobs that rebuild an entry's media, thumbnail first. Empty for
/// entries that only need their page.
pub fn jobs_for(file: &FileEntry, settings: &MediaSettings) -> Vec<(String, Job)> {
    if file.html_only {
        return Vec::new();
    }
    let artifacts = file.artifacts();
    let source = file.path.clone();
    let thumb = artifacts.thumbnail.clone();
    let label = |what: &str| format!("{} {}", what, file.path.display());

    match file.kind {
        MediaKind::Image => {
            let display: PathBuf = file.dest_dir.join(&file.output_name);
            let thumb_size = settings.thumbnail_size;
            let display_size = settings.display_size;
            let thumb_source = source.clone();
            let is_svg = file.name.to_lowercase().ends_with(".svg");

            vec![
                (
                    label("thumbnail"),
                    Job::callback(move || resize_fill(&thumb_source, &thumb, thumb_size)),
                ),
                (
                    label("display copy"),
                    Job::callback(move || {
                        if is_svg {
                            link_or_copy(&source, &display)
                        } else {
                            resize_fit(&source, &display, display_size)
                        }
                    }),
                ),
            ]
        }
        MediaKind::Video => {
            let output = file.dest_dir.join(&file.output_name);
            let size = settings.thumbnail_size;
            vec![
                (
                    label("video thumbnail"),
                    Job::Shell(format!(
                        "{} -i {} -hide_banner -loglevel quiet -vcodec mjpeg -vframes 1 -an -f rawvideo -s {}x{} -y {}",
                        settings.ffmpeg,
                        shell_quote(&source),
                        size,
                        size,
                        shell_quote(&thumb)
                    )),
                ),
                (
                    label("transcode"),
                    Job::Shell(format!(
                        "{} -i {} -hide_banner -loglevel quiet -vcodec libvpx -cpu-used -5 -deadline realtime -y {}",
                        settings.ffmpeg,
                        shell_quote(&source),
                        shell_quote(&output)
                    )),
                ),
            ]
        }
        MediaKind::Note => {
            let preview = file.dest_dir.join(&file.thumb_name);
            let copy = file.dest_dir.join(&file.output_name);
            let size = settings.thumbnail_size;
            let render = |extra: String, dest: &Path| {
                format!(
                    "{} -f pdf --stdout {} | {} -background white -[0] {} PNG8:{}",
                    settings.unoconv,
                    shell_quote(&source),
                    settings.convert,
                    extra,
                    shell_quote(dest)
                )
            };
            let copy_source = source.clone();
            vec![
                (
                    label("note thumbnail"),
                    Job::Shell(render(
                        format!("-thumbnail {}x{}^ -gravity center -extent {}x{}", size, size, size, size),
                        &thumb,
                    )),
                ),
                (
                    label("note preview"),
                    Job::Shell(render(
                        format!("-resize {}x{}", settings.display_size, settings.display_size),
                        &preview,
                    )),
                ),
                (
                    label("note copy"),
                    Job::callback(move || {
                        fs::copy(&copy_source, &copy)?;
                        Ok(())
                    }),
                ),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(dir: &Path, name: &str, kind: MediaKind) -> FileEntry {
        FileEntry::new(
            dir.join("src").join(name),
            dir.join("out"),
            String::new(),
            kind,
            name.to_string(),
        )
    }

    #[test]
    fn test_resize_fill_and_fit() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("wide.png");
        image::RgbImage::new(40, 20).save(&source).unwrap();

        let thumb = dir.path().join("thumb.jpg");
        resize_fill(&source, &thumb, 10).unwrap();
        assert_eq!(image::image_dimensions(&thumb).unwrap(), (10, 10));

        let display = dir.path().join("display.png");
        resize_fit(&source, &display, 8).unwrap();
        assert_eq!(image::image_dimensions(&display).unwrap(), (8, 4));
    }

    #[test]
    fn test_rgba_to_jpeg() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("alpha.png");
        image::RgbaImage::new(4, 4).save(&source).unwrap();
        resize_fill(&source, &dir.path().join("alpha.png.jpg"), 2).unwrap();
    }

    #[test]
    fn test_resize_corrupt_fails() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("bad.jpg");
        fs::write(&source, b"junk").unwrap();
        assert!(resize_fill(&source, &dir.path().join("t.jpg"), 10).is_err());
    }

    #[test]
    fn test_no_rotation_without_exif() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("plain.png");
        image::RgbImage::new(2, 2).save(&source).unwrap();
        assert_eq!(read_exif_rotation(&source), 0);
        assert_eq!(exif_orientation_to_degrees(6), 90);
        assert_eq!(exif_orientation_to_degrees(8), 270);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(Path::new("/a/b c.mov")), "'/a/b c.mov'");
        assert_eq!(shell_quote(Path::new("/it's.mov")), r"'/it'\''s.mov'");
    }

    #[test]
    fn test_job_lists() {
        let dir = tempdir().unwrap();
        let settings = MediaSettings::default();

        let image_jobs = jobs_for(&entry(dir.path(), "a.jpg", MediaKind::Image), &settings);
        assert_eq!(image_jobs.len(), 2);
        assert!(image_jobs[0].0.starts_with("thumbnail"));

        let video_jobs = jobs_for(&entry(dir.path(), "clip.mov", MediaKind::Video), &settings);
        match &video_jobs[1].1 {
            Job::Shell(cmd) => {
                assert!(cmd.starts_with("ffmpeg -i "));
                assert!(cmd.ends_with("clip.webm'"));
            }
            Job::Callback(_) => panic!("expected shell job"),
        }

        let note_jobs = jobs_for(&entry(dir.path(), "n.pdf", MediaKind::Note), &settings);
        assert_eq!(note_jobs.len(), 3);

        let mut html_only = entry(dir.path(), "a.jpg", MediaKind::Image);
        html_only.html_only = true;
        assert!(jobs_for(&html_only, &settings).is_empty());
    }
}
