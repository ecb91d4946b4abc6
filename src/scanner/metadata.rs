use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::MediaKind;

/// What the scanner keeps from a media file's embedded metadata.
#[derive(Debug, Clone, Default)]
pub struct MediaMetadata {
    pub fields: BTreeMap<String, Value>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Capture time, when the media records one.
    pub captured_at: Option<NaiveDateTime>,
}

/// Source of per-file metadata.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, kind: MediaKind) -> Result<MediaMetadata>;
}

/// Reads dimensions with `image` and EXIF fields with `kamadak-exif`.
/// Videos and notes only get a content type.
pub struct ExifExtractor;

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path, kind: MediaKind) -> Result<MediaMetadata> {
        match kind {
            MediaKind::Image => extract_image(path),
            MediaKind::Video => Ok(content_type_only("video/webm")),
            MediaKind::Note => Ok(content_type_only(note_content_type(path))),
        }
    }
}

fn content_type_only(content_type: &str) -> MediaMetadata {
    let mut metadata = MediaMetadata::default();
    metadata
        .fields
        .insert("content_type".to_string(), Value::from(content_type));
    metadata
}

fn note_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "odt" => "application/vnd.oasis.opendocument.text",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

fn extract_image(path: &Path) -> Result<MediaMetadata> {
    let mut metadata = MediaMetadata::default();

    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    if let Some(format) = reader.format() {
        metadata
            .fields
            .insert("format".to_string(), Value::from(format!("{:?}", format)));
    }
    let (width, height) = reader.into_dimensions()?;
    metadata.width = Some(width);
    metadata.height = Some(height);
    metadata.fields.insert("width".to_string(), Value::from(width));
    metadata.fields.insert("height".to_string(), Value::from(height));

    // Not every image carries EXIF
    let file = File::open(path)?;
    let mut bufreader = BufReader::new(file);
    if let Ok(exif) = exif::Reader::new().read_from_container(&mut bufreader) {
        for field in exif.fields().filter(|f| f.ifd_num == exif::In::PRIMARY) {
            let value = match field.value {
                exif::Value::Ascii(ref parts) => parts
                    .first()
                    .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').to_string())
                    .unwrap_or_default(),
                _ => field.display_value().with_unit(&exif).to_string(),
            };
            metadata.fields.insert(field.tag.to_string(), Value::from(value));
        }

        metadata.captured_at = [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
            .iter()
            .filter_map(|tag| exif.get_field(*tag, exif::In::PRIMARY))
            .find_map(|field| match field.value {
                exif::Value::Ascii(ref parts) => parts
                    .first()
                    .and_then(|raw| parse_exif_datetime(&String::from_utf8_lossy(raw))),
                _ => None,
            });
    }

    Ok(metadata)
}

/// Parse `YYYY:MM:DD HH:MM:SS`, rejecting the zeroed and blank placeholders
/// cameras write when the clock was never set.
pub fn parse_exif_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim_end_matches('\0').trim();
    if raw.is_empty() || raw.starts_with("0000") {
        return None;
    }
    // Some cameras pad single digits with a space
    let normalized = raw.replace(": ", ":0");
    NaiveDateTime::parse_from_str(&normalized, "%Y:%m:%d %H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_exif_datetime() {
        let parsed = parse_exif_datetime("2019:07:04 18:30:05").unwrap();
        assert_eq!(parsed.to_string(), "2019-07-04 18:30:05");
        assert_eq!(
            parse_exif_datetime("2019:07:04 18: 3:05").unwrap().to_string(),
            "2019-07-04 18:03:05"
        );
        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_datetime("    :  :     :  :  ").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn test_extract_png_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        image::RgbImage::new(6, 4).save(&path).unwrap();

        let metadata = ExifExtractor.extract(&path, MediaKind::Image).unwrap();
        assert_eq!(metadata.width, Some(6));
        assert_eq!(metadata.height, Some(4));
        assert_eq!(metadata.fields["format"], Value::from("Png"));
        assert!(metadata.captured_at.is_none());
    }

    #[test]
    fn test_extract_corrupt_image_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(ExifExtractor.extract(&path, MediaKind::Image).is_err());
    }

    #[test]
    fn test_note_content_type() {
        let metadata = ExifExtractor
            .extract(Path::new("/x/report.pdf"), MediaKind::Note)
            .unwrap();
        assert_eq!(metadata.fields["content_type"], Value::from("application/pdf"));
    }
}
