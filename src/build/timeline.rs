//! Calendar view: folders placed on a year by month grid, each month
//! represented by its best-scoring photo.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::site::{CalendarFolder, CalendarMonth, CalendarYear, SiteRenderer};
use crate::db::{Photo, PhotoIndex, Tag};
use crate::scanner::change_detection::MTIME_FORMAT;
use crate::scanner::metadata::parse_exif_datetime;
use crate::scanner::{output_names, MediaKind};

/// Weight by number of tagged faces; photos of five or six people score best.
pub const FACE_COUNT_WEIGHTS: [f32; 13] = [0.0, 0.3, 0.5, 0.7, 0.9, 1.0, 1.0, 0.9, 0.7, 0.5, 0.3, 0.1, 0.1];
const BEYOND_TABLE_WEIGHT: f32 = 0.5;

/// Folders whose photos spread further than this from their average day are
/// left off the calendar.
const MAX_SPREAD_DAYS: i64 = 60;

/// When a photo was taken: EXIF `DateTime` when valid, else its sort key.
pub fn photo_time(photo: &Photo) -> Option<NaiveDateTime> {
    if let Some(raw) = photo.metadata.get("DateTime").and_then(|v| v.as_str()) {
        if let Some(parsed) = parse_exif_datetime(raw) {
            return Some(parsed);
        }
    }
    NaiveDateTime::parse_from_str(&photo.sort_key, MTIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&photo.sort_key, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Average day of each folder's photos, in date order.
pub fn folder_dates(timeline: &[(NaiveDateTime, String)]) -> Vec<(NaiveDate, String)> {
    let mut folders: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for (time, path) in timeline {
        let folder = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        folders
            .entry(folder)
            .or_default()
            .push(i64::from(time.date().num_days_from_ce()));
    }

    let mut dated = Vec::new();
    for (folder, days) in folders {
        let min = days.iter().copied().min().unwrap_or_default();
        let average = days.iter().sum::<i64>() as f64 / days.len() as f64;
        if average - min as f64 > MAX_SPREAD_DAYS as f64 {
            continue;
        }
        let Ok(days_from_ce) = i32::try_from(average.floor() as i64) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_num_days_from_ce_opt(days_from_ce) {
            dated.push((date, folder));
        }
    }
    dated.sort();
    dated
}

pub fn score_photo(photo: &Photo, tags: &HashMap<i64, Tag>) -> f32 {
    let tagged: Vec<i64> = photo.faces.iter().filter_map(|f| f.tag_id).collect();
    let weight = FACE_COUNT_WEIGHTS
        .get(tagged.len())
        .copied()
        .unwrap_or(BEYOND_TABLE_WEIGHT);

    tagged
        .iter()
        .map(|tag_id| {
            let named = tags.get(tag_id).is_some_and(Tag::is_named);
            let face_weight = if named { 1.0 } else { 0.1 };
            face_weight * weight
        })
        .sum()
}

fn is_jpeg(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

fn relative(source: &Path, path: &str) -> Option<String> {
    Path::new(path)
        .strip_prefix(source)
        .ok()
        .map(|p| p.to_string_lossy().to_string())
}

/// Build the calendar from every photo in the index.
pub fn build_calendar(index: &PhotoIndex, source: &Path) -> Result<Vec<CalendarYear>> {
    let photos = index.photos()?;
    let tags: HashMap<i64, Tag> = index.tags()?.into_iter().map(|t| (t.id, t)).collect();

    let mut timeline: Vec<(NaiveDateTime, String)> = photos
        .iter()
        .filter_map(|p| photo_time(p).map(|t| (t, p.path.clone())))
        .collect();
    timeline.sort();

    let mut by_folder: HashMap<String, Vec<&Photo>> = HashMap::new();
    for photo in &photos {
        if let Some(parent) = Path::new(&photo.path).parent() {
            by_folder
                .entry(parent.to_string_lossy().to_string())
                .or_default()
                .push(photo);
        }
    }

    let mut years: Vec<CalendarYear> = Vec::new();
    let mut month_members: Vec<Vec<Vec<String>>> = Vec::new();
    for (date, folder) in folder_dates(&timeline) {
        if years.last().map(|y| y.year) != Some(date.year()) {
            years.push(CalendarYear {
                year: date.year(),
                months: vec![CalendarMonth::default(); 12],
            });
            month_members.push(vec![Vec::new(); 12]);
        }
        let Some(folder_rel) = relative(source, &folder) else {
            continue;
        };
        let month = date.month0() as usize;
        let name = Path::new(&folder)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let (Some(year), Some(members)) = (years.last_mut(), month_members.last_mut()) {
            year.months[month].folders.push(CalendarFolder {
                day: date.day(),
                folder: folder_rel,
                name,
            });
            members[month].push(folder);
        }
    }

    for (year, members) in years.iter_mut().zip(&month_members) {
        for (month, folders) in year.months.iter_mut().zip(members) {
            let mut best: Option<(f32, &Photo)> = None;
            for folder in folders {
                let mut candidates: Vec<&Photo> = by_folder
                    .get(folder)
                    .map(|v| v.iter().copied().filter(|p| is_jpeg(&p.path)).collect())
                    .unwrap_or_default();
                candidates.sort_by(|a, b| a.path.cmp(&b.path));
                for photo in candidates {
                    let score = score_photo(photo, &tags);
                    if best.map_or(true, |(top, _)| score > top) {
                        best = Some((score, photo));
                    }
                }
            }
            month.thumbnail = best.and_then(|(_, photo)| thumbnail_for(source, photo));
        }
    }

    Ok(years)
}

fn thumbnail_for(source: &Path, photo: &Photo) -> Option<String> {
    let name = Path::new(&photo.path).file_name()?.to_string_lossy().to_string();
    let (_, thumb) = output_names(MediaKind::Image, &name);
    relative(source, &photo.path)?;
    Some(format!("{}thumb/{}", photo.relpath, thumb))
}

pub fn write_calendar(
    index: &PhotoIndex,
    source: &Path,
    dest: &Path,
    renderer: &dyn SiteRenderer,
) -> Result<()> {
    let years = build_calendar(index, source)?;
    std::fs::write(dest.join("calendar.html"), renderer.calendar_page(&years))?;
    Ok(())
}
