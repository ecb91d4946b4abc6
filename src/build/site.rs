//! Page models and the renderer that turns them into HTML.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::scanner::MediaKind;

#[derive(Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    pub label: String,
    /// `None` for the current folder.
    pub link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderLink {
    pub name: String,
    pub page: String,
    pub icon: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileLink {
    pub name: String,
    pub page: String,
    pub thumbnail: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderPage {
    pub title: String,
    /// Relative path from this page to the site root, `""` or `"../.."`-style
    /// with a trailing slash.
    pub root: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub comment: Option<String>,
    pub subfolders: Vec<FolderLink>,
    pub files: Vec<FileLink>,
}

/// A tagged face, boxed in display pixels.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub tag_id: i64,
    pub label: String,
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone)]
pub struct FilePage {
    pub name: String,
    pub kind: MediaKind,
    /// The display copy, transcode, or preview shown on the page.
    pub media: String,
    /// The original document, for notes.
    pub download: Option<String>,
    pub root: String,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub comment: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub faces: Vec<FaceBox>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShuffleEntry {
    pub path: String,
    pub folder: String,
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct FaceImage {
    pub page: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone)]
pub struct FacesPage {
    pub tag_id: i64,
    pub label: String,
    pub prev: Option<i64>,
    pub next: Option<i64>,
    pub images: Vec<FaceImage>,
}

#[derive(Debug, Clone)]
pub struct FacesIndexEntry {
    pub tag_id: i64,
    pub label: String,
    pub page: String,
    pub thumbnail: String,
    pub photos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarFolder {
    pub day: u32,
    /// Source-relative folder path.
    pub folder: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarMonth {
    pub thumbnail: Option<String>,
    pub folders: Vec<CalendarFolder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarYear {
    pub year: i32,
    /// Always twelve entries, January first.
    pub months: Vec<CalendarMonth>,
}

/// Produces the site's pages.
pub trait SiteRenderer: Send + Sync {
    fn folder_page(&self, page: &FolderPage) -> String;
    fn file_page(&self, page: &FilePage) -> String;
    fn shuffle_page(&self, root: &str, images: &[ShuffleEntry]) -> String;
    fn faces_page(&self, page: &FacesPage) -> String;
    fn faces_index(&self, entries: &[FacesIndexEntry]) -> String;
    fn calendar_page(&self, years: &[CalendarYear]) -> String;
    /// Static files installed under `res/`.
    fn resources(&self) -> Vec<(&'static str, &'static [u8])>;
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const ALBUM_SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100"><rect x="10" y="22" width="80" height="60" rx="6" fill="#cfd8dc"/><rect x="10" y="14" width="34" height="14" rx="4" fill="#90a4ae"/><circle cx="36" cy="48" r="8" fill="#fff"/><path d="M18 76 44 52 58 64 68 56 84 76Z" fill="#78909c"/></svg>"##;

const STYLE_CSS: &[u8] = b"body{font-family:sans-serif;margin:1em;background:#fafafa}
nav a{margin-right:.5em}
.grid{display:flex;flex-wrap:wrap;gap:8px}
.grid figure{margin:0;width:100px}
.grid figcaption{font-size:small;overflow:hidden;text-overflow:ellipsis}
.photo{position:relative;display:inline-block}
.face{position:absolute;border:2px solid #ffeb3b}
.face span{background:#ffeb3b;font-size:small}
table.calendar td{vertical-align:top;width:8%}
";

/// Minimal HTML renderer with no template engine.
pub struct PlainHtml;

impl PlainHtml {
    fn head(&self, out: &mut String, title: &str, root: &str) {
        let _ = write!(
            out,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
             <link rel=\"stylesheet\" href=\"{}res/style.css\"></head><body>\n",
            escape(title),
            root
        );
    }

    fn tail(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "<footer><small>photoboxy {}</small></footer></body></html>",
            env!("CARGO_PKG_VERSION")
        );
    }

    fn comment(&self, out: &mut String, comment: Option<&str>) {
        if let Some(comment) = comment {
            let _ = writeln!(out, "<p class=\"comment\">{}</p>", escape(comment).replace('\n', "<br>"));
        }
    }
}

impl SiteRenderer for PlainHtml {
    fn folder_page(&self, page: &FolderPage) -> String {
        let mut out = String::new();
        self.head(&mut out, &page.title, &page.root);

        out.push_str("<nav>");
        for crumb in &page.breadcrumbs {
            match &crumb.link {
                Some(link) => {
                    let _ = write!(out, "<a href=\"{}\">{}</a>", escape(link), escape(&crumb.label));
                }
                None => {
                    let _ = write!(out, "<span>{}</span>", escape(&crumb.label));
                }
            }
        }
        let _ = writeln!(
            out,
            " <a href=\"shuffle.html\">shuffle</a> <a href=\"{0}calendar.html\">calendar</a> <a href=\"{0}faces/index.html\">faces</a></nav>",
            page.root
        );
        self.comment(&mut out, page.comment.as_deref());

        out.push_str("<div class=\"grid\">\n");
        for sub in &page.subfolders {
            let _ = writeln!(
                out,
                "<figure><a href=\"{}\"><img src=\"{}{}\" alt=\"\"></a><figcaption>{}</figcaption></figure>",
                escape(&sub.page),
                page.root,
                escape(&sub.icon),
                escape(sub.comment.as_deref().unwrap_or(&sub.name))
            );
        }
        for file in &page.files {
            let _ = writeln!(
                out,
                "<figure><a href=\"{}\"><img src=\"{}\" alt=\"\"></a><figcaption>{}</figcaption></figure>",
                escape(&file.page),
                escape(&file.thumbnail),
                escape(file.comment.as_deref().unwrap_or(&file.name))
            );
        }
        out.push_str("</div>\n");
        self.tail(&mut out);
        out
    }

    fn file_page(&self, page: &FilePage) -> String {
        let mut out = String::new();
        self.head(&mut out, &page.name, &page.root);

        out.push_str("<nav><a href=\"index.html\">up</a>");
        if let Some(prev) = &page.prev {
            let _ = write!(out, " <a href=\"{}\">prev</a>", escape(prev));
        }
        if let Some(next) = &page.next {
            let _ = write!(out, " <a href=\"{}\">next</a>", escape(next));
        }
        out.push_str("</nav>\n");

        match page.kind {
            MediaKind::Image => {
                let _ = write!(out, "<div class=\"photo\"><img src=\"{}\" alt=\"\">", escape(&page.media));
                for face in &page.faces {
                    let [left, top, right, bottom] = face.bbox;
                    let _ = write!(
                        out,
                        "<a class=\"face\" href=\"{}faces/{}.html\" style=\"left:{}px;top:{}px;width:{}px;height:{}px\"><span>{}</span></a>",
                        page.root,
                        face.tag_id,
                        left,
                        top,
                        right - left,
                        bottom - top,
                        escape(&face.label)
                    );
                }
                out.push_str("</div>\n");
            }
            MediaKind::Video => {
                let _ = writeln!(
                    out,
                    "<video controls src=\"{}\" type=\"video/webm\"></video>",
                    escape(&page.media)
                );
            }
            MediaKind::Note => {
                let _ = writeln!(out, "<img src=\"{}\" alt=\"\">", escape(&page.media));
            }
        }
        if let Some(download) = &page.download {
            let _ = writeln!(out, "<p><a href=\"{}\">download</a></p>", escape(download));
        }
        self.comment(&mut out, page.comment.as_deref());

        if !page.metadata.is_empty() {
            out.push_str("<table class=\"metadata\">\n");
            for (key, value) in &page.metadata {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(out, "<tr><th>{}</th><td>{}</td></tr>", escape(key), escape(&value));
            }
            out.push_str("</table>\n");
        }
        self.tail(&mut out);
        out
    }

    fn shuffle_page(&self, root: &str, images: &[ShuffleEntry]) -> String {
        let mut out = String::new();
        self.head(&mut out, "shuffle", root);
        let json = serde_json::to_string(images).unwrap_or_else(|_| "[]".to_string());
        // Keep the payload from closing the script element
        let json = json.replace("</", "<\\/");
        let _ = writeln!(
            out,
            "<img id=\"slide\" alt=\"\">\n<script>\nvar images = {};\n\
             var slide = document.getElementById('slide');\n\
             function show() {{ if (!images.length) return; var i = images[Math.floor(Math.random() * images.length)]; slide.src = i.path; slide.title = i.folder + ' ' + i.date; }}\n\
             show(); setInterval(show, 5000);\n</script>",
            json
        );
        self.tail(&mut out);
        out
    }

    fn faces_page(&self, page: &FacesPage) -> String {
        let mut out = String::new();
        self.head(&mut out, &page.label, "../");
        out.push_str("<script src=\"names.js\"></script>\n<nav><a href=\"index.html\">all faces</a>");
        if let Some(prev) = page.prev {
            let _ = write!(out, " <a href=\"{}.html\">prev</a>", prev);
        }
        if let Some(next) = page.next {
            let _ = write!(out, " <a href=\"{}.html\">next</a>", next);
        }
        let _ = writeln!(out, "</nav>\n<h1 data-tag=\"{}\">{}</h1>", page.tag_id, escape(&page.label));
        out.push_str("<div class=\"grid\">\n");
        for image in &page.images {
            let _ = writeln!(
                out,
                "<figure><a href=\"{}\"><img src=\"{}\" alt=\"\"></a></figure>",
                escape(&image.page),
                escape(&image.thumbnail)
            );
        }
        out.push_str("</div>\n");
        self.tail(&mut out);
        out
    }

    fn faces_index(&self, entries: &[FacesIndexEntry]) -> String {
        let mut out = String::new();
        self.head(&mut out, "All Faces", "../");
        out.push_str("<script src=\"names.js\"></script>\n<nav><a href=\"../index.html\">home</a></nav>\n<div class=\"grid\">\n");
        for entry in entries {
            let _ = writeln!(
                out,
                "<figure><a href=\"{}\"><img src=\"{}\" alt=\"\"></a><figcaption data-tag=\"{}\">{} ({})</figcaption></figure>",
                escape(&entry.page),
                escape(&entry.thumbnail),
                entry.tag_id,
                escape(&entry.label),
                entry.photos
            );
        }
        out.push_str("</div>\n");
        self.tail(&mut out);
        out
    }

    fn calendar_page(&self, years: &[CalendarYear]) -> String {
        const MONTHS: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        let mut out = String::new();
        self.head(&mut out, "Calendar", "");
        out.push_str("<nav><a href=\"index.html\">home</a></nav>\n<table class=\"calendar\">\n<tr><th></th>");
        for month in MONTHS {
            let _ = write!(out, "<th>{}</th>", month);
        }
        out.push_str("</tr>\n");
        for year in years {
            let _ = write!(out, "<tr><th>{}</th>", year.year);
            for month in &year.months {
                out.push_str("<td>");
                if let Some(thumbnail) = &month.thumbnail {
                    let _ = write!(out, "<img src=\"{}\" alt=\"\"><br>", escape(thumbnail));
                }
                for folder in &month.folders {
                    let _ = write!(
                        out,
                        "<a href=\"{}/index.html\">{} {}</a><br>",
                        escape(&folder.folder),
                        folder.day,
                        escape(&folder.name)
                    );
                }
                out.push_str("</td>");
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>\n");
        self.tail(&mut out);
        out
    }

    fn resources(&self) -> Vec<(&'static str, &'static [u8])> {
        vec![("album.svg", ALBUM_SVG), ("style.css", STYLE_CSS)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn test_folder_page_breadcrumbs_and_comment() {
        let page = FolderPage {
            title: "trip/".to_string(),
            root: "../".to_string(),
            breadcrumbs: vec![
                Breadcrumb {
                    label: "Home".to_string(),
                    link: Some("../index.html".to_string()),
                },
                Breadcrumb {
                    label: "trip".to_string(),
                    link: None,
                },
            ],
            comment: Some("line one\nline <two>".to_string()),
            subfolders: Vec::new(),
            files: vec![FileLink {
                name: "a.jpg".to_string(),
                page: "a.jpg.html".to_string(),
                thumbnail: "thumb/a.jpg".to_string(),
                comment: None,
            }],
        };
        let html = PlainHtml.folder_page(&page);
        assert!(html.contains("<a href=\"../index.html\">Home</a><span>trip</span>"));
        assert!(html.contains("line one<br>line &lt;two&gt;"));
        assert!(html.contains("thumb/a.jpg"));
        assert!(html.contains("../res/style.css"));
    }

    #[test]
    fn test_file_page_face_boxes() {
        let page = FilePage {
            name: "a.jpg".to_string(),
            kind: MediaKind::Image,
            media: "a.jpg".to_string(),
            download: None,
            root: String::new(),
            prev: None,
            next: Some("b.jpg.html".to_string()),
            comment: None,
            metadata: BTreeMap::from([("Make".to_string(), Value::from("Canon"))]),
            faces: vec![FaceBox {
                tag_id: 4,
                label: "Ana".to_string(),
                bbox: [10, 20, 30, 60],
            }],
        };
        let html = PlainHtml.file_page(&page);
        assert!(html.contains("faces/4.html"));
        assert!(html.contains("left:10px;top:20px;width:20px;height:40px"));
        assert!(html.contains("<a href=\"b.jpg.html\">next</a>"));
        assert!(!html.contains(">prev<"));
        assert!(html.contains("<th>Make</th><td>Canon</td>"));
    }

    #[test]
    fn test_shuffle_payload_is_script_safe() {
        let images = vec![ShuffleEntry {
            path: "a</script>.jpg".to_string(),
            folder: String::new(),
            date: "2024-01-01".to_string(),
        }];
        let html = PlainHtml.shuffle_page("", &images);
        assert!(!html.contains("a</script>"));
    }
}
