use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use super::item::MediaItem;

/// Directory name for items without a capture timestamp.
pub const UNKNOWN_DATE_DIR: &str = "unknown";

/// `<root>/<YYYY>/<MM>` for dated items, `<root>/unknown` otherwise.
pub fn date_dir(root: &Path, capture_time: Option<&DateTime<Utc>>) -> PathBuf {
    match capture_time {
        Some(t) => root
            .join(format!("{:04}", t.year()))
            .join(format!("{:02}", t.month())),
        None => root.join(UNKNOWN_DATE_DIR),
    }
}

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`, and control
/// characters.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| {
            !c.is_control() && !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Filesystem-safe stand-in for an opaque item id: anything outside
/// `[0-9A-Za-z_-]` becomes an underscore.
pub fn fingerprint(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// MIME types the catalog reports, mapped to lowercase file extensions.
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    ("image/webp", "webp"),
    ("image/tiff", "tif"),
    ("image/bmp", "bmp"),
    ("image/x-adobe-dng", "dng"),
    ("image/x-canon-cr2", "cr2"),
    ("image/x-nikon-nef", "nef"),
    ("image/x-sony-arw", "arw"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/x-msvideo", "avi"),
    ("video/3gpp", "3gp"),
    ("video/x-matroska", "mkv"),
    ("video/webm", "webm"),
    ("video/mpeg", "mpg"),
    ("video/x-m4v", "m4v"),
];

pub fn mime_extension(mime_type: &str) -> Option<&'static str> {
    MIME_EXTENSIONS
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(mime_type))
        .map(|(_, ext)| *ext)
}

/// The filename an item is filed under: its reported filename when that
/// survives cleaning, otherwise `<fingerprint>.<ext>` with the extension
/// taken from the MIME type or the media kind.
pub fn item_filename(item: &MediaItem) -> String {
    if let Some(name) = item.filename.as_deref() {
        let clean = clean_filename(name);
        if !clean.is_empty() && clean != "." && clean != ".." {
            return clean;
        }
    }
    let ext = item
        .mime_type
        .as_deref()
        .and_then(mime_extension)
        .unwrap_or_else(|| item.kind.default_extension());
    format!("{}.{}", fingerprint(&item.id), ext)
}

/// Add a string suffix before the file extension.
///
/// For example, `"photo.jpg"` with suffix `"abc"` becomes `"photo-abc.jpg"`.
/// A leading dot (hidden file) is not treated as an extension separator.
pub fn insert_suffix(filename: &str, suffix: &str) -> String {
    match filename.rfind('.').filter(|&dot| dot > 0) {
        Some(dot_pos) => {
            let (stem, ext) = filename.split_at(dot_pos);
            let mut result = String::with_capacity(stem.len() + 1 + suffix.len() + ext.len());
            result.push_str(stem);
            result.push('-');
            result.push_str(suffix);
            result.push_str(ext);
            result
        }
        None => {
            let mut result = String::with_capacity(filename.len() + 1 + suffix.len());
            result.push_str(filename);
            result.push('-');
            result.push_str(suffix);
            result
        }
    }
}

/// Candidate `n` for a name collision: `photo.jpg`, `photo-1.jpg`, `photo-2.jpg`, ...
pub fn collision_candidate(filename: &str, n: usize) -> String {
    if n == 0 {
        filename.to_string()
    } else {
        insert_suffix(filename, &n.to_string())
    }
}
