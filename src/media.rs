use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIME: &str = "image/jpeg";
const GENERIC_MIME: &str = "application/octet-stream";

/// Hard cap on upload size.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Payload weight class used by the generative retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Standard,
    Heavy,
}

impl ContentClass {
    pub fn for_mime(mime: &str) -> Self {
        if mime.to_ascii_lowercase().starts_with("video/") {
            ContentClass::Heavy
        } else {
            ContentClass::Standard
        }
    }
}

/// Detect a MIME type from the leading magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x47, 0x49, 0x46, ..] => Some("image/gif"),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        [0x42, 0x4D, ..] => Some("image/bmp"),
        _ => None,
    }
}

fn is_generic(mime: Option<&str>) -> bool {
    match mime.map(str::trim) {
        None => true,
        Some(m) => m.is_empty() || m.eq_ignore_ascii_case(GENERIC_MIME),
    }
}

/// Resolve the MIME type to upload with. Absent or generic types fall back to
/// the sniffed type, then to `image/jpeg`.
pub fn normalize_mime(declared: Option<&str>, bytes: &[u8]) -> String {
    if !is_generic(declared) {
        if let Some(m) = declared {
            return m.trim().to_string();
        }
    }
    sniff_mime(bytes).unwrap_or(DEFAULT_MIME).to_string()
}

fn extension_for(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/avi" => "avi",
        "video/mov" => "mov",
        "video/wmv" => "wmv",
        _ => "jpg",
    }
}

/// Last path segment of a URL when it looks like a file name.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.to_string();
    if last.contains('.') {
        Some(last)
    } else {
        None
    }
}

/// Timestamped name such as `image-1700000000000.png`.
pub fn generate_filename(mime: &str) -> String {
    let prefix = if mime.to_ascii_lowercase().starts_with("video/") {
        "video"
    } else {
        "image"
    };
    format!(
        "{}-{}.{}",
        prefix,
        Utc::now().timestamp_millis(),
        extension_for(mime)
    )
}
