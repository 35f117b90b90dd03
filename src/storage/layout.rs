//! Deterministic on-disk layout of an archive
//!
//! All paths are relative to the archive root and use `/` separators.
//! Pages mirror their URL path; assets are keyed by content hash.

use crate::storage::ResourceKind;
use crate::url::{host_dir_name, same_host};
use sha2::{Digest, Sha256};
use url::Url;

/// Directory holding content-addressed assets
pub const ASSET_DIR: &str = "assets";

/// Directory holding pages from hosts other than the seed's
const FOREIGN_HOST_DIR: &str = "_hosts";

/// Natural storage path for a page
///
/// # Mapping
///
/// | URL path | Stored as |
/// |----------|-----------|
/// | `/` | `index.html` |
/// | `/about` | `about/index.html` |
/// | `/a/b.html` | `a/b.html` |
/// | `/search?q=x` | `search/index-<hash8>.html` |
///
/// Pages on a host other than the seed's live under `_hosts/<host>/`.
pub fn page_path(url: &Url, seed: &Url) -> String {
    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(sanitize_segment).collect())
        .unwrap_or_default();

    let (dirs, file) = match segments.split_last() {
        Some((last, rest)) if has_extension(last) => (rest.to_vec(), last.clone()),
        _ => (segments, "index.html".to_string()),
    };

    let file = match url.query() {
        Some(query) => with_suffix(&file, &short_hash(query.as_bytes())),
        None => file,
    };

    let mut parts = Vec::with_capacity(dirs.len() + 3);
    if !same_host(url, seed) {
        parts.push(FOREIGN_HOST_DIR.to_string());
        parts.push(host_dir_name(url));
    }
    parts.extend(dirs);
    parts.push(file);
    parts.join("/")
}

/// Storage path for an asset with the given content hash
///
/// The extension comes from the content type, else from the URL path, else
/// from the asset kind.
pub fn asset_path(content_hash: &str, content_type: Option<&str>, url: &Url, kind: ResourceKind) -> String {
    let ext = content_type
        .and_then(extension_for_content_type)
        .map(str::to_string)
        .or_else(|| extension_from_url(url))
        .unwrap_or_else(|| kind.fallback_extension().to_string());
    format!("{}/{}.{}", ASSET_DIR, content_hash, ext)
}

/// Inserts `-<suffix>` before the file extension of a path
///
/// Used to give colliding page paths a distinct name.
pub fn with_suffix(path: &str, suffix: &str) -> String {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..=i], &path[i + 1..]),
        None => ("", path),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}-{}{}", dir, &file[..dot], suffix, &file[dot..]),
        _ => format!("{}{}-{}", dir, file, suffix),
    }
}

/// First eight hex characters of the SHA-256 of `bytes`
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}

/// Relative reference from one archived file to another
///
/// # Examples
///
/// ```
/// use web_archive::storage::relative_path;
///
/// assert_eq!(relative_path("about/index.html", "assets/a.css"), "../assets/a.css");
/// assert_eq!(relative_path("index.html", "about/index.html"), "about/index.html");
/// ```
pub fn relative_path(from_file: &str, to_file: &str) -> String {
    let from_dirs: Vec<&str> = match from_file.rfind('/') {
        Some(i) => from_file[..i].split('/').collect(),
        None => Vec::new(),
    };
    let to_parts: Vec<&str> = to_file.split('/').collect();
    let (to_dirs, to_name) = match to_parts.split_last() {
        Some((name, dirs)) => (dirs, *name),
        None => (&[][..], to_file),
    };

    let common = from_dirs
        .iter()
        .zip(to_dirs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    parts.extend(std::iter::repeat("..").take(from_dirs.len() - common));
    parts.extend(&to_dirs[common..]);
    parts.push(to_name);
    parts.join("/")
}

/// Replaces characters that are unsafe in file names or need escaping in a
/// relative reference
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '~') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // ".." can't survive canonicalization, but a sanitized segment could
    // still be made only of dots
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

fn has_extension(segment: &str) -> bool {
    match segment.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < segment.len(),
        None => false,
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let ext = match mime.as_str() {
        "text/css" => "css",
        "text/javascript" | "application/javascript" | "application/x-javascript" => "js",
        "text/html" => "html",
        "application/json" => "json",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "font/woff2" => "woff2",
        "font/woff" | "application/font-woff" => "woff",
        "font/ttf" => "ttf",
        "font/otf" => "otf",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "text/vtt" => "vtt",
        _ => return None,
    };
    Some(ext)
}

fn extension_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let dot = last.rfind('.')?;
    let ext = &last[dot + 1..];
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}
