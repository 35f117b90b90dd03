//! Reference-bearing syntax shared by extraction and rewriting
//!
//! Both sides classify attributes and scan stylesheets through these
//! functions, so anything the extractor reports is exactly what the rewriter
//! patches.

use crate::storage::ResourceKind;
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// What an attribute value refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttrRole {
    /// A navigable page
    Link,

    /// A single embedded asset
    Asset(ResourceKind),

    /// A `srcset` candidate list
    Srcset(ResourceKind),

    /// Inline CSS
    Style,
}

/// Classifies an attribute of an element
///
/// `tag` and `attr` must be lowercase. `attr_of` looks up another attribute
/// of the same element (needed for `link rel` and `input type`).
pub(crate) fn classify_attribute<'a>(
    tag: &str,
    attr: &str,
    attr_of: impl Fn(&str) -> Option<&'a str>,
) -> Option<AttrRole> {
    use ResourceKind::*;

    if attr == "style" {
        return Some(AttrRole::Style);
    }

    let role = match (tag, attr) {
        ("a" | "area", "href") => AttrRole::Link,
        ("iframe" | "frame", "src") => AttrRole::Link,
        ("img", "src") => AttrRole::Asset(Image),
        ("img" | "source", "srcset") => AttrRole::Srcset(Image),
        ("video", "poster") => AttrRole::Asset(Image),
        ("source" | "video" | "audio" | "track" | "embed", "src") => AttrRole::Asset(Other),
        ("object", "data") => AttrRole::Asset(Other),
        ("script", "src") => AttrRole::Asset(Script),
        ("input", "src") => {
            let is_image = attr_of("type").map_or(false, |t| t.eq_ignore_ascii_case("image"));
            if !is_image {
                return None;
            }
            AttrRole::Asset(Image)
        }
        ("link", "href") => return link_role(attr_of("rel")?, attr_of("as")),
        ("link", "imagesrcset") => AttrRole::Srcset(Image),
        _ => return None,
    };
    Some(role)
}

fn link_role(rel: &str, as_attr: Option<&str>) -> Option<AttrRole> {
    use ResourceKind::*;

    let rels: Vec<String> = rel.split_ascii_whitespace().map(|r| r.to_ascii_lowercase()).collect();
    let has = |name: &str| rels.iter().any(|r| r == name);

    let kind = if has("stylesheet") {
        Stylesheet
    } else if has("icon") || has("apple-touch-icon") || has("mask-icon") {
        Image
    } else if has("modulepreload") {
        Script
    } else if has("preload") || has("prefetch") {
        match as_attr.map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("style") => Stylesheet,
            Some("script") => Script,
            Some("image") => Image,
            Some(_) | None => Other,
        }
    } else if has("manifest") {
        Other
    } else {
        return None;
    };
    Some(AttrRole::Asset(kind))
}

/// Byte ranges of the URLs in a `srcset` value
///
/// Candidates are `url [descriptor]` separated by commas. A URL may itself
/// contain commas, so only a comma after whitespace (or at the end of the
/// URL) separates candidates.
pub(crate) fn srcset_urls(value: &str) -> Vec<Range<usize>> {
    let bytes = value.as_bytes();
    let mut urls = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut end = i;
        while end > start && bytes[end - 1] == b',' {
            end -= 1;
        }
        if end > start {
            urls.push(start..end);
        }
        if end < i {
            // Trailing comma ended the candidate
            continue;
        }

        // Skip the descriptor up to the next top-level comma
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => {
                    i += 1;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }
    urls
}

/// A `url(...)` or `@import` reference inside CSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CssRef {
    /// Byte range of the URL text, excluding quotes
    pub range: Range<usize>,

    /// Whether the URL was written without quotes
    pub unquoted: bool,

    /// Whether the reference is an `@import`
    pub import: bool,
}

fn css_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|"([^"]*)"|'([^']*)')|url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#,
        )
        .expect("CSS reference pattern is valid")
    })
}

/// Every URL reference in a stylesheet, in source order
pub(crate) fn css_references(css: &str) -> Vec<CssRef> {
    let mut refs = Vec::new();
    for caps in css_pattern().captures_iter(css) {
        for (group, import, unquoted) in [
            (1, true, false),
            (2, true, false),
            (3, true, true),
            (4, true, false),
            (5, true, false),
            (6, false, false),
            (7, false, false),
            (8, false, true),
        ] {
            if let Some(m) = caps.get(group) {
                if !m.as_str().trim().is_empty() {
                    refs.push(CssRef {
                        range: m.range(),
                        unquoted,
                        import,
                    });
                }
                break;
            }
        }
    }
    refs
}

/// Kind of the asset a CSS reference names
pub(crate) fn css_ref_kind(css_ref: &CssRef, url_path: &str) -> ResourceKind {
    if css_ref.import {
        return ResourceKind::Stylesheet;
    }
    let ext = url_path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("css") => ResourceKind::Stylesheet,
        Some("woff" | "woff2" | "ttf" | "otf" | "eot") => ResourceKind::Other,
        _ => ResourceKind::Image,
    }
}
