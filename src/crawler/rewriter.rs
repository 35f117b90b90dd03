//! Reference rewriting for offline browsing
//!
//! Rewriting is a single forward scan over the settled markup. Only the bytes
//! of reference-bearing attribute values and CSS URLs change; everything else
//! (text, comments, script bodies, unrelated attributes) is copied verbatim.

use crate::crawler::markup::{classify_attribute, css_references, srcset_urls, AttrRole};
use crate::url::{canonicalize, CanonicalUrl};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use url::Url;

/// Local paths for the references of one document
///
/// Paths are relative to the document's own file. References missing from
/// the map are rewritten to their absolute live URL. A reference that already
/// is one of the map's local paths is left alone, so rewriting output again
/// changes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMap {
    base: Url,
    entries: HashMap<CanonicalUrl, String>,

    /// Every local path in `entries`
    locals: HashSet<String>,
}

impl ReferenceMap {
    /// Creates an empty map resolving references against `base`
    pub fn new(base: Url) -> Self {
        Self {
            base,
            entries: HashMap::new(),
            locals: HashSet::new(),
        }
    }

    pub fn insert(&mut self, url: CanonicalUrl, local_path: impl Into<String>) {
        let local_path = local_path.into();
        if let Some(previous) = self.entries.insert(url, local_path.clone()) {
            if !self.entries.values().any(|path| *path == previous) {
                self.locals.remove(&previous);
            }
        }
        self.locals.insert(local_path);
    }

    pub fn get(&self, url: &CanonicalUrl) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    /// Whether `path` is a local path this map rewrites references to
    pub fn is_local(&self, path: &str) -> bool {
        self.locals.contains(path)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewrites every reference in a page
///
/// `<base href>` is removed because the rewritten paths are relative to the
/// stored file, not to the original base.
pub fn rewrite_html(html: &str, map: &ReferenceMap) -> String {
    let mut out = String::with_capacity(html.len());
    let mut i = 0;

    while i < html.len() {
        let Some(offset) = html[i..].find('<') else {
            out.push_str(&html[i..]);
            break;
        };
        out.push_str(&html[i..i + offset]);
        i += offset;
        let rest = &html[i..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map_or(rest.len(), |e| e + 3);
            out.push_str(&rest[..end]);
            i += end;
            continue;
        }

        if rest.starts_with("</") || rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map_or(rest.len(), |e| e + 1);
            out.push_str(&rest[..end]);
            i += end;
            continue;
        }

        let name_len = rest[1..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-')
            .count();
        if name_len == 0 || !rest.as_bytes()[1].is_ascii_alphabetic() {
            out.push('<');
            i += 1;
            continue;
        }

        let tag = rest[1..1 + name_len].to_ascii_lowercase();
        i += rewrite_tag(rest, 1 + name_len, &tag, map, &mut out);

        if tag == "script" || tag == "style" {
            let body = &html[i..];
            let end = find_ignore_case(body, &format!("</{}", tag)).unwrap_or(body.len());
            if tag == "style" {
                out.push_str(&rewrite_css(&body[..end], map));
            } else {
                out.push_str(&body[..end]);
            }
            i += end;
        }
    }

    out
}

/// Rewrites the `url(...)` and `@import` references of a stylesheet
///
/// Unquoted replacements that would not survive unquoted are wrapped in
/// double quotes.
pub fn rewrite_css(css: &str, map: &ReferenceMap) -> String {
    let mut out = String::with_capacity(css.len());
    let mut last = 0;

    for css_ref in css_references(css) {
        let raw = &css[css_ref.range.clone()];
        let Some(replacement) = rewrite_reference(raw, map) else {
            continue;
        };

        out.push_str(&css[last..css_ref.range.start]);
        let needs_quotes = css_ref.unquoted
            && replacement.contains(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '(' | ')'));
        if needs_quotes {
            out.push('"');
            out.push_str(&replacement.replace('"', "%22"));
            out.push('"');
        } else {
            out.push_str(&replacement);
        }
        last = css_ref.range.end;
    }

    out.push_str(&css[last..]);
    out
}

/// Replacement for a single reference, or `None` to leave it untouched
fn rewrite_reference(raw: &str, map: &ReferenceMap) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    if map.is_local(without_fragment) {
        return None;
    }

    let canonical = canonicalize(trimmed, map.base()).ok()?;
    match map.get(&canonical) {
        Some(local) => {
            let fragment = trimmed.find('#').map_or("", |pos| &trimmed[pos..]);
            Some(format!("{}{}", local, fragment))
        }
        None => map.base().join(trimmed).ok().map(|url| url.to_string()),
    }
}

struct AttrValue {
    /// Range of the value text, excluding quotes
    range: Range<usize>,
    quote: Option<char>,
}

struct Attr {
    /// Leading whitespace through the end of the value
    span: Range<usize>,
    name: String,
    value: Option<AttrValue>,
}

/// Copies one start tag into `out`, returning the number of bytes consumed
///
/// `start` is the offset just past the tag name.
fn rewrite_tag(tag_src: &str, start: usize, tag: &str, map: &ReferenceMap, out: &mut String) -> usize {
    let (attrs, end) = parse_attributes(tag_src, start);

    let lookup: HashMap<&str, String> = attrs
        .iter()
        .filter_map(|attr| {
            attr.value
                .as_ref()
                .map(|v| (attr.name.as_str(), decode_entities(&tag_src[v.range.clone()]).into_owned()))
        })
        .collect();

    let mut last = 0;
    for attr in &attrs {
        if tag == "base" && attr.name == "href" {
            out.push_str(&tag_src[last..attr.span.start]);
            last = attr.span.end;
            continue;
        }

        let Some(value) = &attr.value else { continue };
        let Some(role) = classify_attribute(tag, &attr.name, |name: &str| lookup.get(name).map(String::as_str)) else {
            continue;
        };

        let decoded = decode_entities(&tag_src[value.range.clone()]);
        let rewritten = match role {
            AttrRole::Link | AttrRole::Asset(_) => rewrite_reference(&decoded, map),
            AttrRole::Srcset(_) => Some(rewrite_srcset(&decoded, map)),
            AttrRole::Style => Some(rewrite_css(&decoded, map)),
        };
        let Some(rewritten) = rewritten.filter(|new| new.as_str() != decoded.as_ref()) else {
            continue;
        };

        let quote = value.quote.unwrap_or('"');
        let value_start = if value.quote.is_some() {
            value.range.start - 1
        } else {
            value.range.start
        };
        out.push_str(&tag_src[last..value_start]);
        out.push(quote);
        out.push_str(&encode_attribute(&rewritten, quote));
        out.push(quote);
        last = attr.span.end;
    }

    out.push_str(&tag_src[last..end]);
    end
}

fn rewrite_srcset(value: &str, map: &ReferenceMap) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for range in srcset_urls(value) {
        if let Some(replacement) = rewrite_reference(&value[range.clone()], map) {
            out.push_str(&value[last..range.start]);
            out.push_str(&replacement);
            last = range.end;
        }
    }
    out.push_str(&value[last..]);
    out
}

/// Splits the attributes of a start tag, returning them with the offset just
/// past the closing `>`
fn parse_attributes(src: &str, start: usize) -> (Vec<Attr>, usize) {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut attrs = Vec::new();
    let mut p = start;

    loop {
        let span_start = p;
        while p < len && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        if p >= len {
            return (attrs, len);
        }
        match bytes[p] {
            b'>' => return (attrs, p + 1),
            b'/' => {
                p += 1;
                continue;
            }
            _ => {}
        }

        let name_start = p;
        while p < len && !bytes[p].is_ascii_whitespace() && !matches!(bytes[p], b'=' | b'>' | b'/') {
            p += 1;
        }
        if p == name_start {
            // Stray '=' or similar
            p += 1;
            continue;
        }
        let name = src[name_start..p].to_ascii_lowercase();
        let name_end = p;

        while p < len && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        if p >= len || bytes[p] != b'=' {
            attrs.push(Attr {
                span: span_start..name_end,
                name,
                value: None,
            });
            p = name_end;
            continue;
        }

        p += 1;
        while p < len && bytes[p].is_ascii_whitespace() {
            p += 1;
        }

        let value = match bytes.get(p) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let value_start = p + 1;
                let value_end = src[value_start..].find(q as char).map_or(len, |e| value_start + e);
                p = (value_end + 1).min(len);
                AttrValue {
                    range: value_start..value_end,
                    quote: Some(q as char),
                }
            }
            _ => {
                let value_start = p;
                while p < len && !bytes[p].is_ascii_whitespace() && bytes[p] != b'>' {
                    p += 1;
                }
                AttrValue {
                    range: value_start..p,
                    quote: None,
                }
            }
        };

        attrs.push(Attr {
            span: span_start..p,
            name,
            value: Some(value),
        });
    }
}

/// Byte offset of an ASCII `needle` in `haystack`, ignoring ASCII case
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Decodes the character references that appear in serialized attribute values
fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end + 1))
        });

        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn encode_attribute(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' if quote == '"' => out.push_str("&quot;"),
            '\'' if quote == '\'' => out.push_str("&#39;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}
