//! Resource extraction from fetched documents
//!
//! This module lists what a document refers to:
//! - Navigable links (`a`, `area`, `iframe`) to feed back into the frontier
//! - Embedded assets (images, scripts, stylesheets, media, icons)
//! - `url(...)` and `@import` references in inline and linked CSS
//!
//! Malformed and non-fetchable references are skipped, never fatal.

use crate::crawler::markup::{classify_attribute, css_ref_kind, css_references, srcset_urls, AttrRole};
use crate::storage::ResourceKind;
use crate::url::{canonicalize, CanonicalUrl};
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// A navigable link found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: CanonicalUrl,

    /// Absolute form of the reference as written
    pub display: String,
}

/// An embedded asset found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: CanonicalUrl,
    pub kind: ResourceKind,
}

/// References of one document, deduplicated in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub links: Vec<DiscoveredLink>,
    pub assets: Vec<AssetRef>,
}

/// A parsed document that can list its references
pub trait Document {
    /// URL relative references resolve against
    fn base_url(&self) -> &Url;

    fn extract_references(&self) -> Extraction;
}

/// An HTML page parsed with html5ever
pub struct HtmlDocument {
    html: Html,
    base: Url,
}

impl HtmlDocument {
    /// Parses a page
    ///
    /// A `<base href>` element overrides `page_url` as the resolution base.
    pub fn parse(content: &str, page_url: &Url) -> Self {
        let html = Html::parse_document(content);

        let base = Selector::parse("base[href]")
            .ok()
            .and_then(|selector| {
                html.select(&selector)
                    .next()
                    .and_then(|el| el.value().attr("href"))
                    .and_then(|href| page_url.join(href.trim()).ok())
            })
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or_else(|| page_url.clone());

        Self { html, base }
    }

    /// Serializes the parsed DOM back to markup
    ///
    /// This is the settled form of the page that gets rewritten and stored.
    pub fn serialize(&self) -> String {
        self.html.html()
    }
}

impl Document for HtmlDocument {
    fn base_url(&self) -> &Url {
        &self.base
    }

    fn extract_references(&self) -> Extraction {
        let mut collector = Collector::new(&self.base);

        let Ok(all) = Selector::parse("*") else {
            return collector.finish();
        };

        for element in self.html.select(&all) {
            let el = element.value();
            let tag = el.name();

            let mut attrs: Vec<(&str, &str)> = el.attrs().collect();
            attrs.sort_by(|a, b| a.0.cmp(b.0));

            for (name, value) in attrs {
                let name = name.to_ascii_lowercase();
                let Some(role) = classify_attribute(tag, &name, |other: &str| el.attr(other)) else {
                    continue;
                };

                match role {
                    AttrRole::Link => {
                        if el.attr("download").is_some() {
                            tracing::trace!("Skipping download link {}", value);
                            continue;
                        }
                        collector.link(value);
                    }
                    AttrRole::Asset(kind) => collector.asset(value, kind),
                    AttrRole::Srcset(kind) => {
                        for range in srcset_urls(value) {
                            collector.asset(&value[range], kind);
                        }
                    }
                    AttrRole::Style => collector.css(value, &self.base),
                }
            }

            if tag == "style" {
                let css: String = element.text().collect();
                collector.css(&css, &self.base);
            }
        }

        collector.finish()
    }
}

/// A CSS stylesheet
pub struct StylesheetDocument {
    text: String,
    base: Url,
}

impl StylesheetDocument {
    pub fn new(text: impl Into<String>, url: &Url) -> Self {
        Self {
            text: text.into(),
            base: url.clone(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Document for StylesheetDocument {
    fn base_url(&self) -> &Url {
        &self.base
    }

    fn extract_references(&self) -> Extraction {
        let mut collector = Collector::new(&self.base);
        collector.css(&self.text, &self.base);
        collector.finish()
    }
}

/// Parses a page and lists its references
///
/// # Arguments
///
/// * `content` - The page markup
/// * `page_url` - URL the page was fetched from
pub fn extract(content: &str, page_url: &Url) -> Extraction {
    HtmlDocument::parse(content, page_url).extract_references()
}

/// A fetched page in settled form
#[derive(Debug, Clone)]
pub struct SettledPage {
    /// Serialized DOM
    pub html: String,

    /// Resolution base of the page's references
    pub base: Url,

    pub extraction: Extraction,
}

/// Parses, serializes and extracts a page in one pass
///
/// CPU-bound; run it on a blocking thread.
pub fn settle_page(bytes: &[u8], page_url: &Url) -> SettledPage {
    let content = String::from_utf8_lossy(bytes);
    let document = HtmlDocument::parse(&content, page_url);
    SettledPage {
        html: document.serialize(),
        base: document.base_url().clone(),
        extraction: document.extract_references(),
    }
}

struct Collector<'a> {
    base: &'a Url,
    seen_links: HashSet<CanonicalUrl>,
    seen_assets: HashSet<CanonicalUrl>,
    out: Extraction,
}

impl<'a> Collector<'a> {
    fn new(base: &'a Url) -> Self {
        Self {
            base,
            seen_links: HashSet::new(),
            seen_assets: HashSet::new(),
            out: Extraction::default(),
        }
    }

    fn resolve(&self, raw: &str, base: &Url) -> Option<(CanonicalUrl, String)> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return None;
        }
        match canonicalize(raw, base) {
            Ok(url) => {
                let display = base
                    .join(raw)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| url.to_string());
                Some((url, display))
            }
            Err(e) => {
                tracing::debug!("Skipping reference '{}': {}", raw, e);
                None
            }
        }
    }

    fn link(&mut self, raw: &str) {
        if let Some((url, display)) = self.resolve(raw, self.base) {
            if self.seen_links.insert(url.clone()) {
                self.out.links.push(DiscoveredLink { url, display });
            }
        }
    }

    fn asset(&mut self, raw: &str, kind: ResourceKind) {
        let base = self.base;
        self.asset_from(raw, kind, base);
    }

    fn asset_from(&mut self, raw: &str, kind: ResourceKind, base: &Url) {
        if let Some((url, _)) = self.resolve(raw, base) {
            if self.seen_assets.insert(url.clone()) {
                self.out.assets.push(AssetRef { url, kind });
            }
        }
    }

    fn css(&mut self, css: &str, base: &Url) {
        for css_ref in css_references(css) {
            let raw = &css[css_ref.range.clone()];
            let path = base.join(raw.trim()).map(|u| u.path().to_string()).unwrap_or_default();
            let kind = css_ref_kind(&css_ref, &path);
            self.asset_from(raw, kind, base);
        }
    }

    fn finish(self) -> Extraction {
        self.out
    }
}
