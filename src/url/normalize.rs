use crate::url::CanonicalUrl;
use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped during canonicalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Reference prefixes that never name a fetchable resource
const SKIPPED_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "about:", "blob:"];

/// Canonicalizes a raw reference against the URL of the document it was found in
///
/// # Canonicalization Steps
///
/// 1. Reject empty references and disallowed schemes (`javascript:`, `mailto:`, ...)
/// 2. Resolve the reference against `base` (this also collapses `.` and `..`)
/// 3. Require an `http`/`https` scheme and a host
/// 4. Lowercase scheme and host, strip default ports (done by the parser)
/// 5. Collapse empty path segments and drop the trailing slash (except for root)
/// 6. Remove the fragment
/// 7. Drop tracking query parameters and sort the rest by key
///
/// # Arguments
///
/// * `raw` - The reference as written in the document
/// * `base` - The URL the reference is relative to
///
/// # Returns
///
/// * `Ok(CanonicalUrl)` - The identity form of the reference
/// * `Err(UrlError)` - The reference is unparsable or not fetchable
///
/// # Examples
///
/// ```
/// use url::Url;
/// use web_archive::url::canonicalize;
///
/// let base = Url::parse("https://Example.COM:443/docs/").unwrap();
/// let url = canonicalize("../about/#team", &base).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/about");
/// ```
pub fn canonicalize(raw: &str, base: &Url) -> Result<CanonicalUrl, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    let lowered = raw.to_ascii_lowercase();
    if let Some(prefix) = SKIPPED_PREFIXES.iter().find(|p| lowered.starts_with(*p)) {
        return Err(UrlError::InvalidScheme(prefix.trim_end_matches(':').to_string()));
    }

    let url = base.join(raw).map_err(|e| UrlError::Parse(e.to_string()))?;
    canonicalize_absolute(url)
}

/// Canonicalizes a URL that is already absolute
pub fn canonicalize_url(url: &Url) -> Result<CanonicalUrl, UrlError> {
    canonicalize_absolute(url.clone())
}

/// Normalizes a user-supplied seed, assuming `https://` if no scheme is given
///
/// # Examples
///
/// ```
/// use web_archive::url::normalize_seed;
///
/// assert_eq!(normalize_seed("example.com").unwrap().as_str(), "https://example.com/");
/// assert!(normalize_seed("ftp://example.com/").is_err());
/// ```
pub fn normalize_seed(raw: &str) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&with_scheme).map_err(|e| UrlError::Parse(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }
    Ok(url)
}

fn canonicalize_absolute(mut url: Url) -> Result<CanonicalUrl, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);
    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &params {
                serializer.append_pair(key, value);
            }
            url.set_query(Some(&serializer.finish()));
        }
    }

    Ok(CanonicalUrl::from_normalized(url))
}

/// Collapses empty segments and removes the trailing slash (except for root)
///
/// Dot segments are already resolved by the URL parser.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    // Stable sort keeps the relative order of repeated keys
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
