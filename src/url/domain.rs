use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use web_archive::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true when both URLs name the same host
///
/// Scheme and port are ignored, so an `http` link back to an `https` seed
/// still counts as same-origin.
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (extract_host(a), extract_host(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Directory name used for a host inside the archive root
///
/// Non-default ports are appended so two servers on one host never share a
/// directory.
pub fn host_dir_name(url: &Url) -> String {
    let host = extract_host(url).unwrap_or_else(|| "unknown-host".to_string());
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();

    match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host,
    }
}
