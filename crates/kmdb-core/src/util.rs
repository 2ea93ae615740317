use url::Url;

/// Normalize a submitted URL for storage and duplicate detection.
///
/// Drops query and fragment, strips a leading `www.` and trailing slashes.
/// Example: `"https://www.telex.hu/belfold/cikk/?utm=x"` → `"https://telex.hu/belfold/cikk"`
pub fn clean_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw.trim()) else {
        return raw.trim().trim_end_matches('/').to_string();
    };
    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    let path = url.path().trim_matches('/');
    if path.is_empty() {
        format!("{}://{}", url.scheme(), host)
    } else {
        format!("{}://{}/{}", url.scheme(), host, path)
    }
}

/// Host of a URL, lowercased.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

/// Last two labels of the host, e.g. `"belfold.index.hu"` → `"index.hu"`.
pub fn registrable_domain(raw: &str) -> Option<String> {
    let host = host_of(raw)?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return Some(host);
    }
    Some(labels[labels.len() - 2..].join("."))
}
