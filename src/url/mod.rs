//! URL handling for listing and detail pages
//!
//! Listing pages are addressed through a `{category}`/`{page}` template.
//! Detail pages carry the record identifier as the final path segment
//! (`/.../{identifier}.html`), which is the sole dedup key of the crawl.

use url::Url;

/// Length of a record identifier embedded in a detail URL
pub const IDENTIFIER_LEN: usize = 36;

/// Builds the URL of one listing page from the configured template
///
/// # Examples
///
/// ```
/// use directory_harvest::url::listing_url;
///
/// let url = listing_url("https://d.example.com/{category}/?page={page}", "tax-law", 3);
/// assert_eq!(url, "https://d.example.com/tax-law/?page=3");
/// ```
pub fn listing_url(template: &str, category: &str, page: u32) -> String {
    template
        .replace("{category}", category)
        .replace("{page}", &page.to_string())
}

/// Resolves a card link to an absolute detail URL without query or fragment
///
/// Returns None for non-HTTP(S) schemes and hrefs that cannot be resolved.
pub fn resolve_detail_url(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    // Tracking parameters differ per listing page; the detail page does not
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

/// Extracts the record identifier from a detail URL path
///
/// The identifier is the stem of the last path segment when that segment
/// ends in `.html` and the stem is exactly [`IDENTIFIER_LEN`] word or hyphen
/// characters.
///
/// # Examples
///
/// ```
/// use directory_harvest::url::extract_identifier;
///
/// let id = extract_identifier(
///     "https://p.example.com/lawyer/jane-doe/0a1b2c3d-4e5f-6789-abcd-ef0123456789.html",
/// );
/// assert_eq!(id.as_deref(), Some("0a1b2c3d-4e5f-6789-abcd-ef0123456789"));
/// ```
pub fn extract_identifier(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').next()?;
    let stem = segment.strip_suffix(".html")?;

    let valid = stem.chars().count() == IDENTIFIER_LEN
        && stem
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');

    valid.then(|| stem.to_string())
}
