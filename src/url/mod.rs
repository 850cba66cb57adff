//! URL handling module for Listing-Harvest
//!
//! Queue entries are keyed by the URL exactly as discovered, so this module
//! does not rewrite URLs beyond what `url::Url` itself normalizes. It only
//! validates crawl targets, resolves hrefs, and compares listing identity.

use crate::{UrlError, UrlResult};
use url::Url;

/// Parses and validates a crawl target (seed or discovered link)
///
/// The URL must be absolute, use http or https, and carry a host.
/// The fragment is dropped since it never changes the served page.
///
/// # Examples
///
/// ```
/// use listing_harvest::url::parse_crawl_url;
///
/// let url = parse_crawl_url("https://shop.example.com/search?q=gelang#top").unwrap();
/// assert_eq!(url.as_str(), "https://shop.example.com/search?q=gelang");
/// ```
pub fn parse_crawl_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);
    Ok(url)
}

/// Returns the robots.txt cache key for a URL: `scheme://host[:port]`
pub fn policy_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Returns true if both URLs point at the same listing
///
/// Two URLs are the same listing when host, port and path match; only the
/// query (page number, filters) may differ.
pub fn same_listing(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path() == b.path()
}

/// Resolves an href against a base URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url)
        }
        _ => None,
    }
}
