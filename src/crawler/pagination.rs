//! Pagination link discovery

use crate::url::{resolve_link, same_listing};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

const PAGINATION_SELECTOR: &str = "div.paging a.paging--number, a.paging--next";

/// Finds the "more pages" links of a listing
///
/// Only links on the same host (including port) and path as `current_url`
/// are kept, so the crawl never leaves the listing it was seeded with.
///
/// # Arguments
///
/// * `markup` - Listing page HTML
/// * `current_url` - URL the markup was loaded from
///
/// # Returns
///
/// Deduplicated absolute URLs in lexical order
pub fn discover_links(markup: &str, current_url: &Url) -> BTreeSet<String> {
    let mut links = BTreeSet::new();

    let Ok(selector) = Selector::parse(PAGINATION_SELECTOR) else {
        return links;
    };

    let document = Html::parse_document(markup);
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        match resolve_link(href, current_url) {
            Some(mut url) if same_listing(&url, current_url) => {
                url.set_fragment(None);
                links.insert(url.to_string());
            }
            Some(url) => tracing::debug!("Ignoring off-listing pagination link {}", url),
            None => {}
        }
    }

    links
}
