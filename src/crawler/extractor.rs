//! Listing page extraction
//!
//! Turns rendered listing markup into candidate product records. Each product
//! card is read independently; a card that lacks a link, a name or a usable
//! price is dropped with a warning and never affects its siblings.

use crate::storage::CandidateRecord;
use crate::url::resolve_link;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::str::FromStr;
use url::Url;

/// Compiled selectors for the product card layout
struct CardSelectors {
    card: Selector,
    link: Selector,
    image: Selector,
    seller: Selector,
    location: Selector,
    name: Selector,
    price: Selector,
    rating: Selector,
    rating_icon: Selector,
    rating_count: Selector,
}

impl CardSelectors {
    fn new() -> Option<Self> {
        Some(Self {
            card: Selector::parse("div.pi__core").ok()?,
            link: Selector::parse("div.pi__header a[href]").ok()?,
            image: Selector::parse("span.pi__image img[src]").ok()?,
            seller: Selector::parse(r#"a[class="link link--normal"]"#).ok()?,
            location: Selector::parse("div.pi__seller__location").ok()?,
            name: Selector::parse("a.pi__name").ok()?,
            price: Selector::parse("div.pi__price").ok()?,
            rating: Selector::parse("article.rating__stars").ok()?,
            rating_icon: Selector::parse("i").ok()?,
            rating_count: Selector::parse("span").ok()?,
        })
    }
}

/// Why a card was dropped
#[derive(Debug, PartialEq, Eq)]
enum CardRejection {
    MissingLink,
    MissingName,
    InvalidPrice(String),
}

/// Star rating block of a card
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Rating {
    stars: f64,
    reviews: i64,
}

/// Extracts candidate product records from listing markup
///
/// # Arguments
///
/// * `markup` - Rendered listing page HTML
/// * `base_url` - URL the markup was loaded from, for resolving links
///
/// # Returns
///
/// One record per valid product card, in document order
pub fn extract_listings(markup: &str, base_url: &Url) -> Vec<CandidateRecord> {
    let Some(selectors) = CardSelectors::new() else {
        tracing::error!("Product card selectors failed to compile");
        return Vec::new();
    };

    let document = Html::parse_document(markup);
    let mut records = Vec::new();

    for (index, card) in document.select(&selectors.card).enumerate() {
        match extract_card(card, base_url, &selectors) {
            Ok(record) => records.push(record),
            Err(reason) => {
                tracing::warn!(
                    "Skipping product card {} on {}: {:?}",
                    index,
                    base_url,
                    reason
                );
            }
        }
    }

    tracing::debug!("Extracted {} products from {}", records.len(), base_url);
    records
}

fn extract_card(
    card: ElementRef<'_>,
    base_url: &Url,
    selectors: &CardSelectors,
) -> Result<CandidateRecord, CardRejection> {
    let source_url = card
        .select(&selectors.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_link(href, base_url))
        .ok_or(CardRejection::MissingLink)?;

    let name = first_text(card, &selectors.name).ok_or(CardRejection::MissingName)?;

    let raw_price = first_text(card, &selectors.price).unwrap_or_default();
    let price =
        clean_price(&raw_price).ok_or_else(|| CardRejection::InvalidPrice(raw_price.clone()))?;

    let image_url = card
        .select(&selectors.image)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(|src| match resolve_link(src, base_url) {
            Some(url) => url.to_string(),
            None => src.to_string(),
        });

    let seller_name = first_text(card, &selectors.seller);
    let seller_location = first_text(card, &selectors.location);
    let rating = card
        .select(&selectors.rating)
        .next()
        .map(|block| read_rating(block, selectors))
        .unwrap_or_default();

    let mut additional_data = Map::new();
    additional_data.insert("seller_name".to_string(), optional_string(&seller_name));
    additional_data.insert(
        "seller_location".to_string(),
        optional_string(&seller_location),
    );
    additional_data.insert("rating".to_string(), Value::from(rating.stars));
    additional_data.insert("review_count".to_string(), Value::from(rating.reviews));

    Ok(CandidateRecord {
        source_url: source_url.to_string(),
        name,
        description: None,
        price,
        image_url,
        category: None,
        brand: seller_name,
        additional_data,
    })
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn optional_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn read_rating(block: ElementRef<'_>, selectors: &CardSelectors) -> Rating {
    let mut full = 0u32;
    let mut half = 0u32;
    for icon in block.select(&selectors.rating_icon) {
        match icon.text().collect::<String>().trim() {
            "star" => full += 1,
            "star_half" => half += 1,
            _ => {}
        }
    }

    let reviews = block
        .select(&selectors.rating_count)
        .next()
        .map(|span| span.text().collect::<String>())
        .map(|text| parse_review_count(&text))
        .unwrap_or(0);

    Rating {
        stars: f64::from(full) + 0.5 * f64::from(half),
        reviews,
    }
}

/// Parses a review count such as `"(128)"`; anything unparseable is 0
fn parse_review_count(text: &str) -> i64 {
    text.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim()
        .parse()
        .unwrap_or(0)
}

/// Normalizes a displayed price into a decimal
///
/// Strips the `Rp` currency prefix, whitespace and `.` thousands separators,
/// then reads `,` as the decimal separator. Returns `None` for anything that
/// does not parse to a non-negative number.
///
/// # Examples
///
/// ```
/// use listing_harvest::crawler::clean_price;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// assert_eq!(clean_price("Rp 150.000,50"), Some(Decimal::from_str("150000.50").unwrap()));
/// assert_eq!(clean_price("Hubungi penjual"), None);
/// ```
pub fn clean_price(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .replace("Rp", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned)
        .ok()
        .filter(|price| !price.is_sign_negative())
}
