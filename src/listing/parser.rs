//! HTML parser for listing pages
//!
//! This module extracts from a listing document:
//! - Record cards (identifier, detail URL and the partial fields on the card)
//! - The category's page count from the pagination block

use crate::listing::{ListingParser, ListingRecord};
use crate::url::{extract_identifier, resolve_detail_url};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Default [`ListingParser`] for the directory's card markup
///
/// # Card Rules
///
/// - A card is a `div.serp-container`
/// - Its name link is `h2.full-name a[href]`; cards without one are skipped
/// - Only links containing the detail path marker are records (firm and
///   contact links share the card layout)
/// - The identifier is the 36-character stem of `/{identifier}.html`
/// - Repeated identifiers on one page (sponsored cards) are kept once
#[derive(Debug, Clone)]
pub struct HtmlListingParser {
    detail_path_marker: String,
}

impl HtmlListingParser {
    pub fn new(detail_path_marker: impl Into<String>) -> Self {
        Self {
            detail_path_marker: detail_path_marker.into(),
        }
    }

    fn parse_card(&self, card: ElementRef<'_>, page_url: &Url) -> Option<ListingRecord> {
        let name_link = select_first(card, "h2.full-name a[href]")?;
        let href = name_link.value().attr("href")?;

        if !href.contains(&self.detail_path_marker) {
            return None;
        }

        let detail_url = resolve_detail_url(href, page_url)?;
        let identifier = extract_identifier(detail_url.as_str())?;

        let mut record = ListingRecord::new(identifier, detail_url.to_string());
        record.name = element_text(name_link);

        if let Some(firm) = select_first(card, "a.single-link") {
            record.organization = element_text(firm);
        }

        if let Some(phone) = select_first(card, r#"a[href^="tel:"]"#) {
            record.phone = phone
                .value()
                .attr("href")
                .map(normalize_phone)
                .unwrap_or_default();
        }

        if let Some(tagline) = select_first(card, "p.ts_tagline") {
            record.description = element_text(tagline);
        }

        if let Some(ribbon) = select_first(card, "i.icon-ribbon") {
            let label = ribbon.value().attr("aria-label").unwrap_or("");
            record.badge = badge_from_label(label).to_string();
        }

        Some(record)
    }
}

impl Default for HtmlListingParser {
    fn default() -> Self {
        Self::new("/lawyer/")
    }
}

impl ListingParser for HtmlListingParser {
    fn parse_listing(&self, document: &str, page_url: &Url) -> Vec<ListingRecord> {
        let html = Html::parse_document(document);
        let Ok(card_selector) = Selector::parse("div.serp-container") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        html.select(&card_selector)
            .filter_map(|card| self.parse_card(card, page_url))
            .filter(|record| seen.insert(record.identifier.clone()))
            .collect()
    }

    fn parse_page_count(&self, document: &str, page_url: &Url) -> Option<u32> {
        let html = Html::parse_document(document);
        let pagination_selector = Selector::parse(".pagination").ok()?;
        let link_selector = Selector::parse("a").ok()?;

        let mut max_page: Option<u32> = None;
        for block in html.select(&pagination_selector) {
            for link in block.select(&link_selector) {
                let from_href = link
                    .value()
                    .attr("href")
                    .and_then(|href| page_param(page_url, href));
                let from_label = element_text(link).parse::<u32>().ok();

                for page in [from_href, from_label].into_iter().flatten() {
                    max_page = Some(max_page.map_or(page, |m| m.max(page)));
                }
            }
        }

        max_page
    }
}

fn select_first<'a>(element: ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    element.select(&selector).next()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads `page=N` from a pagination href, resolved against the page URL
fn page_param(page_url: &Url, href: &str) -> Option<u32> {
    page_url
        .join(href)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Strips the `tel:` scheme and the US country code
fn normalize_phone(href: &str) -> String {
    let raw = href.trim_start_matches("tel:").replace("+1", "");
    match raw.strip_prefix('1') {
        Some(rest) => rest.to_string(),
        None => raw,
    }
}

fn badge_from_label(label: &str) -> &'static str {
    if label.contains("Rising Stars") {
        "Rising Stars"
    } else if label.contains("Super Lawyers") {
        "Super Lawyers"
    } else {
        ""
    }
}
