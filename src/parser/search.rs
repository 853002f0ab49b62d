//! Search and pagination page extraction
//!
//! Search result pages link out to product detail pages; pagination totals
//! decide how many further pages a seed search expands into. Links are pulled
//! from anchor tags rather than raw regex over the whole document so that
//! URLs in script blobs or comments do not leak into the queue.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::error::ParseError;
use crate::parser::is_blocked_page;

/// Catalog origin used to absolutize relative product links
pub const CATALOG_ORIGIN: &str = "https://cjdropshipping.com";

/// Products shown per search page, used when the page count is not printed
const RESULTS_PER_PAGE: i64 = 60;

lazy_static! {
    static ref PRODUCT_PATH: Regex =
        Regex::new(r#"(/product/[^\s"']*-p-\d+\.html)"#).expect("static regex");
    static ref PRODUCT_ID: Regex = Regex::new(r"-p-(\d+)\.html").expect("static regex");
    static ref TOTAL_RECORDS: Regex = Regex::new(r"(\d+)\s*Records").expect("static regex");
    static ref TOTAL_PAGES: [Regex; 2] = [
        Regex::new(r"of\s+(\d+)").expect("static regex"),
        Regex::new(r"of&nbsp;(\d+)").expect("static regex"),
    ];
}

/// Extracted contents of one search or pagination page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    /// Absolute product detail URLs, deduplicated, in page order
    pub product_urls: Vec<String>,

    /// Total pages available for this search
    pub total_pages: i64,

    /// Total records reported by the page, when printed
    pub total_records: i64,
}

/// Parse a search results page.
///
/// # Errors
///
/// Returns `ParseError::Shape` when the page is an anti-bot challenge page.
/// An empty result list on an otherwise normal page is not an error; some
/// keywords genuinely match nothing.
pub fn parse_search_page(html: &str) -> Result<SearchResults, ParseError> {
    if is_blocked_page(html) {
        return Err(ParseError::Shape("anti-bot challenge page".to_string()));
    }

    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut product_urls = Vec::new();

    for element in document.select(&anchors) {
        let href = match element.value().attr("href") {
            Some(href) => href,
            None => continue,
        };

        if let Some(m) = PRODUCT_PATH.captures(href) {
            let path = &m[1];
            let url = format!("{CATALOG_ORIGIN}{path}");
            if seen.insert(url.clone()) {
                product_urls.push(url);
            }
        }
    }

    let (total_pages, total_records) = pagination_info(html);

    Ok(SearchResults {
        product_urls,
        total_pages,
        total_records,
    })
}

/// Extract `(total_pages, total_records)` from pagination markup.
///
/// Falls back to estimating pages from the record count when only the
/// "N Records" badge is present.
pub fn pagination_info(html: &str) -> (i64, i64) {
    let total_records = TOTAL_RECORDS
        .captures(html)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(0);

    let mut total_pages = TOTAL_PAGES
        .iter()
        .find_map(|p| p.captures(html))
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(1);

    if total_records > 0 && total_pages == 1 {
        total_pages = (total_records + RESULTS_PER_PAGE - 1) / RESULTS_PER_PAGE;
        total_pages = total_pages.max(1);
    }

    (total_pages, total_records)
}

/// Extract the catalog product id from a detail URL
pub fn extract_product_id(url: &str) -> Option<String> {
    PRODUCT_ID.captures(url).map(|c| c[1].to_string())
}

/// Build the search URL for a keyword and page number
pub fn search_url(keyword: &str, page: i64) -> String {
    let encoded = keyword.trim().replace(' ', "+");
    let base = format!("{CATALOG_ORIGIN}/search/{encoded}.html");

    if page > 1 {
        format!("{base}?pageNum={page}")
    } else {
        base
    }
}
