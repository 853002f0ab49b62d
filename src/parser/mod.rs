//! Catalog page parsing and data extraction
//!
//! The fetcher returns rendered catalog HTML; the data we want lives in a
//! JavaScript object embedded in the page. This module recovers that object
//! and normalizes it:
//!
//! - [`embed`] - Anchored, string-aware balanced-brace JSON recovery
//! - [`product`] - Product detail page extraction and normalization
//! - [`search`] - Search/pagination page extraction (product links, page counts)
//!
//! Page-level guards (anti-bot challenge pages, removed-product pages) live
//! here because both page kinds need them before extraction is attempted.

pub mod embed;
pub mod product;
pub mod search;

pub use product::parse_product_page;
pub use search::{extract_product_id, parse_search_page, search_url, SearchResults};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CHALLENGE_TITLE: Regex =
        Regex::new(r"(?i)<title>[^<]*(?:Attention Required|Just a moment|Access Denied)[^<]*</title>")
            .expect("static regex");
    static ref CAPTCHA_CLASS: Regex =
        Regex::new(r#"(?i)class="[^"]*captcha[^"]*""#).expect("static regex");
    static ref CHALLENGE_FORM: Regex =
        Regex::new(r#"(?i)action="[^"]*cloudflare[^"]*challenge"#).expect("static regex");
    static ref BLOCK_WORDS: Regex = Regex::new(r"(?i)blocked|denied|forbidden").expect("static regex");
    static ref EMPTY_DETAIL: Regex =
        Regex::new(r"productDetailData\s*=\s*\{\s*\}").expect("static regex");
    static ref REMOVAL_MARKERS: [Regex; 5] = [
        Regex::new(r"Product removed\.\s*You may").expect("static regex"),
        Regex::new(r"<[^>]*>Product removed<").expect("static regex"),
        Regex::new(r">\s*Product removed\s*<").expect("static regex"),
        Regex::new(r"(?i)Product has been removed").expect("static regex"),
        Regex::new(r"(?i)This product is no longer available").expect("static regex"),
    ];
}

/// Minimum plausible size for a real catalog page. Challenge and error pages
/// are tiny; real product pages run well past 50 KB.
const MIN_REAL_PAGE_BYTES: usize = 5000;

/// Check whether the HTML is an anti-bot challenge or block page.
///
/// Words like "captcha" and "blocked" appear in the catalog's i18n bundles on
/// every page, so detection keys on structural markers, not bare words.
pub fn is_blocked_page(html: &str) -> bool {
    if CHALLENGE_TITLE.is_match(html) {
        return true;
    }

    if CAPTCHA_CLASS.is_match(html) || CHALLENGE_FORM.is_match(html) {
        return true;
    }

    html.len() < MIN_REAL_PAGE_BYTES && BLOCK_WORDS.is_match(html)
}

/// Check whether the HTML is a removed-product page.
///
/// Strongest signal is an empty embedded data object; the visible removal
/// message is only trusted with surrounding markup context, again because the
/// bare phrase ships in the i18n bundle of every page.
pub fn is_removed_product_page(html: &str) -> bool {
    if EMPTY_DETAIL.is_match(html) {
        return true;
    }

    REMOVAL_MARKERS.iter().any(|m| m.is_match(html))
}
