//! Product detail page extraction
//!
//! Recovers the embedded detail object, repairs it into strict JSON, and
//! normalizes the catalog's loosely-typed fields (numbers as strings, half a
//! dozen alias keys per field) into a [`ProductRecord`].

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::error::ParseError;
use crate::models::{ProductRecord, ProductVariant};
use crate::parser::embed::{extract_balanced_object, find_object_start, repair_to_json};
use crate::parser::{is_blocked_page, is_removed_product_page};

lazy_static! {
    static ref DETAIL_ANCHORS: Vec<Regex> = vec![
        Regex::new(r"window\.productDetailData\s*=\s*").expect("static regex"),
        Regex::new(r"productDetailData\s*=\s*").expect("static regex"),
        Regex::new(r#""productDetailData"\s*:\s*"#).expect("static regex"),
    ];
}

/// Parse a catalog product detail page into a normalized record.
///
/// # Errors
///
/// - `ParseError::ProductRemoved` for removed-product pages (benign)
/// - `ParseError::Shape` when the page is a block page or carries no anchor
/// - `ParseError::Syntax` when the embedded object cannot be made into JSON
/// - `ParseError::Incomplete` when id, name, or all sell prices are missing
pub fn parse_product_page(html: &str) -> Result<ProductRecord, ParseError> {
    if is_removed_product_page(html) {
        return Err(ParseError::ProductRemoved);
    }

    if is_blocked_page(html) {
        return Err(ParseError::Shape("anti-bot challenge page".to_string()));
    }

    let start = find_object_start(html, &DETAIL_ANCHORS).ok_or_else(|| {
        ParseError::Shape(format!(
            "product detail anchor not found (page length {})",
            html.len()
        ))
    })?;

    let object = extract_balanced_object(html, start)?;
    let json = repair_to_json(object);

    let data: Value = serde_json::from_str(&json)
        .map_err(|e| ParseError::Syntax(format!("embedded detail object: {e}")))?;

    normalize(&data)
}

/// Normalize a raw detail object into a [`ProductRecord`].
pub fn normalize(data: &Value) -> Result<ProductRecord, ParseError> {
    let id = string_field(data, &["id", "productId", "pid"])
        .ok_or_else(|| ParseError::Incomplete("missing product id".to_string()))?;

    // English name preferred; the catalog mixes several alias keys
    let name = string_field(
        data,
        &["nameEn", "productNameEn", "entryNameEn", "name", "productName"],
    )
    .ok_or_else(|| ParseError::Incomplete("missing product name".to_string()))?;

    let base_price = number_field(data, &["sellPrice", "sellPriceMin"]);
    let sell_price_min = number_field(data, &["sellPriceMin"]).or(base_price);
    let sell_price_max = number_field(data, &["sellPriceMax"]).or(base_price);

    let (sell_price_min, sell_price_max) = match (sell_price_min, sell_price_max) {
        (Some(min), Some(max)) => (min, max),
        (Some(min), None) => (min, min),
        (None, Some(max)) => (max, max),
        (None, None) => {
            return Err(ParseError::Incomplete("missing sell price".to_string()));
        }
    };

    let weight_min = integer_field(data, &["weight", "productWeight"]);
    let weight_max = integer_field(data, &["weightMax"]).or(weight_min);

    let warehouse_inventory = integer_field(data, &["warehouseInventory", "inventory"]);

    Ok(ProductRecord {
        id,
        name,
        sku: string_field(data, &["sku", "productSku"]),
        sell_price_min,
        sell_price_max,
        weight_min,
        weight_max,
        list_count: integer_field(data, &["listCount", "listedNum"]).unwrap_or(0),
        supplier_id: string_field(data, &["supplierId", "supplierID"]),
        supplier_name: string_field(data, &["supplierName"]),
        categories: categories(data),
        variants: variants(data),
        warehouse_country: string_field(data, &["warehouseCountry", "warehouseCountryCode"]),
        warehouse_inventory,
        is_free_shipping: data
            .get("isFreeShipping")
            .or_else(|| data.get("freeShipping"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        delivery_cycle_days: integer_field(data, &["deliveryCycleDays", "deliveryCycle"]),
        image_url: string_field(data, &["imageUrl", "productImage", "mainImage"]),
    })
}

/// First non-empty string among alias keys; numbers are stringified
fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match data.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// First parseable number among alias keys; accepts numeric strings
fn number_field(data: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = data.get(*key).and_then(coerce_number) {
            return Some(n);
        }
    }
    None
}

/// First parseable integer among alias keys; float strings like "1350.00"
/// are truncated the way the catalog intends (grams)
fn integer_field(data: &Value, keys: &[&str]) -> Option<i64> {
    number_field(data, keys).map(|n| n as i64)
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn categories(data: &Value) -> Vec<String> {
    let mut out = Vec::new();

    match data.get("category").or_else(|| data.get("categories")) {
        Some(Value::Array(entries)) => {
            for entry in entries {
                match entry {
                    Value::Object(_) => {
                        if let Some(name) = string_field(entry, &["name", "categoryNameEn"]) {
                            out.push(name);
                        }
                    }
                    Value::String(s) if !s.is_empty() => out.push(s.clone()),
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) if !s.is_empty() => out.push(s.clone()),
        _ => {}
    }

    if out.is_empty() {
        if let Some(name) = string_field(data, &["categoryName", "categoryNameEn"]) {
            out.push(name);
        }
    }

    out
}

fn variants(data: &Value) -> Vec<ProductVariant> {
    let entries = match data.get("variants").or_else(|| data.get("variantList")) {
        Some(Value::Array(entries)) => entries,
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter(|v| v.is_object())
        .map(|v| ProductVariant {
            sku: string_field(v, &["sku", "variantSku"]).unwrap_or_default(),
            sell_price: number_field(v, &["sellPrice", "variantSellPrice"]).unwrap_or(0.0),
            retail_price: number_field(v, &["retailPrice"]),
            weight: integer_field(v, &["weight", "variantWeight"]),
            pack_weight: integer_field(v, &["packWeight"]),
            variant_id: string_field(v, &["vid", "variantId"]),
        })
        .collect()
}
