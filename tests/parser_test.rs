//! Integration tests for catalog page parsing
//!
//! Exercises the full extraction path on page fixtures shaped like the real
//! catalog: embedded JS data objects with undefined values, trailing commas,
//! braces inside strings, variant lists, and the pagination markup of search
//! pages.

mod common;

use trawl::parser::{
    extract_product_id, parse_product_page, parse_search_page, search_url,
};
use trawl::ParseError;

fn realistic_product_page() -> String {
    let object = r#"{
        "id": 2005007771,
        "nameEn": "Foldable Garden Kneeler & Seat {Heavy Duty}",
        "name": "折叠花园跪垫",
        "sku": "GK-2005",
        "sellPriceMin": "12.40",
        "sellPriceMax": "18.90",
        "weight": "1350.00",
        "listCount": 84,
        "supplierId": "SUP-5521",
        "supplierName": "HardyTools Co.",
        "category": [{"name": "Garden"}, {"name": "Outdoor Furniture"}],
        "variantList": [
            {"variantSku": "GK-2005-GRN", "variantSellPrice": "12.40",
             "retailPrice": "29.99", "variantWeight": "1350", "packWeight": 1520,
             "vid": "v-green"},
            {"variantSku": "GK-2005-BLK", "variantSellPrice": 18.90,
             "retailPrice": undefined, "variantWeight": "1400", "vid": "v-black"},
        ],
        "warehouseCountry": "US",
        "warehouseInventory": "37",
        "isFreeShipping": false,
        "deliveryCycleDays": 5,
        "imageUrl": "https://img.example/gk-2005.jpg",
        "marketing": {"badge": undefined, "note": "ships {fast}"},
    }"#;

    format!(
        "<html><head><title>Foldable Garden Kneeler</title></head><body>\
         <script>window.productDetailData = {object};</script>{}</body></html>",
        "<div>spec sheet</div>".repeat(400)
    )
}

#[test]
fn test_realistic_product_extraction() {
    let html = realistic_product_page();
    let record = parse_product_page(&html).unwrap();

    assert_eq!(record.id, "2005007771");
    assert_eq!(record.name, "Foldable Garden Kneeler & Seat {Heavy Duty}");
    assert_eq!(record.sku.as_deref(), Some("GK-2005"));
    assert_eq!(record.sell_price_min, 12.40);
    assert_eq!(record.sell_price_max, 18.90);
    assert_eq!(record.weight_min, Some(1350));
    assert_eq!(record.list_count, 84);
    assert_eq!(record.supplier_id.as_deref(), Some("SUP-5521"));
    assert_eq!(record.supplier_name.as_deref(), Some("HardyTools Co."));
    assert_eq!(record.categories, vec!["Garden", "Outdoor Furniture"]);
    assert_eq!(record.warehouse_country.as_deref(), Some("US"));
    assert_eq!(record.warehouse_inventory, Some(37));
    assert_eq!(record.delivery_cycle_days, Some(5));

    assert_eq!(record.variants.len(), 2);
    assert_eq!(record.variants[0].sku, "GK-2005-GRN");
    assert_eq!(record.variants[0].sell_price, 12.40);
    assert_eq!(record.variants[0].retail_price, Some(29.99));
    assert_eq!(record.variants[0].pack_weight, Some(1520));
    assert_eq!(record.variants[1].retail_price, None);
}

#[test]
fn test_parse_is_deterministic() {
    // Re-running the parser on the same payload yields an identical record
    let html = realistic_product_page();
    let first = parse_product_page(&html).unwrap();
    let second = parse_product_page(&html).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_product_page_fixture_round_trip() {
    let html = common::product_page("9001", "Copper Watering Can", 14.5, "US");
    let record = parse_product_page(&html).unwrap();
    assert_eq!(record.id, "9001");
    assert_eq!(record.name, "Copper Watering Can");
    assert_eq!(record.sell_price_min, 14.5);
    assert_eq!(record.warehouse_country.as_deref(), Some("US"));
}

#[test]
fn test_removed_product_page() {
    let html = format!(
        "<html><body><script>window.productDetailData = {{}}</script>\
         <p>Product removed. You may post a sourcing request instead.</p>{}</body></html>",
        " ".repeat(6000)
    );
    assert!(matches!(
        parse_product_page(&html),
        Err(ParseError::ProductRemoved)
    ));
}

#[test]
fn test_challenge_page_is_shape_error() {
    let html = "<html><head><title>Just a moment...</title></head>\
                <body><form action=\"/cdn-cgi/l/cloudflare-challenge\"></form></body></html>";
    let err = parse_product_page(html).unwrap_err();
    assert!(err.is_shape(), "expected shape error, got {err:?}");
}

#[test]
fn test_page_without_detail_object() {
    let html = format!(
        "<html><body>{}</body></html>",
        "<p>category landing page</p>".repeat(400)
    );
    assert!(matches!(
        parse_product_page(&html),
        Err(ParseError::Shape(_))
    ));
}

#[test]
fn test_search_page_extraction() {
    let html = common::search_page(&[
        ("garden-trowel", "111"),
        ("pruning-shears", "222"),
        ("garden-hose", "333"),
    ]);
    let results = parse_search_page(&html).unwrap();

    assert_eq!(results.product_urls.len(), 3);
    assert!(results.product_urls[0].ends_with("/product/garden-trowel-p-111.html"));
    assert_eq!(results.total_records, 3);
    assert_eq!(results.total_pages, 1);
}

#[test]
fn test_search_page_pagination() {
    let html = common::search_page_with_pages(&[("garden-trowel", "111")], 4);
    let results = parse_search_page(&html).unwrap();
    assert_eq!(results.total_pages, 4);
    assert_eq!(results.total_records, 219);
}

#[test]
fn test_search_page_empty_results() {
    let html = format!(
        "<html><body><div class=\"search-list\"></div>\
         <p>No results for this keyword</p>{}</body></html>",
        " ".repeat(6000)
    );
    let results = parse_search_page(&html).unwrap();
    assert!(results.product_urls.is_empty());
    assert_eq!(results.total_pages, 1);
}

#[test]
fn test_product_id_and_search_url_helpers() {
    let url = search_url("garden tools", 2);
    assert_eq!(
        url,
        "https://cjdropshipping.com/search/garden+tools.html?pageNum=2"
    );

    assert_eq!(
        extract_product_id("https://cjdropshipping.com/product/garden-trowel-p-111.html"),
        Some("111".to_string())
    );
}
