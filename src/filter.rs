//! Product admission filtering
//!
//! A parsed product must clear both the job's configuration (price window,
//! warehouse and category include/exclude lists) and the process-wide
//! persistent exclusion rules before it is handed to the scoring stage.
//! Rejections carry a structured reason that feeds the job's filtered
//! counter and operator log.

use crate::models::{JobConfig, ProductRecord};
use crate::storage::exclusions::GroupedRules;

/// Warehouse assumed when a product does not state one
const DEFAULT_WAREHOUSE: &str = "CN";

/// Why a product was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    PriceBelowMin { price: f64, min: f64 },
    PriceAboveMax { price: f64, max: f64 },
    WarehouseNotIncluded { warehouse: String },
    WarehouseExcluded { warehouse: String },
    CategoryNotIncluded { categories: Vec<String> },
    CategoryExcluded { category: String },
    SupplierExcluded { supplier: String },
    KeywordExcluded { keyword: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceBelowMin { price, min } => {
                write!(f, "price ${price:.2} below minimum ${min:.2}")
            }
            Self::PriceAboveMax { price, max } => {
                write!(f, "price ${price:.2} above maximum ${max:.2}")
            }
            Self::WarehouseNotIncluded { warehouse } => {
                write!(f, "warehouse {warehouse} not in include list")
            }
            Self::WarehouseExcluded { warehouse } => {
                write!(f, "warehouse {warehouse} excluded")
            }
            Self::CategoryNotIncluded { categories } => {
                write!(f, "categories {categories:?} not in include list")
            }
            Self::CategoryExcluded { category } => write!(f, "category '{category}' excluded"),
            Self::SupplierExcluded { supplier } => write!(f, "supplier {supplier} excluded"),
            Self::KeywordExcluded { keyword } => {
                write!(f, "name contains excluded keyword '{keyword}'")
            }
        }
    }
}

/// Decide whether a product is admitted.
///
/// Checks run cheapest-first; the first failure wins. Empty include lists
/// mean "everything", matching the job-start semantics of the admin API.
pub fn evaluate(
    product: &ProductRecord,
    config: &JobConfig,
    rules: &GroupedRules,
) -> Result<(), RejectReason> {
    let price = product.sell_price_min;
    if price < config.price_min {
        return Err(RejectReason::PriceBelowMin {
            price,
            min: config.price_min,
        });
    }
    if price > config.price_max {
        return Err(RejectReason::PriceAboveMax {
            price,
            max: config.price_max,
        });
    }

    let warehouse = product
        .warehouse_country
        .as_deref()
        .unwrap_or(DEFAULT_WAREHOUSE)
        .to_uppercase();

    if !config.include_warehouses.is_empty()
        && !config
            .include_warehouses
            .iter()
            .any(|w| w.eq_ignore_ascii_case(&warehouse))
    {
        return Err(RejectReason::WarehouseNotIncluded { warehouse });
    }

    let warehouse_excluded = config
        .exclude_warehouses
        .iter()
        .any(|w| w.eq_ignore_ascii_case(&warehouse))
        || rules.countries.contains(&warehouse.to_lowercase());
    if warehouse_excluded {
        return Err(RejectReason::WarehouseExcluded { warehouse });
    }

    let categories: Vec<String> = product.categories.iter().map(|c| c.to_lowercase()).collect();

    if !config.include_categories.is_empty() {
        let include: Vec<String> = config
            .include_categories
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
        if !categories.iter().any(|c| include.contains(c)) {
            return Err(RejectReason::CategoryNotIncluded {
                categories: product.categories.clone(),
            });
        }
    }

    let exclude_categories: Vec<String> = config
        .exclude_categories
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    for category in &categories {
        if exclude_categories.contains(category) || rules.categories.contains(category) {
            return Err(RejectReason::CategoryExcluded {
                category: category.clone(),
            });
        }
    }

    if let Some(supplier) = &product.supplier_id {
        if rules.suppliers.contains(&supplier.to_lowercase()) {
            return Err(RejectReason::SupplierExcluded {
                supplier: supplier.clone(),
            });
        }
    }

    let name = product.name.to_lowercase();
    for keyword in &rules.keywords {
        if name.contains(keyword.as_str()) {
            return Err(RejectReason::KeywordExcluded {
                keyword: keyword.clone(),
            });
        }
    }

    Ok(())
}
