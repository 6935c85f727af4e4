//! Field mapping from OPMS item records to the NetSuite item schema.
//!
//! Mapping is a pure function of the source snapshot and the vendor mapping
//! lookup: the same source state always yields the same [`MappedRecord`].
//! Category sets are sorted lexicographically before joining so retrieval
//! order never leaks into the output. Validation problems are surfaced here,
//! before any remote call is made.

use serde::Serialize;
use thiserror::Error;

use crate::models::{item, vendor_mapping};

/// Errors produced while mapping a source record.
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("item {item_id} has no display name")]
    MissingName { item_id: i64 },
    #[error("item {item_id} has no categories")]
    MissingCategories { item_id: i64 },
    #[error("item {item_id} has a malformed category list: {detail}")]
    MalformedCategories { item_id: i64, detail: String },
    #[error("item {item_id} references vendor {vendor_id} with no external mapping")]
    UnmappedVendor { item_id: i64, vendor_id: i64 },
}

impl MapError {
    /// Whether the failure is an unresolved reference (no mapping row) rather
    /// than bad field data.
    pub fn is_unmapped_reference(&self) -> bool {
        matches!(self, MapError::UnmappedVendor { .. })
    }
}

/// Flat field set matching the external item schema. Serialized as the body
/// of the record-mutation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedRecord {
    /// Stable external handle derived from the OPMS id
    #[serde(rename = "itemid")]
    pub item_id: String,
    #[serde(rename = "displayname")]
    pub display_name: String,
    #[serde(rename = "vendor")]
    pub vendor_id: String,
    #[serde(rename = "vendorname")]
    pub vendor_name: String,
    /// Categories joined into a single delimited string, lexicographic order
    #[serde(rename = "class")]
    pub category_display: String,
    /// NetSuite boolean literal: "T" when the item is NOT active in OPMS
    #[serde(rename = "isinactive")]
    pub is_inactive: &'static str,
    #[serde(rename = "istaxable")]
    pub is_taxable: &'static str,
    /// Price rendered with exactly two decimal places
    #[serde(rename = "baseprice", skip_serializing_if = "Option::is_none")]
    pub base_price: Option<String>,
    #[serde(rename = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_item_id: Option<String>,
}

/// External item handle for an OPMS record id.
pub fn external_item_handle(record_id: i64) -> String {
    format!("OPMS-{}", record_id)
}

fn boolean_literal(value: bool) -> &'static str {
    if value { "T" } else { "F" }
}

/// Map one source snapshot to the external schema.
///
/// `vendor` is the pre-computed mapping row for the item's vendor, if one
/// exists. A missing mapping is a recoverable condition reported as
/// [`MapError::UnmappedVendor`], never a panic.
pub fn map_item(
    item: &item::Model,
    vendor: Option<&vendor_mapping::Model>,
) -> Result<MappedRecord, MapError> {
    let name = item.name.trim();
    if name.is_empty() {
        return Err(MapError::MissingName { item_id: item.id });
    }

    let vendor = vendor.ok_or(MapError::UnmappedVendor {
        item_id: item.id,
        vendor_id: item.vendor_id,
    })?;

    let categories = collect_categories(item)?;
    if categories.is_empty() {
        return Err(MapError::MissingCategories { item_id: item.id });
    }

    Ok(MappedRecord {
        item_id: external_item_handle(item.id),
        display_name: name.to_string(),
        vendor_id: vendor.external_vendor_id.clone(),
        vendor_name: vendor.external_vendor_name.clone(),
        category_display: categories.join("/"),
        is_inactive: boolean_literal(!item.is_active),
        is_taxable: boolean_literal(item.is_taxable),
        base_price: item.base_price.map(|p| format!("{:.2}", p)),
        parent_item_id: item.parent_id.map(external_item_handle),
    })
}

/// Pull the category list out of the JSON column, normalized and sorted.
fn collect_categories(item: &item::Model) -> Result<Vec<String>, MapError> {
    let array = item
        .categories
        .as_array()
        .ok_or_else(|| MapError::MalformedCategories {
            item_id: item.id,
            detail: "expected a JSON array of strings".to_string(),
        })?;

    let mut categories = Vec::with_capacity(array.len());
    for entry in array {
        let value = entry.as_str().ok_or_else(|| MapError::MalformedCategories {
            item_id: item.id,
            detail: format!("non-string category entry: {}", entry),
        })?;
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            categories.push(trimmed.to_string());
        }
    }

    categories.sort();
    categories.dedup();
    Ok(categories)
}
