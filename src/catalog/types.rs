//! Domain entities for the metadata catalog (§3.1).
//!
//! `FieldDef::data_type` is modeled as the tagged variant recommended in
//! spec.md §9 rather than a loose `(type, max_len, precision)` triple, so the
//! SQL mapper in `schema` is a total function over the variant instead of a
//! partial function guarded by ad-hoc `if`s.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncType {
	Full,
	Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
	pub resource_id: String,
	pub key_field: Option<String>,
	pub description: String,
	pub sync_interval_minutes: u32,
	/// `None` represents the RETS `N/A` sentinel: forces a full sync.
	pub update_field_name: Option<String>,
	pub sync_type: SyncType,
	/// `None` classes list models the synthetic default class (zero classes).
	pub classes: Vec<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
	pub class_name: String,
	pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpretation {
	None,
	Lookup,
	LookupMulti,
}

/// A tagged union over every RETS field shape the schema generator needs to
/// map. Adding a RETS type means adding exactly one match arm in
/// `schema::type_map`, never threading a new boolean through the old
/// `(data_type, max_len, precision)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
	Int,
	Small,
	Tiny,
	Long,
	Character { max_length: Option<u32> },
	Decimal { max_length: u32, precision: u32 },
	DateTime,
	Date,
	Time,
	Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
	pub system_name: String,
	pub long_name: String,
	pub standard_name: Option<String>,
	pub data_type: DataType,
	pub interpretation: Interpretation,
	pub lookup_name: Option<String>,
	pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupValue {
	pub resource_id: String,
	pub class_id: String,
	pub field_name: String,
	pub short_value: String,
	pub long_value: String,
	pub sort_order: i64,
	pub active: bool,
}

/// The synthetic class name under which Property-wide "common" lookups are
/// indexed in the in-memory cache (§4.6).
pub const COMMON_CLASS: &str = "COMMON";

/// The update-field heuristic (§4.3): the first field whose `SystemName`
/// matches `[A-Z]_UpdateDate$` and does not start with `U_`/`O_`.
pub fn is_update_field_candidate(system_name: &str) -> bool {
	if system_name.starts_with("U_") || system_name.starts_with("O_") {
		return false;
	}
	let Some(prefix) = system_name.strip_suffix("_UpdateDate") else {
		return false;
	};
	matches!(prefix.chars().last(), Some(c) if c.is_ascii_uppercase())
}

/// `sync_interval_minutes` heuristic (§4.3).
pub fn sync_interval_minutes(resource_id: &str, has_update_field: bool) -> u32 {
	if !has_update_field {
		return 1440;
	}
	if resource_id.starts_with("Property_") || resource_id == "Property" {
		1
	} else if matches!(resource_id, "Office" | "ActiveOffice" | "Agent" | "ActiveAgent") {
		60
	} else {
		1440
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_field_candidate_rules() {
		assert!(is_update_field_candidate("L_UpdateDate"));
		assert!(!is_update_field_candidate("U_UpdateDate"));
		assert!(!is_update_field_candidate("O_UpdateDate"));
		assert!(!is_update_field_candidate("L_LastModified"));
	}

	#[test]
	fn sync_interval_heuristic() {
		assert_eq!(sync_interval_minutes("Property_RE_1", true), 1);
		assert_eq!(sync_interval_minutes("Office", true), 60);
		assert_eq!(sync_interval_minutes("Agent", true), 60);
		assert_eq!(sync_interval_minutes("Media", true), 1440);
		assert_eq!(sync_interval_minutes("Media", false), 1440);
	}
}
