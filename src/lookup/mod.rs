//! Lookup Sync (C6, §4.6).
//!
//! Harvests RETS lookup-value domains into `lookup_values`, materializes the
//! `property_common_lookups` view, and builds the in-memory cache other
//! components read.

use crate::catalog::types::COMMON_CLASS;
use crate::catalog::{Catalog, FieldDef, LookupValue};
use crate::rets::client::{RetsClient, Session};
use crate::rets::operations::{self, OperationError};
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum LookupError {
	#[error(transparent)]
	Operation(#[from] OperationError),
	#[error("database error: {0}")]
	Database(#[from] DbErr),
}

/// `resource -> class -> field -> short_value -> LookupValue`. The synthetic
/// class [`COMMON_CLASS`] holds lookups shared by every class of `Property`.
pub type LookupCache = HashMap<String, HashMap<String, HashMap<String, HashMap<String, LookupValue>>>>;

pub async fn ensure_lookup_table(conn: &impl ConnectionTrait) -> Result<(), DbErr> {
	let sql = "CREATE TABLE IF NOT EXISTS `lookup_values` (\n\
		`resource_id` VARCHAR(64) NOT NULL,\n\
		`class_id` VARCHAR(64) NOT NULL,\n\
		`field_name` VARCHAR(64) NOT NULL,\n\
		`short_value` VARCHAR(128) NOT NULL,\n\
		`long_value` TEXT,\n\
		`metadata` JSON,\n\
		PRIMARY KEY (`resource_id`, `class_id`, `field_name`, `short_value`)\n\
	)";
	conn.execute(Statement::from_string(DatabaseBackend::MySql, sql)).await?;
	Ok(())
}

/// Collect every field with a `LookupName` under `class_id`, fetch
/// `METADATA-LOOKUP_TYPE` once per unique lookup name, and fan the decoded
/// values out to every field that references it (§4.6).
async fn harvest_class(
	client: &RetsClient,
	session: &Session,
	resource_id: &str,
	class_name: &str,
	fields: &[FieldDef],
) -> Result<Vec<LookupValue>, LookupError> {
	let mut fields_by_lookup: HashMap<&str, Vec<&str>> = HashMap::new();
	for field in fields {
		if let Some(lookup_name) = field.lookup_name.as_deref() {
			fields_by_lookup.entry(lookup_name).or_default().push(&field.system_name);
		}
	}

	let mut values = Vec::new();
	for (lookup_name, field_names) in fields_by_lookup {
		let id = format!("{resource_id}:{lookup_name}");
		let meta = match operations::get_metadata(client, session, "METADATA-LOOKUP_TYPE", &id).await {
			Ok(meta) => meta,
			Err(e) => {
				warn!(resource_id, class_name, lookup_name, error = %e, "failed to fetch lookup type metadata");
				continue;
			}
		};

		for block in &meta.blocks {
			let value_idx = block.columns.iter().position(|c| c == "Value");
			let long_idx = block.columns.iter().position(|c| c == "LongValue");

			for row in &block.data {
				let Some(short_value) = value_idx.and_then(|i| row.get(i)) else { continue };
				let long_value = long_idx.and_then(|i| row.get(i)).cloned().unwrap_or_default();
				let sort_order = short_value.parse::<i64>().unwrap_or(0);

				for field_name in &field_names {
					values.push(LookupValue {
						resource_id: resource_id.to_string(),
						class_id: class_name.to_string(),
						field_name: field_name.to_string(),
						short_value: short_value.clone(),
						long_value: long_value.clone(),
						sort_order,
						active: true,
					});
				}
			}
		}
	}

	Ok(values)
}

/// Harvest every resource/class in the catalog, persist to `lookup_values`,
/// materialize `property_common_lookups`, and return the rebuilt in-memory
/// cache (§4.6, §5: "the in-memory lookup cache is rebuilt wholesale").
#[instrument(skip(client, session, catalog, conn))]
pub async fn load_lookups(
	client: &RetsClient,
	session: &Session,
	catalog: &Catalog,
	conn: &impl ConnectionTrait,
) -> Result<LookupCache, LookupError> {
	ensure_lookup_table(conn).await?;

	let mut all_values = Vec::new();
	for resource in &catalog.resources {
		for class in &resource.classes {
			let class_name = class.as_deref().unwrap_or(&resource.resource_id);
			let id = format!("{}:{class_name}", resource.resource_id);
			let fields = match crate::catalog::fetch_table_fields(client, session, &id).await {
				Ok(f) => f,
				Err(e) => {
					warn!(resource_id = resource.resource_id, class_name, error = %e, "failed to fetch fields for lookup harvest");
					continue;
				}
			};
			if fields.iter().all(|f| f.lookup_name.is_none()) {
				continue;
			}
			let values = harvest_class(client, session, &resource.resource_id, class_name, &fields).await?;
			all_values.extend(values);
		}
	}

	debug!(count = all_values.len(), "harvested lookup values");
	store_lookup_values(conn, &all_values).await?;

	let property_class_count = catalog
		.resource("Property")
		.map(|r| r.classes.len())
		.unwrap_or(0);
	materialize_common_view(conn, property_class_count).await?;

	Ok(build_cache(&all_values, property_class_count))
}

async fn store_lookup_values(conn: &impl ConnectionTrait, values: &[LookupValue]) -> Result<(), DbErr> {
	for value in values {
		let metadata = serde_json::json!({ "sort": value.sort_order, "active": value.active });
		let stmt = Statement::from_sql_and_values(
			DatabaseBackend::MySql,
			"REPLACE INTO `lookup_values` (`resource_id`, `class_id`, `field_name`, `short_value`, `long_value`, `metadata`) VALUES (?, ?, ?, ?, ?, ?)",
			[
				Value::from(value.resource_id.clone()),
				Value::from(value.class_id.clone()),
				Value::from(value.field_name.clone()),
				Value::from(value.short_value.clone()),
				Value::from(value.long_value.clone()),
				Value::from(metadata.to_string()),
			],
		);
		conn.execute(stmt).await?;
	}
	Ok(())
}

/// `property_common_lookups`: tuples appearing under every class of
/// `Property` (§4.6).
async fn materialize_common_view(conn: &impl ConnectionTrait, property_class_count: usize) -> Result<(), DbErr> {
	if property_class_count == 0 {
		return Ok(());
	}
	let sql = format!(
		"CREATE OR REPLACE VIEW `property_common_lookups` AS \
		 SELECT `field_name`, `short_value`, MAX(`long_value`) AS `long_value`, MAX(`metadata`) AS `metadata` \
		 FROM `lookup_values` WHERE `resource_id` = 'Property' \
		 GROUP BY `field_name`, `short_value` \
		 HAVING COUNT(DISTINCT `class_id`) = {property_class_count}"
	);
	conn.execute(Statement::from_string(DatabaseBackend::MySql, sql)).await?;
	Ok(())
}

fn build_cache(values: &[LookupValue], property_class_count: usize) -> LookupCache {
	let mut cache: LookupCache = HashMap::new();

	for value in values {
		cache
			.entry(value.resource_id.clone())
			.or_default()
			.entry(value.class_id.clone())
			.or_default()
			.entry(value.field_name.clone())
			.or_default()
			.insert(value.short_value.clone(), value.clone());
	}

	if property_class_count > 0 {
		let mut seen_in: HashMap<(String, String), HashSet<String>> = HashMap::new();
		for value in values.iter().filter(|v| v.resource_id == "Property") {
			seen_in
				.entry((value.field_name.clone(), value.short_value.clone()))
				.or_default()
				.insert(value.class_id.clone());
		}

		let common_entries: Vec<&LookupValue> = values
			.iter()
			.filter(|v| v.resource_id == "Property")
			.filter(|v| {
				seen_in
					.get(&(v.field_name.clone(), v.short_value.clone()))
					.map(|classes| classes.len() == property_class_count)
					.unwrap_or(false)
			})
			.collect();

		let property_cache = cache.entry("Property".to_string()).or_default();
		let common_cache = property_cache.entry(COMMON_CLASS.to_string()).or_default();
		for value in common_entries {
			common_cache
				.entry(value.field_name.clone())
				.or_default()
				.insert(value.short_value.clone(), value.clone());
		}
	}

	cache
}

#[cfg(test)]
mod tests {
	use super::*;

	fn value(class_id: &str, field: &str, short: &str) -> LookupValue {
		LookupValue {
			resource_id: "Property".into(),
			class_id: class_id.into(),
			field_name: field.into(),
			short_value: short.into(),
			long_value: format!("{field}-{short}"),
			sort_order: short.parse().unwrap_or(0),
			active: true,
		}
	}

	#[test]
	fn common_class_only_holds_values_present_in_every_class() {
		let values = vec![
			value("RE_1", "L_Status", "1"),
			value("MF_4", "L_Status", "1"),
			value("RE_1", "L_Style", "2"),
		];
		let cache = build_cache(&values, 2);
		let common = &cache["Property"][COMMON_CLASS];
		assert!(common.get("L_Status").unwrap().contains_key("1"));
		assert!(!common.contains_key("L_Style"));
	}

	#[test]
	fn per_class_cache_is_always_populated() {
		let values = vec![value("RE_1", "L_Status", "1")];
		let cache = build_cache(&values, 1);
		assert!(cache["Property"]["RE_1"]["L_Status"].contains_key("1"));
	}
}
