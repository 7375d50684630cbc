//! Metadata Catalog (C3, §4.3).
//!
//! Composes the three RETS metadata calls (`METADATA-RESOURCE`,
//! `METADATA-CLASS`, `METADATA-TABLE`) into a derived catalog, cached in
//! process and persisted to disk as JSON, matching the teacher's
//! `AppConfig::load_from`/`save` disk round-trip.

pub mod types;

use crate::rets::client::{RetsClient, Session};
use crate::rets::operations::{self, OperationError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
pub use types::{Class, DataType, FieldDef, Interpretation, LookupValue, Resource, SyncType};

#[derive(Debug, Error)]
pub enum CatalogError {
	#[error(transparent)]
	Operation(#[from] OperationError),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
	pub resources: Vec<Resource>,
}

impl Catalog {
	pub fn resource(&self, resource_id: &str) -> Option<&Resource> {
		self.resources.iter().find(|r| r.resource_id == resource_id)
	}
}

/// In-process cache plus disk persistence for the derived catalog.
pub struct CatalogStore {
	cache_path: std::path::PathBuf,
	cached: RwLock<Option<Arc<Catalog>>>,
}

impl CatalogStore {
	pub fn new(cache_path: impl AsRef<Path>) -> Self {
		Self {
			cache_path: cache_path.as_ref().to_path_buf(),
			cached: RwLock::new(None),
		}
	}

	/// Refresh the catalog if not cached; cache invalidated only by an
	/// explicit `invalidate()` call (§3.3 lifecycle).
	#[instrument(skip(self, client, session))]
	pub async fn get_or_refresh(
		&self,
		client: &RetsClient,
		session: &Session,
	) -> Result<Arc<Catalog>, CatalogError> {
		if let Some(catalog) = self.cached.read().await.clone() {
			return Ok(catalog);
		}

		let catalog = Arc::new(self.load_or_fetch(client, session).await?);
		*self.cached.write().await = Some(catalog.clone());
		Ok(catalog)
	}

	/// Return the in-process cached catalog without fetching, for callers
	/// (e.g. the photo scheduler) that only want to avoid a login when the
	/// sync engine has not populated it yet.
	pub async fn cached(&self) -> Option<Arc<Catalog>> {
		self.cached.read().await.clone()
	}

	pub async fn invalidate(&self) {
		*self.cached.write().await = None;
	}

	async fn load_or_fetch(&self, client: &RetsClient, session: &Session) -> Result<Catalog, CatalogError> {
		if let Ok(bytes) = tokio::fs::read(&self.cache_path).await {
			if let Ok(catalog) = serde_json::from_slice::<Catalog>(&bytes) {
				debug!("loaded catalog from disk cache");
				return Ok(catalog);
			}
		}

		let catalog = fetch_catalog(client, session).await?;
		if let Some(parent) = self.cache_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(&self.cache_path, serde_json::to_vec_pretty(&catalog)?).await?;
		Ok(catalog)
	}
}

/// Fetch `METADATA-RESOURCE`, then `METADATA-CLASS`/`METADATA-TABLE` per
/// resource, and derive the catalog entries (§4.3).
#[instrument(skip(client, session))]
pub async fn fetch_catalog(client: &RetsClient, session: &Session) -> Result<Catalog, CatalogError> {
	let resource_meta = operations::get_metadata(client, session, "METADATA-RESOURCE", "0").await?;

	let mut resources = Vec::new();
	for block in &resource_meta.blocks {
		let resource_id_idx = column_index(&block.columns, "ResourceID");
		let key_field_idx = column_index(&block.columns, "KeyField");

		for row in &block.data {
			let Some(resource_id) = resource_id_idx.and_then(|i| row.get(i)) else {
				continue;
			};
			let key_field = key_field_idx
				.and_then(|i| row.get(i))
				.filter(|s| !s.is_empty())
				.cloned();

			let classes = fetch_classes(client, session, resource_id).await.unwrap_or_default();
			let fields = fetch_fields(client, session, resource_id, &classes).await;

			let update_field_name = fields
				.iter()
				.find(|f| types::is_update_field_candidate(&f.system_name))
				.map(|f| f.system_name.clone());
			let sync_type = if update_field_name.is_some() {
				SyncType::Partial
			} else {
				SyncType::Full
			};
			let sync_interval_minutes =
				types::sync_interval_minutes(resource_id, update_field_name.is_some());

			resources.push(Resource {
				resource_id: resource_id.clone(),
				key_field,
				description: resource_id.clone(),
				sync_interval_minutes,
				update_field_name,
				sync_type,
				classes: if classes.is_empty() {
					vec![None]
				} else {
					classes.into_iter().map(|c| Some(c.class_name)).collect()
				},
			});
		}
	}

	Ok(Catalog { resources })
}

async fn fetch_classes(client: &RetsClient, session: &Session, resource_id: &str) -> Result<Vec<Class>, CatalogError> {
	let id = format!("{resource_id}:0");
	let meta = operations::get_metadata(client, session, "METADATA-CLASS", &id).await?;

	let mut classes = Vec::new();
	for block in &meta.blocks {
		let name_idx = column_index(&block.columns, "ClassName");
		let desc_idx = column_index(&block.columns, "Description");
		for row in &block.data {
			let Some(class_name) = name_idx.and_then(|i| row.get(i)) else {
				continue;
			};
			classes.push(Class {
				class_name: class_name.clone(),
				description: desc_idx.and_then(|i| row.get(i)).cloned().unwrap_or_default(),
			});
		}
	}
	Ok(classes)
}

/// Fetch `METADATA-TABLE` for every class of a resource and flatten the
/// field list (used only to discover the update field here; the schema
/// generator re-fetches per-class table metadata when it creates a table).
async fn fetch_fields(client: &RetsClient, session: &Session, resource_id: &str, classes: &[Class]) -> Vec<FieldDef> {
	let class_names: Vec<String> = if classes.is_empty() {
		vec![resource_id.to_string()]
	} else {
		classes.iter().map(|c| c.class_name.clone()).collect()
	};

	let mut fields = Vec::new();
	for class_name in &class_names {
		let id = format!("{resource_id}:{class_name}");
		match fetch_table_fields(client, session, &id).await {
			Ok(mut class_fields) => fields.append(&mut class_fields),
			Err(e) => warn!(resource_id, class_name, error = %e, "failed to fetch table metadata"),
		}
	}
	fields
}

/// Fetch and decode `METADATA-TABLE` for a single `resource:class` id into
/// `FieldDef`s, applying the type-mapping rules used by the schema
/// generator (§4.4) to classify each row.
pub async fn fetch_table_fields(client: &RetsClient, session: &Session, id: &str) -> Result<Vec<FieldDef>, CatalogError> {
	let meta = operations::get_metadata(client, session, "METADATA-TABLE", id).await?;
	let mut fields = Vec::new();

	for block in &meta.blocks {
		let idx = |name: &str| column_index(&block.columns, name);
		let system_name_idx = idx("SystemName");
		let long_name_idx = idx("LongName");
		let standard_name_idx = idx("StandardName");
		let data_type_idx = idx("DataType");
		let max_length_idx = idx("MaximumLength");
		let precision_idx = idx("Precision");
		let interpretation_idx = idx("Interpretation");
		let lookup_name_idx = idx("LookupName");
		let required_idx = idx("Required");

		for row in &block.data {
			let Some(system_name) = system_name_idx.and_then(|i| row.get(i)) else {
				continue;
			};
			let raw_type = data_type_idx.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("Character");
			let max_length = max_length_idx.and_then(|i| row.get(i)).and_then(|s| s.parse::<u32>().ok());
			let precision = precision_idx.and_then(|i| row.get(i)).and_then(|s| s.parse::<u32>().ok());

			let interpretation = match interpretation_idx.and_then(|i| row.get(i)).map(String::as_str) {
				Some("LookupMulti") => Interpretation::LookupMulti,
				Some("Lookup") => Interpretation::Lookup,
				_ => Interpretation::None,
			};

			let data_type = map_raw_data_type(raw_type, max_length, precision);

			fields.push(FieldDef {
				system_name: system_name.clone(),
				long_name: long_name_idx.and_then(|i| row.get(i)).cloned().unwrap_or_else(|| system_name.clone()),
				standard_name: standard_name_idx.and_then(|i| row.get(i)).filter(|s| !s.is_empty()).cloned(),
				data_type,
				interpretation,
				lookup_name: lookup_name_idx.and_then(|i| row.get(i)).filter(|s| !s.is_empty()).cloned(),
				required: required_idx
					.and_then(|i| row.get(i))
					.map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
					.unwrap_or(false),
			});
		}
	}

	Ok(fields)
}

fn map_raw_data_type(raw: &str, max_length: Option<u32>, precision: Option<u32>) -> DataType {
	match raw {
		"Int" => DataType::Int,
		"Small" => DataType::Small,
		"Tiny" => DataType::Tiny,
		"Long" => DataType::Long,
		"DateTime" => DataType::DateTime,
		"Date" => DataType::Date,
		"Time" => DataType::Time,
		"Boolean" => DataType::Boolean,
		"Decimal" => DataType::Decimal {
			max_length: max_length.unwrap_or(10),
			precision: precision.unwrap_or(2),
		},
		_ => DataType::Character { max_length },
	}
}

fn column_index(columns: &[String], name: &str) -> Option<usize> {
	columns.iter().position(|c| c == name)
}

pub type ResourceCatalogMap = HashMap<String, Resource>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_character_within_varchar_range() {
		assert!(matches!(
			map_raw_data_type("Character", Some(50), None),
			DataType::Character { max_length: Some(50) }
		));
	}

	#[test]
	fn maps_decimal_with_precision() {
		assert!(matches!(
			map_raw_data_type("Decimal", Some(10), Some(2)),
			DataType::Decimal { max_length: 10, precision: 2 }
		));
	}

	#[test]
	fn catalog_resource_lookup() {
		let catalog = Catalog {
			resources: vec![Resource {
				resource_id: "Property".into(),
				key_field: Some("LIST_87".into()),
				description: "Property".into(),
				sync_interval_minutes: 1,
				update_field_name: Some("L_UpdateDate".into()),
				sync_type: SyncType::Partial,
				classes: vec![Some("RE_1".into())],
			}],
		};
		assert!(catalog.resource("Property").is_some());
		assert!(catalog.resource("Missing").is_none());
	}
}
