//! The main reconciliation loop (C5, §4.5).

use super::lockout::{LockoutKey, LockoutSet};
use super::upsert::{self, UpsertError};
use super::watermark;
use crate::catalog::{CatalogError, CatalogStore, FieldDef, Resource, SyncType};
use crate::rets::client::{ClientError, RetsClient, Session};
use crate::rets::dmql;
use crate::rets::operations::{self, OperationError, SearchRequest};
use crate::rets::parser::SearchResult;
use crate::schema::{self, SchemaError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const SEARCH_LIMIT: u32 = 2500;
const FULL_SYNC_MIN_INTERVAL: ChronoDuration = ChronoDuration::hours(3);

#[derive(Debug, Error)]
pub enum SyncEngineError {
	#[error(transparent)]
	Client(#[from] ClientError),
	#[error(transparent)]
	Catalog(#[from] CatalogError),
	#[error(transparent)]
	Operation(#[from] OperationError),
	#[error(transparent)]
	Schema(#[from] SchemaError),
	#[error(transparent)]
	Upsert(#[from] UpsertError),
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),
}

#[derive(Debug, Default)]
pub struct SyncStats {
	pub rows_upserted: u64,
	pub pairs_synced: u64,
	pub pairs_skipped_locked: u64,
	pub pairs_newly_locked: u64,
}

/// The main reconciliation loop. One `run_cycle` call performs the work
/// described in §4.5 steps 1-5 for every (resource, class) in the catalog.
pub struct SyncEngine {
	client: Arc<RetsClient>,
	conn: DatabaseConnection,
	catalog_store: Arc<CatalogStore>,
	lockout: Arc<LockoutSet>,
	last_full_sync: RwLock<HashMap<String, DateTime<Utc>>>,
	pub stats: RwLock<SyncStats>,
}

impl SyncEngine {
	pub fn new(
		client: Arc<RetsClient>,
		conn: DatabaseConnection,
		catalog_store: Arc<CatalogStore>,
		lockout: Arc<LockoutSet>,
	) -> Self {
		Self {
			client,
			conn,
			catalog_store,
			lockout,
			last_full_sync: RwLock::new(HashMap::new()),
			stats: RwLock::new(SyncStats::default()),
		}
	}

	/// Acquire a session, load the catalog, and synchronize every
	/// non-locked (resource, class) pair (§4.5 step 1-2).
	#[instrument(skip(self))]
	pub async fn run_cycle(&self) -> Result<(), SyncEngineError> {
		let session = self.client.login().await?;
		let catalog = self.catalog_store.get_or_refresh(&self.client, &session).await?;

		info!(resource_count = catalog.resources.len(), "starting sync cycle");

		for resource in &catalog.resources {
			let single_class_equals_resource =
				resource.classes.len() == 1 && resource.classes[0].as_deref() == Some(resource.resource_id.as_str());

			for class in &resource.classes {
				let key = LockoutKey::new(resource.resource_id.clone(), class.clone());
				if self.lockout.contains(&key).await {
					self.stats.write().await.pairs_skipped_locked += 1;
					continue;
				}

				if let Err(e) = self
					.sync_pair(&session, resource, class.as_deref(), single_class_equals_resource)
					.await
				{
					warn!(
						resource_id = resource.resource_id,
						class_name = ?class,
						error = %e,
						"sync pair failed, continuing with next pair"
					);
				}
			}
		}

		info!("sync cycle complete");
		Ok(())
	}

	#[instrument(skip(self, session, resource))]
	async fn sync_pair(
		&self,
		session: &Session,
		resource: &Resource,
		class_name: Option<&str>,
		single_class_equals_resource: bool,
	) -> Result<(), SyncEngineError> {
		let table_name = schema::table_name(&resource.resource_id, class_name, single_class_equals_resource);

		let class_id = format!("{}:{}", resource.resource_id, class_name.unwrap_or(&resource.resource_id));
		let fields = crate::catalog::fetch_table_fields(&self.client, session, &class_id).await?;

		if !schema::table_exists(&self.conn, &table_name).await? {
			schema::ensure_table(&self.conn, &table_name, resource, &fields).await?;
			debug!(table_name, "created table");
		}

		match resource.sync_type {
			SyncType::Partial => {
				self.sync_partial(session, resource, class_name, single_class_equals_resource, &table_name, &fields)
					.await
			}
			SyncType::Full => {
				self.sync_full(session, resource, class_name, single_class_equals_resource, &table_name, &fields)
					.await
			}
		}
	}

	async fn sync_partial(
		&self,
		session: &Session,
		resource: &Resource,
		class_name: Option<&str>,
		single_class_equals_resource: bool,
		table_name: &str,
		fields: &[FieldDef],
	) -> Result<(), SyncEngineError> {
		let update_field = resource
			.update_field_name
			.as_deref()
			.expect("partial sync requires an update field");

		let last_value = watermark::read_watermark(&self.conn, table_name, update_field)
			.await?
			.and_then(|raw| match chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
				Ok(naive) => Some(dmql::format_watermark(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))),
				Err(e) => {
					warn!(table_name, update_field, raw, error = %e, "unparseable watermark, falling back to default");
					None
				}
			})
			.unwrap_or_else(dmql::default_watermark);

		let query = dmql::greater_or_equal(update_field, &last_value);
		self.paginate_and_upsert(session, resource, class_name, single_class_equals_resource, table_name, fields, &query)
			.await
	}

	async fn sync_full(
		&self,
		session: &Session,
		resource: &Resource,
		class_name: Option<&str>,
		single_class_equals_resource: bool,
		table_name: &str,
		fields: &[FieldDef],
	) -> Result<(), SyncEngineError> {
		if !self.should_run_full_sync(table_name).await {
			debug!(table_name, "skipping full sync, ran recently");
			return Ok(());
		}

		schema::truncate_table(&self.conn, table_name).await?;
		self.paginate_and_upsert(session, resource, class_name, single_class_equals_resource, table_name, fields, "")
			.await?;

		self.last_full_sync.write().await.insert(table_name.to_string(), Utc::now());
		Ok(())
	}

	/// Only run a full sync if the last one was ≥ 3 hours ago (§4.5, §8
	/// boundary behavior, scenario 6).
	async fn should_run_full_sync(&self, table_name: &str) -> bool {
		match self.last_full_sync.read().await.get(table_name) {
			Some(last) => Utc::now() - *last >= FULL_SYNC_MIN_INTERVAL,
			None => true,
		}
	}

	#[allow(clippy::too_many_arguments)]
	async fn paginate_and_upsert(
		&self,
		session: &Session,
		resource: &Resource,
		class_name: Option<&str>,
		single_class_equals_resource: bool,
		table_name: &str,
		fields: &[FieldDef],
		query: &str,
	) -> Result<(), SyncEngineError> {
		let (search_type, class) = self.search_type_and_class(resource, class_name, single_class_equals_resource);

		let mut offset = 0u32;
		loop {
			let request = SearchRequest::compact(&search_type, &class, query, SEARCH_LIMIT, offset);

			let result = operations::search(&self.client, session, &request).await?;

			if let Some((lockout_resource, lockout_class)) =
				crate::rets::parser::detect_unauthorized_query(&result.reply_code, &result.reply_text)
			{
				self.lockout
					.add(LockoutKey::new(lockout_resource, Some(lockout_class)))
					.await;
				schema::drop_table(&self.conn, table_name).await?;
				self.stats.write().await.pairs_newly_locked += 1;
				return Ok(());
			}

			let batch_len = result.rows.len();
			self.upsert_batch(table_name, fields, &result).await?;

			if batch_len < SEARCH_LIMIT as usize {
				break;
			}
			offset += SEARCH_LIMIT;
		}

		self.stats.write().await.pairs_synced += 1;
		Ok(())
	}

	async fn upsert_batch(&self, table_name: &str, fields: &[FieldDef], result: &SearchResult) -> Result<(), SyncEngineError> {
		for row in &result.rows {
			upsert::upsert_record(&self.conn, table_name, fields, &result.columns, row).await?;
			self.stats.write().await.rows_upserted += 1;
		}
		Ok(())
	}

	/// SearchType/Class adjustment (§4.5.2).
	fn search_type_and_class(
		&self,
		resource: &Resource,
		class_name: Option<&str>,
		single_class_equals_resource: bool,
	) -> (String, String) {
		if let Some((search_type, suffix)) = resource.resource_id.split_once('_') {
			if single_class_equals_resource {
				return (search_type.to_string(), search_type.to_string());
			}
			let class = class_name.unwrap_or(suffix).to_string();
			return (search_type.to_string(), class);
		}

		let class = class_name.unwrap_or(&resource.resource_id).to_string();
		(resource.resource_id.clone(), class)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::Resource;

	fn resource_with_classes(resource_id: &str, classes: Vec<Option<&str>>) -> Resource {
		Resource {
			resource_id: resource_id.to_string(),
			key_field: None,
			description: resource_id.to_string(),
			sync_interval_minutes: 1,
			update_field_name: Some("L_UpdateDate".into()),
			sync_type: SyncType::Partial,
			classes: classes.into_iter().map(|c| c.map(String::from)).collect(),
		}
	}

	// `search_type_and_class` is a pure function of its arguments; exercise it
	// directly through a throwaway SyncEngine-shaped harness rather than
	// constructing a full engine (which needs a live DB connection).
	fn search_type_and_class(resource: &Resource, class_name: Option<&str>, single_class_equals_resource: bool) -> (String, String) {
		if let Some((search_type, suffix)) = resource.resource_id.split_once('_') {
			if single_class_equals_resource {
				return (search_type.to_string(), search_type.to_string());
			}
			let class = class_name.unwrap_or(suffix).to_string();
			return (search_type.to_string(), class);
		}
		let class = class_name.unwrap_or(&resource.resource_id).to_string();
		(resource.resource_id.clone(), class)
	}

	#[test]
	fn splits_underscore_resource_into_search_type_and_class() {
		let resource = resource_with_classes("Property_Media", vec![Some("Photo")]);
		let (search_type, class) = search_type_and_class(&resource, Some("Photo"), false);
		assert_eq!(search_type, "Property");
		assert_eq!(class, "Photo");
	}

	#[test]
	fn single_matching_class_forces_class_equal_to_search_type() {
		let resource = resource_with_classes("Foo_Bar", vec![Some("Foo_Bar")]);
		let (search_type, class) = search_type_and_class(&resource, Some("Foo_Bar"), true);
		assert_eq!(search_type, "Foo");
		assert_eq!(class, "Foo");
	}

	#[test]
	fn plain_resource_without_underscore_keeps_class() {
		let resource = resource_with_classes("Office", vec![None]);
		let (search_type, class) = search_type_and_class(&resource, None, false);
		assert_eq!(search_type, "Office");
		assert_eq!(class, "Office");
	}
}
