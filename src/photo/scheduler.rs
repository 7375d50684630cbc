//! Photo Processing Scheduler (C10, §4.10).
//!
//! A background loop that selects listings needing photos, dispatches them
//! to the fetcher/pipeline/object-store chain in bounded-concurrency
//! batches, and records per-listing processing state.

use crate::catalog::CatalogStore;
use crate::photo::fetcher::{self, PhotoFetchError};
use crate::photo::object_store::{ObjectStore, StorageError};
use crate::photo::pipeline::{self, ImageError};
use crate::rets::client::RetsClient;
use crate::schema;
use futures::future::join_all;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

const AGGRESSIVE_BACKLOG_THRESHOLD: i64 = 20;
const FATAL_LOOP_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("database error: {0}")]
	Database(#[from] DbErr),
	#[error(transparent)]
	Fetch(#[from] PhotoFetchError),
	#[error(transparent)]
	Image(#[from] ImageError),
	#[error(transparent)]
	Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy)]
struct ModeProfile {
	batch_size: u32,
	inter_batch_wait: Duration,
	idle_wait: Duration,
}

const NORMAL: ModeProfile = ModeProfile {
	batch_size: 5,
	inter_batch_wait: Duration::from_secs(5),
	idle_wait: Duration::from_secs(60),
};

const AGGRESSIVE: ModeProfile = ModeProfile {
	batch_size: 10,
	inter_batch_wait: Duration::from_secs(1),
	idle_wait: Duration::from_secs(10),
};

#[derive(Debug, Clone)]
struct CandidateListing {
	listing_id: String,
	class_name: String,
	table_name: String,
}

pub struct PhotoScheduler {
	conn: DatabaseConnection,
	client: Arc<RetsClient>,
	catalog_store: Arc<CatalogStore>,
	object_store: Arc<ObjectStore>,
	cache_dir: PathBuf,
}

impl PhotoScheduler {
	pub fn new(
		conn: DatabaseConnection,
		client: Arc<RetsClient>,
		catalog_store: Arc<CatalogStore>,
		object_store: Arc<ObjectStore>,
		cache_dir: PathBuf,
	) -> Self {
		Self {
			conn,
			client,
			catalog_store,
			object_store,
			cache_dir,
		}
	}

	pub async fn ensure_tracking_table(&self) -> Result<(), DbErr> {
		let sql = "CREATE TABLE IF NOT EXISTS `PhotoProcessing` (\n\
			`ListingID` VARCHAR(64) NOT NULL,\n\
			`PropertyType` VARCHAR(64) NOT NULL,\n\
			`status` VARCHAR(16) NOT NULL DEFAULT 'pending',\n\
			`needs_reprocessing` TINYINT(1) NOT NULL DEFAULT 1,\n\
			`retry_count` INT NOT NULL DEFAULT 0,\n\
			`error_message` TEXT,\n\
			`photo_data_json` JSON,\n\
			`last_processed_at` DATETIME,\n\
			PRIMARY KEY (`ListingID`, `PropertyType`)\n\
		)";
		self.conn.execute(Statement::from_string(DatabaseBackend::MySql, sql)).await?;
		Ok(())
	}

	/// The main loop: never exits. Fatal errors in one pass back off 30 s and
	/// retry (§4.10).
	pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
		if let Err(e) = self.ensure_tracking_table().await {
			error!(error = %e, "failed to create PhotoProcessing tracking table");
		}

		loop {
			if *shutdown.borrow() {
				return;
			}

			match self.run_pass().await {
				Ok(0) => {
					tokio::select! {
						_ = tokio::time::sleep(NORMAL.idle_wait) => {}
						_ = shutdown.changed() => return,
					}
				}
				Ok(_) => {}
				Err(e) => {
					error!(error = %e, "photo scheduler pass failed, backing off");
					tokio::select! {
						_ = tokio::time::sleep(FATAL_LOOP_BACKOFF) => {}
						_ = shutdown.changed() => return,
					}
				}
			}
		}
	}

	/// Run one batch; returns the number of listings processed.
	#[instrument(skip(self))]
	async fn run_pass(&self) -> Result<usize, SchedulerError> {
		let backlog = self.backlog_count().await?;
		let mode = if backlog > AGGRESSIVE_BACKLOG_THRESHOLD { AGGRESSIVE } else { NORMAL };

		let candidates = self.select_batch(mode.batch_size).await?;
		if candidates.is_empty() {
			return Ok(0);
		}

		debug!(count = candidates.len(), backlog, aggressive = mode.batch_size == AGGRESSIVE.batch_size, "processing photo batch");

		let futures = candidates.into_iter().map(|c| self.process_one(c));
		let results = join_all(futures).await;
		let processed = results.len();

		tokio::time::sleep(mode.inter_batch_wait).await;
		Ok(processed)
	}

	async fn backlog_count(&self) -> Result<i64, DbErr> {
		let stmt = Statement::from_string(
			DatabaseBackend::MySql,
			"SELECT COUNT(*) AS backlog FROM `PhotoProcessing` WHERE `status` != 'completed' OR `needs_reprocessing` = 1",
		);
		let row = self.conn.query_one(stmt).await?;
		Ok(row.and_then(|r| r.try_get::<i64>("", "backlog").ok()).unwrap_or(0))
	}

	/// Union every `Property_*` table LEFT JOIN `PhotoProcessing`, ordered
	/// `needs_reprocessing` first, then status category ascending, then
	/// `L_Last_Photo_updt` descending (§4.10 step 3).
	async fn select_batch(&self, batch_size: u32) -> Result<Vec<CandidateListing>, SchedulerError> {
		let catalog = self.catalog_store.cached().await;
		let Some(resource) = catalog.as_ref().and_then(|c| c.resource("Property").cloned()) else {
			return Ok(Vec::new());
		};

		let single_class_equals_resource =
			resource.classes.len() == 1 && resource.classes[0].as_deref() == Some(resource.resource_id.as_str());

		let mut unions = Vec::new();
		for class in &resource.classes {
			let table = schema::table_name(&resource.resource_id, class.as_deref(), single_class_equals_resource);
			let class_literal = class.as_deref().unwrap_or(&resource.resource_id).replace('\'', "''");
			if !schema::table_exists(&self.conn, &table).await? {
				continue;
			}
			unions.push(format!(
				"SELECT '{class_literal}' AS property_type, t.`L_ListingID` AS listing_id, t.`L_StatusCatID` AS status_cat_id, \
				 t.`L_Last_Photo_updt` AS last_photo_update, COALESCE(pp.`needs_reprocessing`, 1) AS needs_reprocessing \
				 FROM `{table}` t LEFT JOIN `PhotoProcessing` pp ON pp.`ListingID` = t.`L_ListingID` AND pp.`PropertyType` = '{class_literal}' \
				 WHERE t.`L_StatusCatID` IN ('1','2') AND (pp.`ListingID` IS NULL OR pp.`needs_reprocessing` = 1)"
			));
		}

		if unions.is_empty() {
			return Ok(Vec::new());
		}

		let sql = format!(
			"SELECT * FROM ({}) AS candidates \
			 ORDER BY needs_reprocessing DESC, status_cat_id ASC, last_photo_update DESC LIMIT {batch_size}",
			unions.join(" UNION ALL ")
		);

		let rows = self.conn.query_all(Statement::from_string(DatabaseBackend::MySql, sql)).await?;
		let mut candidates = Vec::with_capacity(rows.len());
		for row in rows {
			let Ok(listing_id) = row.try_get::<String>("", "listing_id") else { continue };
			let Ok(class_name) = row.try_get::<String>("", "property_type") else { continue };
			let table_name = schema::table_name(&resource.resource_id, Some(&class_name), single_class_equals_resource);
			candidates.push(CandidateListing { listing_id, class_name, table_name });
		}
		Ok(candidates)
	}

	#[instrument(skip(self, candidate), fields(listing_id = %candidate.listing_id))]
	async fn process_one(&self, candidate: CandidateListing) {
		if let Err(e) = self.mark_processing(&candidate).await {
			warn!(listing_id = candidate.listing_id, error = %e, "failed to mark listing processing");
			return;
		}

		match self.run_pipeline(&candidate).await {
			Ok(photo_data_json) => {
				if let Err(e) = self.mark_completed(&candidate, &photo_data_json).await {
					warn!(listing_id = candidate.listing_id, error = %e, "failed to record completed photo job");
				} else {
					info!(listing_id = candidate.listing_id, "photo job completed");
				}
			}
			Err(e) => {
				warn!(listing_id = candidate.listing_id, error = %e, "photo job failed");
				if let Err(mark_err) = self.mark_failed(&candidate, &e.to_string()).await {
					warn!(listing_id = candidate.listing_id, error = %mark_err, "failed to record failed photo job");
				}
			}
		}
	}

	async fn run_pipeline(&self, candidate: &CandidateListing) -> Result<String, SchedulerError> {
		let session = self
			.client
			.login()
			.await
			.map_err(|e| SchedulerError::Fetch(PhotoFetchError::Operation(e.into())))?;
		let parts = fetcher::get_property_photos(&self.client, &session, &candidate.listing_id).await?;

		let futures = parts
			.iter()
			.map(|part| pipeline::process_photo(&self.cache_dir, &candidate.class_name, &candidate.listing_id, part));
		let processed: Vec<_> = join_all(futures).await.into_iter().collect::<Result<_, _>>()?;

		let mut photos = Vec::with_capacity(processed.len());
		for metadata in &processed {
			let uploads = self
				.object_store
				.upload_variants(&candidate.class_name, &candidate.listing_id, &metadata.variants)
				.await?;
			let urls: std::collections::HashMap<String, String> = uploads.into_iter().collect();

			let variants: Vec<_> = metadata
				.variants
				.iter()
				.map(|v| {
					serde_json::json!({
						"variant": v.name,
						"url": urls.get(&v.name),
						"width": v.width,
						"height": v.height,
						"byte_size": v.byte_size,
						"format": v.format,
					})
				})
				.collect();

			photos.push(serde_json::json!({
				"object_id": metadata.object_id,
				"dominant_color_rgb": metadata.dominant_color_rgb,
				"variants": variants,
				"source_headers": metadata.source_headers,
			}));
		}

		Ok(serde_json::to_string(&photos).unwrap_or_else(|_| "[]".to_string()))
	}

	async fn mark_processing(&self, candidate: &CandidateListing) -> Result<(), DbErr> {
		self.upsert_job_status(candidate, "processing", None, None).await
	}

	async fn mark_completed(&self, candidate: &CandidateListing, photo_data_json: &str) -> Result<(), DbErr> {
		self.upsert_job_status(candidate, "completed", Some(photo_data_json), None).await
	}

	async fn mark_failed(&self, candidate: &CandidateListing, error_message: &str) -> Result<(), DbErr> {
		self.upsert_job_status(candidate, "failed", None, Some(error_message)).await
	}

	async fn upsert_job_status(
		&self,
		candidate: &CandidateListing,
		status: &str,
		photo_data_json: Option<&str>,
		error_message: Option<&str>,
	) -> Result<(), DbErr> {
		let retry_increment = if status == "failed" { 1 } else { 0 };
		let stmt = Statement::from_sql_and_values(
			DatabaseBackend::MySql,
			"INSERT INTO `PhotoProcessing` (`ListingID`, `PropertyType`, `status`, `needs_reprocessing`, `retry_count`, `error_message`, `photo_data_json`, `last_processed_at`) \
			 VALUES (?, ?, ?, 0, ?, ?, ?, NOW()) \
			 ON DUPLICATE KEY UPDATE `status` = VALUES(`status`), `needs_reprocessing` = 0, \
			 `retry_count` = `retry_count` + VALUES(`retry_count`), `error_message` = VALUES(`error_message`), \
			 `photo_data_json` = COALESCE(VALUES(`photo_data_json`), `photo_data_json`), `last_processed_at` = VALUES(`last_processed_at`)",
			[
				Value::from(candidate.listing_id.clone()),
				Value::from(candidate.class_name.clone()),
				Value::from(status.to_string()),
				Value::from(retry_increment),
				Value::from(error_message.map(str::to_string)),
				Value::from(photo_data_json.map(str::to_string)),
			],
		);
		self.conn.execute(stmt).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aggressive_mode_has_larger_batch_and_shorter_waits() {
		assert!(AGGRESSIVE.batch_size > NORMAL.batch_size);
		assert!(AGGRESSIVE.inter_batch_wait < NORMAL.inter_batch_wait);
		assert!(AGGRESSIVE.idle_wait < NORMAL.idle_wait);
	}

	#[test]
	fn backlog_threshold_matches_spec() {
		assert_eq!(AGGRESSIVE_BACKLOG_THRESHOLD, 20);
	}
}
