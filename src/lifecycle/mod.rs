//! Lifecycle Reconciler (C11, §4.11).
//!
//! Runs at fixed wall-clock hours, reconciles local `Property_*` tables
//! against the remote hotsheet: promotes SOLD, deletes WITHDRAWN/EXPIRED.

use crate::catalog::CatalogStore;
use crate::rets::client::{ClientError, RetsClient};
use crate::rets::dmql;
use crate::rets::operations::{self, OperationError, SearchRequest};
use crate::rets::parser::ParseError;
use crate::schema;
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

const SCHEDULED_HOURS: [u32; 5] = [0, 12, 15, 18, 21];
const SEARCH_LIMIT: u32 = 2500;

#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error(transparent)]
	Client(#[from] ClientError),
	#[error(transparent)]
	Catalog(#[from] crate::catalog::CatalogError),
	#[error(transparent)]
	Operation(#[from] OperationError),
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error("database error: {0}")]
	Database(#[from] DbErr),
}

#[derive(Debug, Clone)]
struct HotsheetRow {
	listing_id: String,
	status_date: String,
	status_cat_id: String,
}

pub struct LifecycleReconciler {
	client: Arc<RetsClient>,
	catalog_store: Arc<CatalogStore>,
	conn: DatabaseConnection,
}

impl LifecycleReconciler {
	pub fn new(client: Arc<RetsClient>, catalog_store: Arc<CatalogStore>, conn: DatabaseConnection) -> Self {
		Self { client, catalog_store, conn }
	}

	/// Sleep until the next scheduled hour, run once, repeat. Never exits
	/// except on shutdown signal.
	pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
		loop {
			let delay = delay_until_next_run(Utc::now());
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = shutdown.changed() => return,
			}
			if *shutdown.borrow() {
				return;
			}
			if let Err(e) = self.run_once().await {
				error!(error = %e, "lifecycle reconciler run failed");
			}
		}
	}

	#[instrument(skip(self))]
	pub async fn run_once(&self) -> Result<(), LifecycleError> {
		let session = self.client.login().await?;
		let catalog = self.catalog_store.get_or_refresh(&self.client, &session).await?;

		let Some(hotsheet) = catalog.resource("Hotsheet") else {
			warn!("no Hotsheet resource in catalog, skipping lifecycle run");
			return Ok(());
		};

		let since = dmql::format_watermark(Utc::now() - ChronoDuration::days(1));
		let mut by_listing: HashMap<String, HotsheetRow> = HashMap::new();

		for class in &hotsheet.classes {
			let class_name = class.as_deref().unwrap_or(&hotsheet.resource_id);
			if let Err(e) = self.collect_hotsheet_class(class_name, &since, &mut by_listing).await {
				warn!(class_name, error = %e, "hotsheet query failed for class, continuing with other classes");
			}
		}

		let mut sold = Vec::new();
		let mut withdrawn_or_expired = Vec::new();
		for row in by_listing.values() {
			match row.status_cat_id.as_str() {
				"2" => sold.push(row.listing_id.clone()),
				"4" | "5" => withdrawn_or_expired.push(row.listing_id.clone()),
				_ => {}
			}
		}

		info!(sold = sold.len(), withdrawn_or_expired = withdrawn_or_expired.len(), "hotsheet snapshot collected");

		let Some(property) = catalog.resource("Property") else {
			return Ok(());
		};
		let single_class_equals_resource =
			property.classes.len() == 1 && property.classes[0].as_deref() == Some(property.resource_id.as_str());

		for class in &property.classes {
			let table = schema::table_name(&property.resource_id, class.as_deref(), single_class_equals_resource);
			if !schema::table_exists(&self.conn, &table).await? {
				continue;
			}
			if let Err(e) = self.reconcile_table(&table, &sold, &withdrawn_or_expired).await {
				warn!(table, error = %e, "lifecycle reconciliation failed for table");
			}
		}

		Ok(())
	}

	async fn collect_hotsheet_class(
		&self,
		class_name: &str,
		since: &str,
		by_listing: &mut HashMap<String, HotsheetRow>,
	) -> Result<(), LifecycleError> {
		let session = self.client.login().await?;
		let status_filter = dmql::one_of("L_StatusCatID", &["2", "3", "4", "5"]);
		let date_filter = dmql::greater_or_equal("L_StatusDate", since);
		let query = format!("{status_filter}{date_filter}");

		let mut offset = 0u32;
		loop {
			let request = SearchRequest {
				search_type: "Hotsheet",
				class: class_name,
				query: &query,
				limit: SEARCH_LIMIT,
				offset,
				format: "COMPACT-DECODED",
			};
			let result = operations::search(&self.client, &session, &request).await?;

			let listing_idx = result.columns.iter().position(|c| c == "L_ListingID");
			let date_idx = result.columns.iter().position(|c| c == "L_StatusDate");
			let cat_idx = result.columns.iter().position(|c| c == "L_StatusCatID");

			let batch_len = result.rows.len();
			for row in &result.rows {
				let Some(listing_id) = listing_idx.and_then(|i| row.get(i)) else { continue };
				let status_date = date_idx.and_then(|i| row.get(i)).cloned().unwrap_or_default();
				let status_cat_id = cat_idx.and_then(|i| row.get(i)).cloned().unwrap_or_default();

				// Deduplicate by L_ListingID, keeping the maximum L_StatusDate.
				by_listing
					.entry(listing_id.clone())
					.and_modify(|existing| {
						if status_date > existing.status_date {
							existing.status_date = status_date.clone();
							existing.status_cat_id = status_cat_id.clone();
						}
					})
					.or_insert_with(|| HotsheetRow {
						listing_id: listing_id.clone(),
						status_date: status_date.clone(),
						status_cat_id: status_cat_id.clone(),
					});
			}

			if batch_len < SEARCH_LIMIT as usize {
				break;
			}
			offset += SEARCH_LIMIT;
		}

		Ok(())
	}

	/// Promote-to-SOLD and delete, grouped by table, per §4.11 step 5-6.
	async fn reconcile_table(&self, table: &str, sold: &[String], withdrawn_or_expired: &[String]) -> Result<(), DbErr> {
		let mut candidates = sold.to_vec();
		candidates.extend(withdrawn_or_expired.iter().cloned());
		if candidates.is_empty() {
			return Ok(());
		}

		let placeholders = vec!["?"; candidates.len()].join(", ");
		let select_sql = format!("SELECT `L_ListingID`, `L_StatusCatID`, `L_Address` FROM `{table}` WHERE `L_ListingID` IN ({placeholders})");
		let values: Vec<Value> = candidates.iter().cloned().map(Value::from).collect();
		let rows = self
			.conn
			.query_all(Statement::from_sql_and_values(DatabaseBackend::MySql, select_sql, values))
			.await?;

		let sold_set: std::collections::HashSet<&String> = sold.iter().collect();
		let delete_set: std::collections::HashSet<&String> = withdrawn_or_expired.iter().collect();

		let mut to_promote = Vec::new();
		let mut to_delete = Vec::new();

		for row in &rows {
			let Ok(listing_id) = row.try_get::<String>("", "L_ListingID") else { continue };
			let current_status = row.try_get::<String>("", "L_StatusCatID").unwrap_or_default();
			let address = row.try_get::<String>("", "L_Address").unwrap_or_default();

			if sold_set.contains(&listing_id) && current_status != "2" {
				info!(table, listing_id, prior_status = current_status, address, "promoting listing to SOLD");
				to_promote.push(listing_id.clone());
			} else if delete_set.contains(&listing_id) && matches!(current_status.as_str(), "1" | "2") {
				info!(table, listing_id, prior_status = current_status, address, "deleting listing");
				to_delete.push(listing_id);
			}
		}

		if !to_promote.is_empty() {
			let placeholders = vec!["?"; to_promote.len()].join(", ");
			let sql = format!("UPDATE `{table}` SET `L_StatusCatID` = '2' WHERE `L_ListingID` IN ({placeholders})");
			let values: Vec<Value> = to_promote.into_iter().map(Value::from).collect();
			self.conn.execute(Statement::from_sql_and_values(DatabaseBackend::MySql, sql, values)).await?;
		}

		if !to_delete.is_empty() {
			let placeholders = vec!["?"; to_delete.len()].join(", ");
			let sql = format!("DELETE FROM `{table}` WHERE `L_ListingID` IN ({placeholders})");
			let values: Vec<Value> = to_delete.into_iter().map(Value::from).collect();
			self.conn.execute(Statement::from_sql_and_values(DatabaseBackend::MySql, sql, values)).await?;
		}

		Ok(())
	}
}

/// Delay until the next entry in [`SCHEDULED_HOURS`], wrapping to tomorrow's
/// first slot when all of today's have passed.
fn delay_until_next_run(now: chrono::DateTime<Utc>) -> std::time::Duration {
	let current_hour = now.hour();
	let next_hour = SCHEDULED_HOURS.iter().find(|&&h| h > current_hour).copied();

	let target = match next_hour {
		Some(hour) => now.date_naive().and_hms_opt(hour, 0, 0).unwrap(),
		None => (now.date_naive() + ChronoDuration::days(1)).and_hms_opt(SCHEDULED_HOURS[0], 0, 0).unwrap(),
	};

	let target_utc = chrono::DateTime::<Utc>::from_naive_utc_and_offset(target, Utc);
	(target_utc - now).to_std().unwrap_or(std::time::Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn delay_targets_next_scheduled_hour_same_day() {
		let now = Utc.with_ymd_and_hms(2026, 1, 1, 13, 30, 0).unwrap();
		let delay = delay_until_next_run(now);
		assert_eq!(delay.as_secs(), 90 * 60);
	}

	#[test]
	fn delay_wraps_to_tomorrow_after_last_slot() {
		let now = Utc.with_ymd_and_hms(2026, 1, 1, 22, 0, 0).unwrap();
		let delay = delay_until_next_run(now);
		assert_eq!(delay.as_secs(), 2 * 3600);
	}
}
