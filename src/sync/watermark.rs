//! Per-table high-watermark (§3.1): derived lazily via `SELECT
//! MAX(update_field) FROM table`.

use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement};

/// Read the current watermark for a table's update field. Returns `None` if
/// the table is empty (no rows) or the column's max is NULL.
pub async fn read_watermark(
	conn: &impl ConnectionTrait,
	table_name: &str,
	update_field: &str,
) -> Result<Option<String>, DbErr> {
	let sql = format!("SELECT MAX(`{update_field}`) AS watermark FROM `{table_name}`");
	let stmt = Statement::from_string(DatabaseBackend::MySql, sql);

	let Some(row) = conn.query_one(stmt).await? else {
		return Ok(None);
	};

	Ok(row.try_get::<Option<String>>("", "watermark").ok().flatten())
}

#[cfg(test)]
mod tests {
	// `read_watermark` requires a live MySQL connection; exercised by the
	// integration tests in `sync::engine` against the fake RETS/DB harness.
}
