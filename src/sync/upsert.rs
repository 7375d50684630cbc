//! Sanitize and upsert (§4.5.1): `REPLACE INTO` keyed on the declared
//! primary key, with empty/null substitution by RETS type.

use crate::catalog::{DataType, FieldDef};
use crate::schema::type_map::zero_value;
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum UpsertError {
	#[error("database error: {0}")]
	Database(#[from] DbErr),
}

/// Substitute the zero value for date/datetime/time fields on empty input;
/// otherwise substitute SQL NULL (§4.5.1).
pub fn sanitize_value(field: &FieldDef, raw: &str) -> Option<String> {
	if !raw.is_empty() {
		return Some(raw.to_string());
	}
	zero_value(&field.data_type).map(str::to_string)
}

/// Build and execute a `REPLACE INTO` for one record, row-level errors are
/// logged with the offending field/value and do not abort the batch
/// (§4.5.1, §7 DataError).
pub async fn upsert_record(
	conn: &impl ConnectionTrait,
	table_name: &str,
	fields: &[FieldDef],
	columns: &[String],
	row: &[String],
) -> Result<(), UpsertError> {
	let mut names = Vec::with_capacity(row.len());
	let mut values = Vec::with_capacity(row.len());

	for (i, column_name) in columns.iter().enumerate() {
		let Some(raw) = row.get(i) else { continue };
		let Some(field) = fields.iter().find(|f| &f.system_name == column_name) else {
			continue;
		};
		let Some(sanitized) = sanitize_value(field, raw) else {
			names.push(format!("`{column_name}`"));
			values.push(Value::String(None));
			continue;
		};

		names.push(format!("`{column_name}`"));
		values.push(coerce_value(&field.data_type, &sanitized));
	}

	if names.is_empty() {
		return Ok(());
	}

	let placeholders = vec!["?"; names.len()].join(", ");
	let sql = format!(
		"REPLACE INTO `{table_name}` ({}) VALUES ({placeholders})",
		names.join(", ")
	);

	let stmt = Statement::from_sql_and_values(DatabaseBackend::MySql, sql, values);
	if let Err(e) = conn.execute(stmt).await {
		let (column, value) = extract_offending_column(&e.to_string());
		warn!(table_name, column, value, error = %e, "row upsert failed, skipping row");
	}

	Ok(())
}

fn coerce_value(data_type: &DataType, value: &str) -> Value {
	match data_type {
		DataType::Int | DataType::Small | DataType::Tiny => value
			.parse::<i32>()
			.map(Value::from)
			.unwrap_or_else(|_| Value::from(value.to_string())),
		DataType::Long => value
			.parse::<i64>()
			.map(Value::from)
			.unwrap_or_else(|_| Value::from(value.to_string())),
		_ => Value::from(value.to_string()),
	}
}

/// Extract the offending column name from the driver's error message (§4.5,
/// §7, §9: "the current design extracts the offending column from the
/// driver's error string").
fn extract_offending_column(driver_message: &str) -> (String, String) {
	// MySQL truncation/type errors read like: "Data truncated for column
	// 'L_Price' at row 1" or "Incorrect integer value: 'abc' for column
	// 'L_Beds' at row 1".
	if let Some(start) = driver_message.find("column '") {
		let rest = &driver_message[start + "column '".len()..];
		if let Some(end) = rest.find('\'') {
			return (rest[..end].to_string(), String::new());
		}
	}
	("<unknown>".to_string(), driver_message.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::Interpretation;

	fn date_field() -> FieldDef {
		FieldDef {
			system_name: "L_UpdateDate".into(),
			long_name: "Update Date".into(),
			standard_name: None,
			data_type: DataType::DateTime,
			interpretation: Interpretation::None,
			lookup_name: None,
			required: false,
		}
	}

	fn text_field() -> FieldDef {
		FieldDef {
			system_name: "L_Remarks".into(),
			long_name: "Remarks".into(),
			standard_name: None,
			data_type: DataType::Character { max_length: None },
			interpretation: Interpretation::None,
			lookup_name: None,
			required: false,
		}
	}

	#[test]
	fn empty_temporal_field_gets_zero_value() {
		assert_eq!(sanitize_value(&date_field(), ""), Some("0000-00-00 00:00:00".to_string()));
	}

	#[test]
	fn empty_non_temporal_field_is_null() {
		assert_eq!(sanitize_value(&text_field(), ""), None);
	}

	#[test]
	fn non_empty_values_pass_through() {
		assert_eq!(sanitize_value(&text_field(), "hello"), Some("hello".to_string()));
	}

	#[test]
	fn extracts_column_from_driver_message() {
		let (column, _) = extract_offending_column("Data truncated for column 'L_Price' at row 1");
		assert_eq!(column, "L_Price");
	}

	#[test]
	fn unknown_message_shape_falls_back() {
		let (column, _) = extract_offending_column("connection reset by peer");
		assert_eq!(column, "<unknown>");
	}
}
