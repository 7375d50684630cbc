//! CREATE TABLE synthesis (§4.4).

use super::type_map::sql_type;
use super::visible_names::visible_name;
use crate::catalog::{FieldDef, Resource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
	#[error("resource has no fields to build a table from")]
	NoFields,
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),
}

fn escape_sql_comment(s: &str) -> String {
	s.replace('\'', "''")
}

/// Synthesize the primary table's CREATE TABLE statement.
///
/// A surrogate `id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY` is added only
/// when the resource has no `key_field`; otherwise the field named
/// `key_field` is declared `PRIMARY KEY` inline.
pub fn create_table_sql(table_name: &str, resource: &Resource, fields: &[FieldDef]) -> Result<String, SchemaError> {
	if fields.is_empty() {
		return Err(SchemaError::NoFields);
	}

	let mut columns = Vec::new();
	if resource.key_field.is_none() {
		columns.push("id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY".to_string());
	}

	for field in fields {
		let is_key = resource
			.key_field
			.as_deref()
			.map(|k| k == field.system_name)
			.unwrap_or(false);

		let mut column = format!(
			"`{}` {}",
			field.system_name,
			sql_type(field)
		);
		if is_key {
			column.push_str(" PRIMARY KEY");
		}
		column.push_str(&format!(" COMMENT '{}'", escape_sql_comment(&field.long_name)));
		columns.push(column);
	}

	Ok(format!(
		"CREATE TABLE IF NOT EXISTS `{table_name}` ({}) ENGINE=InnoDB",
		columns.join(", ")
	))
}

/// Synthesize the parallel "visible names" table (§4.4): `MyISAM`, columns
/// renamed via the alphanumeric transform, named `<table_name>_visible`.
pub fn create_visible_table_sql(table_name: &str, fields: &[FieldDef]) -> Result<String, SchemaError> {
	if fields.is_empty() {
		return Err(SchemaError::NoFields);
	}

	let columns: Vec<String> = fields
		.iter()
		.map(|field| {
			format!(
				"`{}` {} COMMENT '{}'",
				visible_name(&field.long_name),
				sql_type(field),
				escape_sql_comment(&field.long_name)
			)
		})
		.collect();

	Ok(format!(
		"CREATE TABLE IF NOT EXISTS `{table_name}_visible` ({}) ENGINE=MyISAM",
		columns.join(", ")
	))
}

pub fn drop_table_sql(table_name: &str) -> String {
	format!("DROP TABLE IF EXISTS `{table_name}`")
}

pub fn truncate_table_sql(table_name: &str) -> String {
	format!("TRUNCATE TABLE `{table_name}`")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::{DataType, Interpretation, SyncType};

	fn resource(key_field: Option<&str>) -> Resource {
		Resource {
			resource_id: "Property".into(),
			key_field: key_field.map(String::from),
			description: "Property".into(),
			sync_interval_minutes: 1,
			update_field_name: Some("L_UpdateDate".into()),
			sync_type: SyncType::Partial,
			classes: vec![Some("RE_1".into())],
		}
	}

	fn field(name: &str, data_type: DataType) -> FieldDef {
		FieldDef {
			system_name: name.into(),
			long_name: format!("{name} Long"),
			standard_name: None,
			data_type,
			interpretation: Interpretation::None,
			lookup_name: None,
			required: false,
		}
	}

	#[test]
	fn surrogate_key_when_resource_has_no_key_field() {
		let fields = vec![field("L_ListingID", DataType::Long)];
		let sql = create_table_sql("Property_RE_1", &resource(None), &fields).unwrap();
        assert!(sql.contains("id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY"));
	}

	#[test]
	fn inline_primary_key_when_key_field_present() {
		let fields = vec![field("LIST_87", DataType::Long)];
		let sql = create_table_sql("Property_RE_1", &resource(Some("LIST_87")), &fields).unwrap();
		assert!(!sql.contains("AUTO_INCREMENT"));
		assert!(sql.contains("`LIST_87` BIGINT PRIMARY KEY"));
	}

	#[test]
	fn visible_table_uses_myisam_and_renamed_columns() {
		let fields = vec![field("BR", DataType::Int)];
		let sql = create_visible_table_sql("Property_RE_1", &fields).unwrap();
		assert!(sql.contains("ENGINE=MyISAM"));
		assert!(sql.contains("Property_RE_1_visible"));
	}
}
