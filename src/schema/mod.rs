//! Schema Generator (C4, §4.4).

pub mod ddl;
pub mod type_map;
pub mod visible_names;

pub use ddl::{create_table_sql, create_visible_table_sql, drop_table_sql, truncate_table_sql, SchemaError};

use crate::catalog::FieldDef;
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement};

/// Derive the table name for a (resource, class) pair (§4.5.2):
/// `Deleted_<class>` when resource = `Deleted`; `<resource>` when exactly
/// one class and class name equals resource or class is `None`; else
/// `<resource>_<class>`.
pub fn table_name(resource_id: &str, class_name: Option<&str>, single_class_equals_resource: bool) -> String {
	if resource_id == "Deleted" {
		return format!("Deleted_{}", class_name.unwrap_or(resource_id));
	}
	match class_name {
		None => resource_id.to_string(),
		Some(class) if single_class_equals_resource && class == resource_id => resource_id.to_string(),
		Some(class) => format!("{resource_id}_{class}"),
	}
}

pub async fn table_exists(conn: &impl ConnectionTrait, table_name: &str) -> Result<bool, DbErr> {
	let stmt = Statement::from_sql_and_values(
		DatabaseBackend::MySql,
		"SELECT 1 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ? LIMIT 1",
		[table_name.into()],
	);
	Ok(conn.query_one(stmt).await?.is_some())
}

pub async fn ensure_table(
	conn: &impl ConnectionTrait,
	table_name: &str,
	resource: &crate::catalog::Resource,
	fields: &[FieldDef],
) -> Result<(), SchemaError> {
	if table_exists(conn, table_name).await? {
		return Ok(());
	}

	let create_sql = ddl::create_table_sql(table_name, resource, fields)?;
	conn.execute(Statement::from_string(DatabaseBackend::MySql, create_sql)).await?;

	let visible_sql = ddl::create_visible_table_sql(table_name, fields)?;
	conn.execute(Statement::from_string(DatabaseBackend::MySql, visible_sql)).await?;

	Ok(())
}

pub async fn drop_table(conn: &impl ConnectionTrait, table_name: &str) -> Result<(), DbErr> {
	conn.execute(Statement::from_string(DatabaseBackend::MySql, ddl::drop_table_sql(table_name)))
		.await?;
	Ok(())
}

pub async fn truncate_table(conn: &impl ConnectionTrait, table_name: &str) -> Result<(), DbErr> {
	conn.execute(Statement::from_string(
		DatabaseBackend::MySql,
		ddl::truncate_table_sql(table_name),
	))
	.await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deleted_resource_uses_deleted_prefix() {
		assert_eq!(table_name("Deleted", Some("Property"), false), "Deleted_Property");
	}

	#[test]
	fn single_class_equal_to_resource_collapses() {
		assert_eq!(table_name("Office", Some("Office"), true), "Office");
	}

	#[test]
	fn no_class_uses_bare_resource_name() {
		assert_eq!(table_name("Office", None, false), "Office");
	}

	#[test]
	fn multi_class_resource_is_compound() {
		assert_eq!(table_name("Property", Some("RE_1"), false), "Property_RE_1");
	}
}
