//! Crate-wide error aggregation.
//!
//! Each subsystem keeps its own error enum (see `rets::client::ClientError`,
//! `rets::parser::ParseError`, `schema::SchemaError`, `photo::pipeline::ImageError`,
//! `photo::object_store::StorageError`); this type exists for the few call sites
//! that cross component boundaries and need one return type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetsError {
	#[error("transport error: {0}")]
	Client(#[from] crate::rets::client::ClientError),

	#[error("parse error: {0}")]
	Parse(#[from] crate::rets::parser::ParseError),

	#[error("schema error: {0}")]
	Schema(#[from] crate::schema::SchemaError),

	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	#[error("image error: {0}")]
	Image(#[from] crate::photo::pipeline::ImageError),

	#[error("storage error: {0}")]
	Storage(#[from] crate::photo::object_store::StorageError),

	#[error("config error: {0}")]
	Config(#[from] crate::config::ConfigError),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Other(String),
}

pub type RetsResult<T> = Result<T, RetsError>;
