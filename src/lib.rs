//! RETS data-feed synchronization service.
//!
//! Pulls property listings, lookup metadata, and photos from a RETS server
//! into MySQL and S3-compatible object storage, and reconciles sold/expired
//! listings on a fixed schedule. See each module for its corresponding
//! component.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod lookup;
pub mod photo;
pub mod rets;
pub mod schema;
pub mod sync;
pub mod util;

pub use error::{RetsError, RetsResult};
