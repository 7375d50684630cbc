//! Thin wrappers over `RetsClient::authenticated_request` for the four
//! capability calls every higher-level component needs (§6.1).

use super::client::{ClientError, RetsClient, Session};
use super::parser::{self, MetadataResponse, SearchResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperationError {
	#[error(transparent)]
	Client(#[from] ClientError),
	#[error(transparent)]
	Parse(#[from] parser::ParseError),
	#[error("missing capability URL: {0}")]
	MissingCapability(&'static str),
}

pub struct SearchRequest<'a> {
	pub search_type: &'a str,
	pub class: &'a str,
	pub query: &'a str,
	pub limit: u32,
	pub offset: u32,
	/// `COMPACT` for the sync engine's record harvest, `COMPACT-DECODED` for
	/// the lifecycle reconciler's hotsheet query (§4.11).
	pub format: &'a str,
}

impl<'a> SearchRequest<'a> {
	pub fn compact(search_type: &'a str, class: &'a str, query: &'a str, limit: u32, offset: u32) -> Self {
		Self { search_type, class, query, limit, offset, format: "COMPACT" }
	}
}

/// Issue a `Search` call (§6.1): `SearchType, Class, QueryType=DMQL2,
/// Format=COMPACT, StandardNames=0, Query, Count=1, Limit, Offset`.
pub async fn search(
	client: &RetsClient,
	session: &Session,
	req: &SearchRequest<'_>,
) -> Result<SearchResult, OperationError> {
	let url = session
		.capability_url("Search")
		.ok_or(OperationError::MissingCapability("Search"))?
		.to_string();

	let limit = req.limit.to_string();
	let offset = req.offset.to_string();
	let query = &[
		("SearchType", req.search_type),
		("Class", req.class),
		("QueryType", "DMQL2"),
		("Format", req.format),
		("StandardNames", "0"),
		("Query", req.query),
		("Count", "1"),
		("Limit", limit.as_str()),
		("Offset", offset.as_str()),
	];

	let (bytes, _headers) = client.authenticated_request(session, &url, query).await?;
	let body = String::from_utf8_lossy(&bytes);
	Ok(parser::parse_search(&body)?)
}

/// Issue a `GetMetadata` call (§6.1): `Type, Format=COMPACT, ID`.
pub async fn get_metadata(
	client: &RetsClient,
	session: &Session,
	metadata_type: &str,
	id: &str,
) -> Result<MetadataResponse, OperationError> {
	let url = session
		.capability_url("GetMetadata")
		.ok_or(OperationError::MissingCapability("GetMetadata"))?
		.to_string();

	let query = &[("Type", metadata_type), ("Format", "COMPACT"), ("ID", id)];
	let (bytes, _headers) = client.authenticated_request(session, &url, query).await?;
	let body = String::from_utf8_lossy(&bytes);
	Ok(parser::parse_metadata(&body)?)
}

/// Issue a `GetObject` call (§6.1): `Resource, Type, ID`. Returns the raw
/// multipart (or single-image) body and the response headers, since the
/// photo fetcher needs `Content-Type` to find the boundary.
pub async fn get_object(
	client: &RetsClient,
	session: &Session,
	resource: &str,
	object_type: &str,
	id: &str,
	location: Option<u8>,
) -> Result<(bytes::Bytes, reqwest::header::HeaderMap), OperationError> {
	let url = session
		.capability_url("GetObject")
		.ok_or(OperationError::MissingCapability("GetObject"))?
		.to_string();

	let location_str = location.map(|l| l.to_string());
	let mut query: Vec<(&str, &str)> = vec![("Resource", resource), ("Type", object_type), ("ID", id)];
	if let Some(ref loc) = location_str {
		query.push(("Location", loc.as_str()));
	}

	Ok(client.authenticated_request(session, &url, &query).await?)
}
