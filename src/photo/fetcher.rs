//! Photo Fetcher (C7, §4.7).
//!
//! Multipart parsing is a zero-copy scan over the response buffer rather than
//! a general MIME library (§9 design note): the server's framing is a subset
//! of RFC 2046 (headers separated by a blank line, parts bounded by
//! `\r\n--<boundary>`).

use crate::rets::client::{RetsClient, Session};
use crate::rets::operations::{self, OperationError};
use bytes::Bytes;
use memchr::memmem;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument};

const MIN_RESPONSE_BYTES: usize = 100;
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];

#[derive(Debug, Error)]
pub enum PhotoFetchError {
	#[error(transparent)]
	Operation(#[from] OperationError),
}

#[derive(Debug, Clone)]
pub struct PhotoPart {
	pub object_id: String,
	pub content_type: String,
	pub last_modified: Option<String>,
	pub content_sub_description: Option<String>,
	pub content_label: Option<String>,
	pub accessibility: Option<String>,
	pub photo_timestamp: Option<String>,
	pub extra_headers: HashMap<String, String>,
	pub body: Bytes,
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
	content_type
		.split(';')
		.map(str::trim)
		.find_map(|segment| segment.strip_prefix("boundary="))
		.map(|b| b.trim_matches('"').to_string())
}

/// Split a multipart body on `--<boundary>` delimiters, dropping the
/// preamble and the trailing `--` epilogue.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
	let delimiter = format!("--{boundary}");
	let finder = memmem::Finder::new(delimiter.as_bytes());

	let mut bounds: Vec<usize> = finder.find_iter(body).collect();
	bounds.push(body.len());

	let mut parts = Vec::new();
	for window in bounds.windows(2) {
		let start = window[0] + delimiter.len();
		let end = window[1];
		if start >= end {
			continue;
		}
		let mut slice = &body[start..end];
		// Each part begins with the CRLF that terminated the delimiter line,
		// and the delimiter itself may be followed by "--" (final boundary).
		if let Some(rest) = slice.strip_prefix(b"--") {
			slice = rest;
		}
		let slice = trim_leading_crlf(slice);
		// The CRLF immediately preceding the next "--<boundary>" is the
		// delimiter line's terminator, not part of the payload (RFC 2046).
		let slice = trim_trailing_crlf(slice);
		if !slice.is_empty() {
			parts.push(slice);
		}
	}
	parts
}

fn trim_leading_crlf(mut buf: &[u8]) -> &[u8] {
	if let Some(rest) = buf.strip_prefix(b"\r\n") {
		buf = rest;
	}
	buf
}

fn trim_trailing_crlf(buf: &[u8]) -> &[u8] {
	buf.strip_suffix(b"\r\n").unwrap_or(buf)
}

/// Split a part into its header block and body at the first blank line.
fn split_headers_and_body(part: &[u8]) -> (HashMap<String, String>, &[u8]) {
	let Some(pos) = memmem::find(part, b"\r\n\r\n") else {
		return (HashMap::new(), part);
	};
	let header_block = &part[..pos];
	let body = &part[pos + 4..];

	let mut headers = HashMap::new();
	for line in header_block.split(|&b| b == b'\n') {
		let line = String::from_utf8_lossy(line);
		let line = line.trim_end_matches('\r').trim();
		if let Some((key, value)) = line.split_once(':') {
			headers.insert(key.trim().to_string(), value.trim().to_string());
		}
	}
	(headers, body)
}

fn header_ci<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
	headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case(name))
		.map(|(_, v)| v.as_str())
}

/// `getPropertyPhotos` (§4.7): emits binary payloads verbatim, preserving the
/// authoritative boundary-delimited body rather than scanning for JPEG magic.
#[instrument(skip(client, session))]
pub async fn get_property_photos(
	client: &RetsClient,
	session: &Session,
	listing_id: &str,
) -> Result<Vec<PhotoPart>, PhotoFetchError> {
	let id = format!("{listing_id}:*");
	let (bytes, headers) = operations::get_object(client, session, "Property", "Photo", &id, None).await?;

	if bytes.len() < MIN_RESPONSE_BYTES {
		debug!(listing_id, "response shorter than minimum, treating as no photos");
		return Ok(Vec::new());
	}

	let content_type = headers
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("image/jpeg")
		.to_string();

	let Some(boundary) = boundary_from_content_type(&content_type) else {
		return Ok(vec![PhotoPart {
			object_id: listing_id.to_string(),
			content_type,
			last_modified: None,
			content_sub_description: None,
			content_label: None,
			accessibility: None,
			photo_timestamp: None,
			extra_headers: HashMap::new(),
			body: bytes,
		}]);
	};

	let mut parts = Vec::new();
	for raw_part in split_multipart(&bytes, &boundary) {
		let (headers, body) = split_headers_and_body(raw_part);

		let Some(part_content_type) = header_ci(&headers, "Content-Type") else { continue };
		if !part_content_type.starts_with("image/") {
			continue;
		}

		let mut extra_headers = HashMap::new();
		for (key, value) in &headers {
			if key.to_ascii_lowercase().starts_with("x-") {
				extra_headers.insert(key.clone(), value.clone());
			}
		}

		parts.push(PhotoPart {
			object_id: header_ci(&headers, "Object-ID").map(String::from).unwrap_or_else(|| listing_id.to_string()),
			content_type: part_content_type.to_string(),
			last_modified: header_ci(&headers, "Last-Modified").map(String::from),
			content_sub_description: header_ci(&headers, "Content-Sub-Description").map(String::from),
			content_label: header_ci(&headers, "Content-Label").map(String::from),
			accessibility: header_ci(&headers, "Accessibility").map(String::from),
			photo_timestamp: header_ci(&headers, "Photo-Timestamp").map(String::from),
			extra_headers,
			body: Bytes::copy_from_slice(body),
		});
	}

	Ok(parts)
}

/// Agent/Office photo helper (§4.7): `Location=0`, JPEG payloads extracted by
/// locating the `FF D8` magic within each part rather than trusting the
/// part's own framing (the server prepends additional headers for these
/// resources).
#[instrument(skip(client, session))]
pub async fn get_entity_photo(
	client: &RetsClient,
	session: &Session,
	resource: &str,
	id: &str,
) -> Result<Option<PhotoPart>, PhotoFetchError> {
	let (bytes, headers) = operations::get_object(client, session, resource, "Photo", id, Some(0)).await?;

	if bytes.len() < MIN_RESPONSE_BYTES {
		return Ok(None);
	}

	let Some(magic_pos) = memmem::find(&bytes, JPEG_MAGIC) else {
		return Ok(None);
	};

	let content_type = headers
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("image/jpeg")
		.to_string();

	Ok(Some(PhotoPart {
		object_id: id.to_string(),
		content_type,
		last_modified: None,
		content_sub_description: None,
		content_label: None,
		accessibility: None,
		photo_timestamp: None,
		extra_headers: HashMap::new(),
		body: Bytes::copy_from_slice(&bytes[magic_pos..]),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_boundary_from_content_type() {
		let ct = "multipart/mixed; boundary=\"abc123\"";
		assert_eq!(boundary_from_content_type(ct), Some("abc123".to_string()));
	}

	#[test]
	fn no_boundary_returns_none() {
		assert_eq!(boundary_from_content_type("image/jpeg"), None);
	}

	#[test]
	fn splits_two_part_multipart_body() {
		let body = b"preamble\r\n--BOUND\r\nContent-Type: image/jpeg\r\nObject-ID: 1\r\n\r\nJPEGDATA1\r\n--BOUND\r\nContent-Type: image/jpeg\r\nObject-ID: 2\r\n\r\nJPEGDATA2\r\n--BOUND--\r\n";
		let parts = split_multipart(body, "BOUND");
		assert_eq!(parts.len(), 2);

		let (headers, payload) = split_headers_and_body(parts[0]);
		assert_eq!(headers.get("Object-ID").unwrap(), "1");
		assert_eq!(payload, b"JPEGDATA1");
	}

	#[test]
	fn non_image_parts_are_filtered_by_caller() {
		let body = b"--B\r\nContent-Type: text/plain\r\n\r\nnot an image\r\n--B--\r\n";
		let parts = split_multipart(body, "B");
		let (headers, _) = split_headers_and_body(parts[0]);
		assert_eq!(header_ci(&headers, "Content-Type"), Some("text/plain"));
	}

	#[test]
	fn finds_jpeg_magic_offset() {
		let body = [0x00, 0x00, 0xFF, 0xD8, 0xFF, 0xE0];
		let pos = memmem::find(&body, JPEG_MAGIC).unwrap();
		assert_eq!(pos, 2);
	}
}
