//! RETS response parser (C2, §4.2).
//!
//! Three grammars, detected by content inspection. The parser is
//! regex-driven by contract, not a general XML parser: it tolerates missing
//! optional elements and never raises on XML well-formedness, matching
//! spec.md's explicit design note in §9 ("do not rely on regex or general
//! MIME libraries" applies to the multipart body; the tag soup here is
//! intentionally handled with `regex`, as the spec's own wording describes
//! the grammar as "regex-driven by contract").

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
	#[error("malformed response: missing ReplyCode/ReplyText")]
	Malformed,
	#[error("RETS protocol error {reply_code}: {reply_text}")]
	Protocol {
		reply_code: String,
		reply_text: String,
	},
}

#[derive(Debug, Clone, Default)]
pub struct LoginResponse {
	pub reply_code: String,
	pub reply_text: String,
	/// Capability name -> absolute-or-relative URL.
	pub capabilities: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBlock {
	pub metadata_type: String,
	pub attrs: HashMap<String, String>,
	pub columns: Vec<String>,
	pub data: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataResponse {
	pub reply_code: String,
	pub reply_text: String,
	pub blocks: Vec<MetadataBlock>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
	pub reply_code: String,
	pub reply_text: String,
	pub count: Option<u64>,
	pub columns: Vec<String>,
	pub rows: Vec<Vec<String>>,
}

static RETS_RESPONSE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<RETS-RESPONSE>(.*?)</RETS-RESPONSE>").unwrap());
static KEY_VALUE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*([A-Za-z][A-Za-z0-9_-]*)\s*=\s*(.*?)\s*$").unwrap());
static METADATA_OPEN_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<METADATA-[A-Za-z_]+\b[^>]*>").unwrap());
static TAG_WITH_ATTRS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(METADATA-[A-Za-z_]+)\b([^>]*)>").unwrap());
static ATTR_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([A-Za-z][A-Za-z0-9_-]*)="([^"]*)""#).unwrap());
static COLUMNS_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<COLUMNS>\s*(.*?)\s*</COLUMNS>").unwrap());
static DATA_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<DATA>\s*(.*?)\s*</DATA>").unwrap());
static COUNT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<COUNT\s+Records="(\d+)"\s*/?>"#).unwrap());
static REPLY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"ReplyCode="([^"]*)""#).unwrap());
static REPLY_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"ReplyText="([^"]*)""#).unwrap());
static UNAUTHORIZED_CLASS: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"class \[([^\]]+)\] in resource \[([^\]]+)\]").unwrap());

/// Split a COMPACT row/column line on tabs, trimming each segment, and
/// right-pad with empty strings against `expected_len` if the row is short
/// (§4.2: "misaligned by length are right-padded ... no error is raised").
fn split_tab_delimited(line: &str, expected_len: Option<usize>) -> Vec<String> {
	let mut fields: Vec<String> = line.split('\t').map(|s| s.trim().to_string()).collect();
	if let Some(expected) = expected_len {
		while fields.len() < expected {
			fields.push(String::new());
		}
	}
	fields
}

fn parse_columns_and_data(body: &str) -> (Vec<String>, Vec<Vec<String>>) {
	let columns = COLUMNS_LINE
		.captures(body)
		.map(|c| split_tab_delimited(&c[1], None))
		.unwrap_or_default();

	let expected_len = if columns.is_empty() { None } else { Some(columns.len()) };

	let rows = DATA_LINE
		.captures_iter(body)
		.map(|c| split_tab_delimited(&c[1], expected_len))
		.collect();

	(columns, rows)
}

fn reply_code_and_text(body: &str) -> Option<(String, String)> {
	let code = REPLY_CODE.captures(body).map(|c| c[1].to_string());
	let text = REPLY_TEXT.captures(body).map(|c| c[1].to_string());
	match (code, text) {
		(Some(c), Some(t)) => Some((c, t)),
		_ => None,
	}
}

/// Parse a `Login` response body (§4.2). Lines whose key starts with `Info`
/// are ignored, matching the wire contract's informational preamble.
pub fn parse_login(body: &str) -> Result<LoginResponse, ParseError> {
	let (reply_code, reply_text) = reply_code_and_text(body)
		.or_else(|| {
			// Login bodies use KEY=VALUE lines rather than XML attributes for
			// the reply code/text when present inside <RETS-RESPONSE>.
			let inner = RETS_RESPONSE_TAG.captures(body).map(|c| c[1].to_string())?;
			let mut code = None;
			let mut text = None;
			for cap in KEY_VALUE_LINE.captures_iter(&inner) {
				match cap[1].as_ref() {
					"ReplyCode" => code = Some(cap[2].to_string()),
					"ReplyText" => text = Some(cap[2].to_string()),
					_ => {}
				}
			}
			Some((code.unwrap_or_default(), text.unwrap_or_default()))
		})
		.ok_or(ParseError::Malformed)?;

	let mut capabilities = HashMap::new();
	if let Some(inner) = RETS_RESPONSE_TAG.captures(body).map(|c| c[1].to_string()) {
		for cap in KEY_VALUE_LINE.captures_iter(&inner) {
			let key = &cap[1];
			if key.starts_with("Info") || key == "ReplyCode" || key == "ReplyText" {
				continue;
			}
			capabilities.insert(key.to_string(), cap[2].to_string());
		}
	}

	Ok(LoginResponse {
		reply_code,
		reply_text,
		capabilities,
	})
}

/// Parse a `GetMetadata` response (§4.2): opens with `<METADATA-X ...>`.
pub fn parse_metadata(body: &str) -> Result<MetadataResponse, ParseError> {
	let (reply_code, reply_text) = reply_code_and_text(body).ok_or(ParseError::Malformed)?;

	if !METADATA_OPEN_TAG.is_match(body) {
		return Ok(MetadataResponse {
			reply_code,
			reply_text,
			blocks: Vec::new(),
		});
	}

	let mut blocks = Vec::new();
	for tag_match in TAG_WITH_ATTRS.find_iter(body) {
		let caps = TAG_WITH_ATTRS.captures(tag_match.as_str()).unwrap();
		let metadata_type = caps[1].to_string();
		let attrs_str = &caps[2];
		let attrs = ATTR_PAIR
			.captures_iter(attrs_str)
			.map(|c| (c[1].to_string(), c[2].to_string()))
			.collect::<HashMap<_, _>>();

		// Scope the COLUMNS/DATA search to the text following this tag, up to
		// the next METADATA-X open tag (or end of body).
		let start = tag_match.end();
		let end = METADATA_OPEN_TAG
			.find_at(body, start)
			.map(|m| m.start())
			.unwrap_or(body.len());
		let (columns, data) = parse_columns_and_data(&body[start..end]);

		blocks.push(MetadataBlock {
			metadata_type,
			attrs,
			columns,
			data,
		});
	}

	Ok(MetadataResponse {
		reply_code,
		reply_text,
		blocks,
	})
}

/// Parse a `Search` response (§4.2): has `<COLUMNS>` and one-or-more `<DATA>`
/// siblings, plus `<COUNT Records="...">` and top-level `ReplyCode`/`ReplyText`.
pub fn parse_search(body: &str) -> Result<SearchResult, ParseError> {
	let (reply_code, reply_text) = reply_code_and_text(body).ok_or(ParseError::Malformed)?;
	let count = COUNT_TAG
		.captures(body)
		.and_then(|c| c[1].parse::<u64>().ok());
	let (columns, rows) = parse_columns_and_data(body);

	Ok(SearchResult {
		reply_code,
		reply_text,
		count,
		columns,
		rows,
	})
}

/// Detect the transient "unauthorized query" lockout signal (§4.2): reply
/// code `20207` with `ReplyText` containing "Unauthorized Query", extracting
/// `class [X] in resource [Y]`.
pub fn detect_unauthorized_query(reply_code: &str, reply_text: &str) -> Option<(String, String)> {
	if reply_code != "20207" || !reply_text.contains("Unauthorized Query") {
		return None;
	}
	UNAUTHORIZED_CLASS
		.captures(reply_text)
		.map(|c| (c[2].to_string(), c[1].to_string())) // (resource, class)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_login_capabilities() {
		let body = r#"<RETS-RESPONSE>
ReplyCode=0
ReplyText=V2.7.0 2020331145
InfoVersion=1
Search=/rets/search
GetMetadata=/rets/getmetadata
Logout=/rets/logout
</RETS-RESPONSE>"#;
		let parsed = parse_login(body).unwrap();
		assert_eq!(parsed.reply_code, "0");
		assert_eq!(parsed.capabilities.get("Search").unwrap(), "/rets/search");
		assert!(!parsed.capabilities.contains_key("InfoVersion"));
	}

	#[test]
	fn login_without_reply_code_is_malformed() {
		let body = "<RETS-RESPONSE>\nSearch=/rets/search\n</RETS-RESPONSE>";
		assert!(matches!(parse_login(body), Err(ParseError::Malformed)));
	}

	#[test]
	fn parses_metadata_columns_and_data() {
		let body = r#"<METADATA-RESOURCE Version="1.0" Date="2024-01-01">
ReplyCode="0" ReplyText="Success"
<COLUMNS>	ResourceID	KeyField	</COLUMNS>
<DATA>	Property	LIST_87	</DATA>
<DATA>	Office	OFF_MLSID	</DATA>
</METADATA-RESOURCE>"#;
		let parsed = parse_metadata(body).unwrap();
		assert_eq!(parsed.blocks.len(), 1);
		let block = &parsed.blocks[0];
		assert_eq!(block.columns, vec!["ResourceID", "KeyField"]);
		assert_eq!(block.data.len(), 2);
		assert_eq!(block.data[0], vec!["Property", "LIST_87"]);
	}

	#[test]
	fn pads_short_rows_with_empty_strings() {
		let body = "ReplyCode=\"0\" ReplyText=\"ok\"\n<COLUMNS>\tA\tB\tC\t</COLUMNS>\n<DATA>\tx\ty\t</DATA>";
		let (columns, rows) = parse_columns_and_data(body);
		assert_eq!(columns, vec!["A", "B", "C"]);
		assert_eq!(rows[0], vec!["x", "y", ""]);
	}

	#[test]
	fn detects_unauthorized_query() {
		let text = "Unauthorized Query on class [CI_3] in resource [Property]";
		let (resource, class) = detect_unauthorized_query("20207", text).unwrap();
		assert_eq!(resource, "Property");
		assert_eq!(class, "CI_3");
	}

	#[test]
	fn non_matching_reply_code_is_not_unauthorized() {
		assert!(detect_unauthorized_query("0", "Unauthorized Query on class [X] in resource [Y]").is_none());
	}

	#[test]
	fn parses_search_count_and_rows() {
		let body = r#"ReplyCode="0" ReplyText="Success"
<COUNT Records="2" />
<COLUMNS>	L_ListingID	L_Status	</COLUMNS>
<DATA>	1001	Active	</DATA>
<DATA>	1002	Sold	</DATA>"#;
		let parsed = parse_search(body).unwrap();
		assert_eq!(parsed.count, Some(2));
		assert_eq!(parsed.rows.len(), 2);
	}
}
