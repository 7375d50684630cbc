//! DMQL2 query fragment construction (§6.1).
//!
//! `Search` conditions: `(Field=value)` for equality, `(Field=v1,v2)` for set
//! membership, `(Field=value+)` for "greater than or equal".

use chrono::{DateTime, Utc};

pub fn equals(field: &str, value: &str) -> String {
	format!("({field}={value})")
}

pub fn one_of(field: &str, values: &[&str]) -> String {
	format!("({field}={})", values.join(","))
}

pub fn greater_or_equal(field: &str, value: &str) -> String {
	format!("({field}={value}+)")
}

/// ISO-8601-seconds formatting for DMQL date comparisons (§4.5.4).
pub fn format_watermark(ts: DateTime<Utc>) -> String {
	ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Default watermark when no prior value exists (§4.5.4).
pub fn default_watermark() -> String {
	"1900-01-01T00:00:00".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_greater_or_equal() {
		assert_eq!(
			greater_or_equal("L_UpdateDate", "1900-01-01T00:00:00"),
			"(L_UpdateDate=1900-01-01T00:00:00+)"
		);
	}

	#[test]
	fn builds_set_membership() {
		assert_eq!(one_of("L_StatusCatID", &["2", "3", "4", "5"]), "(L_StatusCatID=2,3,4,5)");
	}
}
