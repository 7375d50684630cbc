//! The "visible names" alphanumeric column-renaming transform (§4.4):
//! strip leading "Number of "/"NumberOf" and any subsequent "of", delete all
//! non-alphanumeric characters, preserve case.

static STRIP_PREFIXES: &[&str] = &["Number of ", "NumberOf"];

pub fn visible_name(long_name: &str) -> String {
	let mut s = long_name;
	for prefix in STRIP_PREFIXES {
		if let Some(rest) = s.strip_prefix(prefix) {
			s = rest;
			break;
		}
	}
	// Drop a subsequent leading "of" left over from phrases like
	// "Number of Bedrooms of Unit" -> "Bedrooms of Unit" -> "Bedrooms Unit".
	let s = s.strip_prefix("of ").unwrap_or(s);

	s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_number_of_prefix() {
		assert_eq!(visible_name("Number of Bedrooms"), "Bedrooms");
	}

	#[test]
	fn strips_numberof_prefix_without_space() {
		assert_eq!(visible_name("NumberOfBathrooms"), "Bathrooms");
	}

	#[test]
	fn removes_non_alphanumeric_characters() {
		assert_eq!(visible_name("List Price ($)"), "ListPrice");
	}

	#[test]
	fn preserves_case() {
		assert_eq!(visible_name("MLS Number"), "MLSNumber");
	}
}
