//! FieldDef -> SQL column type mapping (§4.4). A total function over the
//! `DataType` tagged union (§9 design note), so adding a RETS type only ever
//! means adding one match arm.

use crate::catalog::{DataType, FieldDef, Interpretation};

pub fn sql_type(field: &FieldDef) -> String {
	// Interpretation overrides the base type mapping (§4.4 table).
	match field.interpretation {
		Interpretation::Lookup => return "VARCHAR(50)".to_string(),
		Interpretation::LookupMulti => return "TEXT".to_string(),
		Interpretation::None => {}
	}

	match &field.data_type {
		DataType::Int | DataType::Small | DataType::Tiny => "INT".to_string(),
		DataType::Long => "BIGINT".to_string(),
		DataType::DateTime => "DATETIME default '0000-00-00 00:00:00' NOT NULL".to_string(),
		DataType::Date => "DATE default '0000-00-00' NOT NULL".to_string(),
		DataType::Time => "TIME default '00:00:00' NOT NULL".to_string(),
		DataType::Boolean => "CHAR(1)".to_string(),
		DataType::Character { max_length } => match max_length {
			Some(len) if *len >= 1 && *len <= 255 => format!("VARCHAR({len})"),
			_ => "TEXT".to_string(),
		},
		DataType::Decimal { max_length, precision } => {
			if *max_length > *precision {
				format!("DECIMAL({max_length},{precision})")
			} else {
				"DECIMAL(10,2)".to_string()
			}
		}
	}
}

/// Zero-value substitution for date/datetime/time fields on empty/null input
/// (§4.5.1).
pub fn zero_value(data_type: &DataType) -> Option<&'static str> {
	match data_type {
		DataType::Date => Some("0000-00-00"),
		DataType::DateTime => Some("0000-00-00 00:00:00"),
		DataType::Time => Some("00:00:00"),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn field(data_type: DataType, interpretation: Interpretation) -> FieldDef {
		FieldDef {
			system_name: "F".into(),
			long_name: "F".into(),
			standard_name: None,
			data_type,
			interpretation,
			lookup_name: None,
			required: false,
		}
	}

	#[test]
	fn character_within_range_is_varchar() {
		let f = field(DataType::Character { max_length: Some(100) }, Interpretation::None);
		assert_eq!(sql_type(&f), "VARCHAR(100)");
	}

	#[test]
	fn character_over_255_is_text() {
		let f = field(DataType::Character { max_length: Some(500) }, Interpretation::None);
		assert_eq!(sql_type(&f), "TEXT");
	}

	#[test]
	fn character_without_length_is_text() {
		let f = field(DataType::Character { max_length: None }, Interpretation::None);
		assert_eq!(sql_type(&f), "TEXT");
	}

	#[test]
	fn decimal_requires_max_greater_than_precision() {
		let ok = field(DataType::Decimal { max_length: 10, precision: 2 }, Interpretation::None);
		assert_eq!(sql_type(&ok), "DECIMAL(10,2)");

		let bad = field(DataType::Decimal { max_length: 2, precision: 2 }, Interpretation::None);
		assert_eq!(sql_type(&bad), "DECIMAL(10,2)");
	}

	#[test]
	fn lookup_interpretation_overrides_base_type() {
		let f = field(DataType::Character { max_length: Some(10) }, Interpretation::Lookup);
		assert_eq!(sql_type(&f), "VARCHAR(50)");

		let f = field(DataType::Int, Interpretation::LookupMulti);
		assert_eq!(sql_type(&f), "TEXT");
	}

	#[test]
	fn zero_values_only_for_temporal_types() {
		assert_eq!(zero_value(&DataType::Date), Some("0000-00-00"));
		assert_eq!(zero_value(&DataType::DateTime), Some("0000-00-00 00:00:00"));
		assert_eq!(zero_value(&DataType::Time), Some("00:00:00"));
		assert_eq!(zero_value(&DataType::Int), None);
	}
}
