use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, ColumnTypes, PgType, RowData};

/// Coerces every value of `row` to the PostgreSQL type of its column.
///
/// Columns without a known type are passed through unchanged. MySQL zero dates become `NULL`.
pub fn convert_row_data_types(column_types: &ColumnTypes, row: RowData) -> EtlResult<RowData> {
    row.into_iter()
        .map(|(column, cell)| {
            let Some(pg_type) = column_types.get(&column) else {
                return Ok((column, cell));
            };

            match convert_cell(cell, pg_type) {
                Ok(cell) => Ok((column, cell)),
                Err(err) => Err(err
                    .with_table(column_types.table_name.as_str())
                    .with_operation("convert_row_data_types")
                    .with_detail_field("column", column)
                    .with_detail_field("target_type", pg_type.as_str())),
            }
        })
        .collect()
}

/// Converts a single value to `pg_type`.
pub fn convert_cell(cell: Cell, pg_type: PgType) -> EtlResult<Cell> {
    if cell.is_null() {
        return Ok(Cell::Null);
    }

    match pg_type {
        PgType::Boolean => to_bool(cell),
        PgType::Bit => to_bit(cell),
        PgType::SmallInt | PgType::Integer | PgType::BigInt => to_integer(cell, pg_type),
        PgType::Real | PgType::DoublePrecision => to_float(cell),
        PgType::Numeric => to_numeric(cell),
        PgType::Character | PgType::Varchar | PgType::Text => Ok(to_text(cell)),
        PgType::Timestamp => to_timestamp(cell),
        PgType::Date => to_date(cell),
        PgType::Time => to_time(cell),
        PgType::Bytea => to_bytes(cell),
        PgType::Jsonb => to_json(cell),
    }
}

fn to_bool(cell: Cell) -> EtlResult<Cell> {
    let value = match cell {
        Cell::Bool(value) => value,
        Cell::I64(value) => value != 0,
        Cell::U64(value) => value != 0,
        Cell::Bytes(bytes) if bytes.len() == 1 => bytes[0] != 0,
        Cell::String(value) => match value.trim().to_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" => true,
            "0" | "f" | "false" | "n" | "no" => false,
            _ => bail!(
                ErrorKind::TypeConversionError,
                "Invalid boolean value",
                format!("`{value}` is not a boolean")
            ),
        },
        other => return Err(unsupported(&other, PgType::Boolean)),
    };

    Ok(Cell::Bool(value))
}

fn to_integer(cell: Cell, pg_type: PgType) -> EtlResult<Cell> {
    let (min, max) = match pg_type {
        PgType::SmallInt => (i16::MIN.into(), i16::MAX.into()),
        PgType::Integer => (i32::MIN.into(), i32::MAX.into()),
        _ => (i64::MIN, i64::MAX),
    };

    let value = match &cell {
        Cell::I64(value) => *value,
        Cell::U64(value) => match i64::try_from(*value) {
            Ok(value) => value,
            Err(_) => return Err(out_of_range(&cell, min, max)),
        },
        Cell::Bool(value) => i64::from(*value),
        Cell::F64(value) if value.fract() == 0.0 => {
            // `as` saturates outside the i64 range.
            if !value.is_finite() || *value < i64::MIN as f64 || *value >= i64::MAX as f64 {
                return Err(out_of_range(&cell, min, max));
            }
            *value as i64
        }
        Cell::String(value) | Cell::Numeric(value) => value.trim().parse::<i64>()?,
        _ => return Err(unsupported(&cell, pg_type)),
    };

    if value < min || value > max {
        return Err(out_of_range(&cell, min, max));
    }

    Ok(Cell::I64(value))
}

fn to_float(cell: Cell) -> EtlResult<Cell> {
    let value = match &cell {
        Cell::F64(value) => *value,
        Cell::I64(value) => *value as f64,
        Cell::U64(value) => *value as f64,
        Cell::String(value) | Cell::Numeric(value) => value.trim().parse::<f64>()?,
        _ => return Err(unsupported(&cell, PgType::DoublePrecision)),
    };

    Ok(Cell::F64(value))
}

fn to_numeric(cell: Cell) -> EtlResult<Cell> {
    let value = match cell {
        Cell::Numeric(value) => value,
        Cell::I64(value) => value.to_string(),
        Cell::U64(value) => value.to_string(),
        Cell::F64(value) if !value.is_finite() => return Err(invalid_decimal(&value.to_string())),
        Cell::F64(value) => value.to_string(),
        Cell::String(value) => {
            let trimmed = value.trim();
            if !is_decimal_literal(trimmed) {
                return Err(invalid_decimal(trimmed));
            }
            trimmed.to_string()
        }
        other => return Err(unsupported(&other, PgType::Numeric)),
    };

    Ok(Cell::Numeric(value))
}

fn to_text(cell: Cell) -> Cell {
    let value = match cell {
        Cell::String(value) | Cell::Numeric(value) => value,
        Cell::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Cell::Bit(value) => value,
        Cell::Bool(value) => value.to_string(),
        Cell::I64(value) => value.to_string(),
        Cell::U64(value) => value.to_string(),
        Cell::F64(value) => value.to_string(),
        Cell::Date(value) => value.to_string(),
        Cell::Time(value) => value.to_string(),
        Cell::Timestamp(value) => value.to_string(),
        Cell::Json(value) => value.to_string(),
        Cell::Null => return Cell::Null,
    };

    Cell::String(value)
}

fn to_bytes(cell: Cell) -> EtlResult<Cell> {
    let bytes = match cell {
        Cell::Bytes(bytes) => bytes,
        Cell::String(value) | Cell::Numeric(value) | Cell::Bit(value) => value.into_bytes(),
        Cell::Json(value) => value.to_string().into_bytes(),
        other => return Err(unsupported(&other, PgType::Bytea)),
    };

    Ok(Cell::Bytes(bytes))
}

/// Converts a value to a single bit, the width of the PostgreSQL `bit` column it is loaded into.
fn to_bit(cell: Cell) -> EtlResult<Cell> {
    let value = match &cell {
        Cell::Bool(value) => u64::from(*value),
        Cell::I64(value) => u64::try_from(*value).unwrap_or(u64::MAX),
        Cell::U64(value) => *value,
        // MySQL returns BIT columns as big endian bytes.
        Cell::Bytes(bytes) if bytes.len() <= 8 => bytes
            .iter()
            .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)),
        Cell::Bit(value) | Cell::String(value) => match value.trim() {
            "0" => 0,
            "1" => 1,
            _ => u64::MAX,
        },
        _ => return Err(unsupported(&cell, PgType::Bit)),
    };

    if value > 1 {
        bail!(
            ErrorKind::TypeConversionError,
            "Value does not fit in a bit column",
            format!("{cell:?} has more than one bit")
        );
    }

    Ok(Cell::Bit(value.to_string()))
}

/// Returns whether `value` is a plain decimal number such as `-12`, `3.50` or `.5`.
///
/// Exponents and the `nan`/`inf` spellings accepted by float parsing are rejected since MySQL
/// `DECIMAL` columns never produce them.
fn is_decimal_literal(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (integer, fraction) = digits.split_once('.').unwrap_or((digits, ""));

    (!integer.is_empty() || !fraction.is_empty())
        && integer.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

fn invalid_decimal(value: &str) -> crate::error::EtlError {
    crate::etl_error!(
        ErrorKind::TypeConversionError,
        "Invalid decimal value",
        format!("`{value}` is not a finite decimal number")
    )
}

/// Returns whether `value` is a MySQL zero date such as `0000-00-00` or `0000-00-00 00:00:00`.
fn is_zero_date(value: &str) -> bool {
    value.trim().starts_with("0000-00-00")
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_timestamp(value: &str) -> EtlResult<NaiveDateTime> {
    let value = value.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(timestamp);
        }
    }

    Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?.and_time(NaiveTime::MIN))
}

fn to_timestamp(cell: Cell) -> EtlResult<Cell> {
    match cell {
        Cell::Timestamp(_) => Ok(cell),
        Cell::Date(date) => Ok(Cell::Timestamp(date.and_time(NaiveTime::MIN))),
        Cell::String(value) if is_zero_date(&value) => Ok(Cell::Null),
        Cell::String(value) => Ok(Cell::Timestamp(parse_timestamp(&value)?)),
        other => Err(unsupported(&other, PgType::Timestamp)),
    }
}

fn to_date(cell: Cell) -> EtlResult<Cell> {
    match cell {
        Cell::Date(_) => Ok(cell),
        Cell::Timestamp(timestamp) => Ok(Cell::Date(timestamp.date())),
        Cell::String(value) if is_zero_date(&value) => Ok(Cell::Null),
        Cell::String(value) => match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
            Ok(date) => Ok(Cell::Date(date)),
            Err(_) => Ok(Cell::Date(parse_timestamp(&value)?.date())),
        },
        other => Err(unsupported(&other, PgType::Date)),
    }
}

fn to_time(cell: Cell) -> EtlResult<Cell> {
    match cell {
        Cell::Time(_) => Ok(cell),
        Cell::Timestamp(timestamp) => Ok(Cell::Time(timestamp.time())),
        Cell::String(value) if is_duration_outside_day(&value) => bail!(
            ErrorKind::TypeConversionError,
            "Time value is outside the range of a time of day",
            format!(
                "MySQL TIME `{}` is negative or exceeds 24 hours and cannot be stored as time",
                value.trim()
            )
        ),
        Cell::String(value) => Ok(Cell::Time(NaiveTime::parse_from_str(
            value.trim(),
            "%H:%M:%S%.f",
        )?)),
        other => Err(unsupported(&other, PgType::Time)),
    }
}

/// Returns whether a MySQL `TIME` literal is an elapsed duration rather than a time of day,
/// for example `-01:30:00` or `120:00:00`.
fn is_duration_outside_day(value: &str) -> bool {
    let value = value.trim();
    if value.starts_with('-') {
        return true;
    }

    value
        .split_once(':')
        .and_then(|(hours, _)| hours.parse::<u32>().ok())
        .is_some_and(|hours| hours >= 24)
}

fn to_json(cell: Cell) -> EtlResult<Cell> {
    match cell {
        Cell::Json(_) => Ok(cell),
        Cell::String(value) if value.trim().is_empty() => Ok(Cell::Null),
        Cell::String(value) => Ok(Cell::Json(serde_json::from_str(&value)?)),
        Cell::Bytes(bytes) if bytes.is_empty() => Ok(Cell::Null),
        Cell::Bytes(bytes) => Ok(Cell::Json(serde_json::from_slice(&bytes)?)),
        other => Err(unsupported(&other, PgType::Jsonb)),
    }
}

fn unsupported(cell: &Cell, pg_type: PgType) -> crate::error::EtlError {
    crate::etl_error!(
        ErrorKind::TypeConversionError,
        "Value cannot be converted to the column type",
        format!("{} values cannot be converted to {pg_type}", cell.kind_name())
    )
}

fn out_of_range(cell: &Cell, min: i64, max: i64) -> crate::error::EtlError {
    crate::etl_error!(
        ErrorKind::TypeConversionError,
        "Integer value is out of range",
        format!("{cell:?} is outside [{min}, {max}]")
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn patient_types() -> ColumnTypes {
        ColumnTypes::new(
            "patient",
            vec![
                ("PatNum".to_string(), PgType::BigInt),
                ("Gender".to_string(), PgType::Boolean),
                ("Position".to_string(), PgType::SmallInt),
                ("Birthdate".to_string(), PgType::Date),
                ("DateTStamp".to_string(), PgType::Timestamp),
                ("EstBalance".to_string(), PgType::DoublePrecision),
                ("LName".to_string(), PgType::Varchar),
                ("Preferences".to_string(), PgType::Jsonb),
            ],
        )
    }

    #[test]
    fn test_mysql_row_is_coerced_to_column_types() {
        let row = RowData::from([
            ("PatNum".to_string(), Cell::U64(42)),
            ("Gender".to_string(), Cell::I64(1)),
            ("Position".to_string(), Cell::String("2".to_string())),
            ("Birthdate".to_string(), Cell::String("0000-00-00".to_string())),
            (
                "DateTStamp".to_string(),
                Cell::String("2024-03-01 08:30:00".to_string()),
            ),
            ("EstBalance".to_string(), Cell::Numeric("125.50".to_string())),
            ("LName".to_string(), Cell::Bytes(b"Smith".to_vec())),
            ("Preferences".to_string(), Cell::String("{\"sms\":true}".to_string())),
            ("Untyped".to_string(), Cell::I64(7)),
        ]);

        let row = convert_row_data_types(&patient_types(), row).unwrap();

        assert_eq!(row["PatNum"], Cell::I64(42));
        assert_eq!(row["Gender"], Cell::Bool(true));
        assert_eq!(row["Position"], Cell::I64(2));
        assert_eq!(row["Birthdate"], Cell::Null);
        assert_eq!(
            row["DateTStamp"],
            Cell::Timestamp(
                NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap()
            )
        );
        assert_eq!(row["EstBalance"], Cell::F64(125.5));
        assert_eq!(row["LName"], Cell::String("Smith".to_string()));
        assert_eq!(row["Preferences"], Cell::Json(json!({ "sms": true })));
        assert_eq!(row["Untyped"], Cell::I64(7));
    }

    #[test]
    fn test_nulls_stay_null() {
        for pg_type in [PgType::Boolean, PgType::Date, PgType::Jsonb, PgType::Text] {
            assert_eq!(convert_cell(Cell::Null, pg_type).unwrap(), Cell::Null);
        }
        assert_eq!(
            convert_cell(Cell::String(String::new()), PgType::Jsonb).unwrap(),
            Cell::Null
        );
    }

    #[test]
    fn test_out_of_range_integer_is_rejected() {
        let err = convert_cell(Cell::I64(70_000), PgType::SmallInt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversionError);

        let err = convert_cell(Cell::U64(u64::MAX), PgType::BigInt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversionError);

        assert_eq!(
            convert_cell(Cell::I64(32_767), PgType::SmallInt).unwrap(),
            Cell::I64(32_767)
        );
    }

    #[test]
    fn test_conversion_errors_name_table_and_column() {
        let row = RowData::from([("PatNum".to_string(), Cell::String("abc".to_string()))]);

        let err = convert_row_data_types(&patient_types(), row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversionError);
        assert_eq!(err.table_name(), Some("patient"));
        assert_eq!(err.details()["column"], "PatNum");
        assert_eq!(err.details()["target_type"], "bigint");
    }

    #[test]
    fn test_date_values_accept_timestamps() {
        assert_eq!(
            convert_cell(Cell::String("2023-12-31 23:59:59".to_string()), PgType::Date).unwrap(),
            Cell::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())
        );
        assert_eq!(
            convert_cell(Cell::String("0000-00-00 00:00:00".to_string()), PgType::Timestamp)
                .unwrap(),
            Cell::Null
        );
        assert!(convert_cell(Cell::String("yesterday".to_string()), PgType::Date).is_err());
    }

    #[test]
    fn test_floats_beyond_the_integer_range_are_rejected() {
        for value in [1e30, -1e30, f64::INFINITY, 9_223_372_036_854_775_808.0] {
            let err = convert_cell(Cell::F64(value), PgType::BigInt).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TypeConversionError);
        }

        assert_eq!(
            convert_cell(Cell::F64(-4096.0), PgType::BigInt).unwrap(),
            Cell::I64(-4096)
        );
        assert!(convert_cell(Cell::F64(3e9), PgType::Integer).is_err());
    }

    #[test]
    fn test_bit_columns_receive_bit_strings() {
        assert_eq!(
            convert_cell(Cell::I64(1), PgType::Bit).unwrap(),
            Cell::Bit("1".to_string())
        );
        assert_eq!(
            convert_cell(Cell::Bytes(vec![0]), PgType::Bit).unwrap(),
            Cell::Bit("0".to_string())
        );
        assert_eq!(
            convert_cell(Cell::Bool(true), PgType::Bit).unwrap(),
            Cell::Bit("1".to_string())
        );

        let err = convert_cell(Cell::Bytes(vec![0, 5]), PgType::Bit).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversionError);
    }

    #[test]
    fn test_bytea_accepts_only_byte_like_values() {
        assert_eq!(
            convert_cell(Cell::String("abc".to_string()), PgType::Bytea).unwrap(),
            Cell::Bytes(b"abc".to_vec())
        );
        assert_eq!(
            convert_cell(Cell::Bytes(vec![0xde, 0xad]), PgType::Bytea).unwrap(),
            Cell::Bytes(vec![0xde, 0xad])
        );

        let err = convert_cell(Cell::I64(7), PgType::Bytea).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversionError);
    }

    #[test]
    fn test_numeric_rejects_non_decimal_text() {
        for value in ["nan", "inf", "-Infinity", "1e5", "", "12.3.4", "-"] {
            let err = convert_cell(Cell::String(value.to_string()), PgType::Numeric).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TypeConversionError);
        }
        assert!(convert_cell(Cell::F64(f64::NAN), PgType::Numeric).is_err());

        assert_eq!(
            convert_cell(Cell::String(" -12.50 ".to_string()), PgType::Numeric).unwrap(),
            Cell::Numeric("-12.50".to_string())
        );
        assert_eq!(
            convert_cell(Cell::String(".5".to_string()), PgType::Numeric).unwrap(),
            Cell::Numeric(".5".to_string())
        );
    }

    #[test]
    fn test_durations_are_not_times_of_day() {
        assert_eq!(
            convert_cell(Cell::String("08:15:00".to_string()), PgType::Time).unwrap(),
            Cell::Time(NaiveTime::from_hms_opt(8, 15, 0).unwrap())
        );

        for value in ["-01:30:00", "120:00:00", "24:00:00"] {
            let err = convert_cell(Cell::String(value.to_string()), PgType::Time).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TypeConversionError);
            assert!(err.detail().unwrap().contains("exceeds 24 hours"));
        }
    }
}
