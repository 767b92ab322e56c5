//! Value codec between engine values and arrow literals.
//!
//! Dates travel as day counts, times and timestamps as microseconds, decimals through their
//! text form so any engine width lands in the arrow decimal the column uses.

use std::sync::Arc;

use arrow::datatypes::Decimal128Type;
use arrow_cast::parse::parse_decimal;
use arrow_schema::DataType;
use scanbridge_common::{BridgeError, Result};
use scanbridge_execution::{ScalarValue, cast_exact};
use scanbridge_planner::{LogicalType, Value, decimal_to_string};

/// Converts an engine value into an arrow literal of the engine type's natural arrow type.
pub fn value_to_scalar(value: &Value) -> Result<ScalarValue> {
    Ok(match value {
        Value::Null(ty) => ScalarValue::Null(ty.to_arrow().ok_or_else(|| {
            BridgeError::TranslationSkip(format!("no literal form for {ty} nulls"))
        })?),
        Value::Boolean(v) => ScalarValue::Boolean(*v),
        Value::TinyInt(v) => ScalarValue::Int8(*v),
        Value::SmallInt(v) => ScalarValue::Int16(*v),
        Value::Integer(v) => ScalarValue::Int32(*v),
        Value::BigInt(v) => ScalarValue::Int64(*v),
        Value::UTinyInt(v) => ScalarValue::UInt8(*v),
        Value::USmallInt(v) => ScalarValue::UInt16(*v),
        Value::UInteger(v) => ScalarValue::UInt32(*v),
        Value::UBigInt(v) => ScalarValue::UInt64(*v),
        Value::Float(v) => ScalarValue::Float32(*v),
        Value::Double(v) => ScalarValue::Float64(*v),
        Value::Date(days) => ScalarValue::Date32(*days),
        Value::Time(micros) => ScalarValue::Time64Microsecond(*micros),
        Value::Timestamp(micros) => ScalarValue::TimestampMicrosecond(*micros, None),
        Value::TimestampTz(micros) => {
            ScalarValue::TimestampMicrosecond(*micros, Some(Arc::from("UTC")))
        }
        Value::Decimal {
            value,
            width,
            scale,
        } => {
            let text = decimal_to_string(*value, *scale);
            let parsed = parse_decimal::<Decimal128Type>(&text, *width, *scale).map_err(|e| {
                BridgeError::TranslationSkip(format!("decimal constant {text}: {e}"))
            })?;
            ScalarValue::Decimal128(parsed, *width, *scale)
        }
        Value::Varchar(v) => ScalarValue::Utf8(v.clone()),
        Value::Blob(v) => ScalarValue::Binary(v.clone()),
    })
}

/// Literal for comparing against a column of arrow type `target`.
///
/// The cast must be exact. A constant the column cannot represent unchanged (overflow, a
/// fraction on an integer column, sub-millisecond micros on a millisecond column, extra
/// decimal digits, bad text) cannot be pushed down and reports a translation skip.
pub fn literal_for_column(value: &Value, target: &DataType) -> Result<ScalarValue> {
    let scalar = value_to_scalar(value)?;
    if &scalar.data_type() == target {
        return Ok(scalar);
    }
    let one = scalar.to_array_of_size(1)?;
    let cast = cast_exact(&one, target).map_err(|e| {
        BridgeError::TranslationSkip(format!("constant {value} does not fit {target}: {e}"))
    })?;
    // Column types without a literal variant keep the source literal; the cast proved it fits
    // and evaluation coerces it again.
    Ok(ScalarValue::try_from_array(cast.as_ref(), 0).unwrap_or(scalar))
}

/// Converts an arrow literal back into an engine value.
pub fn scalar_to_value(scalar: &ScalarValue) -> Result<Value> {
    Ok(match scalar {
        ScalarValue::Null(dt) => Value::Null(LogicalType::from_arrow(dt)),
        ScalarValue::Boolean(v) => Value::Boolean(*v),
        ScalarValue::Int8(v) => Value::TinyInt(*v),
        ScalarValue::Int16(v) => Value::SmallInt(*v),
        ScalarValue::Int32(v) => Value::Integer(*v),
        ScalarValue::Int64(v) => Value::BigInt(*v),
        ScalarValue::UInt8(v) => Value::UTinyInt(*v),
        ScalarValue::UInt16(v) => Value::USmallInt(*v),
        ScalarValue::UInt32(v) => Value::UInteger(*v),
        ScalarValue::UInt64(v) => Value::UBigInt(*v),
        ScalarValue::Float32(v) => Value::Float(*v),
        ScalarValue::Float64(v) => Value::Double(*v),
        ScalarValue::Date32(v) => Value::Date(*v),
        ScalarValue::Time64Microsecond(v) => Value::Time(*v),
        ScalarValue::TimestampMicrosecond(v, None) => Value::Timestamp(*v),
        ScalarValue::TimestampMicrosecond(v, Some(_)) => Value::TimestampTz(*v),
        ScalarValue::Decimal128(v, p, s) => Value::Decimal {
            value: *v,
            width: *p,
            scale: *s,
        },
        ScalarValue::Utf8(v) => Value::Varchar(v.clone()),
        ScalarValue::Binary(v) => Value::Blob(v.clone()),
    })
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::TimeUnit;

    use super::*;

    #[test]
    fn integers_keep_their_width() {
        assert_eq!(
            value_to_scalar(&Value::UBigInt(u64::MAX)).expect("u64"),
            ScalarValue::UInt64(u64::MAX)
        );
        assert_eq!(
            literal_for_column(&Value::BigInt(50), &DataType::Int32).expect("narrowed"),
            ScalarValue::Int32(50)
        );
    }

    #[test]
    fn overflowing_constants_are_skipped() {
        let err = literal_for_column(&Value::BigInt(i64::MAX), &DataType::Int8)
            .expect_err("overflow");
        assert!(err.is_skip());
        let err = literal_for_column(&Value::Varchar("abc".into()), &DataType::Int64)
            .expect_err("not a number");
        assert!(err.is_skip());
    }

    #[test]
    fn decimals_round_trip_through_text() {
        let value = Value::Decimal {
            value: -1234,
            width: 10,
            scale: 2,
        };
        let scalar = value_to_scalar(&value).expect("decimal");
        assert_eq!(scalar, ScalarValue::Decimal128(-1234, 10, 2));
        assert_eq!(scalar_to_value(&scalar).expect("back"), value);

        let widened =
            literal_for_column(&value, &DataType::Decimal128(20, 4)).expect("rescaled");
        assert_eq!(widened, ScalarValue::Decimal128(-123_400, 20, 4));
    }

    #[test]
    fn temporal_values_use_fixed_units() {
        assert_eq!(
            value_to_scalar(&Value::TimestampTz(5)).expect("tz"),
            ScalarValue::TimestampMicrosecond(5, Some(Arc::from("UTC")))
        );
        assert_eq!(
            literal_for_column(&Value::Date(19_000), &DataType::Date32).expect("date"),
            ScalarValue::Date32(19_000)
        );
    }

    #[test]
    fn coarser_temporal_columns_take_only_whole_units() {
        let millis = DataType::Timestamp(TimeUnit::Millisecond, None);
        assert_eq!(
            literal_for_column(&Value::Timestamp(3_000), &millis).expect("whole millis"),
            ScalarValue::TimestampMicrosecond(3_000, None)
        );
        let err = literal_for_column(&Value::Timestamp(1_500), &millis).expect_err("1.5 ms");
        assert!(err.is_skip());
        let time_millis = DataType::Time32(TimeUnit::Millisecond);
        let err = literal_for_column(&Value::Time(1_500), &time_millis).expect_err("1.5 ms of day");
        assert!(err.is_skip());
    }

    #[test]
    fn inexact_constants_are_skipped() {
        let err = literal_for_column(&Value::Double(2.5), &DataType::Int64).expect_err("fraction");
        assert!(err.is_skip());
        assert_eq!(
            literal_for_column(&Value::Double(2.0), &DataType::Int64).expect("whole"),
            ScalarValue::Int64(2)
        );
        let err = literal_for_column(&Value::Double(0.1), &DataType::Float32).expect_err("f32");
        assert!(err.is_skip());
        let value = Value::Decimal {
            value: 12_345,
            width: 10,
            scale: 3,
        };
        let err = literal_for_column(&value, &DataType::Decimal128(10, 2)).expect_err("digits");
        assert!(err.is_skip());
    }

    #[test]
    fn nulls_are_typed() {
        assert_eq!(
            value_to_scalar(&Value::Null(LogicalType::Varchar)).expect("null"),
            ScalarValue::Null(DataType::Utf8)
        );
        assert!(value_to_scalar(&Value::Null(LogicalType::Map))
            .expect_err("no map literal")
            .is_skip());
    }
}
