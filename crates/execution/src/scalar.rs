//! Single typed values of the columnar compute layer.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
    Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, StringArray,
    Time64MicrosecondArray, TimestampMicrosecondArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array, new_null_array,
};
use arrow::datatypes::{
    Date32Type, Decimal128Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, Time64MicrosecondType, TimeUnit, TimestampMicrosecondType, UInt8Type,
    UInt16Type, UInt32Type, UInt64Type,
};
use arrow_schema::DataType;
use scanbridge_common::{BridgeError, Result};

/// A literal in the compute expression algebra.
///
/// Temporal variants carry the fixed units the bridge encodes into: day counts for dates,
/// microseconds for times and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// Typed null.
    Null(DataType),
    /// Boolean literal.
    Boolean(bool),
    /// 8-bit signed integer.
    Int8(i8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 8-bit unsigned integer.
    UInt8(u8),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// Single-precision float.
    Float32(f32),
    /// Double-precision float.
    Float64(f64),
    /// Days since the epoch.
    Date32(i32),
    /// Microseconds since midnight.
    Time64Microsecond(i64),
    /// Microseconds since the epoch with optional timezone.
    TimestampMicrosecond(i64, Option<Arc<str>>),
    /// Unscaled value, precision, scale.
    Decimal128(i128, u8, i8),
    /// UTF-8 string.
    Utf8(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Arrow type of this literal.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null(dt) => dt.clone(),
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Date32(_) => DataType::Date32,
            ScalarValue::Time64Microsecond(_) => DataType::Time64(TimeUnit::Microsecond),
            ScalarValue::TimestampMicrosecond(_, tz) => {
                DataType::Timestamp(TimeUnit::Microsecond, tz.clone())
            }
            ScalarValue::Decimal128(_, p, s) => DataType::Decimal128(*p, *s),
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Binary(_) => DataType::Binary,
        }
    }

    /// True for typed nulls.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null(_))
    }

    /// Boolean payload, if this is a non-null boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Materialises the literal as an array of `len` identical rows.
    pub fn to_array_of_size(&self, len: usize) -> Result<ArrayRef> {
        let array: ArrayRef = match self {
            ScalarValue::Null(dt) => new_null_array(dt, len),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            ScalarValue::Int8(v) => Arc::new(Int8Array::from_value(*v, len)),
            ScalarValue::Int16(v) => Arc::new(Int16Array::from_value(*v, len)),
            ScalarValue::Int32(v) => Arc::new(Int32Array::from_value(*v, len)),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from_value(*v, len)),
            ScalarValue::UInt8(v) => Arc::new(UInt8Array::from_value(*v, len)),
            ScalarValue::UInt16(v) => Arc::new(UInt16Array::from_value(*v, len)),
            ScalarValue::UInt32(v) => Arc::new(UInt32Array::from_value(*v, len)),
            ScalarValue::UInt64(v) => Arc::new(UInt64Array::from_value(*v, len)),
            ScalarValue::Float32(v) => Arc::new(Float32Array::from_value(*v, len)),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from_value(*v, len)),
            ScalarValue::Date32(v) => Arc::new(Date32Array::from_value(*v, len)),
            ScalarValue::Time64Microsecond(v) => {
                Arc::new(Time64MicrosecondArray::from_value(*v, len))
            }
            ScalarValue::TimestampMicrosecond(v, tz) => Arc::new(
                TimestampMicrosecondArray::from_value(*v, len).with_timezone_opt(tz.clone()),
            ),
            ScalarValue::Decimal128(v, p, s) => Arc::new(
                Decimal128Array::from_value(*v, len)
                    .with_precision_and_scale(*p, *s)
                    .map_err(|e| BridgeError::External(format!("decimal literal: {e}")))?,
            ),
            ScalarValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            ScalarValue::Binary(v) => Arc::new(BinaryArray::from(vec![v.as_slice(); len])),
        };
        Ok(array)
    }

    /// Reads row `index` of `array` back into a literal.
    ///
    /// Only the types a literal can carry are accepted; anything else is an external failure.
    pub fn try_from_array(array: &dyn Array, index: usize) -> Result<Self> {
        if index >= array.len() {
            return Err(BridgeError::Contract(format!(
                "row {index} out of range for array of length {}",
                array.len()
            )));
        }
        if array.is_null(index) {
            return Ok(ScalarValue::Null(array.data_type().clone()));
        }
        Ok(match array.data_type() {
            DataType::Boolean => ScalarValue::Boolean(array.as_boolean().value(index)),
            DataType::Int8 => ScalarValue::Int8(array.as_primitive::<Int8Type>().value(index)),
            DataType::Int16 => ScalarValue::Int16(array.as_primitive::<Int16Type>().value(index)),
            DataType::Int32 => ScalarValue::Int32(array.as_primitive::<Int32Type>().value(index)),
            DataType::Int64 => ScalarValue::Int64(array.as_primitive::<Int64Type>().value(index)),
            DataType::UInt8 => ScalarValue::UInt8(array.as_primitive::<UInt8Type>().value(index)),
            DataType::UInt16 => {
                ScalarValue::UInt16(array.as_primitive::<UInt16Type>().value(index))
            }
            DataType::UInt32 => {
                ScalarValue::UInt32(array.as_primitive::<UInt32Type>().value(index))
            }
            DataType::UInt64 => {
                ScalarValue::UInt64(array.as_primitive::<UInt64Type>().value(index))
            }
            DataType::Float32 => {
                ScalarValue::Float32(array.as_primitive::<Float32Type>().value(index))
            }
            DataType::Float64 => {
                ScalarValue::Float64(array.as_primitive::<Float64Type>().value(index))
            }
            DataType::Date32 => {
                ScalarValue::Date32(array.as_primitive::<Date32Type>().value(index))
            }
            DataType::Time64(TimeUnit::Microsecond) => ScalarValue::Time64Microsecond(
                array.as_primitive::<Time64MicrosecondType>().value(index),
            ),
            DataType::Timestamp(TimeUnit::Microsecond, tz) => ScalarValue::TimestampMicrosecond(
                array.as_primitive::<TimestampMicrosecondType>().value(index),
                tz.clone(),
            ),
            DataType::Decimal128(p, s) => ScalarValue::Decimal128(
                array.as_primitive::<Decimal128Type>().value(index),
                *p,
                *s,
            ),
            DataType::Utf8 => ScalarValue::Utf8(array.as_string::<i32>().value(index).to_string()),
            DataType::Binary => ScalarValue::Binary(array.as_binary::<i32>().value(index).to_vec()),
            other => {
                return Err(BridgeError::External(format!(
                    "no literal form for arrow type {other}"
                )));
            }
        })
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null(_) => write!(f, "null"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int8(v) => write!(f, "{v}"),
            ScalarValue::Int16(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::UInt8(v) => write!(f, "{v}"),
            ScalarValue::UInt16(v) => write!(f, "{v}"),
            ScalarValue::UInt32(v) => write!(f, "{v}"),
            ScalarValue::UInt64(v) => write!(f, "{v}"),
            ScalarValue::Float32(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Date32(v) => write!(f, "date32({v})"),
            ScalarValue::Time64Microsecond(v) => write!(f, "time64[us]({v})"),
            ScalarValue::TimestampMicrosecond(v, _) => write!(f, "timestamp[us]({v})"),
            ScalarValue::Decimal128(v, p, s) => write!(f, "decimal128({p}, {s})[{v}]"),
            ScalarValue::Utf8(v) => write!(f, "\"{v}\""),
            ScalarValue::Binary(v) => write!(f, "binary[{} bytes]", v.len()),
        }
    }
}
