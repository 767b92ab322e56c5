use std::fmt;

use arrow_schema::{DataType, TimeUnit};
use serde::{Deserialize, Serialize};

/// Engine logical column type.
///
/// Temporal values follow the engine's fixed units: dates are day counts since the epoch,
/// times and timestamps are microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Decimal { width: u8, scale: i8 },
    Varchar,
    Blob,
    Struct(Vec<(String, LogicalType)>),
    List(Box<LogicalType>),
    Map,
    Other(String),
}

impl LogicalType {
    /// Engine type the bridge reports for an arrow column type.
    pub fn from_arrow(dt: &DataType) -> Self {
        match dt {
            DataType::Boolean => LogicalType::Boolean,
            DataType::Int8 => LogicalType::TinyInt,
            DataType::Int16 => LogicalType::SmallInt,
            DataType::Int32 => LogicalType::Integer,
            DataType::Int64 => LogicalType::BigInt,
            DataType::UInt8 => LogicalType::UTinyInt,
            DataType::UInt16 => LogicalType::USmallInt,
            DataType::UInt32 => LogicalType::UInteger,
            DataType::UInt64 => LogicalType::UBigInt,
            DataType::Float16 | DataType::Float32 => LogicalType::Float,
            DataType::Float64 => LogicalType::Double,
            DataType::Date32 | DataType::Date64 => LogicalType::Date,
            DataType::Time32(_) | DataType::Time64(_) => LogicalType::Time,
            DataType::Timestamp(_, None) => LogicalType::Timestamp,
            DataType::Timestamp(_, Some(_)) => LogicalType::TimestampTz,
            DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => LogicalType::Decimal {
                width: *p,
                scale: *s,
            },
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => LogicalType::Varchar,
            DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::FixedSizeBinary(_) => LogicalType::Blob,
            DataType::Struct(fields) => LogicalType::Struct(
                fields
                    .iter()
                    .map(|f| (f.name().clone(), LogicalType::from_arrow(f.data_type())))
                    .collect(),
            ),
            DataType::List(f) | DataType::LargeList(f) | DataType::FixedSizeList(f, _) => {
                LogicalType::List(Box::new(LogicalType::from_arrow(f.data_type())))
            }
            DataType::Map(_, _) => LogicalType::Map,
            DataType::Dictionary(_, value) => LogicalType::from_arrow(value),
            other => LogicalType::Other(other.to_string()),
        }
    }

    /// Arrow type used for literals of this engine type.
    ///
    /// Returns `None` for types without a scalar literal form.
    pub fn to_arrow(&self) -> Option<DataType> {
        Some(match self {
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::TinyInt => DataType::Int8,
            LogicalType::SmallInt => DataType::Int16,
            LogicalType::Integer => DataType::Int32,
            LogicalType::BigInt => DataType::Int64,
            LogicalType::UTinyInt => DataType::UInt8,
            LogicalType::USmallInt => DataType::UInt16,
            LogicalType::UInteger => DataType::UInt32,
            LogicalType::UBigInt => DataType::UInt64,
            LogicalType::Float => DataType::Float32,
            LogicalType::Double => DataType::Float64,
            LogicalType::Date => DataType::Date32,
            LogicalType::Time => DataType::Time64(TimeUnit::Microsecond),
            LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            LogicalType::TimestampTz => {
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
            }
            LogicalType::Decimal { width, scale } => DataType::Decimal128(*width, *scale),
            LogicalType::Varchar => DataType::Utf8,
            LogicalType::Blob => DataType::Binary,
            LogicalType::Struct(_)
            | LogicalType::List(_)
            | LogicalType::Map
            | LogicalType::Other(_) => return None,
        })
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            LogicalType::Struct(_) | LogicalType::List(_) | LogicalType::Map
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, LogicalType::Float | LogicalType::Double)
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            LogicalType::TinyInt
                | LogicalType::SmallInt
                | LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::UTinyInt
                | LogicalType::USmallInt
                | LogicalType::UInteger
                | LogicalType::UBigInt
        )
    }

    /// Types whose statistics are tracked as numeric min/max.
    pub fn has_numeric_stats(&self) -> bool {
        self.is_integral()
            || self.is_floating()
            || matches!(
                self,
                LogicalType::Date
                    | LogicalType::Time
                    | LogicalType::Timestamp
                    | LogicalType::TimestampTz
                    | LogicalType::Decimal { .. }
            )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::TinyInt => write!(f, "TINYINT"),
            LogicalType::SmallInt => write!(f, "SMALLINT"),
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::BigInt => write!(f, "BIGINT"),
            LogicalType::UTinyInt => write!(f, "UTINYINT"),
            LogicalType::USmallInt => write!(f, "USMALLINT"),
            LogicalType::UInteger => write!(f, "UINTEGER"),
            LogicalType::UBigInt => write!(f, "UBIGINT"),
            LogicalType::Float => write!(f, "FLOAT"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Time => write!(f, "TIME"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::TimestampTz => write!(f, "TIMESTAMP WITH TIME ZONE"),
            LogicalType::Decimal { width, scale } => write!(f, "DECIMAL({width},{scale})"),
            LogicalType::Varchar => write!(f, "VARCHAR"),
            LogicalType::Blob => write!(f, "BLOB"),
            LogicalType::Struct(children) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
            LogicalType::List(child) => write!(f, "{child}[]"),
            LogicalType::Map => write!(f, "MAP"),
            LogicalType::Other(name) => write!(f, "{name}"),
        }
    }
}
