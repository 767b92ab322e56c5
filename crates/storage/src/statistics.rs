//! Statistics bridge: supplied or computed column statistics into engine statistics.
//!
//! Both sources go through the same steps: an empty per-type statistics object, null/valid
//! flags from the null count, then type-directed min/max. Float columns holding NaN get no
//! statistics at all, because arrow aggregates skip NaN while the engine orders it last.

use std::collections::HashSet;

use arrow::array::{Array, ArrayRef, AsArray, new_empty_array};
use arrow::compute::{concat, max, max_string, min, min_string};
use arrow::datatypes::{
    ArrowNumericType, Date32Type, Date64Type, Float32Type, Float64Type, Int8Type, Int16Type,
    Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::row::{RowConverter, SortField};
use arrow_schema::DataType;
use scanbridge_common::{BridgeError, Result};
use scanbridge_planner::{BaseStatistics, LogicalType, StatsInfo, Value};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Supplied min/max carrier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    #[default]
    Null,
    Int64(i64),
    Double(f64),
    String(String),
}

impl StatValue {
    pub fn is_nan(&self) -> bool {
        matches!(self, StatValue::Double(v) if v.is_nan())
    }
}

/// Supplied statistics for one column, keyed by name or by column index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<usize>,
    #[serde(default)]
    pub min: StatValue,
    #[serde(default)]
    pub max: StatValue,
    #[serde(default)]
    pub null_count: u64,
    #[serde(default)]
    pub distinct_count: Option<u64>,
    #[serde(default)]
    pub max_string_length: Option<u32>,
}

impl ColumnStatistics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn at_index(column_index: usize) -> Self {
        Self {
            column_index: Some(column_index),
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, min: StatValue, max: StatValue) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_null_count(mut self, null_count: u64) -> Self {
        self.null_count = null_count;
        self
    }
}

/// Statistics supplied at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: Option<u64>,
    #[serde(default)]
    pub columns: Vec<ColumnStatistics>,
}

impl TableStatistics {
    pub fn new(row_count: Option<u64>) -> Self {
        Self {
            row_count,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnStatistics) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Entry for the column at `index` named `name`; index keys win over name keys.
    pub fn column_at(&self, index: usize, name: &str) -> Option<&ColumnStatistics> {
        self.columns
            .iter()
            .find(|c| c.column_index == Some(index))
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.column_index.is_none() && !c.name.is_empty() && c.name == name)
            })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| BridgeError::InvalidConfig(format!("table statistics: {e}")))
    }
}

/// Casts a supplied bound into the column's engine type.
///
/// Integer sources convert into any numeric destination they fit; float sources truncate
/// toward zero first. Decimals accept only double sources. Returns `None` when the source
/// cannot describe the type or does not fit it, so no wrapped bound is ever reported.
pub fn stat_value_to_value(value: &StatValue, ty: &LogicalType) -> Option<Value> {
    match value {
        StatValue::Null => None,
        StatValue::Int64(v) => {
            let v = *v;
            Some(match ty {
                LogicalType::TinyInt => Value::TinyInt(i8::try_from(v).ok()?),
                LogicalType::SmallInt => Value::SmallInt(i16::try_from(v).ok()?),
                LogicalType::Integer => Value::Integer(i32::try_from(v).ok()?),
                LogicalType::BigInt => Value::BigInt(v),
                LogicalType::UTinyInt => Value::UTinyInt(u8::try_from(v).ok()?),
                LogicalType::USmallInt => Value::USmallInt(u16::try_from(v).ok()?),
                LogicalType::UInteger => Value::UInteger(u32::try_from(v).ok()?),
                LogicalType::UBigInt => Value::UBigInt(u64::try_from(v).ok()?),
                LogicalType::Float => Value::Float(v as f32),
                LogicalType::Double => Value::Double(v as f64),
                LogicalType::Date => Value::Date(i32::try_from(v).ok()?),
                LogicalType::Time => Value::Time(v),
                LogicalType::Timestamp => Value::Timestamp(v),
                LogicalType::TimestampTz => Value::TimestampTz(v),
                _ => return None,
            })
        }
        StatValue::Double(v) => {
            let v = *v;
            Some(match ty {
                LogicalType::TinyInt => Value::TinyInt(truncated(v)?),
                LogicalType::SmallInt => Value::SmallInt(truncated(v)?),
                LogicalType::Integer => Value::Integer(truncated(v)?),
                LogicalType::BigInt => Value::BigInt(truncated(v)?),
                LogicalType::UTinyInt => Value::UTinyInt(truncated(v)?),
                LogicalType::USmallInt => Value::USmallInt(truncated(v)?),
                LogicalType::UInteger => Value::UInteger(truncated(v)?),
                LogicalType::UBigInt => Value::UBigInt(truncated(v)?),
                LogicalType::Float => Value::Float(v as f32),
                LogicalType::Double => Value::Double(v),
                LogicalType::Decimal { width, scale } => double_to_decimal(v, *width, *scale)?,
                _ => return None,
            })
        }
        StatValue::String(s) => match ty {
            LogicalType::Varchar => Some(Value::Varchar(s.clone())),
            _ => None,
        },
    }
}

/// `v` truncated toward zero, if the result fits `T`.
fn truncated<T: TryFrom<i64>>(v: f64) -> Option<T> {
    let t = v.trunc();
    // 2^63 is the first double above i64::MAX; NaN fails both comparisons.
    if !(t >= -9_223_372_036_854_775_808.0 && t < 9_223_372_036_854_775_808.0) {
        return None;
    }
    T::try_from(t as i64).ok()
}

fn double_to_decimal(v: f64, width: u8, scale: i8) -> Option<Value> {
    if !v.is_finite() {
        return None;
    }
    let scaled = (v * 10f64.powi(i32::from(scale))).round();
    let limit = 10f64.powi(i32::from(width));
    if scaled.abs() >= limit {
        return None;
    }
    Some(Value::Decimal {
        value: scaled as i128,
        width,
        scale,
    })
}

fn null_flags(null_count: u64, row_count: Option<u64>) -> StatsInfo {
    match row_count {
        Some(rows) => StatsInfo::from_counts(null_count, rows),
        None if null_count == 0 => StatsInfo::CannotHaveNullValues,
        None => StatsInfo::CanHaveNullAndValidValues,
    }
}

/// Builds engine statistics from supplied statistics for a column of type `ty`.
///
/// Returns `None` for nested, binary and unknown types, and for float columns whose supplied
/// bounds are NaN.
pub fn to_base_statistics(
    column: &ColumnStatistics,
    row_count: Option<u64>,
    ty: &LogicalType,
) -> Option<BaseStatistics> {
    if ty.is_nested() || matches!(ty, LogicalType::Blob | LogicalType::Other(_)) {
        return None;
    }
    if ty.is_floating() && (column.min.is_nan() || column.max.is_nan()) {
        return None;
    }
    let mut stats = BaseStatistics::create_empty(ty.clone());
    stats.set(null_flags(column.null_count, row_count));
    if ty.has_numeric_stats() {
        if let Some(min) = stat_value_to_value(&column.min, ty) {
            stats.set_min(min);
        }
        if let Some(max) = stat_value_to_value(&column.max, ty) {
            stats.set_max(max);
        }
    } else if *ty == LogicalType::Varchar {
        for bound in [&column.min, &column.max] {
            if let StatValue::String(s) = bound {
                stats.update_string(s);
            }
        }
        if let Some(len) = column.max_string_length {
            stats.set_max_string_length(len);
        }
    }
    if let Some(distinct) = column.distinct_count.filter(|d| *d > 0) {
        stats.set_distinct_count(distinct);
    }
    Some(stats)
}

/// Result of computing statistics over column data.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedStats {
    Stats(BaseStatistics),
    /// The float column holds NaN.
    NanDiscarded,
    /// No computed statistics for this arrow type.
    Unsupported,
}

/// True when a float column holds at least one NaN.
pub fn column_has_nan(chunks: &[ArrayRef]) -> bool {
    chunks.iter().any(|chunk| match chunk.data_type() {
        DataType::Float32 => chunk
            .as_primitive::<Float32Type>()
            .iter()
            .flatten()
            .any(f32::is_nan),
        DataType::Float64 => chunk
            .as_primitive::<Float64Type>()
            .iter()
            .flatten()
            .any(f64::is_nan),
        _ => false,
    })
}

fn bounds<T: ArrowNumericType>(array: &ArrayRef) -> Option<(T::Native, T::Native)> {
    let typed = array.as_primitive::<T>();
    Some((min(typed)?, max(typed)?))
}

fn numeric_bounds(array: &ArrayRef) -> Option<Option<(Value, Value)>> {
    fn pair<N>(b: Option<(N, N)>, f: impl Fn(N) -> Value) -> Option<Option<(Value, Value)>> {
        Some(b.map(|(lo, hi)| (f(lo), f(hi))))
    }
    match array.data_type() {
        DataType::Int8 => pair(bounds::<Int8Type>(array), Value::TinyInt),
        DataType::Int16 => pair(bounds::<Int16Type>(array), Value::SmallInt),
        DataType::Int32 => pair(bounds::<Int32Type>(array), Value::Integer),
        DataType::Int64 => pair(bounds::<Int64Type>(array), Value::BigInt),
        DataType::UInt8 => pair(bounds::<UInt8Type>(array), Value::UTinyInt),
        DataType::UInt16 => pair(bounds::<UInt16Type>(array), Value::USmallInt),
        DataType::UInt32 => pair(bounds::<UInt32Type>(array), Value::UInteger),
        DataType::UInt64 => pair(bounds::<UInt64Type>(array), Value::UBigInt),
        DataType::Float32 => pair(bounds::<Float32Type>(array), Value::Float),
        DataType::Float64 => pair(bounds::<Float64Type>(array), Value::Double),
        DataType::Date32 => pair(bounds::<Date32Type>(array), Value::Date),
        DataType::Date64 => pair(bounds::<Date64Type>(array), |ms| {
            Value::Date(ms.div_euclid(MILLIS_PER_DAY) as i32)
        }),
        DataType::Timestamp(unit, tz) => {
            let wrap = |micros: i64| {
                if tz.is_some() {
                    Value::TimestampTz(micros)
                } else {
                    Value::Timestamp(micros)
                }
            };
            match unit {
                TimeUnit::Second => pair(bounds::<TimestampSecondType>(array), |v| {
                    wrap(v.saturating_mul(1_000_000))
                }),
                TimeUnit::Millisecond => pair(bounds::<TimestampMillisecondType>(array), |v| {
                    wrap(v.saturating_mul(1_000))
                }),
                TimeUnit::Microsecond => pair(bounds::<TimestampMicrosecondType>(array), wrap),
                TimeUnit::Nanosecond => pair(bounds::<TimestampNanosecondType>(array), |v| {
                    wrap(v.div_euclid(1_000))
                }),
            }
        }
        _ => None,
    }
}

fn string_bounds(array: &ArrayRef) -> Option<(Option<(String, String)>, u32)> {
    let (bounds, longest) = match array.data_type() {
        DataType::Utf8 => {
            let strings = array.as_string::<i32>();
            (
                min_string(strings).zip(max_string(strings)),
                strings.iter().flatten().map(str::len).max(),
            )
        }
        DataType::LargeUtf8 => {
            let strings = array.as_string::<i64>();
            (
                min_string(strings).zip(max_string(strings)),
                strings.iter().flatten().map(str::len).max(),
            )
        }
        _ => return None,
    };
    let bounds = bounds.map(|(lo, hi)| (lo.to_string(), hi.to_string()));
    let longest = u32::try_from(longest.unwrap_or(0)).unwrap_or(u32::MAX);
    Some((bounds, longest))
}

/// Exact count of distinct non-null values.
pub fn distinct_count(array: &ArrayRef) -> Result<u64> {
    let converter = RowConverter::new(vec![SortField::new(array.data_type().clone())])?;
    let rows = converter.convert_columns(&[array.clone()])?;
    let distinct = (0..array.len())
        .filter(|i| array.is_valid(*i))
        .map(|i| rows.row(i))
        .collect::<HashSet<_>>();
    Ok(distinct.len() as u64)
}

/// Computes statistics over the chunks of one column.
///
/// Boolean, decimal, time, binary, view and nested columns are unsupported.
pub fn compute_column_statistics(
    chunks: &[ArrayRef],
    data_type: &DataType,
    with_distinct: bool,
) -> Result<ComputedStats> {
    let supported = matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Utf8
            | DataType::LargeUtf8
    );
    if !supported {
        return Ok(ComputedStats::Unsupported);
    }
    if column_has_nan(chunks) {
        return Ok(ComputedStats::NanDiscarded);
    }
    let array = match chunks {
        [] => new_empty_array(data_type),
        [single] => single.clone(),
        many => {
            let refs = many.iter().map(|a| a.as_ref()).collect::<Vec<&dyn Array>>();
            concat(&refs)?
        }
    };

    let mut stats = BaseStatistics::create_empty(LogicalType::from_arrow(data_type));
    stats.set(StatsInfo::from_counts(
        array.null_count() as u64,
        array.len() as u64,
    ));
    if let Some(bounds) = numeric_bounds(&array) {
        if let Some((lo, hi)) = bounds {
            stats.set_min(lo);
            stats.set_max(hi);
        }
    } else if let Some((bounds, longest)) = string_bounds(&array) {
        if let Some((lo, hi)) = bounds {
            stats.update_string(&lo);
            stats.update_string(&hi);
        }
        stats.set_max_string_length(longest);
    }
    if with_distinct {
        stats.set_distinct_count(distinct_count(&array)?);
    }
    Ok(ComputedStats::Stats(stats))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{
        BooleanArray, Float64Array, Int32Array, StringArray, TimestampMillisecondArray,
    };

    use super::*;

    #[test]
    fn supplied_integer_bounds_cast_into_the_column_type() {
        let col = ColumnStatistics::new("id")
            .with_bounds(StatValue::Int64(1), StatValue::Int64(100))
            .with_null_count(0);
        let stats = to_base_statistics(&col, Some(100), &LogicalType::Integer).expect("stats");
        assert!(!stats.can_have_null());
        assert!(stats.can_have_valid());
        assert_eq!(stats.numeric_min(), Some(&Value::Integer(1)));
        assert_eq!(stats.numeric_max(), Some(&Value::Integer(100)));
    }

    #[test]
    fn null_counts_drive_the_flags() {
        let all_null = ColumnStatistics::new("x").with_null_count(10);
        let stats = to_base_statistics(&all_null, Some(10), &LogicalType::BigInt).expect("stats");
        assert!(stats.can_have_null());
        assert!(!stats.can_have_valid());

        let some_null = ColumnStatistics::new("x").with_null_count(3);
        let stats = to_base_statistics(&some_null, Some(10), &LogicalType::BigInt).expect("stats");
        assert!(stats.can_have_null() && stats.can_have_valid());

        let unknown_rows = to_base_statistics(&some_null, None, &LogicalType::BigInt)
            .expect("stats");
        assert!(unknown_rows.can_have_null() && unknown_rows.can_have_valid());
    }

    #[test]
    fn bounds_outside_the_column_type_are_dropped() {
        assert_eq!(
            stat_value_to_value(&StatValue::Int64(300), &LogicalType::TinyInt),
            None
        );
        assert_eq!(
            stat_value_to_value(&StatValue::Int64(-1), &LogicalType::UInteger),
            None
        );
        assert_eq!(
            stat_value_to_value(&StatValue::Int64(127), &LogicalType::TinyInt),
            Some(Value::TinyInt(127))
        );
        assert_eq!(
            stat_value_to_value(&StatValue::Double(40_000.0), &LogicalType::SmallInt),
            None
        );
        assert_eq!(
            stat_value_to_value(&StatValue::Double(f64::INFINITY), &LogicalType::BigInt),
            None
        );
        assert_eq!(
            stat_value_to_value(&StatValue::Double(-0.5), &LogicalType::UTinyInt),
            Some(Value::UTinyInt(0))
        );

        let col = ColumnStatistics::new("small")
            .with_bounds(StatValue::Int64(1), StatValue::Int64(300));
        let stats = to_base_statistics(&col, Some(10), &LogicalType::TinyInt).expect("stats");
        assert_eq!(stats.numeric_min(), Some(&Value::TinyInt(1)));
        assert_eq!(stats.numeric_max(), None);
    }

    #[test]
    fn doubles_truncate_into_integers_and_round_into_decimals() {
        assert_eq!(
            stat_value_to_value(&StatValue::Double(7.9), &LogicalType::SmallInt),
            Some(Value::SmallInt(7))
        );
        assert_eq!(
            stat_value_to_value(
                &StatValue::Double(12.346),
                &LogicalType::Decimal { width: 10, scale: 2 }
            ),
            Some(Value::Decimal {
                value: 1235,
                width: 10,
                scale: 2
            })
        );
        assert_eq!(
            stat_value_to_value(
                &StatValue::Int64(5),
                &LogicalType::Decimal { width: 10, scale: 2 }
            ),
            None
        );
        assert_eq!(
            stat_value_to_value(&StatValue::String("a".into()), &LogicalType::Integer),
            None
        );
    }

    #[test]
    fn nan_bounds_discard_supplied_statistics() {
        let col = ColumnStatistics::new("price")
            .with_bounds(StatValue::Double(f64::NAN), StatValue::Double(3.0));
        assert!(to_base_statistics(&col, Some(3), &LogicalType::Double).is_none());
    }

    #[test]
    fn supplied_string_statistics() {
        let mut col = ColumnStatistics::new("category")
            .with_bounds(StatValue::String("A".into()), StatValue::String("C".into()));
        col.max_string_length = Some(1);
        col.distinct_count = Some(3);
        let stats = to_base_statistics(&col, Some(9), &LogicalType::Varchar).expect("stats");
        assert_eq!(stats.string_min(), Some("A"));
        assert_eq!(stats.string_max(), Some("C"));
        assert_eq!(stats.max_string_length(), Some(1));
        assert_eq!(stats.distinct_count(), Some(3));
        assert!(to_base_statistics(&col, Some(9), &LogicalType::Blob).is_none());
    }

    #[test]
    fn statistics_parse_from_json() {
        let stats = TableStatistics::from_json(
            r#"{"row_count": 100, "columns": [
                {"name": "id", "min": 1, "max": 100, "null_count": 0},
                {"name": "price", "min": 0.5, "max": null}
            ]}"#,
        )
        .expect("json");
        assert_eq!(stats.row_count, Some(100));
        assert_eq!(stats.column("id").expect("id").max, StatValue::Int64(100));
        assert_eq!(stats.column("price").expect("price").min, StatValue::Double(0.5));
        assert_eq!(stats.column("price").expect("price").max, StatValue::Null);
        assert!(TableStatistics::from_json("{").is_err());
    }

    #[test]
    fn index_keys_take_precedence_over_names() {
        let mut by_index = ColumnStatistics::at_index(1);
        by_index.null_count = 7;
        let stats = TableStatistics::new(Some(10))
            .with_column(ColumnStatistics::new("price"))
            .with_column(by_index)
            .with_column(ColumnStatistics::at_index(9));
        assert_eq!(stats.column_at(1, "price").expect("price").null_count, 7);
        assert_eq!(stats.column_at(0, "price").expect("by name").column_index, None);
        assert!(stats.column_at(2, "other").is_none());
    }

    #[test]
    fn computes_numeric_bounds_across_chunks() {
        let chunks: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![Some(5), None, Some(9)])),
            Arc::new(Int32Array::from(vec![Some(-2), Some(5)])),
        ];
        let ComputedStats::Stats(stats) =
            compute_column_statistics(&chunks, &DataType::Int32, true).expect("compute")
        else {
            panic!("expected statistics");
        };
        assert_eq!(stats.numeric_min(), Some(&Value::Integer(-2)));
        assert_eq!(stats.numeric_max(), Some(&Value::Integer(9)));
        assert!(stats.can_have_null() && stats.can_have_valid());
        assert_eq!(stats.distinct_count(), Some(3));
    }

    #[test]
    fn computed_statistics_discard_nan_columns() {
        let chunks: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(vec![1.0, f64::NAN, 3.0]))];
        assert_eq!(
            compute_column_statistics(&chunks, &DataType::Float64, false).expect("compute"),
            ComputedStats::NanDiscarded
        );
    }

    #[test]
    fn computed_string_and_temporal_statistics() {
        let chunks: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["pear", "fig", "banana"]))];
        let ComputedStats::Stats(stats) =
            compute_column_statistics(&chunks, &DataType::Utf8, false).expect("compute")
        else {
            panic!("expected statistics");
        };
        assert_eq!(stats.string_min(), Some("banana"));
        assert_eq!(stats.string_max(), Some("pear"));
        assert_eq!(stats.max_string_length(), Some(6));
        assert_eq!(stats.distinct_count(), None);

        let dt = DataType::Timestamp(TimeUnit::Millisecond, None);
        let chunks: Vec<ArrayRef> = vec![Arc::new(TimestampMillisecondArray::from(vec![2, 7]))];
        let ComputedStats::Stats(stats) =
            compute_column_statistics(&chunks, &dt, false).expect("compute")
        else {
            panic!("expected statistics");
        };
        assert_eq!(stats.numeric_min(), Some(&Value::Timestamp(2_000)));
        assert_eq!(stats.numeric_max(), Some(&Value::Timestamp(7_000)));
    }

    #[test]
    fn unsupported_types_yield_nothing() {
        let chunks: Vec<ArrayRef> = vec![Arc::new(BooleanArray::from(vec![true]))];
        assert_eq!(
            compute_column_statistics(&chunks, &DataType::Boolean, true).expect("compute"),
            ComputedStats::Unsupported
        );
    }

    #[test]
    fn empty_columns_have_no_bounds() {
        let ComputedStats::Stats(stats) =
            compute_column_statistics(&[], &DataType::Int64, false).expect("compute")
        else {
            panic!("expected statistics");
        };
        assert!(stats.numeric_min().is_none());
        assert!(!stats.can_have_null());
    }
}
