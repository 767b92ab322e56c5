//! Flat filter records exchanged with engines and holders outside the process's Rust code.
//!
//! The numeric codes are part of the external contract and shared by the C ABI and the
//! Python holder dictionaries:
//! - filter types: `0` comparison, `1` is-null, `2` is-not-null, `3` or, `4` and,
//!   `5` struct-extract, `6` optional, `7` in-list, `8` dynamic
//! - comparisons: `25` `=`, `26` `!=`, `27` `<`, `28` `>`, `29` `<=`, `30` `>=`
//! - value kinds: `0` null, `1` bool, `2` int64, `3` double, `4` string

use scanbridge_common::{BridgeError, Result};
use serde::{Deserialize, Serialize};

use crate::filter::{ComparisonOp, FilterNode};
use crate::types::LogicalType;
use crate::value::{Value, decimal_to_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    ConstantComparison,
    IsNull,
    IsNotNull,
    ConjunctionOr,
    ConjunctionAnd,
    StructExtract,
    OptionalFilter,
    InFilter,
    DynamicFilter,
}

impl FilterType {
    pub fn code(self) -> i32 {
        match self {
            FilterType::ConstantComparison => 0,
            FilterType::IsNull => 1,
            FilterType::IsNotNull => 2,
            FilterType::ConjunctionOr => 3,
            FilterType::ConjunctionAnd => 4,
            FilterType::StructExtract => 5,
            FilterType::OptionalFilter => 6,
            FilterType::InFilter => 7,
            FilterType::DynamicFilter => 8,
        }
    }

    /// Unknown codes read as dynamic filters, which never restrict a scan.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FilterType::ConstantComparison,
            1 => FilterType::IsNull,
            2 => FilterType::IsNotNull,
            3 => FilterType::ConjunctionOr,
            4 => FilterType::ConjunctionAnd,
            5 => FilterType::StructExtract,
            6 => FilterType::OptionalFilter,
            7 => FilterType::InFilter,
            _ => FilterType::DynamicFilter,
        }
    }
}

pub fn comparison_code(op: ComparisonOp) -> i32 {
    match op {
        ComparisonOp::Equal => 25,
        ComparisonOp::NotEqual => 26,
        ComparisonOp::LessThan => 27,
        ComparisonOp::GreaterThan => 28,
        ComparisonOp::LessThanOrEqual => 29,
        ComparisonOp::GreaterThanOrEqual => 30,
    }
}

pub fn comparison_from_code(code: i32) -> Option<ComparisonOp> {
    match code {
        25 => Some(ComparisonOp::Equal),
        26 => Some(ComparisonOp::NotEqual),
        27 => Some(ComparisonOp::LessThan),
        28 => Some(ComparisonOp::GreaterThan),
        29 => Some(ComparisonOp::LessThanOrEqual),
        30 => Some(ComparisonOp::GreaterThanOrEqual),
        _ => None,
    }
}

/// Carrier for a filter constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WireValue {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
}

impl WireValue {
    pub fn kind_code(&self) -> i32 {
        match self {
            WireValue::Null => 0,
            WireValue::Bool(_) => 1,
            WireValue::Int64(_) => 2,
            WireValue::Double(_) => 3,
            WireValue::String(_) => 4,
        }
    }

    /// Encodes an engine value into its carrier.
    ///
    /// Integers of every width and signedness travel as int64 (unsigned bit-preserving),
    /// dates as day counts, times and timestamps as microseconds, decimals as text.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null(_) => WireValue::Null,
            Value::Boolean(v) => WireValue::Bool(*v),
            Value::Float(v) => WireValue::Double(f64::from(*v)),
            Value::Double(v) => WireValue::Double(*v),
            Value::Varchar(v) => WireValue::String(v.clone()),
            Value::Decimal { value, scale, .. } => {
                WireValue::String(decimal_to_string(*value, *scale))
            }
            Value::Blob(_) => {
                return Err(BridgeError::TranslationSkip(
                    "blob constants have no filter carrier".to_string(),
                ));
            }
            other => match other.as_i64() {
                Some(v) => WireValue::Int64(v),
                None => {
                    return Err(BridgeError::TranslationSkip(format!(
                        "no filter carrier for {} constants",
                        other.logical_type()
                    )));
                }
            },
        })
    }

    /// Decodes a carrier back into a value of the column's engine type.
    pub fn to_value(&self, ty: &LogicalType) -> Result<Value> {
        let mismatch = || {
            BridgeError::TranslationSkip(format!(
                "filter carrier {self:?} does not fit column type {ty}"
            ))
        };
        Ok(match (self, ty) {
            (WireValue::Null, ty) => Value::Null(ty.clone()),
            (WireValue::Bool(v), LogicalType::Boolean) => Value::Boolean(*v),
            (WireValue::Int64(v), ty) if ty.is_integral() => int_value(*v, ty).ok_or_else(mismatch)?,
            (WireValue::Int64(v), LogicalType::Date) => {
                Value::Date(i32::try_from(*v).map_err(|_| mismatch())?)
            }
            (WireValue::Int64(v), LogicalType::Time) => Value::Time(*v),
            (WireValue::Int64(v), LogicalType::Timestamp) => Value::Timestamp(*v),
            (WireValue::Int64(v), LogicalType::TimestampTz) => Value::TimestampTz(*v),
            (WireValue::Int64(v), LogicalType::Float) => Value::Float(*v as f32),
            (WireValue::Int64(v), LogicalType::Double) => Value::Double(*v as f64),
            (WireValue::Double(v), LogicalType::Float) => Value::Float(*v as f32),
            (WireValue::Double(v), LogicalType::Double) => Value::Double(*v),
            (WireValue::String(v), LogicalType::Varchar) => Value::Varchar(v.clone()),
            (WireValue::String(v), LogicalType::Decimal { width, scale }) => Value::Decimal {
                value: parse_decimal_text(v, *scale).ok_or_else(mismatch)?,
                width: *width,
                scale: *scale,
            },
            (WireValue::Int64(v), LogicalType::Decimal { width, scale }) => {
                let factor = 10_i128.checked_pow(u32::try_from(*scale).unwrap_or(0));
                Value::Decimal {
                    value: factor
                        .and_then(|f| i128::from(*v).checked_mul(f))
                        .ok_or_else(mismatch)?,
                    width: *width,
                    scale: *scale,
                }
            }
            _ => return Err(mismatch()),
        })
    }
}

fn int_value(v: i64, ty: &LogicalType) -> Option<Value> {
    Some(match ty {
        LogicalType::TinyInt => Value::TinyInt(i8::try_from(v).ok()?),
        LogicalType::SmallInt => Value::SmallInt(i16::try_from(v).ok()?),
        LogicalType::Integer => Value::Integer(i32::try_from(v).ok()?),
        LogicalType::BigInt => Value::BigInt(v),
        LogicalType::UTinyInt => Value::UTinyInt(u8::try_from(v).ok()?),
        LogicalType::USmallInt => Value::USmallInt(u16::try_from(v).ok()?),
        LogicalType::UInteger => Value::UInteger(u32::try_from(v).ok()?),
        LogicalType::UBigInt => Value::UBigInt(v as u64),
        _ => return None,
    })
}

/// Parses decimal text such as `-12.5` into an unscaled integer at `scale`.
///
/// Extra fractional digits are rejected rather than rounded.
pub fn parse_decimal_text(text: &str, scale: i8) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let scale = usize::try_from(scale).ok()?;
    let trimmed_frac = frac_part.trim_end_matches('0');
    if trimmed_frac.len() > scale {
        return None;
    }
    let mut unscaled = String::with_capacity(int_part.len() + scale);
    unscaled.push_str(int_part);
    unscaled.push_str(trimmed_frac);
    unscaled.extend(std::iter::repeat('0').take(scale - trimmed_frac.len()));
    let magnitude: i128 = if unscaled.is_empty() {
        0
    } else {
        unscaled.parse().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Flat, recursive filter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterWire {
    pub filter_type: FilterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_type: Option<i32>,
    #[serde(default = "null_value")]
    pub value: WireValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FilterWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struct_child_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struct_child_filter: Option<Box<FilterWire>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_values: Vec<WireValue>,
}

fn null_value() -> WireValue {
    WireValue::Null
}

impl FilterWire {
    fn bare(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            comparison_type: None,
            value: WireValue::Null,
            children: Vec::new(),
            struct_child_index: None,
            struct_child_filter: None,
            in_values: Vec::new(),
        }
    }

    /// Flattens an engine filter. Constants without a carrier fail the whole record.
    pub fn from_node(node: &FilterNode) -> Result<Self> {
        Ok(match node {
            FilterNode::ConstantComparison { op, value } => FilterWire {
                comparison_type: Some(comparison_code(*op)),
                value: WireValue::from_value(value)?,
                ..Self::bare(FilterType::ConstantComparison)
            },
            FilterNode::IsNull => Self::bare(FilterType::IsNull),
            FilterNode::IsNotNull => Self::bare(FilterType::IsNotNull),
            FilterNode::And(children) => FilterWire {
                children: children.iter().map(Self::from_node).collect::<Result<_>>()?,
                ..Self::bare(FilterType::ConjunctionAnd)
            },
            FilterNode::Or(children) => FilterWire {
                children: children.iter().map(Self::from_node).collect::<Result<_>>()?,
                ..Self::bare(FilterType::ConjunctionOr)
            },
            FilterNode::StructExtract {
                child_index, child, ..
            } => FilterWire {
                struct_child_index: Some(*child_index),
                struct_child_filter: Some(Box::new(Self::from_node(child)?)),
                ..Self::bare(FilterType::StructExtract)
            },
            FilterNode::InList(values) => FilterWire {
                in_values: values.iter().map(WireValue::from_value).collect::<Result<_>>()?,
                ..Self::bare(FilterType::InFilter)
            },
            FilterNode::Optional(_) => Self::bare(FilterType::OptionalFilter),
            FilterNode::Dynamic => Self::bare(FilterType::DynamicFilter),
        })
    }

    /// Rebuilds an engine filter for a column of type `ty`.
    pub fn to_node(&self, ty: &LogicalType) -> Result<FilterNode> {
        Ok(match self.filter_type {
            FilterType::ConstantComparison => {
                let code = self.comparison_type.ok_or_else(|| {
                    BridgeError::Contract("comparison filter without comparison_type".to_string())
                })?;
                let op = comparison_from_code(code).ok_or_else(|| {
                    BridgeError::TranslationSkip(format!("unknown comparison code {code}"))
                })?;
                FilterNode::comparison(op, self.value.to_value(ty)?)
            }
            FilterType::IsNull => FilterNode::IsNull,
            FilterType::IsNotNull => FilterNode::IsNotNull,
            FilterType::ConjunctionAnd => FilterNode::And(
                self.children
                    .iter()
                    .map(|c| c.to_node(ty))
                    .collect::<Result<_>>()?,
            ),
            FilterType::ConjunctionOr => FilterNode::Or(
                self.children
                    .iter()
                    .map(|c| c.to_node(ty))
                    .collect::<Result<_>>()?,
            ),
            FilterType::StructExtract => {
                let LogicalType::Struct(children) = ty else {
                    return Err(BridgeError::TranslationSkip(format!(
                        "struct extract on non-struct column type {ty}"
                    )));
                };
                let index = self.struct_child_index.ok_or_else(|| {
                    BridgeError::Contract("struct extract without child index".to_string())
                })?;
                let (child_name, child_ty) = children.get(index).ok_or_else(|| {
                    BridgeError::Contract(format!("struct child index {index} out of range"))
                })?;
                let child = self.struct_child_filter.as_ref().ok_or_else(|| {
                    BridgeError::Contract("struct extract without child filter".to_string())
                })?;
                FilterNode::StructExtract {
                    child_index: index,
                    child_name: child_name.clone(),
                    child: Box::new(child.to_node(child_ty)?),
                }
            }
            FilterType::InFilter => FilterNode::InList(
                self.in_values
                    .iter()
                    .map(|v| v.to_value(ty))
                    .collect::<Result<_>>()?,
            ),
            FilterType::OptionalFilter => FilterNode::Optional(Box::new(FilterNode::Dynamic)),
            FilterType::DynamicFilter => FilterNode::Dynamic,
        })
    }
}
