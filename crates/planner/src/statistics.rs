use serde::{Deserialize, Serialize};

use crate::types::LogicalType;
use crate::value::Value;

/// Null/valid possibility flags derived from a null count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsInfo {
    CannotHaveNullValues,
    CannotHaveValidValues,
    CanHaveNullAndValidValues,
}

impl StatsInfo {
    pub fn from_counts(null_count: u64, row_count: u64) -> Self {
        if null_count == 0 {
            StatsInfo::CannotHaveNullValues
        } else if null_count == row_count {
            StatsInfo::CannotHaveValidValues
        } else {
            StatsInfo::CanHaveNullAndValidValues
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatsKind {
    Numeric {
        min: Option<Value>,
        max: Option<Value>,
    },
    String {
        min: Option<String>,
        max: Option<String>,
        max_string_length: Option<u32>,
    },
    Empty,
}

/// Engine-side statistics object for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseStatistics {
    logical_type: LogicalType,
    can_have_null: bool,
    can_have_valid: bool,
    kind: StatsKind,
    distinct_count: Option<u64>,
}

impl BaseStatistics {
    /// Statistics for a column with no values yet: neither nulls nor valid values.
    pub fn create_empty(logical_type: LogicalType) -> Self {
        let kind = if logical_type == LogicalType::Varchar {
            StatsKind::String {
                min: None,
                max: None,
                max_string_length: None,
            }
        } else if logical_type.has_numeric_stats() {
            StatsKind::Numeric {
                min: None,
                max: None,
            }
        } else {
            StatsKind::Empty
        };
        Self {
            logical_type,
            can_have_null: false,
            can_have_valid: false,
            kind,
            distinct_count: None,
        }
    }

    pub fn set(&mut self, info: StatsInfo) {
        let (null, valid) = match info {
            StatsInfo::CannotHaveNullValues => (false, true),
            StatsInfo::CannotHaveValidValues => (true, false),
            StatsInfo::CanHaveNullAndValidValues => (true, true),
        };
        self.can_have_null = null;
        self.can_have_valid = valid;
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    pub fn can_have_null(&self) -> bool {
        self.can_have_null
    }

    pub fn can_have_valid(&self) -> bool {
        self.can_have_valid
    }

    pub fn kind(&self) -> &StatsKind {
        &self.kind
    }

    /// Sets numeric bounds. Ignored for non-numeric statistics.
    pub fn set_min(&mut self, value: Value) {
        if let StatsKind::Numeric { min, .. } = &mut self.kind {
            *min = Some(value);
        }
    }

    pub fn set_max(&mut self, value: Value) {
        if let StatsKind::Numeric { max, .. } = &mut self.kind {
            *max = Some(value);
        }
    }

    pub fn numeric_min(&self) -> Option<&Value> {
        match &self.kind {
            StatsKind::Numeric { min, .. } => min.as_ref(),
            _ => None,
        }
    }

    pub fn numeric_max(&self) -> Option<&Value> {
        match &self.kind {
            StatsKind::Numeric { max, .. } => max.as_ref(),
            _ => None,
        }
    }

    /// Widens the string bounds to include `value`.
    pub fn update_string(&mut self, value: &str) {
        if let StatsKind::String { min, max, .. } = &mut self.kind {
            if min.as_deref().is_none_or(|m| value < m) {
                *min = Some(value.to_string());
            }
            if max.as_deref().is_none_or(|m| value > m) {
                *max = Some(value.to_string());
            }
        }
    }

    pub fn set_max_string_length(&mut self, len: u32) {
        if let StatsKind::String {
            max_string_length, ..
        } = &mut self.kind
        {
            *max_string_length = Some(len);
        }
    }

    pub fn string_min(&self) -> Option<&str> {
        match &self.kind {
            StatsKind::String { min, .. } => min.as_deref(),
            _ => None,
        }
    }

    pub fn string_max(&self) -> Option<&str> {
        match &self.kind {
            StatsKind::String { max, .. } => max.as_deref(),
            _ => None,
        }
    }

    pub fn max_string_length(&self) -> Option<u32> {
        match &self.kind {
            StatsKind::String {
                max_string_length, ..
            } => *max_string_length,
            _ => None,
        }
    }

    pub fn set_distinct_count(&mut self, count: u64) {
        self.distinct_count = Some(count);
    }

    pub fn distinct_count(&self) -> Option<u64> {
        self.distinct_count
    }
}

/// Table-level estimate handed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatistics {
    /// Declared row count; `None` when unknown.
    pub estimated_cardinality: Option<u64>,
}

impl NodeStatistics {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Only positive counts are reported.
    pub fn from_declared(rows: Option<u64>) -> Self {
        Self {
            estimated_cardinality: rows.filter(|r| *r > 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_flags_follow_null_count() {
        assert_eq!(StatsInfo::from_counts(0, 10), StatsInfo::CannotHaveNullValues);
        assert_eq!(StatsInfo::from_counts(10, 10), StatsInfo::CannotHaveValidValues);
        assert_eq!(
            StatsInfo::from_counts(3, 10),
            StatsInfo::CanHaveNullAndValidValues
        );
        // An empty column has no nulls.
        assert_eq!(StatsInfo::from_counts(0, 0), StatsInfo::CannotHaveNullValues);
    }

    #[test]
    fn string_bounds_widen() {
        let mut stats = BaseStatistics::create_empty(LogicalType::Varchar);
        stats.update_string("m");
        stats.update_string("c");
        stats.update_string("x");
        assert_eq!(stats.string_min(), Some("c"));
        assert_eq!(stats.string_max(), Some("x"));
        stats.set_min(Value::BigInt(1));
        assert!(stats.numeric_min().is_none());
    }

    #[test]
    fn cardinality_only_reports_positive_counts() {
        assert_eq!(NodeStatistics::from_declared(Some(0)).estimated_cardinality, None);
        assert_eq!(
            NodeStatistics::from_declared(Some(3)).estimated_cardinality,
            Some(3)
        );
    }
}
