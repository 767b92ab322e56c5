use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        }
    }
}

/// Engine table filter attached to one column.
///
/// Children are owned; a tree is dropped as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    ConstantComparison { op: ComparisonOp, value: Value },
    IsNull,
    IsNotNull,
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    /// Filter on child `child_index` of a struct column.
    StructExtract {
        child_index: usize,
        child_name: String,
        child: Box<FilterNode>,
    },
    InList(Vec<Value>),
    /// Optional filter the engine may drop; the wrapped filter is advisory only.
    Optional(Box<FilterNode>),
    /// Runtime-determined filter whose value is unknown at scan build time.
    Dynamic,
}

impl FilterNode {
    pub fn comparison(op: ComparisonOp, value: Value) -> Self {
        FilterNode::ConstantComparison { op, value }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::ConstantComparison { op, value } => write!(f, "{} {value}", op.symbol()),
            FilterNode::IsNull => write!(f, "IS NULL"),
            FilterNode::IsNotNull => write!(f, "IS NOT NULL"),
            FilterNode::And(children) | FilterNode::Or(children) => {
                let sep = if matches!(self, FilterNode::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            FilterNode::StructExtract {
                child_name, child, ..
            } => write!(f, ".{child_name} {child}"),
            FilterNode::InList(values) => {
                write!(f, "IN (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            FilterNode::Optional(inner) => write!(f, "OPTIONAL({inner})"),
            FilterNode::Dynamic => write!(f, "DYNAMIC"),
        }
    }
}

/// Per-column filters keyed by filter index, iterated in ascending index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableFilterSet {
    filters: BTreeMap<usize, FilterNode>,
}

impl TableFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter for `column`. A second filter on the same column is AND-ed in.
    pub fn push(&mut self, column: usize, filter: FilterNode) {
        match self.filters.remove(&column) {
            None => {
                self.filters.insert(column, filter);
            }
            Some(FilterNode::And(mut children)) => {
                children.push(filter);
                self.filters.insert(column, FilterNode::And(children));
            }
            Some(existing) => {
                self.filters
                    .insert(column, FilterNode::And(vec![existing, filter]));
            }
        }
    }

    pub fn with(mut self, column: usize, filter: FilterNode) -> Self {
        self.push(column, filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn get(&self, column: usize) -> Option<&FilterNode> {
        self.filters.get(&column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FilterNode)> {
        self.filters.iter().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<(usize, FilterNode)> for TableFilterSet {
    fn from_iter<T: IntoIterator<Item = (usize, FilterNode)>>(iter: T) -> Self {
        let mut set = TableFilterSet::new();
        for (column, filter) in iter {
            set.push(column, filter);
        }
        set
    }
}

/// One scan request from the engine.
///
/// An empty projection means "all columns".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub projected_columns: Vec<String>,
    pub filters: TableFilterSet,
    /// Optional remapping from filter index to source column index.
    #[serde(default)]
    pub filter_to_column: HashMap<usize, usize>,
}

impl ProduceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filters(mut self, filters: TableFilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_filter_mapping(mut self, mapping: HashMap<usize, usize>) -> Self {
        self.filter_to_column = mapping;
        self
    }

    /// Source column index for a filter key.
    pub fn source_column(&self, filter_index: usize) -> usize {
        self.filter_to_column
            .get(&filter_index)
            .copied()
            .unwrap_or(filter_index)
    }
}
