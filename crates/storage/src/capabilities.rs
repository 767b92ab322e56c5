//! Which arrow column types a source can evaluate pushed filters on.

use arrow_schema::{DataType, Schema};

/// Pushdown profile of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An arrow table scanned by the bridge itself.
    ArrowTable,
    /// An external holder evaluating filters on its own side.
    Holder,
}

/// Capability descriptor returned by a source at registration, checked once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCapabilities {
    kind: SourceKind,
    supports_views: bool,
}

impl SourceCapabilities {
    pub fn arrow_table() -> Self {
        Self {
            kind: SourceKind::ArrowTable,
            supports_views: false,
        }
    }

    pub fn holder(supports_views: bool) -> Self {
        Self {
            kind: SourceKind::Holder,
            supports_views,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn supports_views(&self) -> bool {
        self.supports_views
    }

    /// Whether a filter on a column of type `dt` may be pushed down.
    pub fn column_supported(&self, dt: &DataType) -> bool {
        match (self.kind, self.supports_views) {
            (SourceKind::ArrowTable, _) => matches!(
                dt,
                DataType::Boolean
                    | DataType::Int8
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
                    | DataType::Time32(_)
                    | DataType::Time64(_)
                    | DataType::Timestamp(_, _)
                    | DataType::Utf8
                    | DataType::LargeUtf8
                    | DataType::Binary
                    | DataType::LargeBinary
            ) || matches!(dt, DataType::Decimal128(p, _) if *p <= 38),
            (SourceKind::Holder, true) => !is_nested(dt),
            (SourceKind::Holder, false) => matches!(
                dt,
                DataType::Boolean
                    | DataType::Int8
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
            ),
        }
    }

    /// Per-column pushdown flags for `schema`.
    ///
    /// A holder without view support that exposes any view column gets no pushdown at all.
    pub fn pushdown_mask(&self, schema: &Schema) -> Vec<bool> {
        let fields = schema.fields();
        if self.kind == SourceKind::Holder
            && !self.supports_views
            && fields.iter().any(|f| is_view(f.data_type()))
        {
            return vec![false; fields.len()];
        }
        fields
            .iter()
            .map(|f| self.column_supported(f.data_type()))
            .collect()
    }
}

pub fn is_view(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Utf8View | DataType::BinaryView | DataType::ListView(_) | DataType::LargeListView(_)
    )
}

fn is_nested(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Struct(_)
            | DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::Map(_, _)
            | DataType::Union(_, _)
    )
}
