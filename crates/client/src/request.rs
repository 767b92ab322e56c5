use std::collections::BTreeMap;

use arrow_schema::Schema;
use scanbridge_common::{BridgeError, Result};
use scanbridge_planner::{FilterWire, LogicalType, ProduceRequest, TableFilterSet};
use tracing::warn;

/// Builds a produce request from column names and JSON filters keyed by column name.
///
/// `filters_json` is an object mapping a column name to a filter wire record, for example
/// `{"id": {"filter_type": "constant_comparison", "comparison_type": 28,
/// "value": {"kind": "int64", "payload": 50}}}`. Filters that cannot be decoded for their
/// column's type are dropped with a warning.
pub fn request_from_json(
    schema: &Schema,
    columns: &[String],
    filters_json: Option<&str>,
) -> Result<ProduceRequest> {
    let mut filters = TableFilterSet::new();
    if let Some(raw) = filters_json {
        let parsed: BTreeMap<String, FilterWire> = serde_json::from_str(raw)
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid filters JSON: {e}")))?;
        for (name, wire) in parsed {
            let index = schema.index_of(&name).map_err(|_| {
                BridgeError::Contract(format!("filter on unknown column '{name}'"))
            })?;
            let ty = LogicalType::from_arrow(schema.field(index).data_type());
            match wire.to_node(&ty) {
                Ok(node) => filters.push(index, node),
                Err(e) if e.is_skip() => warn!(column = %name, error = %e, "filter dropped"),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(ProduceRequest::new()
        .with_projection(columns.iter().cloned())
        .with_filters(filters))
}
