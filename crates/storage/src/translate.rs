//! Engine filter trees to compute expressions.
//!
//! Translation is pure and recursive. An error means "do not push this filter"; it never
//! means the query fails. Filter shapes the scan cannot evaluate but that are safe to ignore
//! (dynamic, optional) become literal `true`.

use arrow_schema::{DataType, Schema};
use scanbridge_common::{BridgeError, Result};
use scanbridge_execution::{ComputeExpr, ComputeFunction, call, field_ref, lit_bool, literal};
use scanbridge_planner::{ComparisonOp, FilterNode, ProduceRequest, Value};
use tracing::{debug, warn};

use crate::codec::literal_for_column;

/// Translates `filter` applied to the top-level column `column` of arrow type `data_type`.
pub fn translate_filter(
    filter: &FilterNode,
    column: &str,
    data_type: &DataType,
) -> Result<ComputeExpr> {
    translate_on(filter, field_ref(column), data_type)
}

fn translate_on(filter: &FilterNode, target: ComputeExpr, dt: &DataType) -> Result<ComputeExpr> {
    match filter {
        FilterNode::ConstantComparison { op, value } => comparison(*op, value, target, dt),
        FilterNode::IsNull => Ok(call(ComputeFunction::IsNull, vec![target])),
        FilterNode::IsNotNull => Ok(call(ComputeFunction::IsValid, vec![target])),
        FilterNode::And(children) => fold(children, target, dt, true),
        FilterNode::Or(children) => fold(children, target, dt, false),
        FilterNode::StructExtract {
            child_index, child, ..
        } => {
            let DataType::Struct(fields) = dt else {
                return Err(BridgeError::TranslationSkip(format!(
                    "struct extract on non-struct column type {dt}"
                )));
            };
            let field = fields.get(*child_index).ok_or_else(|| {
                BridgeError::TranslationSkip(format!(
                    "struct child {child_index} out of range for {} children",
                    fields.len()
                ))
            })?;
            match child.as_ref() {
                FilterNode::ConstantComparison { .. } => translate_on(
                    child,
                    target.struct_field(*child_index),
                    field.data_type(),
                ),
                _ => Ok(lit_bool(true)),
            }
        }
        FilterNode::InList(values) => in_list(values, target, dt),
        FilterNode::Optional(_) | FilterNode::Dynamic => Ok(lit_bool(true)),
    }
}

fn comparison(
    op: ComparisonOp,
    value: &Value,
    target: ComputeExpr,
    dt: &DataType,
) -> Result<ComputeExpr> {
    if value.is_nan() {
        return Ok(nan_comparison(op, target));
    }
    let function = match op {
        ComparisonOp::Equal => ComputeFunction::Equal,
        ComparisonOp::NotEqual => ComputeFunction::NotEqual,
        ComparisonOp::LessThan => ComputeFunction::Less,
        ComparisonOp::LessThanOrEqual => ComputeFunction::LessEqual,
        ComparisonOp::GreaterThan => ComputeFunction::Greater,
        ComparisonOp::GreaterThanOrEqual => ComputeFunction::GreaterEqual,
    };
    let constant = literal_for_column(value, dt)?;
    Ok(call(function, vec![target, literal(constant)]))
}

/// The engine orders NaN above every other float; IEEE comparisons against NaN are always
/// false. Comparisons with a NaN constant are rewritten so the engine's ordering holds.
fn nan_comparison(op: ComparisonOp, target: ComputeExpr) -> ComputeExpr {
    let is_nan = || call(ComputeFunction::IsNan, vec![target.clone()]);
    match op {
        ComparisonOp::Equal | ComparisonOp::GreaterThanOrEqual => is_nan(),
        ComparisonOp::LessThan | ComparisonOp::NotEqual => is_nan().invert(),
        ComparisonOp::GreaterThan => lit_bool(false),
        ComparisonOp::LessThanOrEqual => lit_bool(true),
    }
}

fn fold(
    children: &[FilterNode],
    target: ComputeExpr,
    dt: &DataType,
    conjunction: bool,
) -> Result<ComputeExpr> {
    let mut out: Option<ComputeExpr> = None;
    for child in children {
        let next = translate_on(child, target.clone(), dt)?;
        out = Some(match out {
            None => next,
            Some(acc) if conjunction => acc.and_kleene(next),
            Some(acc) => acc.or_kleene(next),
        });
    }
    Ok(out.unwrap_or_else(|| lit_bool(conjunction)))
}

fn in_list(values: &[Value], target: ComputeExpr, dt: &DataType) -> Result<ComputeExpr> {
    let mut out: Option<ComputeExpr> = None;
    for value in values {
        if value.is_null() {
            return Err(BridgeError::TranslationSkip(
                "in-list with a null element".to_string(),
            ));
        }
        let next = comparison(ComparisonOp::Equal, value, target.clone(), dt)?;
        out = Some(match out {
            None => next,
            Some(acc) => acc.or_kleene(next),
        });
    }
    Ok(out.unwrap_or_else(|| lit_bool(false)))
}

/// Outcome of translating every column filter of one produce request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslatedFilters {
    /// Conjunction of every pushed column expression; `None` when nothing was pushed.
    pub expr: Option<ComputeExpr>,
    pub pushed: usize,
    /// Filters on columns the source cannot push down, or with untranslatable shapes.
    pub skipped: usize,
    /// Filters whose translation hit an unexpected error.
    pub failed: usize,
}

/// Translates each column filter of `request` independently and AND-s the successes.
///
/// `pushdown` is the source's per-column capability mask, indexed like `schema`.
pub fn translate_filter_set(
    request: &ProduceRequest,
    schema: &Schema,
    pushdown: &[bool],
) -> TranslatedFilters {
    let mut out = TranslatedFilters::default();
    for (filter_index, filter) in request.filters.iter() {
        let column = request.source_column(filter_index);
        let Some(field) = schema.fields().get(column) else {
            warn!(filter_index, column, "filter references a column outside the schema");
            out.failed += 1;
            continue;
        };
        if !pushdown.get(column).copied().unwrap_or(false) {
            debug!(column = %field.name(), data_type = %field.data_type(), "column not pushdown capable");
            out.skipped += 1;
            continue;
        }
        match translate_filter(filter, field.name(), field.data_type()) {
            Ok(expr) => {
                out.pushed += 1;
                out.expr = Some(match out.expr.take() {
                    None => expr,
                    Some(acc) => acc.and_kleene(expr),
                });
            }
            Err(e) if e.is_skip() => {
                debug!(column = %field.name(), filter = %filter, error = %e, "filter not pushed");
                out.skipped += 1;
            }
            Err(e) => {
                warn!(column = %field.name(), filter = %filter, error = %e, "filter translation failed");
                out.failed += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow::array::{Float64Array, TimestampMillisecondArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{Field, Fields};
    use scanbridge_execution::{ScalarValue, compile_expr, evaluate_predicate};
    use scanbridge_planner::TableFilterSet;

    use super::*;

    fn cmp(op: ComparisonOp, value: Value) -> FilterNode {
        FilterNode::comparison(op, value)
    }

    fn selected(expr: &ComputeExpr, values: Vec<f64>) -> Vec<Option<bool>> {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, true)]));
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(Float64Array::from(values))])
            .expect("batch");
        let physical = compile_expr(expr, &schema).expect("compile");
        evaluate_predicate(physical.as_ref(), &batch)
            .expect("evaluate")
            .iter()
            .collect()
    }

    #[test]
    fn comparisons_map_to_kernel_calls() {
        let expr = translate_filter(
            &cmp(ComparisonOp::GreaterThan, Value::BigInt(50)),
            "id",
            &DataType::Int64,
        )
        .expect("translate");
        assert_eq!(expr.to_string(), "greater(id, 50)");

        let expr = translate_filter(
            &cmp(ComparisonOp::LessThanOrEqual, Value::BigInt(7)),
            "small",
            &DataType::Int16,
        )
        .expect("translate");
        assert_eq!(
            expr,
            call(
                ComputeFunction::LessEqual,
                vec![field_ref("small"), literal(ScalarValue::Int16(7))]
            )
        );
    }

    #[test]
    fn nan_constants_follow_engine_ordering() {
        let data = vec![1.0, f64::NAN, 3.0];
        let nan = || Value::Double(f64::NAN);
        let run = |op| {
            let expr = translate_filter(&cmp(op, nan()), "x", &DataType::Float64).expect("nan");
            selected(&expr, data.clone())
        };
        assert_eq!(
            run(ComparisonOp::GreaterThanOrEqual),
            vec![Some(false), Some(true), Some(false)]
        );
        assert_eq!(run(ComparisonOp::Equal), vec![Some(false), Some(true), Some(false)]);
        assert_eq!(run(ComparisonOp::GreaterThan), vec![Some(false); 3]);
        assert_eq!(run(ComparisonOp::LessThanOrEqual), vec![Some(true); 3]);
        assert_eq!(
            run(ComparisonOp::LessThan),
            vec![Some(true), Some(false), Some(true)]
        );
        assert_eq!(
            run(ComparisonOp::NotEqual),
            vec![Some(true), Some(false), Some(true)]
        );
    }

    #[test]
    fn non_nan_comparisons_match_direct_evaluation() {
        let data = vec![1.0, 2.0, 3.0];
        let expr = translate_filter(
            &cmp(ComparisonOp::GreaterThanOrEqual, Value::Double(2.0)),
            "x",
            &DataType::Float64,
        )
        .expect("translate");
        assert_eq!(selected(&expr, data), vec![Some(false), Some(true), Some(true)]);
    }

    #[test]
    fn constants_finer_than_the_column_are_not_pushed() {
        let fraction = cmp(ComparisonOp::Equal, Value::Double(2.5));
        assert!(translate_filter(&fraction, "x", &DataType::Int64)
            .expect_err("2.5 on integers")
            .is_skip());
        let listed = FilterNode::InList(vec![Value::Double(2.0), Value::Double(2.5)]);
        assert!(translate_filter(&listed, "x", &DataType::Int64)
            .expect_err("in-list with a fraction")
            .is_skip());

        let millis = DataType::Timestamp(arrow_schema::TimeUnit::Millisecond, None);
        let partial = cmp(ComparisonOp::GreaterThanOrEqual, Value::Timestamp(1_500));
        assert!(translate_filter(&partial, "ts", &millis)
            .expect_err("1.5 ms")
            .is_skip());

        let whole = translate_filter(
            &cmp(ComparisonOp::GreaterThanOrEqual, Value::Timestamp(2_000)),
            "ts",
            &millis,
        )
        .expect("2 ms");
        let schema = Arc::new(Schema::new(vec![Field::new("ts", millis, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(TimestampMillisecondArray::from(vec![1, 2]))],
        )
        .expect("batch");
        let physical = compile_expr(&whole, &schema).expect("compile");
        let got: Vec<_> = evaluate_predicate(physical.as_ref(), &batch)
            .expect("evaluate")
            .iter()
            .collect();
        assert_eq!(got, vec![Some(false), Some(true)]);
    }

    #[test]
    fn validity_filters() {
        assert_eq!(
            translate_filter(&FilterNode::IsNull, "a", &DataType::Utf8)
                .expect("is null")
                .to_string(),
            "is_null(a)"
        );
        assert_eq!(
            translate_filter(&FilterNode::IsNotNull, "a", &DataType::Utf8)
                .expect("is not null")
                .to_string(),
            "is_valid(a)"
        );
    }

    #[test]
    fn conjunctions_fold_left_with_kleene_logic() {
        let filter = FilterNode::And(vec![
            cmp(ComparisonOp::GreaterThan, Value::Integer(1)),
            cmp(ComparisonOp::LessThan, Value::Integer(9)),
            FilterNode::IsNotNull,
        ]);
        assert_eq!(
            translate_filter(&filter, "v", &DataType::Int32)
                .expect("and")
                .to_string(),
            "and_kleene(and_kleene(greater(v, 1), less(v, 9)), is_valid(v))"
        );
        let filter = FilterNode::Or(vec![FilterNode::IsNull, FilterNode::IsNotNull]);
        assert_eq!(
            translate_filter(&filter, "v", &DataType::Int32)
                .expect("or")
                .to_string(),
            "or_kleene(is_null(v), is_valid(v))"
        );
        assert_eq!(
            translate_filter(&FilterNode::And(vec![]), "v", &DataType::Int32).expect("empty"),
            lit_bool(true)
        );
        assert_eq!(
            translate_filter(&FilterNode::Or(vec![]), "v", &DataType::Int32).expect("empty"),
            lit_bool(false)
        );
    }

    #[test]
    fn struct_extract_targets_the_child_field() {
        let dt = DataType::Struct(Fields::from(vec![
            Field::new("a", DataType::Utf8, true),
            Field::new("b", DataType::Int64, true),
        ]));
        let filter = FilterNode::StructExtract {
            child_index: 1,
            child_name: "b".to_string(),
            child: Box::new(cmp(ComparisonOp::Equal, Value::BigInt(3))),
        };
        assert_eq!(
            translate_filter(&filter, "s", &dt).expect("struct").to_string(),
            "equal(struct_field(s, [1]), 3)"
        );

        let nested_and = FilterNode::StructExtract {
            child_index: 1,
            child_name: "b".to_string(),
            child: Box::new(FilterNode::And(vec![FilterNode::IsNotNull])),
        };
        assert_eq!(
            translate_filter(&nested_and, "s", &dt).expect("degraded"),
            lit_bool(true)
        );
        assert!(translate_filter(&filter, "s", &DataType::Int64)
            .expect_err("not a struct")
            .is_skip());
    }

    #[test]
    fn in_lists_expand_to_equalities() {
        let filter = FilterNode::InList(vec![Value::BigInt(1), Value::BigInt(2)]);
        assert_eq!(
            translate_filter(&filter, "id", &DataType::Int64)
                .expect("in")
                .to_string(),
            "or_kleene(equal(id, 1), equal(id, 2))"
        );
        assert_eq!(
            translate_filter(&FilterNode::InList(vec![]), "id", &DataType::Int64).expect("empty"),
            lit_bool(false)
        );
        let with_null = FilterNode::InList(vec![
            Value::BigInt(1),
            Value::Null(scanbridge_planner::LogicalType::BigInt),
        ]);
        assert!(translate_filter(&with_null, "id", &DataType::Int64)
            .expect_err("null element")
            .is_skip());
    }

    #[test]
    fn dynamic_and_optional_filters_never_block() {
        for filter in [
            FilterNode::Dynamic,
            FilterNode::Optional(Box::new(FilterNode::IsNull)),
        ] {
            assert_eq!(
                translate_filter(&filter, "id", &DataType::Int64).expect("true"),
                lit_bool(true)
            );
        }
    }

    #[test]
    fn filter_sets_count_pushed_skipped_and_failed() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("price", DataType::Float64, true),
            Field::new("category", DataType::Utf8, true),
            Field::new("tags", DataType::Utf8View, true),
        ]);
        let filters = TableFilterSet::new()
            .with(0, cmp(ComparisonOp::GreaterThan, Value::BigInt(50)))
            .with(1, cmp(ComparisonOp::Equal, Value::Varchar("x".into())))
            .with(2, cmp(ComparisonOp::Equal, Value::Varchar("A".into())))
            .with(3, FilterNode::IsNotNull)
            .with(9, FilterNode::IsNull);
        let request = ProduceRequest::new().with_filters(filters);
        let out = translate_filter_set(&request, &schema, &[true, true, true, false]);
        assert_eq!(
            out.expr.expect("pushed").to_string(),
            "and_kleene(greater(id, 50), equal(category, \"A\"))"
        );
        assert_eq!((out.pushed, out.skipped, out.failed), (2, 2, 1));
    }

    #[test]
    fn filter_keys_can_be_remapped() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("category", DataType::Utf8, true),
        ]);
        let request = ProduceRequest::new()
            .with_filters(TableFilterSet::new().with(0, FilterNode::IsNull))
            .with_filter_mapping(HashMap::from([(0, 1)]));
        let out = translate_filter_set(&request, &schema, &[true, true]);
        assert_eq!(out.expr.expect("pushed").to_string(), "is_null(category)");
    }
}
