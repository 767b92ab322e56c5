mod support;

use std::sync::Arc;

use arrow::array::{Float64Array, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use scanbridge_client::{Bridge, request_from_json};
use scanbridge_common::BridgeConfig;
use scanbridge_planner::{ComparisonOp, FilterNode, ProduceRequest, TableFilterSet, Value};
use scanbridge_storage::{ColumnStatistics, RegisterOptions, StatValue, TableStatistics};

use support::{fixture_batches, int64_column, string_column, total_rows};

fn cmp(op: ComparisonOp, value: Value) -> FilterNode {
    FilterNode::comparison(op, value)
}

#[test]
fn filters_on_two_columns_are_combined() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    let stats = TableStatistics::new(Some(100)).with_column(
        ColumnStatistics::new("id").with_bounds(StatValue::Int64(1), StatValue::Int64(100)),
    );
    bridge
        .register_batches(
            "items",
            fixture_batches(),
            RegisterOptions::default().statistics(stats),
        )
        .expect("register");

    assert_eq!(
        bridge.cardinality("items").expect("rows").estimated_cardinality,
        Some(100)
    );
    let id_stats = bridge
        .column_statistics("items", "id")
        .expect("stats")
        .expect("id stats");
    assert_eq!(id_stats.numeric_min(), Some(&Value::BigInt(1)));
    assert_eq!(id_stats.numeric_max(), Some(&Value::BigInt(100)));
    assert!(!id_stats.can_have_null());

    let request = ProduceRequest::new()
        .with_projection(["id", "category"])
        .with_filters(
            TableFilterSet::new()
                .with(0, cmp(ComparisonOp::GreaterThan, Value::BigInt(50)))
                .with(2, cmp(ComparisonOp::Equal, Value::Varchar("A".into()))),
        );
    let batches = bridge.collect("items", &request).expect("collect");
    let ids = int64_column(&batches, "id");
    assert_eq!(ids.len(), 17);
    assert!(ids.iter().all(|id| *id > 50 && id % 3 == 0));
    assert!(string_column(&batches, "category")
        .iter()
        .all(|c| c.as_deref() == Some("A")));
    assert_eq!(batches[0].schema().fields().len(), 2);
}

#[test]
fn constants_finer_than_the_column_are_never_pushed_inexactly() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    bridge
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register items");
    let millis = DataType::Timestamp(TimeUnit::Millisecond, None);
    let schema = Arc::new(Schema::new(vec![Field::new("ts", millis, false)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(TimestampMillisecondArray::from(vec![1, 2]))],
    )
    .expect("batch");
    bridge
        .register_batches("events", vec![batch], RegisterOptions::default())
        .expect("register events");

    let scan = |view: &str, op, value| {
        let request = ProduceRequest::new()
            .with_filters(TableFilterSet::new().with(0, cmp(op, value)));
        total_rows(&bridge.collect(view, &request).expect("collect"))
    };
    // 2.5 has no integer form: the filter stays with the engine and every row comes back.
    assert_eq!(scan("items", ComparisonOp::Equal, Value::Double(2.5)), 100);
    assert_eq!(scan("items", ComparisonOp::Equal, Value::Double(2.0)), 1);
    // 1500us is not a whole millisecond; truncating it would also select the 1ms row.
    assert_eq!(
        scan("events", ComparisonOp::GreaterThanOrEqual, Value::Timestamp(1_500)),
        2
    );
    assert_eq!(
        scan("events", ComparisonOp::GreaterThanOrEqual, Value::Timestamp(2_000)),
        1
    );
}

#[test]
fn nan_constants_order_nan_above_every_number() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, false)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Float64Array::from(vec![1.0, f64::NAN, 3.0]))],
    )
    .expect("batch");
    // Supplied bounds would be wrong in the presence of NaN and must not be reported.
    let stats = TableStatistics::new(Some(3)).with_column(
        ColumnStatistics::new("x").with_bounds(StatValue::Double(1.0), StatValue::Double(3.0)),
    );
    bridge
        .register_batches("f", vec![batch], RegisterOptions::default().statistics(stats))
        .expect("register");
    assert!(bridge.column_statistics("f", "x").expect("stats").is_none());

    let rows_for = |op: ComparisonOp| {
        let request = ProduceRequest::new()
            .with_filters(TableFilterSet::new().with(0, cmp(op, Value::Double(f64::NAN))));
        let batches = bridge.collect("f", &request).expect("collect");
        let mut values = Vec::new();
        for batch in &batches {
            let col = batch
                .column(0)
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("float column");
            values.extend(col.values().iter().copied());
        }
        values
    };

    let ge = rows_for(ComparisonOp::GreaterThanOrEqual);
    assert_eq!(ge.len(), 1);
    assert!(ge[0].is_nan());
    assert!(rows_for(ComparisonOp::GreaterThan).is_empty());
    assert_eq!(rows_for(ComparisonOp::LessThanOrEqual).len(), 3);
    assert_eq!(rows_for(ComparisonOp::LessThan).len(), 2);
}

#[test]
fn repeated_scans_see_the_same_schema_and_rows() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    bridge
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register");

    let first = bridge
        .collect("items", &ProduceRequest::new())
        .expect("first scan");
    let second = bridge
        .collect("items", &ProduceRequest::new())
        .expect("second scan");
    assert_eq!(first[0].schema(), second[0].schema());
    assert_eq!(total_rows(&first), 100);
    assert_eq!(total_rows(&second), 100);
    assert_eq!(
        bridge.cardinality("items").expect("rows").estimated_cardinality,
        Some(100)
    );
}

#[test]
fn computed_statistics_describe_string_columns() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    bridge
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register");

    let category = bridge
        .column_statistics("items", "category")
        .expect("stats")
        .expect("category stats");
    assert_eq!(category.string_min(), Some("A"));
    assert_eq!(category.string_max(), Some("C"));
    assert!(category.can_have_valid());

    let disabled = Bridge::new(BridgeConfig {
        statistics_enabled: false,
        ..BridgeConfig::default()
    })
    .expect("bridge");
    disabled
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register");
    assert!(disabled
        .column_statistics("items", "id")
        .expect("stats")
        .is_none());
}

#[test]
fn json_filters_drive_a_scan() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    bridge
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register");
    let schema = bridge.schema("items").expect("schema");
    let filters = r#"{
        "id": {"filter_type": "conjunction_and", "children": [
            {"filter_type": "constant_comparison", "comparison_type": 30,
             "value": {"kind": "int64", "payload": 10}},
            {"filter_type": "constant_comparison", "comparison_type": 27,
             "value": {"kind": "int64", "payload": 20}}
        ]}
    }"#;
    let request = request_from_json(&schema, &["id".to_string()], Some(filters)).expect("request");
    let batches = bridge.collect("items", &request).expect("collect");
    assert_eq!(int64_column(&batches, "id"), (10..20).collect::<Vec<_>>());
}

#[test]
fn unknown_and_closed_views_are_contract_errors() {
    let bridge = Bridge::new(BridgeConfig::default()).expect("bridge");
    assert!(bridge.schema("missing").is_err());

    let handle = bridge
        .register_batches("items", fixture_batches(), RegisterOptions::default())
        .expect("register");
    let factory = bridge.factory("items").expect("factory");
    assert!(bridge.unregister(&handle));
    assert!(!bridge.unregister(&handle));

    let err = factory.schema().expect_err("closed");
    assert!(err.to_string().contains("Closed"));
    assert!(factory.produce(&ProduceRequest::new()).is_err());
    assert!(factory.cardinality().is_err());
}
