#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;

pub const FIXTURE_ROWS: i64 = 100;

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}

pub fn fixture_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("price", DataType::Float64, false),
        Field::new("category", DataType::Utf8, true),
    ]))
}

/// `id` 1..=100, `price` id / 2, `category` cycling B, C, A (so A on multiples of 3).
pub fn fixture_batches() -> Vec<RecordBatch> {
    let ids: Vec<i64> = (1..=FIXTURE_ROWS).collect();
    let prices: Vec<f64> = ids.iter().map(|i| *i as f64 / 2.0).collect();
    let categories: Vec<&str> = ids
        .iter()
        .map(|i| match i % 3 {
            0 => "A",
            1 => "B",
            _ => "C",
        })
        .collect();
    // Two batches so scans cross a batch boundary.
    let split = 60;
    [(0, split), (split, ids.len())]
        .into_iter()
        .map(|(start, end)| {
            RecordBatch::try_new(
                fixture_schema(),
                vec![
                    Arc::new(Int64Array::from(ids[start..end].to_vec())),
                    Arc::new(Float64Array::from(prices[start..end].to_vec())),
                    Arc::new(StringArray::from(categories[start..end].to_vec())),
                ],
            )
            .expect("fixture batch")
        })
        .collect()
}

pub fn write_parquet(path: &Path, batches: &[RecordBatch]) {
    let schema = batches.first().expect("at least one batch").schema();
    let file = File::create(path).expect("create parquet file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("create parquet writer");
    for batch in batches {
        writer.write(batch).expect("write parquet batch");
    }
    writer.close().expect("close parquet writer");
}

pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

pub fn int64_column(batches: &[RecordBatch], name: &str) -> Vec<i64> {
    let mut out = Vec::new();
    for batch in batches {
        let col = batch
            .column_by_name(name)
            .expect("column present")
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64 column");
        out.extend(col.values().iter().copied());
    }
    out
}

pub fn string_column(batches: &[RecordBatch], name: &str) -> Vec<Option<String>> {
    let mut out = Vec::new();
    for batch in batches {
        let col = batch
            .column_by_name(name)
            .expect("column present")
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        out.extend((0..col.len()).map(|i| (!col.is_null(i)).then(|| col.value(i).to_string())));
    }
    out
}
