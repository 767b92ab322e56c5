//! Filtered, projected scans over in-memory record batches.
//!
//! A scan evaluates its predicate against the full input batch, so filters may reference
//! columns that are not projected. Rows where the predicate is false or null are dropped.

use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use rayon::prelude::*;
use scanbridge_common::{BridgeError, Result};
use tracing::debug;

use crate::expressions::{ComputeExpr, PhysicalExpr, compile_expr, evaluate_predicate};
use crate::stream::{ReaderAdapter, SendableRecordBatchReader};

/// Default maximum rows per emitted batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Immutable set of record batches sharing one schema.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    schema: SchemaRef,
    batches: Arc<Vec<RecordBatch>>,
}

impl InMemoryDataset {
    /// Build a dataset, checking that every batch matches `schema`.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for (i, batch) in batches.iter().enumerate() {
            if batch.schema().fields() != schema.fields() {
                return Err(BridgeError::Contract(format!(
                    "batch {i} schema does not match dataset schema"
                )));
            }
        }
        Ok(Self {
            schema,
            batches: Arc::new(batches),
        })
    }

    /// Dataset schema.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Underlying batches in scan order.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total row count.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Start configuring a scan.
    pub fn scanner(&self) -> ScannerBuilder {
        ScannerBuilder::new(self.clone())
    }
}

/// Scan configuration.
pub struct ScannerBuilder {
    dataset: InMemoryDataset,
    projection: Vec<String>,
    filter: Option<ComputeExpr>,
    use_threads: bool,
    batch_size: usize,
}

impl ScannerBuilder {
    fn new(dataset: InMemoryDataset) -> Self {
        Self {
            dataset,
            projection: Vec::new(),
            filter: None,
            use_threads: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Output columns in order. Empty means every column.
    pub fn project(mut self, columns: &[String]) -> Self {
        self.projection = columns.to_vec();
        self
    }

    /// Row predicate.
    pub fn filter(mut self, expr: ComputeExpr) -> Self {
        self.filter = Some(expr);
        self
    }

    /// Evaluate batches on the rayon pool.
    pub fn use_threads(mut self, enabled: bool) -> Self {
        self.use_threads = enabled;
        self
    }

    /// Upper bound on rows per emitted batch; zero keeps the default.
    pub fn batch_size(mut self, rows: usize) -> Self {
        if rows > 0 {
            self.batch_size = rows;
        }
        self
    }

    /// Bind the projection and predicate to the dataset schema.
    pub fn finish(self) -> Result<Scanner> {
        let schema = self.dataset.schema();
        let indices = if self.projection.is_empty() {
            (0..schema.fields().len()).collect::<Vec<_>>()
        } else {
            self.projection
                .iter()
                .map(|name| {
                    schema.index_of(name).map_err(|_| {
                        BridgeError::Contract(format!("unknown projected column: {name}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let projected_schema = Arc::new(schema.project(&indices)?);
        let predicate = match &self.filter {
            // A constant true predicate selects everything.
            Some(expr) if expr.as_bool_literal() == Some(true) => None,
            Some(expr) => Some(compile_expr(expr, &schema)?),
            None => None,
        };
        Ok(Scanner {
            dataset: self.dataset,
            projected_schema,
            indices,
            predicate,
            use_threads: self.use_threads,
            batch_size: self.batch_size,
        })
    }
}

/// Bound scan, ready to produce a reader.
pub struct Scanner {
    dataset: InMemoryDataset,
    projected_schema: SchemaRef,
    indices: Vec<usize>,
    predicate: Option<Arc<dyn PhysicalExpr>>,
    use_threads: bool,
    batch_size: usize,
}

impl Scanner {
    /// Output schema.
    pub fn schema(&self) -> SchemaRef {
        self.projected_schema.clone()
    }

    /// Produce the scan's batches as a reader.
    ///
    /// With threads enabled the batches are evaluated up front in parallel; output order
    /// always matches input order.
    pub fn into_reader(self) -> Result<SendableRecordBatchReader> {
        let slices = self.slices();
        debug!(
            input_batches = slices.len(),
            columns = self.indices.len(),
            filtered = self.predicate.is_some(),
            use_threads = self.use_threads,
            "starting scan"
        );
        let schema = self.projected_schema.clone();
        if self.use_threads {
            let out = slices
                .par_iter()
                .map(|batch| self.scan_batch(batch))
                .collect::<Vec<_>>();
            let iter = out.into_iter().filter(non_empty);
            return Ok(Box::new(ReaderAdapter::new(schema, iter)));
        }
        let iter = slices
            .into_iter()
            .map(move |batch| self.scan_batch(&batch))
            .filter(non_empty);
        Ok(Box::new(ReaderAdapter::new(schema, iter)))
    }

    fn slices(&self) -> Vec<RecordBatch> {
        let mut out = Vec::new();
        for batch in self.dataset.batches() {
            let rows = batch.num_rows();
            let mut offset = 0;
            while offset < rows {
                let len = self.batch_size.min(rows - offset);
                out.push(batch.slice(offset, len));
                offset += len;
            }
        }
        out
    }

    fn scan_batch(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let projected = batch.project(&self.indices)?;
        let Some(predicate) = &self.predicate else {
            return Ok(projected);
        };
        let mask = evaluate_predicate(predicate.as_ref(), batch)?;
        Ok(filter_record_batch(&projected, &mask)?)
    }
}

fn non_empty(item: &Result<RecordBatch>) -> bool {
    item.as_ref().map_or(true, |b| b.num_rows() > 0)
}
