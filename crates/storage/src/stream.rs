//! Export of produced readers through the Arrow C stream interface.

use arrow::error::ArrowError;
use arrow::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use scanbridge_common::{BridgeError, MetricsRegistry, Result};
use scanbridge_execution::SendableRecordBatchReader;

use crate::release::StreamGuard;

/// Reader handed to the engine: the scan plus the release handle that outlives it.
///
/// Field order matters: the scan is dropped before the guard releases what it points into.
pub struct GuardedReader {
    inner: SendableRecordBatchReader,
    guard: StreamGuard,
    view: String,
    metrics: MetricsRegistry,
    rows: u64,
}

impl GuardedReader {
    pub fn new(
        inner: SendableRecordBatchReader,
        guard: StreamGuard,
        view: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            inner,
            guard,
            view: view.into(),
            metrics,
            rows: 0,
        }
    }

    /// Exports the reader as a C stream. Releasing the stream drops the reader.
    pub fn export(self) -> FFI_ArrowArrayStream {
        FFI_ArrowArrayStream::new(Box::new(self))
    }

    pub fn guard(&self) -> &StreamGuard {
        &self.guard
    }
}

impl Iterator for GuardedReader {
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next();
        if let Some(Ok(batch)) = &next {
            self.rows += batch.num_rows() as u64;
        }
        next
    }
}

impl RecordBatchReader for GuardedReader {
    fn schema(&self) -> SchemaRef {
        self.inner.schema()
    }
}

impl Drop for GuardedReader {
    fn drop(&mut self) {
        self.metrics.add_rows_produced(&self.view, self.rows);
    }
}

/// Imports a C stream produced elsewhere as a reader.
pub fn import_stream(stream: FFI_ArrowArrayStream) -> Result<SendableRecordBatchReader> {
    let reader = ArrowArrayStreamReader::try_new(stream)
        .map_err(|e| BridgeError::External(format!("stream import failed: {e}")))?;
    Ok(Box::new(reader))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use arrow::array::Int64Array;
    use arrow_schema::{DataType, Field, Schema};
    use scanbridge_execution::ReaderAdapter;

    use super::*;
    use crate::release::{PendingReleases, ReleaseMode, ReleaseToken};

    #[test]
    fn exported_streams_release_their_token_after_the_scan() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .expect("batch");
        let inner: SendableRecordBatchReader = Box::new(ReaderAdapter::new(
            schema.clone(),
            vec![Ok(batch)].into_iter(),
        ));
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let metrics = MetricsRegistry::new();
        let pending = PendingReleases::new("t", metrics.clone());
        let guard = StreamGuard::new(
            ReleaseToken::new(move || flag.store(true, Ordering::SeqCst)),
            ReleaseMode::Immediate,
            &pending,
        );

        let stream = GuardedReader::new(inner, guard, "t", metrics.clone()).export();
        let reader = import_stream(stream).expect("import");
        assert_eq!(reader.schema(), schema);
        let rows: usize = reader.map(|b| b.expect("batch").num_rows()).sum();
        assert_eq!(rows, 3);
        assert!(released.load(Ordering::SeqCst));
        assert!(metrics
            .render_prometheus()
            .contains("scanbridge_rows_produced_total{view=\"t\"} 3"));
    }
}
