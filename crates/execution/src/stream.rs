//! Record-batch reader abstractions.

use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use scanbridge_common::Result;

/// The standard "reader you can return from a scan".
pub type SendableRecordBatchReader = Box<dyn RecordBatchReader + Send>;

/// Adapter that attaches a schema to any `Iterator<Item = Result<RecordBatch>>`.
///
/// Bridge errors surface to Arrow consumers as [`ArrowError::ExternalError`].
pub struct ReaderAdapter<I> {
    schema: SchemaRef,
    inner: I,
}

impl<I> ReaderAdapter<I> {
    /// Create a new schema-attached reader adapter.
    pub fn new(schema: SchemaRef, inner: I) -> Self {
        Self { schema, inner }
    }
}

impl<I> Iterator for ReaderAdapter<I>
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|item| item.map_err(|e| ArrowError::ExternalError(Box::new(e))))
    }
}

impl<I> RecordBatchReader for ReaderAdapter<I>
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

/// Create a reader that yields no batches but still reports `schema`.
pub fn empty_reader(schema: SchemaRef) -> SendableRecordBatchReader {
    Box::new(ReaderAdapter::new(
        schema,
        std::iter::empty::<Result<RecordBatch>>(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use scanbridge_common::BridgeError;

    use super::*;

    #[test]
    fn empty_reader_keeps_schema() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let mut reader = empty_reader(schema.clone());
        assert_eq!(reader.schema(), schema);
        assert!(reader.next().is_none());
    }

    #[test]
    fn errors_become_external_arrow_errors() {
        let schema = Arc::new(Schema::empty());
        let mut reader = ReaderAdapter::new(
            schema,
            vec![Err(BridgeError::Contract("boom".to_string()))].into_iter(),
        );
        let err = reader.next().expect("one item").expect_err("error item");
        assert!(matches!(err, ArrowError::ExternalError(_)));
        assert!(err.to_string().contains("boom"));
    }
}
