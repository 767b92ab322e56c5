//! Factory over an in-process arrow table.

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use arrow::compute::cast;
use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use scanbridge_common::{BridgeError, FactoryId, Result, StatsOutcome};
use scanbridge_execution::InMemoryDataset;
use scanbridge_planner::{BaseStatistics, LogicalType, NodeStatistics, ProduceRequest};
use tracing::{debug, info, info_span};

use crate::capabilities::SourceCapabilities;
use crate::provider::{FactoryContext, FactoryState, Lifecycle, RegisterOptions, ScanSource};
use crate::release::{PendingReleases, ReleaseMode, ReleaseToken, StreamGuard};
use crate::statistics::{
    ComputedStats, TableStatistics, column_has_nan, compute_column_statistics, to_base_statistics,
};
use crate::stream::GuardedReader;
use crate::translate::translate_filter_set;

/// Immutable arrow table registered by value.
#[derive(Debug, Clone)]
pub struct ArrowTable {
    dataset: InMemoryDataset,
}

impl ArrowTable {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        Ok(Self {
            dataset: InMemoryDataset::try_new(schema, batches)?,
        })
    }

    /// Table from batches sharing the first batch's schema.
    pub fn from_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| BridgeError::Contract("table needs at least one batch".to_string()))?;
        Self::try_new(schema, batches)
    }

    /// Reads a local parquet file eagerly.
    pub fn from_parquet(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| BridgeError::External(format!("parquet reader build failed: {e}")))?
            .with_batch_size(batch_size.max(1))
            .build()
            .map_err(|e| BridgeError::External(format!("parquet reader open failed: {e}")))?;
        let schema = arrow::record_batch::RecordBatchReader::schema(&reader);
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(path = %path.display(), batches = batches.len(), "loaded parquet table");
        Self::try_new(schema, batches)
    }

    pub fn schema(&self) -> SchemaRef {
        self.dataset.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.dataset.num_rows()
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    /// Same table with `utf8_view` columns cast to `utf8`.
    pub fn without_string_views(self) -> Result<Self> {
        let schema = self.dataset.schema();
        if !schema
            .fields()
            .iter()
            .any(|f| f.data_type() == &DataType::Utf8View)
        {
            return Ok(self);
        }
        let fields = schema
            .fields()
            .iter()
            .map(|f| match f.data_type() {
                DataType::Utf8View => Arc::new(f.as_ref().clone().with_data_type(DataType::Utf8)),
                _ => f.clone(),
            })
            .collect::<Vec<Arc<Field>>>();
        let normalised = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
        let batches = self
            .dataset
            .batches()
            .iter()
            .map(|batch| {
                let columns = batch
                    .columns()
                    .iter()
                    .map(|c| match c.data_type() {
                        DataType::Utf8View => cast(c, &DataType::Utf8),
                        _ => Ok(c.clone()),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(RecordBatch::try_new(normalised.clone(), columns)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::try_new(normalised, batches)
    }
}

/// Factory that scans an arrow table in process.
///
/// The table handle is released at close; schema, row count and supplied statistics are
/// fixed at construction.
pub struct TableFactory {
    id: FactoryId,
    view: String,
    table: RwLock<Option<ArrowTable>>,
    schema: SchemaRef,
    pushdown: Vec<bool>,
    declared_rows: Option<u64>,
    supplied: Option<TableStatistics>,
    stats_cache: Vec<OnceLock<(StatsOutcome, Option<BaseStatistics>)>>,
    ctx: FactoryContext,
    release_mode: ReleaseMode,
    pending: Arc<PendingReleases>,
    lifecycle: Lifecycle,
}

impl TableFactory {
    /// Captures `table` for `view`.
    ///
    /// # Errors
    /// A table with no columns is a contract violation; nothing is registered.
    pub fn new(
        view: impl Into<String>,
        table: ArrowTable,
        options: &RegisterOptions,
        ctx: FactoryContext,
    ) -> Result<Self> {
        let view = view.into();
        let lifecycle = Lifecycle::new();
        let table = table.without_string_views()?;
        let schema = table.schema();
        if schema.fields().is_empty() {
            return Err(BridgeError::Contract(format!(
                "table for view '{view}' has no columns"
            )));
        }
        let pushdown = SourceCapabilities::arrow_table().pushdown_mask(&schema);
        let supplied = options.statistics.clone();
        let declared_rows = supplied
            .as_ref()
            .and_then(|s| s.row_count)
            .or(Some(table.num_rows() as u64));
        let release_mode = options.release_mode(&ctx.config);
        let pending = PendingReleases::new(view.clone(), ctx.metrics.clone());
        let factory = Self {
            id: FactoryId::next(),
            stats_cache: (0..schema.fields().len()).map(|_| OnceLock::new()).collect(),
            view,
            table: RwLock::new(Some(table)),
            schema,
            pushdown,
            declared_rows,
            supplied,
            ctx,
            release_mode,
            pending,
            lifecycle,
        };
        factory.lifecycle.activate();
        info!(
            view = %factory.view,
            factory = %factory.id,
            columns = factory.schema.fields().len(),
            rows = ?factory.declared_rows,
            release_mode = ?factory.release_mode,
            "table factory created"
        );
        Ok(factory)
    }

    fn table(&self) -> Result<ArrowTable> {
        self.table
            .read()
            .map_err(|_| {
                BridgeError::Contract(format!("table lock for view '{}' poisoned", self.view))
            })?
            .clone()
            .ok_or_else(|| BridgeError::Contract(format!("view '{}' is closed", self.view)))
    }

    fn statistics_for(&self, column: usize) -> Result<(StatsOutcome, Option<BaseStatistics>)> {
        let field = self.schema.field(column);
        let ty = LogicalType::from_arrow(field.data_type());
        let table = self.table()?;
        let chunks = table
            .dataset()
            .batches()
            .iter()
            .map(|b| b.column(column).clone())
            .collect::<Vec<_>>();

        if ty.is_floating() && column_has_nan(&chunks) {
            debug!(view = %self.view, column = %field.name(), "NaN present; statistics discarded");
            return Ok((StatsOutcome::Discarded, None));
        }
        if let Some(supplied) = self.supplied.as_ref().and_then(|s| s.column_at(column, field.name())) {
            return Ok(match to_base_statistics(supplied, self.declared_rows, &ty) {
                Some(stats) => (StatsOutcome::Precomputed, Some(stats)),
                None if ty.is_floating() => (StatsOutcome::Discarded, None),
                None => (StatsOutcome::Unsupported, None),
            });
        }
        Ok(
            match compute_column_statistics(
                &chunks,
                field.data_type(),
                self.ctx.config.distinct_count_enabled,
            )? {
                ComputedStats::Stats(stats) => (StatsOutcome::Computed, Some(stats)),
                ComputedStats::NanDiscarded => (StatsOutcome::Discarded, None),
                ComputedStats::Unsupported => (StatsOutcome::Unsupported, None),
            },
        )
    }
}

impl ScanSource for TableFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    fn view_name(&self) -> &str {
        &self.view
    }

    fn kind(&self) -> &'static str {
        "arrow_table"
    }

    fn schema(&self) -> Result<SchemaRef> {
        self.lifecycle.ensure_active(&self.view)?;
        Ok(self.schema.clone())
    }

    fn cardinality(&self) -> Result<NodeStatistics> {
        self.lifecycle.ensure_active(&self.view)?;
        Ok(NodeStatistics::from_declared(self.declared_rows))
    }

    fn column_statistics(&self, column: usize) -> Result<Option<BaseStatistics>> {
        self.lifecycle.ensure_active(&self.view)?;
        if column >= self.schema.fields().len() {
            return Err(BridgeError::Contract(format!(
                "column {column} out of range for view '{}'",
                self.view
            )));
        }
        if !self.ctx.config.statistics_enabled {
            self.ctx
                .metrics
                .record_statistics(&self.view, StatsOutcome::Disabled);
            return Ok(None);
        }
        let cell = &self.stats_cache[column];
        let (outcome, stats) = match cell.get() {
            Some(cached) => cached.clone(),
            None => {
                let computed = self.statistics_for(column)?;
                cell.get_or_init(|| computed).clone()
            }
        };
        self.ctx.metrics.record_statistics(&self.view, outcome);
        Ok(stats)
    }

    fn supports_pushdown(&self, column: usize) -> bool {
        self.pushdown.get(column).copied().unwrap_or(false)
    }

    fn produce(&self, request: &ProduceRequest) -> Result<FFI_ArrowArrayStream> {
        self.lifecycle.ensure_active(&self.view)?;
        let _span = info_span!("produce", view = %self.view, factory = %self.id).entered();

        let table = self.table()?;
        let translated = translate_filter_set(request, &self.schema, &self.pushdown);
        self.ctx.metrics.record_filters(
            &self.view,
            translated.pushed as u64,
            translated.skipped as u64,
            translated.failed as u64,
        );
        debug!(
            pushed = translated.pushed,
            skipped = translated.skipped,
            failed = translated.failed,
            filter = ?translated.expr.as_ref().map(ToString::to_string),
            columns = ?request.projected_columns,
            "scan filters translated"
        );

        let mut scanner = table
            .dataset()
            .scanner()
            .project(&request.projected_columns)
            .use_threads(self.ctx.config.use_threads)
            .batch_size(self.ctx.config.batch_size_rows);
        if let Some(expr) = translated.expr {
            scanner = scanner.filter(expr);
        }
        let reader = scanner.finish()?.into_reader()?;

        // The stream keeps the table alive until the engine releases it.
        let token = ReleaseToken::owning(table);
        let guard = StreamGuard::new(token, self.release_mode, &self.pending);
        self.ctx.metrics.inc_streams_produced(&self.view);
        Ok(GuardedReader::new(reader, guard, self.view.clone(), self.ctx.metrics.clone()).export())
    }

    fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }
        let table = self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(table);
        let flushed = self.pending.flush();
        info!(view = %self.view, factory = %self.id, flushed, "table factory closed");
    }

    fn state(&self) -> FactoryState {
        self.lifecycle.state()
    }

    fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }

    fn pending_releases(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for TableFactory {
    fn drop(&mut self) {
        self.close();
    }
}
