//! Factory over an external data holder.
//!
//! A holder is an opaque producer of C streams living outside the bridge (a foreign callback
//! pair, a Python object). It evaluates pushed filters itself; the factory only decides which
//! filters it may see, encodes them in the flat filter wire form, and tracks the release
//! tokens that come back with every stream.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow_schema::{Schema, SchemaRef};
use scanbridge_common::{BridgeError, FactoryId, Result, StatsOutcome};
use scanbridge_execution::{InMemoryDataset, ScannerBuilder};
use scanbridge_planner::{
    BaseStatistics, FilterWire, LogicalType, NodeStatistics, ProduceRequest,
};
use tracing::{debug, info, info_span, warn};

use crate::capabilities::SourceCapabilities;
use crate::provider::{FactoryContext, FactoryState, Lifecycle, RegisterOptions, ScanSource};
use crate::release::{PendingReleases, ReleaseMode, ReleaseToken, StreamGuard};
use crate::statistics::{TableStatistics, to_base_statistics};
use crate::stream::{GuardedReader, import_stream};
use crate::translate::translate_filter;

/// One column filter as a holder sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct HolderFilter {
    pub column_index: usize,
    pub column_name: String,
    pub filter: FilterWire,
}

/// Scan request handed to a holder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HolderRequest {
    /// Output columns in order. Scans always name at least one; only the probe sends none.
    pub projected_columns: Vec<String>,
    pub filters: Vec<HolderFilter>,
    /// Set only on the registration request that asks for the schema.
    pub schema_probe: bool,
}

impl HolderRequest {
    /// The request used once at registration to learn the schema.
    pub fn schema_probe() -> Self {
        Self {
            schema_probe: true,
            ..Self::default()
        }
    }

    pub fn is_schema_probe(&self) -> bool {
        self.schema_probe
    }
}

/// A holder's answer: the stream plus an optional token released after the stream.
pub struct HolderStream {
    pub stream: FFI_ArrowArrayStream,
    pub release_token: Option<ReleaseToken>,
}

/// External producer of filtered, projected streams.
pub trait DataHolder: Send + Sync {
    fn capabilities(&self) -> SourceCapabilities;

    /// Row count the holder knows without scanning.
    fn num_rows(&self) -> Option<u64>;

    fn produce(&self, request: &HolderRequest) -> Result<HolderStream>;
}

/// Factory bound to a [`DataHolder`].
pub struct HolderFactory {
    id: FactoryId,
    view: String,
    holder: RwLock<Option<Arc<dyn DataHolder>>>,
    /// Ownership of the holder reference and of the schema probe, released at close.
    owned: Mutex<Vec<ReleaseToken>>,
    schema: SchemaRef,
    capabilities: SourceCapabilities,
    pushdown: Vec<bool>,
    declared_rows: Option<u64>,
    supplied: Option<TableStatistics>,
    ctx: FactoryContext,
    release_mode: ReleaseMode,
    pending: Arc<PendingReleases>,
    lifecycle: Lifecycle,
}

impl HolderFactory {
    /// Binds `holder` for `view`, probing it once for the schema.
    ///
    /// `holder_ref` is the ownership token of the holder reference taken at registration.
    ///
    /// # Errors
    /// A failed probe or a schema with no columns fails the registration.
    pub fn new(
        view: impl Into<String>,
        holder: Arc<dyn DataHolder>,
        holder_ref: ReleaseToken,
        options: &RegisterOptions,
        ctx: FactoryContext,
    ) -> Result<Self> {
        let view = view.into();
        let lifecycle = Lifecycle::new();
        let capabilities = holder.capabilities();

        let probe = holder.produce(&HolderRequest::schema_probe())?;
        let schema = import_stream(probe.stream)?.schema();
        if schema.fields().is_empty() {
            return Err(BridgeError::Contract(format!(
                "holder for view '{view}' exposes no columns"
            )));
        }
        let mut owned = vec![holder_ref];
        owned.extend(probe.release_token);

        let pushdown = capabilities.pushdown_mask(&schema);
        let supplied = options.statistics.clone();
        let declared_rows = supplied
            .as_ref()
            .and_then(|s| s.row_count)
            .or_else(|| holder.num_rows());
        let release_mode = options.release_mode(&ctx.config);
        let pending = PendingReleases::new(view.clone(), ctx.metrics.clone());
        let factory = Self {
            id: FactoryId::next(),
            view,
            holder: RwLock::new(Some(holder)),
            owned: Mutex::new(owned),
            schema,
            capabilities,
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
            supports_views = factory.capabilities.supports_views(),
            release_mode = ?factory.release_mode,
            "holder factory created"
        );
        Ok(factory)
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    fn holder(&self) -> Result<Arc<dyn DataHolder>> {
        self.holder
            .read()
            .map_err(|_| {
                BridgeError::Contract(format!("holder lock for view '{}' poisoned", self.view))
            })?
            .clone()
            .ok_or_else(|| BridgeError::Contract(format!("view '{}' is closed", self.view)))
    }

    /// Encodes the pushable filters of `request`; returns the request and (skipped, failed).
    ///
    /// An empty projection is expanded to every column so no scan reaches the holder in
    /// the shape of the schema probe.
    fn holder_request(&self, request: &ProduceRequest) -> (HolderRequest, usize, usize) {
        let projected_columns = if request.projected_columns.is_empty() {
            self.schema.fields().iter().map(|f| f.name().clone()).collect()
        } else {
            request.projected_columns.clone()
        };
        let mut out = HolderRequest {
            projected_columns,
            filters: Vec::new(),
            schema_probe: false,
        };
        let (mut skipped, mut failed) = (0, 0);
        for (filter_index, filter) in request.filters.iter() {
            let column = request.source_column(filter_index);
            let Some(field) = self.schema.fields().get(column) else {
                warn!(filter_index, column, "filter references a column outside the schema");
                failed += 1;
                continue;
            };
            if !self.supports_pushdown(column) {
                skipped += 1;
                continue;
            }
            match FilterWire::from_node(filter) {
                Ok(wire) => out.filters.push(HolderFilter {
                    column_index: column,
                    column_name: field.name().clone(),
                    filter: wire,
                }),
                Err(e) if e.is_skip() => {
                    debug!(column = %field.name(), error = %e, "filter not pushed to holder");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(column = %field.name(), error = %e, "filter encoding failed");
                    failed += 1;
                }
            }
        }
        (out, skipped, failed)
    }
}

impl ScanSource for HolderFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    fn view_name(&self) -> &str {
        &self.view
    }

    fn kind(&self) -> &'static str {
        "holder"
    }

    fn schema(&self) -> Result<SchemaRef> {
        self.lifecycle.ensure_active(&self.view)?;
        Ok(self.schema.clone())
    }

    fn cardinality(&self) -> Result<NodeStatistics> {
        self.lifecycle.ensure_active(&self.view)?;
        Ok(NodeStatistics::from_declared(self.declared_rows))
    }

    /// Holders only carry supplied statistics; nothing is computed on their data.
    fn column_statistics(&self, column: usize) -> Result<Option<BaseStatistics>> {
        self.lifecycle.ensure_active(&self.view)?;
        let field = self.schema.fields().get(column).ok_or_else(|| {
            BridgeError::Contract(format!(
                "column {column} out of range for view '{}'",
                self.view
            ))
        })?;
        if !self.ctx.config.statistics_enabled {
            self.ctx
                .metrics
                .record_statistics(&self.view, StatsOutcome::Disabled);
            return Ok(None);
        }
        let ty = LogicalType::from_arrow(field.data_type());
        let (outcome, stats) = match self.supplied.as_ref().and_then(|s| s.column_at(column, field.name())) {
            None => (StatsOutcome::Unsupported, None),
            Some(col) => match to_base_statistics(col, self.declared_rows, &ty) {
                Some(stats) => (StatsOutcome::Precomputed, Some(stats)),
                None if ty.is_floating() => (StatsOutcome::Discarded, None),
                None => (StatsOutcome::Unsupported, None),
            },
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

        let (holder_request, skipped, failed) = self.holder_request(request);
        self.ctx.metrics.record_filters(
            &self.view,
            holder_request.filters.len() as u64,
            skipped as u64,
            failed as u64,
        );
        debug!(
            pushed = holder_request.filters.len(),
            skipped,
            failed,
            columns = ?holder_request.projected_columns,
            "holder filters encoded"
        );

        // No bridge lock is held while the holder runs.
        let holder = self.holder()?;
        let answer = holder.produce(&holder_request)?;
        let reader = import_stream(answer.stream)?;

        let token = answer.release_token.unwrap_or_else(ReleaseToken::noop);
        let guard = StreamGuard::new(token, self.release_mode, &self.pending);
        self.ctx.metrics.inc_streams_produced(&self.view);
        Ok(GuardedReader::new(reader, guard, self.view.clone(), self.ctx.metrics.clone()).export())
    }

    fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }
        let flushed = self.pending.flush();
        // A poisoned lock still holds the tokens; close must release them regardless.
        let holder = self
            .holder
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let owned = std::mem::take(&mut *self.owned.lock().unwrap_or_else(PoisonError::into_inner));
        drop(holder);
        let released = owned.len();
        for token in owned {
            token.release();
        }
        info!(view = %self.view, factory = %self.id, flushed, released, "holder factory closed");
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

impl Drop for HolderFactory {
    fn drop(&mut self) {
        self.close();
    }
}

/// Holder backed by an in-process arrow dataset.
///
/// Decodes the wire filters back into engine filters and scans the dataset with them, the
/// way an external holder would evaluate them on its own data.
pub struct DatasetHolder {
    dataset: InMemoryDataset,
    capabilities: SourceCapabilities,
    use_threads: bool,
}

impl DatasetHolder {
    pub fn new(dataset: InMemoryDataset, supports_views: bool) -> Self {
        Self {
            dataset,
            capabilities: SourceCapabilities::holder(supports_views),
            use_threads: true,
        }
    }

    pub fn use_threads(mut self, enabled: bool) -> Self {
        self.use_threads = enabled;
        self
    }

    fn scanner(&self, request: &HolderRequest) -> Result<ScannerBuilder> {
        let schema: &Schema = &self.dataset.schema();
        let mut expr = None;
        for f in &request.filters {
            let field = schema.fields().get(f.column_index).ok_or_else(|| {
                BridgeError::Contract(format!("holder column {} out of range", f.column_index))
            })?;
            let node = f.filter.to_node(&LogicalType::from_arrow(field.data_type()))?;
            let translated = translate_filter(&node, field.name(), field.data_type())?;
            expr = Some(match expr {
                None => translated,
                Some(acc) => scanbridge_execution::ComputeExpr::and_kleene(acc, translated),
            });
        }
        let mut builder = self
            .dataset
            .scanner()
            .project(&request.projected_columns)
            .use_threads(self.use_threads);
        if let Some(expr) = expr {
            builder = builder.filter(expr);
        }
        Ok(builder)
    }
}

impl DataHolder for DatasetHolder {
    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    fn num_rows(&self) -> Option<u64> {
        Some(self.dataset.num_rows() as u64)
    }

    fn produce(&self, request: &HolderRequest) -> Result<HolderStream> {
        if request.is_schema_probe() {
            let reader = scanbridge_execution::empty_reader(self.dataset.schema());
            return Ok(HolderStream {
                stream: FFI_ArrowArrayStream::new(reader),
                release_token: None,
            });
        }
        let reader = self.scanner(request)?.finish()?.into_reader()?;
        Ok(HolderStream {
            stream: FFI_ArrowArrayStream::new(reader),
            release_token: Some(ReleaseToken::owning(self.dataset.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use arrow::array::{Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field};
    use scanbridge_common::MetricsRegistry;
    use scanbridge_planner::{ComparisonOp, FilterNode, TableFilterSet, Value};

    use super::*;

    fn dataset() -> InMemoryDataset {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
            ],
        )
        .expect("batch");
        InMemoryDataset::try_new(schema, vec![batch]).expect("dataset")
    }

    fn factory(holder_ref: ReleaseToken) -> HolderFactory {
        HolderFactory::new(
            "h",
            Arc::new(DatasetHolder::new(dataset(), false)),
            holder_ref,
            &RegisterOptions::default(),
            FactoryContext::new(Default::default(), MetricsRegistry::new()),
        )
        .expect("factory")
    }

    #[test]
    fn holders_evaluate_wire_filters() {
        let factory = factory(ReleaseToken::noop());
        let request = ProduceRequest::new()
            .with_projection(["name"])
            .with_filters(TableFilterSet::new().with(
                0,
                FilterNode::comparison(ComparisonOp::GreaterThanOrEqual, Value::BigInt(3)),
            ));
        let stream = factory.produce(&request).expect("produce");
        let batches: Vec<_> = import_stream(stream)
            .expect("import")
            .map(|b| b.expect("batch"))
            .collect();
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 2);
        assert_eq!(batches[0].schema().field(0).name(), "name");
    }

    #[test]
    fn holder_reference_is_released_once_at_close() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let factory = factory(ReleaseToken::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(factory.cardinality().expect("rows").estimated_cardinality, Some(4));
        assert!(factory.column_statistics(0).expect("stats").is_none());
        factory.close();
        factory.close();
        drop(factory);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blob_constants_are_not_sent_to_holders() {
        let factory = factory(ReleaseToken::noop());
        let request = ProduceRequest::new().with_filters(
            TableFilterSet::new()
                .with(1, FilterNode::comparison(ComparisonOp::Equal, Value::Blob(vec![1])))
                .with(0, FilterNode::IsNotNull),
        );
        let (holder_request, skipped, failed) = factory.holder_request(&request);
        assert_eq!(holder_request.filters.len(), 1);
        assert_eq!(holder_request.filters[0].column_name, "id");
        assert_eq!((skipped, failed), (1, 0));
    }

    fn rows(stream: FFI_ArrowArrayStream) -> usize {
        import_stream(stream)
            .expect("import")
            .map(|b| b.expect("batch").num_rows())
            .sum()
    }

    #[test]
    fn poisoned_holder_lock_fails_produce_but_close_still_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let factory = factory(ReleaseToken::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = factory.holder.write().expect("first lock");
            panic!("holder panicked");
        }));
        assert!(poisoned.is_err());

        let err = factory.produce(&ProduceRequest::new()).err().expect("poisoned");
        assert!(matches!(err, BridgeError::Contract(_)));
        assert!(err.to_string().contains("poisoned"));
        factory.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_scans_are_not_mistaken_for_the_schema_probe() {
        let factory = factory(ReleaseToken::noop());
        let (holder_request, _, _) = factory.holder_request(&ProduceRequest::new());
        assert!(!holder_request.is_schema_probe());
        assert_eq!(
            holder_request.projected_columns,
            vec!["id".to_string(), "name".to_string()]
        );
        assert_eq!(rows(factory.produce(&ProduceRequest::new()).expect("produce")), 4);
        assert!(HolderRequest::schema_probe().is_schema_probe());
    }

    #[test]
    fn scans_whose_filters_are_all_skipped_return_every_row() {
        let factory = factory(ReleaseToken::noop());
        let request = ProduceRequest::new().with_filters(
            TableFilterSet::new()
                .with(1, FilterNode::comparison(ComparisonOp::Equal, Value::Blob(vec![1])))
                .with(7, FilterNode::IsNull),
        );
        let (holder_request, skipped, failed) = factory.holder_request(&request);
        assert!(holder_request.filters.is_empty());
        assert_eq!((skipped, failed), (1, 1));
        assert_eq!(rows(factory.produce(&request).expect("produce")), 4);
    }
}
