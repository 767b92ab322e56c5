use std::path::Path;
use std::sync::Arc;

use arrow::ffi_stream::ArrowArrayStreamReader;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use scanbridge_common::{BridgeConfig, BridgeError, Result};
use scanbridge_planner::{BaseStatistics, NodeStatistics, ProduceRequest};
use scanbridge_storage::{
    ArrowTable, DataHolder, FactoryHandle, HolderFactory, RegisterOptions, ReleaseToken,
    ScanSource, TableDef, TableFactory,
};

use crate::session::{Session, SharedSession};

/// Entry point for registering scan sources and driving scans over them.
///
/// Cloning is cheap; clones share one session.
#[derive(Clone)]
pub struct Bridge {
    session: SharedSession,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let session = Arc::new(Session::new(config)?);
        Ok(Self { session })
    }

    /// Session built from `SCANBRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(BridgeConfig::from_env()?)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.session.config
    }

    /// Registers an arrow table under `view`.
    ///
    /// Nothing is bound when factory construction fails.
    pub fn register_table(
        &self,
        view: impl Into<String>,
        table: ArrowTable,
        options: RegisterOptions,
    ) -> Result<FactoryHandle> {
        let factory = TableFactory::new(view, table, &options, self.session.factory_context())?;
        self.session
            .catalog
            .register(Arc::new(factory), options.replace)
    }

    pub fn register_batches(
        &self,
        view: impl Into<String>,
        batches: Vec<RecordBatch>,
        options: RegisterOptions,
    ) -> Result<FactoryHandle> {
        self.register_table(view, ArrowTable::from_batches(batches)?, options)
    }

    /// Loads a local parquet file and registers it as an arrow table.
    pub fn register_parquet(
        &self,
        view: impl Into<String>,
        path: impl AsRef<Path>,
        options: RegisterOptions,
    ) -> Result<FactoryHandle> {
        let table = ArrowTable::from_parquet(path, self.session.config.batch_size_rows)?;
        self.register_table(view, table, options)
    }

    /// Registers a parquet view declared in a catalog file.
    pub fn register_table_def(&self, def: TableDef, replace: bool) -> Result<FactoryHandle> {
        let mut options = RegisterOptions::default().replace(replace);
        options.deferred_release = def.deferred_release;
        options.statistics = def.statistics;
        self.register_parquet(def.name, def.path, options)
    }

    /// Registers an external holder. `holder_ref` is released when the view is closed.
    pub fn register_holder(
        &self,
        view: impl Into<String>,
        holder: Arc<dyn DataHolder>,
        holder_ref: ReleaseToken,
        options: RegisterOptions,
    ) -> Result<FactoryHandle> {
        let factory = HolderFactory::new(
            view,
            holder,
            holder_ref,
            &options,
            self.session.factory_context(),
        )?;
        self.session
            .catalog
            .register(Arc::new(factory), options.replace)
    }

    /// Closes the factory behind `handle`; false if the view was replaced or removed since.
    pub fn unregister(&self, handle: &FactoryHandle) -> bool {
        self.session.catalog.unregister_handle(handle)
    }

    pub fn unregister_view(&self, view: &str) -> bool {
        self.session.catalog.unregister(view)
    }

    pub fn factory(&self, view: &str) -> Result<Arc<dyn ScanSource>> {
        self.session.catalog.get(view)
    }

    pub fn schema(&self, view: &str) -> Result<SchemaRef> {
        self.factory(view)?.schema()
    }

    pub fn cardinality(&self, view: &str) -> Result<NodeStatistics> {
        self.factory(view)?.cardinality()
    }

    /// Engine statistics for the column named `column`.
    pub fn column_statistics(&self, view: &str, column: &str) -> Result<Option<BaseStatistics>> {
        let factory = self.factory(view)?;
        let index = factory.schema()?.index_of(column).map_err(|_| {
            BridgeError::Contract(format!("unknown column '{column}' in view '{view}'"))
        })?;
        factory.column_statistics(index)
    }

    /// Produces a scan and imports it back as a reader.
    pub fn scan(&self, view: &str, request: &ProduceRequest) -> Result<ArrowArrayStreamReader> {
        let stream = self.factory(view)?.produce(request)?;
        ArrowArrayStreamReader::try_new(stream)
            .map_err(|e| BridgeError::External(format!("stream import failed: {e}")))
    }

    pub fn collect(&self, view: &str, request: &ProduceRequest) -> Result<Vec<RecordBatch>> {
        let reader = self.scan(view, request)?;
        Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn views(&self) -> Vec<String> {
        self.session.catalog.views()
    }

    pub fn prometheus_metrics(&self) -> String {
        self.session.prometheus_metrics()
    }

    /// Closes every registered view.
    pub fn close(&self) {
        self.session.catalog.close_all();
    }
}
