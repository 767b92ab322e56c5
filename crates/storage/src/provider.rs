use std::sync::atomic::{AtomicU8, Ordering};

use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow_schema::SchemaRef;
use scanbridge_common::{BridgeConfig, BridgeError, FactoryId, MetricsRegistry, Result};
use scanbridge_planner::{BaseStatistics, LogicalType, NodeStatistics, ProduceRequest};

use crate::release::ReleaseMode;
use crate::statistics::TableStatistics;

/// Lifecycle of a registered factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryState {
    /// Schema capture in progress.
    Created,
    /// Bound and serving the engine.
    Active,
    /// Handle released; every further call is a contract violation.
    Closed,
}

/// Scan source bound into the engine's catalog.
///
/// Implementations are source-specific (arrow tables scanned in process, external holders).
/// Schema and cardinality are fixed at construction; `produce` may run concurrently from
/// engine worker threads.
pub trait ScanSource: Send + Sync {
    fn id(&self) -> FactoryId;

    fn view_name(&self) -> &str;

    /// Metrics label of the source kind.
    fn kind(&self) -> &'static str;

    /// Cached schema; never re-queried from the source.
    fn schema(&self) -> Result<SchemaRef>;

    /// Declared row count, or unknown.
    fn cardinality(&self) -> Result<NodeStatistics>;

    /// Engine statistics for `column`; `None` when none can be given.
    fn column_statistics(&self, column: usize) -> Result<Option<BaseStatistics>>;

    /// Whether filters on `column` are pushed into the source.
    fn supports_pushdown(&self, column: usize) -> bool;

    /// Starts a projected, filtered scan exported as a C stream.
    ///
    /// # Errors
    /// Fails for closed factories and for scan build failures; the factory stays usable
    /// after a failed produce.
    fn produce(&self, request: &ProduceRequest) -> Result<FFI_ArrowArrayStream>;

    /// Releases the owned handle and flushes pending stream releases. Idempotent.
    fn close(&self);

    fn state(&self) -> FactoryState;

    fn release_mode(&self) -> ReleaseMode;

    /// Deferred releases not yet fired.
    fn pending_releases(&self) -> usize;

    /// Column names and engine types.
    fn engine_columns(&self) -> Result<Vec<(String, LogicalType)>> {
        Ok(self
            .schema()?
            .fields()
            .iter()
            .map(|f| (f.name().clone(), LogicalType::from_arrow(f.data_type())))
            .collect())
    }
}

/// Per-registration options; unset fields fall back to the session configuration.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub replace: bool,
    pub deferred_release: Option<bool>,
    pub statistics: Option<TableStatistics>,
}

impl RegisterOptions {
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn deferred_release(mut self, deferred: bool) -> Self {
        self.deferred_release = Some(deferred);
        self
    }

    pub fn statistics(mut self, statistics: TableStatistics) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn release_mode(&self, config: &BridgeConfig) -> ReleaseMode {
        ReleaseMode::from_deferred(self.deferred_release.unwrap_or(config.deferred_release))
    }
}

/// Session state every factory is built with.
#[derive(Debug, Clone, Default)]
pub struct FactoryContext {
    pub config: BridgeConfig,
    pub metrics: MetricsRegistry,
}

impl FactoryContext {
    pub fn new(config: BridgeConfig, metrics: MetricsRegistry) -> Self {
        Self { config, metrics }
    }
}

const CREATED: u8 = 0;
const ACTIVE: u8 = 1;
const CLOSED: u8 = 2;

/// Atomic factory state machine.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(CREATED))
    }

    pub(crate) fn activate(&self) {
        let _ = self
            .0
            .compare_exchange(CREATED, ACTIVE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Moves to `Closed`; true only for the first caller.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(CLOSED, Ordering::AcqRel) != CLOSED
    }

    pub(crate) fn state(&self) -> FactoryState {
        match self.0.load(Ordering::Acquire) {
            CREATED => FactoryState::Created,
            ACTIVE => FactoryState::Active,
            _ => FactoryState::Closed,
        }
    }

    pub(crate) fn ensure_active(&self, view: &str) -> Result<()> {
        match self.state() {
            FactoryState::Active => Ok(()),
            state => Err(BridgeError::Contract(format!(
                "factory for view '{view}' is {state:?}"
            ))),
        }
    }
}
