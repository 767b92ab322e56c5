//! Scan sources the engine binds as views: in-process arrow tables and external holders.
//!
//! Each factory owns its source handle, answers schema/cardinality/statistics queries from
//! state captured at registration, translates pushed filters and exports scans as C streams.

pub mod capabilities;
pub mod catalog;
pub mod codec;
pub mod holder;
pub mod provider;
pub mod release;
pub mod statistics;
pub mod stream;
pub mod table_factory;
pub mod translate;

pub use capabilities::{SourceCapabilities, SourceKind, is_view};
pub use catalog::{Catalog, FactoryHandle, TableDef, load_table_defs};
pub use codec::{literal_for_column, scalar_to_value, value_to_scalar};
pub use holder::{
    DataHolder, DatasetHolder, HolderFactory, HolderFilter, HolderRequest, HolderStream,
};
pub use provider::{FactoryContext, FactoryState, RegisterOptions, ScanSource};
pub use release::{PendingReleases, ReleaseMode, ReleaseToken, StreamGuard};
pub use statistics::{
    ColumnStatistics, ComputedStats, StatValue, TableStatistics, compute_column_statistics,
    to_base_statistics,
};
pub use stream::{GuardedReader, import_stream};
pub use table_factory::{ArrowTable, TableFactory};
pub use translate::{TranslatedFilters, translate_filter, translate_filter_set};
