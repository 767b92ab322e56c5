#![deny(missing_docs)]

//! Columnar compute primitives used by the scan bridge.
//!
//! Architecture role:
//! - literal values and the compute-expression algebra filters are translated into
//! - expression compilation/evaluation against record batches
//! - filtered, projected scans over in-memory batches and their reader abstractions
//!
//! Key modules:
//! - [`scalar`]
//! - [`expressions`]
//! - [`scanner`]
//! - [`stream`]
//!
//! Feature flags:
//! - no crate-level flags; parallel evaluation is toggled per scan.

pub mod expressions;
pub mod scalar;
pub mod scanner;
pub mod stream;

// Re-export only what you want at the crate root (no globs).
pub use expressions::{
    ComputeExpr, ComputeFunction, PhysicalExpr, call, cast_exact, compile_expr,
    evaluate_predicate, field_ref, lit_bool, literal,
};
pub use scalar::ScalarValue;
pub use scanner::{DEFAULT_BATCH_SIZE, InMemoryDataset, Scanner, ScannerBuilder};
pub use stream::{ReaderAdapter, SendableRecordBatchReader, empty_reader};
