use arrow_schema::ArrowError;
use thiserror::Error;

/// Canonical scanbridge error taxonomy used across crates.
///
/// Classification guidance:
/// - [`BridgeError::TranslationSkip`]: a filter or statistics request the bridge cannot
///   express for this column type; callers degrade to "no filter" / "no statistics"
/// - [`BridgeError::Allocation`]: explicit allocation failure while building statistics records
/// - [`BridgeError::Contract`]: caller broke the calling contract (null pointers, closed
///   factory, zero-column schema, duplicate view name)
/// - [`BridgeError::External`]: the columnar library failed to build, evaluate or export a scan
/// - [`BridgeError::InvalidConfig`]: config/env/key-value option violations
/// - [`BridgeError::Io`] / [`BridgeError::Arrow`]: transparent wrappers
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unsupported-but-benign request. Never fails a query.
    ///
    /// Examples:
    /// - comparison against a nested-type constant
    /// - in-list containing a null element
    /// - filter on a column outside the source's pushdown capabilities
    #[error("translation skipped: {0}")]
    TranslationSkip(String),

    /// Allocation failure while materialising statistics records.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// Contract violations by the caller. Fatal to the specific call.
    ///
    /// Examples:
    /// - null handle or output pointer across the C ABI
    /// - any operation on a closed factory
    /// - registering a source whose schema has no columns
    #[error("contract violation: {0}")]
    Contract(String),

    /// Scan build, kernel evaluation or export failure in the columnar library.
    ///
    /// Surfaced as a scan failure for the current query; the factory stays usable.
    #[error("external library failure: {0}")]
    External(String),

    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transparent arrow failures not already classified by the caller.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl BridgeError {
    /// True when the caller should degrade instead of failing.
    pub fn is_skip(&self) -> bool {
        matches!(self, BridgeError::TranslationSkip(_))
    }
}

/// Standard scanbridge result alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
