//! Stable C ABI for registering holders and driving scans from non-Rust engines.
//!
//! This module is enabled by the `ffi` feature and exports:
//! - bridge creation from defaults, key/value config or JSON config
//! - holder registration (callback pair + opaque context + statistics records)
//! - parquet registration and unregistration
//! - schema / cardinality / produce on a registered view
//!
//! Error handling contract:
//! - all fallible functions return [`ScanBridgeStatusCode`]
//! - optional `err_buf`/`err_buf_len` receives a UTF-8 message on failure
//! - success clears `err_buf` (empty string) when buffer is provided
//!
//! Filters cross the boundary as [`ScanBridgeFilter`] trees. Pointers inside a filter tree
//! handed to a holder stay valid for the duration of that produce callback only.

use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::Arc;

use arrow::ffi::FFI_ArrowSchema;
use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow_schema::Schema;
use scanbridge_common::{BridgeConfig, BridgeError, Result};
use scanbridge_planner::{FilterType, FilterWire, LogicalType, ProduceRequest, TableFilterSet, WireValue};
use scanbridge_storage::{
    ColumnStatistics, DataHolder, HolderRequest, HolderStream, RegisterOptions, ReleaseToken,
    SourceCapabilities, StatValue, TableStatistics,
};
use tracing::{debug, warn};

use crate::Bridge;

/// Nesting limit for filter trees read from C.
const MAX_FILTER_DEPTH: usize = 64;

struct BridgeHandle {
    bridge: Bridge,
}

/// Opaque C handle for a bridge session.
#[repr(C)]
pub struct ScanBridgeHandle {
    _private: [u8; 0],
}

/// Stable status code set for C ABI calls.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanBridgeStatusCode {
    /// Operation succeeded.
    Ok = 0,
    /// Unsupported type or filter shape.
    TranslationSkip = 1,
    /// Allocation failure.
    Allocation = 2,
    /// Null pointer, closed or unknown view, invalid schema.
    Contract = 3,
    /// Columnar library failure.
    External = 4,
    /// Invalid configuration or statistics record.
    InvalidConfig = 5,
    /// I/O failure.
    Io = 6,
    /// Panic or unknown internal failure.
    Internal = 7,
}

fn map_error(err: &BridgeError) -> ScanBridgeStatusCode {
    match err {
        BridgeError::TranslationSkip(_) => ScanBridgeStatusCode::TranslationSkip,
        BridgeError::Allocation(_) => ScanBridgeStatusCode::Allocation,
        BridgeError::Contract(_) => ScanBridgeStatusCode::Contract,
        BridgeError::External(_) | BridgeError::Arrow(_) => ScanBridgeStatusCode::External,
        BridgeError::InvalidConfig(_) => ScanBridgeStatusCode::InvalidConfig,
        BridgeError::Io(_) => ScanBridgeStatusCode::Io,
    }
}

/// Filter constant; `kind` selects the populated field (0 null, 1 bool, 2 int64, 3 double,
/// 4 string as `str_ptr`/`str_len`, not NUL-terminated).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeValue {
    pub kind: i32,
    pub bool_value: bool,
    pub int_value: i64,
    pub double_value: f64,
    pub str_ptr: *const c_char,
    pub str_len: usize,
}

/// Recursive filter record. `struct_child_index` is -1 when absent.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeFilter {
    pub filter_type: i32,
    pub comparison_type: i32,
    pub value: ScanBridgeValue,
    pub children: *const ScanBridgeFilter,
    pub n_children: usize,
    pub struct_child_index: i64,
    pub struct_child_filter: *const ScanBridgeFilter,
    pub in_values: *const ScanBridgeValue,
    pub n_in_values: usize,
}

/// Filter bound to one source column.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeColumnFilter {
    pub column_index: usize,
    pub column_name: *const c_char,
    pub filter: *const ScanBridgeFilter,
}

/// Projection and filters of one produce call.
///
/// Holders see zero columns only on the registration call that asks for the schema; every
/// scan names its columns. For `scanbridge_produce`, zero columns means every column.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeProduceParams {
    pub columns: *const *const c_char,
    pub n_columns: usize,
    pub filters: *const ScanBridgeColumnFilter,
    pub n_filters: usize,
}

impl ScanBridgeProduceParams {
    fn empty() -> Self {
        Self {
            columns: ptr::null(),
            n_columns: 0,
            filters: ptr::null(),
            n_filters: 0,
        }
    }
}

/// A holder's produce answer: the stream and an optional release token.
#[repr(C)]
pub struct ScanBridgeProduceResult {
    pub stream: FFI_ArrowArrayStream,
    pub release_token: *mut c_void,
}

/// Precomputed statistics for one column. `type_tag` is `'i'`, `'f'`, `'s'` or `'n'`
/// (no statistics); negative counts mean unknown.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeColumnStatsInput {
    pub column_index: i64,
    pub type_tag: c_char,
    pub null_count: i64,
    pub row_count: i64,
    pub min_int: i64,
    pub max_int: i64,
    pub min_double: f64,
    pub max_double: f64,
    pub max_string_length: i64,
    pub min_str: *const c_char,
    pub max_str: *const c_char,
}

/// Produces a stream for `params`; returns 0 on success.
pub type ScanBridgeProduceFn = unsafe extern "C" fn(
    context: *mut c_void,
    params: *const ScanBridgeProduceParams,
    out: *mut ScanBridgeProduceResult,
) -> i32;

/// Releases a token returned by a produce call.
pub type ScanBridgeReleaseTokenFn = unsafe extern "C" fn(context: *mut c_void, token: *mut c_void);

/// Releases the holder reference taken at registration.
pub type ScanBridgeReleaseHolderFn = unsafe extern "C" fn(context: *mut c_void);

/// External holder: callbacks plus the opaque context they receive.
///
/// `num_rows` is -1 when unknown. The context must be usable from any thread.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScanBridgeHolder {
    pub context: *mut c_void,
    pub produce: Option<ScanBridgeProduceFn>,
    pub release_token: Option<ScanBridgeReleaseTokenFn>,
    pub release_holder: Option<ScanBridgeReleaseHolderFn>,
    pub supports_views: bool,
    pub num_rows: i64,
}

#[derive(Clone, Copy)]
struct ForeignPtr(*mut c_void);

// SAFETY: registrants promise their context and tokens may be used from any thread.
unsafe impl Send for ForeignPtr {}
// SAFETY: see above.
unsafe impl Sync for ForeignPtr {}

impl ForeignPtr {
    fn get(self) -> *mut c_void {
        self.0
    }
}

/// [`DataHolder`] backed by C callbacks.
pub struct ForeignHolder {
    context: ForeignPtr,
    produce: ScanBridgeProduceFn,
    release_token: Option<ScanBridgeReleaseTokenFn>,
    supports_views: bool,
    num_rows: Option<u64>,
}

impl ForeignHolder {
    /// Takes over `holder`; the returned token releases the holder reference.
    pub fn from_c(holder: &ScanBridgeHolder) -> Result<(Self, ReleaseToken)> {
        let produce = holder
            .produce
            .ok_or_else(|| BridgeError::Contract("holder produce callback is null".to_string()))?;
        let context = ForeignPtr(holder.context);
        let holder_ref = match holder.release_holder {
            // SAFETY: the registrant handed over one holder reference to release.
            Some(release) => ReleaseToken::new(move || unsafe { release(context.get()) }),
            None => ReleaseToken::noop(),
        };
        Ok((
            Self {
                context,
                produce,
                release_token: holder.release_token,
                supports_views: holder.supports_views,
                num_rows: u64::try_from(holder.num_rows).ok(),
            },
            holder_ref,
        ))
    }

    fn token(&self, token: *mut c_void) -> Option<ReleaseToken> {
        if token.is_null() {
            return None;
        }
        let Some(release) = self.release_token else {
            warn!("holder returned a release token without a release callback");
            return None;
        };
        let context = self.context;
        let token = ForeignPtr(token);
        // SAFETY: each token returned by the holder is released exactly once.
        Some(ReleaseToken::new(move || unsafe {
            release(context.get(), token.get())
        }))
    }
}

impl DataHolder for ForeignHolder {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::holder(self.supports_views)
    }

    fn num_rows(&self) -> Option<u64> {
        self.num_rows
    }

    fn produce(&self, request: &HolderRequest) -> Result<HolderStream> {
        let mut arena = WireArena::default();
        let params = if request.is_schema_probe() {
            ScanBridgeProduceParams::empty()
        } else {
            arena.params(request)?
        };
        let mut out = ScanBridgeProduceResult {
            stream: FFI_ArrowArrayStream::empty(),
            release_token: ptr::null_mut(),
        };
        // SAFETY: params and every pointer inside it live in `arena` until after the call.
        let rc = unsafe { (self.produce)(self.context.get(), &params, &mut out) };
        drop(arena);
        let token = self.token(out.release_token);
        if rc != 0 {
            drop(token);
            return Err(BridgeError::External(format!(
                "holder produce callback returned {rc}"
            )));
        }
        Ok(HolderStream {
            stream: std::mem::replace(&mut out.stream, FFI_ArrowArrayStream::empty()),
            release_token: token,
        })
    }
}

/// Owns every allocation behind one C filter encoding.
#[derive(Default)]
struct WireArena {
    strings: Vec<String>,
    names: Vec<CString>,
    filters: Vec<Box<[ScanBridgeFilter]>>,
    values: Vec<Box<[ScanBridgeValue]>>,
    column_ptrs: Vec<*const c_char>,
    column_filters: Vec<ScanBridgeColumnFilter>,
}

impl WireArena {
    fn value(&mut self, value: &WireValue) -> ScanBridgeValue {
        let mut out = ScanBridgeValue {
            kind: value.kind_code(),
            bool_value: false,
            int_value: 0,
            double_value: 0.0,
            str_ptr: ptr::null(),
            str_len: 0,
        };
        match value {
            WireValue::Null => {}
            WireValue::Bool(v) => out.bool_value = *v,
            WireValue::Int64(v) => out.int_value = *v,
            WireValue::Double(v) => out.double_value = *v,
            WireValue::String(s) => {
                let s = s.clone();
                out.str_ptr = s.as_ptr().cast::<c_char>();
                out.str_len = s.len();
                self.strings.push(s);
            }
        }
        out
    }

    fn filter(&mut self, wire: &FilterWire) -> ScanBridgeFilter {
        let children: Box<[ScanBridgeFilter]> =
            wire.children.iter().map(|c| self.filter(c)).collect();
        let struct_child: Option<Box<[ScanBridgeFilter]>> = wire
            .struct_child_filter
            .as_ref()
            .map(|c| Box::new([self.filter(c)]) as Box<[ScanBridgeFilter]>);
        let in_values: Box<[ScanBridgeValue]> =
            wire.in_values.iter().map(|v| self.value(v)).collect();
        let out = ScanBridgeFilter {
            filter_type: wire.filter_type.code(),
            comparison_type: wire.comparison_type.unwrap_or(0),
            value: self.value(&wire.value),
            children: children.as_ptr(),
            n_children: children.len(),
            struct_child_index: wire.struct_child_index.map_or(-1, |i| i as i64),
            struct_child_filter: struct_child.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            in_values: in_values.as_ptr(),
            n_in_values: in_values.len(),
        };
        self.filters.push(children);
        self.filters.extend(struct_child);
        self.values.push(in_values);
        out
    }

    fn c_string(&mut self, s: &str) -> Result<*const c_char> {
        let c = CString::new(s)
            .map_err(|_| BridgeError::Contract(format!("name '{s}' contains a NUL byte")))?;
        let ptr = c.as_ptr();
        self.names.push(c);
        Ok(ptr)
    }

    fn params(&mut self, request: &HolderRequest) -> Result<ScanBridgeProduceParams> {
        for column in &request.projected_columns {
            let ptr = self.c_string(column)?;
            self.column_ptrs.push(ptr);
        }
        for f in &request.filters {
            let column_name = self.c_string(&f.column_name)?;
            let root: Box<[ScanBridgeFilter]> = Box::new([self.filter(&f.filter)]);
            self.column_filters.push(ScanBridgeColumnFilter {
                column_index: f.column_index,
                column_name,
                filter: root.as_ptr(),
            });
            self.filters.push(root);
        }
        Ok(ScanBridgeProduceParams {
            columns: self.column_ptrs.as_ptr(),
            n_columns: self.column_ptrs.len(),
            filters: self.column_filters.as_ptr(),
            n_filters: self.column_filters.len(),
        })
    }
}

unsafe fn slice_from<'a, T>(ptr: *const T, len: usize, field: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(BridgeError::Contract(format!("{field} pointer is null")));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Reads a filter constant.
///
/// # Safety
/// String payloads must point to `str_len` readable bytes.
pub unsafe fn read_value(value: &ScanBridgeValue) -> Result<WireValue> {
    Ok(match value.kind {
        0 => WireValue::Null,
        1 => WireValue::Bool(value.bool_value),
        2 => WireValue::Int64(value.int_value),
        3 => WireValue::Double(value.double_value),
        4 => {
            let bytes = slice_from(value.str_ptr.cast::<u8>(), value.str_len, "string value")?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| BridgeError::Contract(format!("string value is not UTF-8: {e}")))?;
            WireValue::String(s.to_string())
        }
        other => {
            return Err(BridgeError::Contract(format!("unknown value kind {other}")));
        }
    })
}

/// Reads a filter tree.
///
/// # Safety
/// `filter` and every pointer reachable from it must be valid for reads.
pub unsafe fn read_filter(filter: *const ScanBridgeFilter) -> Result<FilterWire> {
    read_filter_at(filter, 0)
}

unsafe fn read_filter_at(filter: *const ScanBridgeFilter, depth: usize) -> Result<FilterWire> {
    if filter.is_null() {
        return Err(BridgeError::Contract("filter pointer is null".to_string()));
    }
    if depth > MAX_FILTER_DEPTH {
        return Err(BridgeError::TranslationSkip(format!(
            "filter nesting deeper than {MAX_FILTER_DEPTH}"
        )));
    }
    let f = &*filter;
    let filter_type = FilterType::from_code(f.filter_type);
    let children = slice_from(f.children, f.n_children, "filter children")?
        .iter()
        .map(|c| read_filter_at(c, depth + 1))
        .collect::<Result<Vec<_>>>()?;
    let in_values = slice_from(f.in_values, f.n_in_values, "in-list values")?
        .iter()
        .map(|v| read_value(v))
        .collect::<Result<Vec<_>>>()?;
    let struct_child_filter = if f.struct_child_filter.is_null() {
        None
    } else {
        Some(Box::new(read_filter_at(f.struct_child_filter, depth + 1)?))
    };
    Ok(FilterWire {
        filter_type,
        comparison_type: (filter_type == FilterType::ConstantComparison)
            .then_some(f.comparison_type),
        value: read_value(&f.value)?,
        children,
        struct_child_index: usize::try_from(f.struct_child_index).ok(),
        struct_child_filter,
        in_values,
    })
}

unsafe fn read_name(ptr: *const c_char, field: &str) -> Result<String> {
    if ptr.is_null() {
        return Err(BridgeError::Contract(format!("{field} pointer is null")));
    }
    let raw = CStr::from_ptr(ptr);
    let val = raw
        .to_str()
        .map_err(|e| BridgeError::Contract(format!("{field} is not valid UTF-8: {e}")))?;
    Ok(val.to_string())
}

/// Builds a produce request for a view with `schema` from C params (null means full scan).
///
/// Filters that do not decode for their column's type are dropped, like any other filter
/// the bridge cannot push.
unsafe fn produce_request(
    schema: &Schema,
    params: *const ScanBridgeProduceParams,
) -> Result<ProduceRequest> {
    if params.is_null() {
        return Ok(ProduceRequest::new());
    }
    let p = &*params;
    let columns = slice_from(p.columns, p.n_columns, "columns")?
        .iter()
        .map(|c| read_name(*c, "column name"))
        .collect::<Result<Vec<_>>>()?;
    let mut filters = TableFilterSet::new();
    for cf in slice_from(p.filters, p.n_filters, "filters")? {
        let Some(field) = schema.fields().get(cf.column_index) else {
            warn!(column = cf.column_index, "filter column outside the schema dropped");
            continue;
        };
        let wire = read_filter(cf.filter)?;
        match wire.to_node(&LogicalType::from_arrow(field.data_type())) {
            Ok(node) => filters.push(cf.column_index, node),
            Err(e) if e.is_skip() => {
                debug!(column = %field.name(), error = %e, "C filter not decodable; dropped")
            }
            Err(e) => return Err(e),
        }
    }
    Ok(ProduceRequest::new()
        .with_projection(columns)
        .with_filters(filters))
}

/// Converts C statistics records into named-or-indexed table statistics.
///
/// # Safety
/// String bounds must be null or NUL-terminated.
pub unsafe fn stats_from_inputs(
    inputs: &[ScanBridgeColumnStatsInput],
) -> Result<Option<TableStatistics>> {
    if inputs.is_empty() {
        return Ok(None);
    }
    let mut stats = TableStatistics::new(None);
    for input in inputs {
        if stats.row_count.is_none() {
            stats.row_count = u64::try_from(input.row_count).ok();
        }
        let Ok(index) = usize::try_from(input.column_index) else {
            continue;
        };
        let (min, max) = match input.type_tag as u8 {
            b'i' => (StatValue::Int64(input.min_int), StatValue::Int64(input.max_int)),
            b'f' => (
                StatValue::Double(input.min_double),
                StatValue::Double(input.max_double),
            ),
            b's' => (
                read_optional_str(input.min_str)?,
                read_optional_str(input.max_str)?,
            ),
            b'n' => continue,
            other => {
                return Err(BridgeError::InvalidConfig(format!(
                    "unknown statistics type tag '{}'",
                    other as char
                )));
            }
        };
        let Ok(null_count) = u64::try_from(input.null_count) else {
            debug!(column = index, "statistics record without null count ignored");
            continue;
        };
        let mut column = ColumnStatistics::at_index(index)
            .with_bounds(min, max)
            .with_null_count(null_count);
        column.max_string_length = u64::try_from(input.max_string_length)
            .ok()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        stats.columns.push(column);
    }
    Ok(Some(stats))
}

unsafe fn read_optional_str(ptr: *const c_char) -> Result<StatValue> {
    if ptr.is_null() {
        return Ok(StatValue::Null);
    }
    read_name(ptr, "string bound").map(StatValue::String)
}

fn write_error(buf: *mut c_char, buf_len: usize, msg: &str) {
    if buf.is_null() || buf_len == 0 {
        return;
    }
    let bytes = msg.as_bytes();
    let to_copy = bytes.len().min(buf_len.saturating_sub(1));
    // SAFETY: caller provides a writable C buffer of size `buf_len`.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), to_copy);
        *buf.add(to_copy) = 0;
    }
}

fn clear_error(buf: *mut c_char, buf_len: usize) {
    if buf.is_null() || buf_len == 0 {
        return;
    }
    // SAFETY: caller provides a writable C buffer of size `buf_len`.
    unsafe {
        *buf = 0;
    }
}

fn with_unwind_guard<F>(err_buf: *mut c_char, err_buf_len: usize, f: F) -> ScanBridgeStatusCode
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            clear_error(err_buf, err_buf_len);
            ScanBridgeStatusCode::Ok
        }
        Ok(Err(err)) => {
            write_error(err_buf, err_buf_len, &err.to_string());
            map_error(&err)
        }
        Err(_) => {
            write_error(err_buf, err_buf_len, "panic crossed FFI boundary");
            ScanBridgeStatusCode::Internal
        }
    }
}

fn bridge_ref<'a>(bridge: *mut ScanBridgeHandle) -> Result<&'a Bridge> {
    if bridge.is_null() {
        return Err(BridgeError::Contract("bridge is null".to_string()));
    }
    // SAFETY: pointer validated non-null; caller promises a live handle from scanbridge_bridge_new_*.
    Ok(unsafe { &(*bridge.cast::<BridgeHandle>()).bridge })
}

fn store_bridge(config: BridgeConfig, out: *mut *mut ScanBridgeHandle) -> Result<()> {
    if out.is_null() {
        return Err(BridgeError::Contract("out_bridge is null".to_string()));
    }
    let handle = Box::new(BridgeHandle {
        bridge: Bridge::new(config)?,
    });
    // SAFETY: out was validated non-null above.
    unsafe {
        *out = Box::into_raw(handle).cast::<ScanBridgeHandle>();
    }
    Ok(())
}

fn options(replace: bool, deferred_release: i32) -> RegisterOptions {
    let mut options = RegisterOptions::default().replace(replace);
    if deferred_release >= 0 {
        options = options.deferred_release(deferred_release != 0);
    }
    options
}

/// Creates a bridge with configuration from defaults and `SCANBRIDGE_*` variables.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_bridge_new_default(
    out_bridge: *mut *mut ScanBridgeHandle,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        store_bridge(BridgeConfig::from_env()?, out_bridge)
    })
}

/// Creates a bridge from key/value config pairs (`key=value,key=value`).
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_bridge_new_from_config_kv(
    config_kv: *const c_char,
    out_bridge: *mut *mut ScanBridgeHandle,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        // SAFETY: caller promises a NUL-terminated string.
        let raw = unsafe { read_name(config_kv, "config_kv")? };
        let mut config = BridgeConfig::default();
        config.apply_kv(&raw)?;
        store_bridge(config, out_bridge)
    })
}

/// Creates a bridge from a JSON-encoded [`BridgeConfig`].
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_bridge_new_from_config_json(
    config_json: *const c_char,
    out_bridge: *mut *mut ScanBridgeHandle,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        // SAFETY: caller promises a NUL-terminated string.
        let raw = unsafe { read_name(config_json, "config_json")? };
        store_bridge(BridgeConfig::from_json(&raw)?, out_bridge)
    })
}

/// Closes every view and frees the bridge.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_bridge_free(bridge: *mut ScanBridgeHandle) {
    if bridge.is_null() {
        return;
    }
    // SAFETY: ownership is transferred back to Rust exactly once by caller.
    let boxed = unsafe { Box::from_raw(bridge.cast::<BridgeHandle>()) };
    boxed.bridge.close();
}

/// Registers a C holder under `view`.
///
/// The bridge takes over the holder reference: `release_holder` runs once when the view
/// is closed, or before returning if registration fails. `deferred_release` is -1 for the
/// session default, 0 or 1 to override it.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_register_holder(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    holder: *const ScanBridgeHolder,
    replace: bool,
    deferred_release: i32,
    stats: *const ScanBridgeColumnStatsInput,
    n_stats: usize,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        if holder.is_null() {
            return Err(BridgeError::Contract("holder is null".to_string()));
        }
        // SAFETY: pointer validated non-null above.
        let (holder, holder_ref) = ForeignHolder::from_c(unsafe { &*holder })?;
        // SAFETY: caller promises valid view and statistics pointers.
        let (view, statistics) = unsafe {
            (
                read_name(view, "view")?,
                stats_from_inputs(slice_from(stats, n_stats, "stats")?)?,
            )
        };
        let mut options = options(replace, deferred_release);
        options.statistics = statistics;
        bridge.register_holder(view, Arc::new(holder), holder_ref, options)?;
        Ok(())
    })
}

/// Loads a local parquet file and registers it under `view`.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_register_parquet(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    path: *const c_char,
    replace: bool,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        // SAFETY: caller promises NUL-terminated strings.
        let (view, path) = unsafe { (read_name(view, "view")?, read_name(path, "path")?) };
        bridge.register_parquet(view, path, options(replace, -1))?;
        Ok(())
    })
}

/// Unregisters `view`; `out_removed` (optional) tells whether a view was bound.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_unregister(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    out_removed: *mut bool,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        // SAFETY: caller promises a NUL-terminated string.
        let view = unsafe { read_name(view, "view")? };
        let removed = bridge.unregister_view(&view);
        if !out_removed.is_null() {
            // SAFETY: pointer checked for null.
            unsafe { *out_removed = removed };
        }
        Ok(())
    })
}

/// Writes the cached schema of `view` into `out_schema`; the caller releases it.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_get_schema(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    out_schema: *mut FFI_ArrowSchema,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        if out_schema.is_null() {
            return Err(BridgeError::Contract("out_schema is null".to_string()));
        }
        // SAFETY: caller promises a NUL-terminated string.
        let view = unsafe { read_name(view, "view")? };
        let schema = bridge.schema(&view)?;
        let ffi = FFI_ArrowSchema::try_from(schema.as_ref())
            .map_err(|e| BridgeError::External(format!("schema export failed: {e}")))?;
        // SAFETY: out_schema validated non-null; it receives ownership of the export.
        unsafe { ptr::write(out_schema, ffi) };
        Ok(())
    })
}

/// Writes the declared row count of `view`, or -1 when unknown.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_cardinality(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    out_rows: *mut i64,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        if out_rows.is_null() {
            return Err(BridgeError::Contract("out_rows is null".to_string()));
        }
        // SAFETY: caller promises a NUL-terminated string.
        let view = unsafe { read_name(view, "view")? };
        let rows = bridge
            .cardinality(&view)?
            .estimated_cardinality
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1);
        // SAFETY: out_rows validated non-null above.
        unsafe { *out_rows = rows };
        Ok(())
    })
}

/// Starts a projected, filtered scan of `view` and writes the stream to `out_stream`.
///
/// `params` may be null for a full scan. The caller owns and must release the stream.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_produce(
    bridge: *mut ScanBridgeHandle,
    view: *const c_char,
    params: *const ScanBridgeProduceParams,
    out_stream: *mut FFI_ArrowArrayStream,
    err_buf: *mut c_char,
    err_buf_len: usize,
) -> ScanBridgeStatusCode {
    with_unwind_guard(err_buf, err_buf_len, || {
        let bridge = bridge_ref(bridge)?;
        if out_stream.is_null() {
            return Err(BridgeError::Contract("out_stream is null".to_string()));
        }
        // SAFETY: caller promises a NUL-terminated view name.
        let view = unsafe { read_name(view, "view")? };
        let factory = bridge.factory(&view)?;
        // SAFETY: caller promises params is null or a valid filter layout.
        let request = unsafe { produce_request(factory.schema()?.as_ref(), params)? };
        let stream = factory.produce(&request)?;
        // SAFETY: out_stream validated non-null; it receives ownership of the stream.
        unsafe { ptr::write(out_stream, stream) };
        Ok(())
    })
}

/// Returns the status code symbolic name.
#[unsafe(no_mangle)]
pub extern "C" fn scanbridge_status_name(code: ScanBridgeStatusCode) -> *const c_char {
    static OK: &[u8] = b"OK\0";
    static TRANSLATION_SKIP: &[u8] = b"TRANSLATION_SKIP\0";
    static ALLOCATION: &[u8] = b"ALLOCATION\0";
    static CONTRACT: &[u8] = b"CONTRACT\0";
    static EXTERNAL: &[u8] = b"EXTERNAL\0";
    static INVALID_CONFIG: &[u8] = b"INVALID_CONFIG\0";
    static IO: &[u8] = b"IO\0";
    static INTERNAL: &[u8] = b"INTERNAL\0";
    match code {
        ScanBridgeStatusCode::Ok => OK.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::TranslationSkip => TRANSLATION_SKIP.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::Allocation => ALLOCATION.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::Contract => CONTRACT.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::External => EXTERNAL.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::InvalidConfig => INVALID_CONFIG.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::Io => IO.as_ptr().cast::<c_char>(),
        ScanBridgeStatusCode::Internal => INTERNAL.as_ptr().cast::<c_char>(),
    }
}

#[cfg(test)]
mod tests {
    use scanbridge_planner::{ComparisonOp, FilterNode, Value};
    use scanbridge_storage::HolderFilter;

    use super::*;

    #[test]
    fn nested_filters_survive_the_c_layout() {
        let node = FilterNode::And(vec![
            FilterNode::comparison(ComparisonOp::GreaterThan, Value::BigInt(50)),
            FilterNode::Or(vec![
                FilterNode::IsNull,
                FilterNode::InList(vec![
                    Value::Varchar("A".into()),
                    Value::Varchar("B".into()),
                ]),
            ]),
        ]);
        let wire = FilterWire::from_node(&node).expect("wire");
        let request = HolderRequest {
            projected_columns: vec!["id".to_string()],
            filters: vec![HolderFilter {
                column_index: 3,
                column_name: "id".to_string(),
                filter: wire.clone(),
            }],
            schema_probe: false,
        };
        let mut arena = WireArena::default();
        let params = arena.params(&request).expect("params");
        assert_eq!((params.n_columns, params.n_filters), (1, 1));
        // SAFETY: params points into the live arena.
        unsafe {
            let cf = &*params.filters;
            assert_eq!(cf.column_index, 3);
            assert_eq!(read_name(cf.column_name, "name").expect("name"), "id");
            assert_eq!(read_filter(cf.filter).expect("decode"), wire);
        }
    }

    #[test]
    fn statistics_records_map_by_tag() {
        let min = CString::new("apple").expect("cstr");
        let base = ScanBridgeColumnStatsInput {
            column_index: 0,
            type_tag: b'i' as c_char,
            null_count: 0,
            row_count: 100,
            min_int: 1,
            max_int: 100,
            min_double: 0.0,
            max_double: 0.0,
            max_string_length: -1,
            min_str: ptr::null(),
            max_str: ptr::null(),
        };
        let inputs = [
            base,
            ScanBridgeColumnStatsInput {
                column_index: 2,
                type_tag: b's' as c_char,
                null_count: 3,
                max_string_length: 5,
                min_str: min.as_ptr(),
                ..base
            },
            ScanBridgeColumnStatsInput {
                column_index: 1,
                type_tag: b'n' as c_char,
                ..base
            },
            ScanBridgeColumnStatsInput {
                column_index: -1,
                ..base
            },
        ];
        // SAFETY: string pointers are live CStrings or null.
        let stats = unsafe { stats_from_inputs(&inputs) }
            .expect("stats")
            .expect("some");
        assert_eq!(stats.row_count, Some(100));
        assert_eq!(stats.columns.len(), 2);
        let id = stats.column_at(0, "id").expect("id");
        assert_eq!(id.max, StatValue::Int64(100));
        let s = stats.column_at(2, "s").expect("s");
        assert_eq!(s.min, StatValue::String("apple".into()));
        assert_eq!(s.max, StatValue::Null);
        assert_eq!(s.max_string_length, Some(5));
        assert!(stats.column_at(1, "skipped").is_none());

        let bad = [ScanBridgeColumnStatsInput {
            type_tag: b'x' as c_char,
            ..base
        }];
        // SAFETY: no string pointers.
        assert!(unsafe { stats_from_inputs(&bad) }.is_err());
    }

    #[test]
    fn status_names_are_nul_terminated() {
        // SAFETY: static NUL-terminated strings.
        let name = unsafe { CStr::from_ptr(scanbridge_status_name(ScanBridgeStatusCode::Contract)) };
        assert_eq!(name.to_str().expect("utf8"), "CONTRACT");
        assert_eq!(
            map_error(&BridgeError::TranslationSkip("x".into())),
            ScanBridgeStatusCode::TranslationSkip
        );
    }
}
