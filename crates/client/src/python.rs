//! Python bindings for `scanbridge-client` via `pyo3`.
//!
//! Exposes `Bridge` with:
//! - `register_holder()` for Python holder objects implementing
//!   `produce_filtered(projected_columns, filters)`
//! - `register_parquet()` for local parquet files
//! - `scan()` returning a `pyarrow.RecordBatchReader`
//!
//! Holders receive `None, None` once at registration and may answer with an empty stream
//! carrying the schema. Every scan after that passes the full list of column names and a
//! (possibly empty) filter dict. Filters reach holders as `{column_index: filter_dict}` where each
//! dict has the keys `type`, `comparison`, `value`, `children`, `child_idx`, `child_filter`
//! and `values`. The GIL is taken only around calls into the holder and released while the
//! bridge runs.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow::pyarrow::{FromPyArrow, PyArrowType};
use arrow::record_batch::RecordBatchReader;
use scanbridge_common::{BridgeConfig, BridgeError};
use scanbridge_planner::{FilterWire, WireValue};
use scanbridge_storage::{
    DataHolder, HolderRequest, HolderStream, RegisterOptions, ReleaseToken, SourceCapabilities,
    TableStatistics,
};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyCapsule, PyDict, PyList, PyModule};

use crate::{Bridge, request_from_json};

fn map_bridge_err(err: BridgeError) -> PyErr {
    match err {
        BridgeError::InvalidConfig(m) => PyValueError::new_err(format!("invalid config: {m}")),
        BridgeError::TranslationSkip(m) => PyValueError::new_err(format!("unsupported: {m}")),
        BridgeError::Contract(m) => PyRuntimeError::new_err(format!("contract violation: {m}")),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn value_to_py(py: Python<'_>, value: &WireValue) -> PyObject {
    match value {
        WireValue::Null => py.None(),
        WireValue::Bool(v) => v.to_object(py),
        WireValue::Int64(v) => v.to_object(py),
        WireValue::Double(v) => v.to_object(py),
        WireValue::String(v) => v.to_object(py),
    }
}

fn filter_to_py<'py>(py: Python<'py>, wire: &FilterWire) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("type", wire.filter_type.code())?;
    if let Some(code) = wire.comparison_type {
        dict.set_item("comparison", code)?;
    }
    dict.set_item("value", value_to_py(py, &wire.value))?;
    if !wire.children.is_empty() {
        let children = wire
            .children
            .iter()
            .map(|c| filter_to_py(py, c))
            .collect::<PyResult<Vec<_>>>()?;
        dict.set_item("children", PyList::new_bound(py, children))?;
    }
    if let Some(index) = wire.struct_child_index {
        dict.set_item("child_idx", index)?;
    }
    if let Some(child) = &wire.struct_child_filter {
        dict.set_item("child_filter", filter_to_py(py, child)?)?;
    }
    if !wire.in_values.is_empty() {
        let values: Vec<PyObject> = wire.in_values.iter().map(|v| value_to_py(py, v)).collect();
        dict.set_item("values", PyList::new_bound(py, values))?;
    }
    Ok(dict)
}

/// Takes a C stream out of a capsule or any object exporting `__arrow_c_stream__`.
fn stream_from_py(obj: &Bound<'_, PyAny>) -> PyResult<FFI_ArrowArrayStream> {
    if let Ok(capsule) = obj.downcast::<PyCapsule>() {
        if capsule.name()? != Some(c"arrow_array_stream") {
            return Err(PyValueError::new_err(
                "holder returned a capsule that is not an arrow_array_stream",
            ));
        }
        let ptr = capsule.pointer().cast::<FFI_ArrowArrayStream>();
        // SAFETY: the capsule holds a C stream; from_raw moves it out and leaves a released
        // struct behind for the capsule destructor.
        return Ok(unsafe { FFI_ArrowArrayStream::from_raw(ptr) });
    }
    let reader = ArrowArrayStreamReader::from_pyarrow_bound(obj)?;
    Ok(FFI_ArrowArrayStream::new(Box::new(reader)))
}

/// Holder backed by a Python object.
struct PyHolder {
    obj: Py<PyAny>,
    supports_views: bool,
    num_rows: Option<u64>,
}

impl PyHolder {
    fn new(obj: &Bound<'_, PyAny>) -> PyResult<Self> {
        let supports_views = if obj.hasattr("supports_views")? {
            obj.getattr("supports_views")?.extract()?
        } else {
            false
        };
        let num_rows = if obj.hasattr("num_rows")? {
            obj.getattr("num_rows")?.extract::<Option<u64>>()?
        } else {
            None
        };
        Ok(Self {
            obj: obj.clone().unbind(),
            supports_views,
            num_rows,
        })
    }

    fn produce_py(&self, py: Python<'_>, request: &HolderRequest) -> PyResult<HolderStream> {
        let (columns, filters) = if request.is_schema_probe() {
            (py.None(), py.None())
        } else {
            let columns = PyList::new_bound(py, &request.projected_columns).into_py(py);
            let filters = PyDict::new_bound(py);
            for f in &request.filters {
                filters.set_item(f.column_index, filter_to_py(py, &f.filter)?)?;
            }
            (columns, filters.into_py(py))
        };
        let out = self
            .obj
            .bind(py)
            .call_method1("produce_filtered", (columns, filters))?;
        let stream = stream_from_py(&out)?;
        // The stream may point into the returned object's memory.
        let keep = out.unbind();
        let release_token = ReleaseToken::new(move || Python::with_gil(|_| drop(keep)));
        Ok(HolderStream {
            stream,
            release_token: Some(release_token),
        })
    }
}

impl DataHolder for PyHolder {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::holder(self.supports_views)
    }

    fn num_rows(&self) -> Option<u64> {
        self.num_rows
    }

    fn produce(&self, request: &HolderRequest) -> scanbridge_common::Result<HolderStream> {
        Python::with_gil(|py| self.produce_py(py, request))
            .map_err(|e| BridgeError::External(format!("python holder produce failed: {e}")))
    }
}

fn register_options(
    replace: bool,
    deferred_release: Option<bool>,
    statistics_json: Option<&str>,
) -> PyResult<RegisterOptions> {
    let mut options = RegisterOptions::default().replace(replace);
    options.deferred_release = deferred_release;
    if let Some(raw) = statistics_json {
        options.statistics = Some(TableStatistics::from_json(raw).map_err(map_bridge_err)?);
    }
    Ok(options)
}

#[pyclass(name = "Bridge")]
struct PyBridge {
    inner: Bridge,
}

#[pymethods]
impl PyBridge {
    #[new]
    #[pyo3(signature = (config_json=None, config=None))]
    fn new(config_json: Option<&str>, config: Option<HashMap<String, String>>) -> PyResult<Self> {
        let mut cfg = match config_json {
            Some(raw) => BridgeConfig::from_json(raw).map_err(map_bridge_err)?,
            None => BridgeConfig::from_env().map_err(map_bridge_err)?,
        };
        for (key, value) in config.unwrap_or_default() {
            cfg.set(&key, &value).map_err(map_bridge_err)?;
        }
        let inner = Bridge::new(cfg).map_err(map_bridge_err)?;
        Ok(Self { inner })
    }

    /// Registers a holder object; returns the factory id.
    #[pyo3(signature = (view, holder, replace=false, deferred_release=None, statistics_json=None))]
    fn register_holder(
        &self,
        py: Python<'_>,
        view: String,
        holder: &Bound<'_, PyAny>,
        replace: bool,
        deferred_release: Option<bool>,
        statistics_json: Option<&str>,
    ) -> PyResult<u64> {
        let options = register_options(replace, deferred_release, statistics_json)?;
        let py_holder = Arc::new(PyHolder::new(holder)?);
        let reference = holder.clone().unbind();
        let holder_ref = ReleaseToken::new(move || Python::with_gil(|_| drop(reference)));
        let handle = py
            .allow_threads(|| {
                self.inner
                    .register_holder(view, py_holder, holder_ref, options)
            })
            .map_err(map_bridge_err)?;
        Ok(handle.id.0)
    }

    #[pyo3(signature = (view, path, replace=false, statistics_json=None))]
    fn register_parquet(
        &self,
        py: Python<'_>,
        view: String,
        path: String,
        replace: bool,
        statistics_json: Option<&str>,
    ) -> PyResult<u64> {
        let options = register_options(replace, None, statistics_json)?;
        let handle = py
            .allow_threads(|| self.inner.register_parquet(view, path, options))
            .map_err(map_bridge_err)?;
        Ok(handle.id.0)
    }

    fn unregister(&self, py: Python<'_>, view: &str) -> bool {
        py.allow_threads(|| self.inner.unregister_view(view))
    }

    fn views(&self) -> Vec<String> {
        self.inner.views()
    }

    fn cardinality(&self, view: &str) -> PyResult<Option<u64>> {
        Ok(self
            .inner
            .cardinality(view)
            .map_err(map_bridge_err)?
            .estimated_cardinality)
    }

    /// Scans `view`; `filters_json` maps column names to filter wire records.
    #[pyo3(signature = (view, columns=None, filters_json=None))]
    fn scan(
        &self,
        py: Python<'_>,
        view: &str,
        columns: Option<Vec<String>>,
        filters_json: Option<&str>,
    ) -> PyResult<PyObject> {
        let reader = py
            .allow_threads(|| {
                let schema = self.inner.schema(view)?;
                let request =
                    request_from_json(&schema, &columns.unwrap_or_default(), filters_json)?;
                self.inner.scan(view, &request)
            })
            .map_err(map_bridge_err)?;
        let boxed: Box<dyn RecordBatchReader + Send> = Box::new(reader);
        Ok(PyArrowType(boxed).into_py(py))
    }

    fn prometheus_metrics(&self) -> String {
        self.inner.prometheus_metrics()
    }

    fn close(&self, py: Python<'_>) {
        py.allow_threads(|| self.inner.close());
    }
}

/// Python extension module entrypoint.
#[pymodule]
fn _native(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyBridge>()?;
    Ok(())
}
