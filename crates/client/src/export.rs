//! Structural export of an in-memory chunk matrix through the Arrow C data interface.
//!
//! A [`ChunkMatrix`] holds `columns x chunks` primitive arrays. Exporting chunk `i` builds a
//! struct-typed C array whose children point straight into the matrix buffers. Child release
//! callbacks are idempotent; the parent release runs every child release that the consumer
//! has not run yet, frees the child structs and then drops its reference to the matrix.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::buffer::Buffer;
use arrow::ffi::FFI_ArrowSchema;
use arrow_schema::{DataType, Fields, SchemaRef};
use scanbridge_common::{BridgeError, Result};

/// The Arrow C data interface `ArrowArray` struct.
#[repr(C)]
#[derive(Debug)]
pub struct RawArrowArray {
    pub length: i64,
    pub null_count: i64,
    pub offset: i64,
    pub n_buffers: i64,
    pub n_children: i64,
    pub buffers: *mut *const c_void,
    pub children: *mut *mut RawArrowArray,
    pub dictionary: *mut RawArrowArray,
    pub release: Option<unsafe extern "C" fn(*mut RawArrowArray)>,
    pub private_data: *mut c_void,
}

impl RawArrowArray {
    fn released() -> Self {
        Self {
            length: 0,
            null_count: 0,
            offset: 0,
            n_buffers: 0,
            n_children: 0,
            buffers: ptr::null_mut(),
            children: ptr::null_mut(),
            dictionary: ptr::null_mut(),
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for RawArrowArray {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            // SAFETY: `self` is a live array produced by this module; release is idempotent.
            unsafe { release(self) };
        }
    }
}

struct ChildPrivate {
    buffers: Vec<*const c_void>,
    _owned: Vec<Buffer>,
}

struct ParentPrivate {
    buffers: Vec<*const c_void>,
    children: Vec<*mut RawArrowArray>,
    _matrix: Arc<ChunkMatrix>,
}

/// Primitive column chunks sharing one schema, addressed by chunk index.
#[derive(Debug)]
pub struct ChunkMatrix {
    schema: SchemaRef,
    columns: Vec<Vec<ArrayRef>>,
}

impl ChunkMatrix {
    /// Builds a matrix from per-column chunk lists.
    ///
    /// # Errors
    /// Every column needs the same number of chunks, chunk `i` the same length in every
    /// column, and a fixed-width primitive type matching the schema.
    pub fn try_new(schema: SchemaRef, columns: Vec<Vec<ArrayRef>>) -> Result<Arc<Self>> {
        if columns.len() != schema.fields().len() {
            return Err(BridgeError::Contract(format!(
                "chunk matrix has {} columns, schema has {}",
                columns.len(),
                schema.fields().len()
            )));
        }
        let num_chunks = columns.first().map_or(0, Vec::len);
        for (field, chunks) in schema.fields().iter().zip(&columns) {
            if !field.data_type().is_primitive() {
                return Err(BridgeError::TranslationSkip(format!(
                    "column '{}' of type {} cannot be exported structurally",
                    field.name(),
                    field.data_type()
                )));
            }
            if chunks.len() != num_chunks {
                return Err(BridgeError::Contract(format!(
                    "column '{}' has {} chunks, expected {num_chunks}",
                    field.name(),
                    chunks.len()
                )));
            }
            if let Some(chunk) = chunks.iter().find(|c| c.data_type() != field.data_type()) {
                return Err(BridgeError::Contract(format!(
                    "column '{}' chunk of type {} does not match {}",
                    field.name(),
                    chunk.data_type(),
                    field.data_type()
                )));
            }
        }
        for chunk in 0..num_chunks {
            let len = columns[0][chunk].len();
            if columns.iter().any(|c| c[chunk].len() != len) {
                return Err(BridgeError::Contract(format!(
                    "chunk {chunk} has columns of different lengths"
                )));
            }
        }
        Ok(Arc::new(Self { schema, columns }))
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_chunks(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn chunk_len(&self, chunk: usize) -> Option<usize> {
        self.columns.first()?.get(chunk).map(|a| a.len())
    }

    /// C schema of an exported chunk: a struct whose children are the columns.
    pub fn export_schema(&self) -> Result<FFI_ArrowSchema> {
        let dt = DataType::Struct(Fields::from(self.schema.fields().to_vec()));
        FFI_ArrowSchema::try_from(&dt)
            .map_err(|e| BridgeError::External(format!("schema export failed: {e}")))
    }

    /// Exports chunk `chunk` as a struct array borrowing the matrix buffers.
    pub fn export_chunk(self: &Arc<Self>, chunk: usize) -> Result<RawArrowArray> {
        let length = self.chunk_len(chunk).ok_or_else(|| {
            BridgeError::Contract(format!(
                "chunk {chunk} out of range ({} chunks)",
                self.num_chunks()
            ))
        })?;
        let children: Vec<*mut RawArrowArray> = self
            .columns
            .iter()
            .map(|column| Box::into_raw(Box::new(export_child(&column[chunk]))))
            .collect();

        let mut private = Box::new(ParentPrivate {
            buffers: vec![ptr::null()],
            children,
            _matrix: Arc::clone(self),
        });
        let array = RawArrowArray {
            length: length as i64,
            null_count: 0,
            offset: 0,
            n_buffers: 1,
            n_children: private.children.len() as i64,
            buffers: private.buffers.as_mut_ptr(),
            children: private.children.as_mut_ptr(),
            dictionary: ptr::null_mut(),
            release: Some(release_parent),
            private_data: Box::into_raw(private).cast::<c_void>(),
        };
        Ok(array)
    }
}

fn export_child(array: &ArrayRef) -> RawArrowArray {
    let data = array.to_data();
    let mut owned = Vec::with_capacity(2);
    // Both buffers are re-based so the exported offset is always zero.
    let validity = match data.nulls() {
        Some(nulls) if nulls.null_count() > 0 => {
            let bits = nulls.inner().sliced();
            let ptr = bits.as_ptr().cast::<c_void>();
            owned.push(bits);
            ptr
        }
        _ => ptr::null(),
    };
    let width = data.data_type().primitive_width().unwrap_or(0);
    let values = data.buffers()[0].slice_with_length(data.offset() * width, data.len() * width);
    let values_ptr = values.as_ptr().cast::<c_void>();
    owned.push(values);

    let mut private = Box::new(ChildPrivate {
        buffers: vec![validity, values_ptr],
        _owned: owned,
    });
    RawArrowArray {
        length: data.len() as i64,
        null_count: data.null_count() as i64,
        offset: 0,
        n_buffers: 2,
        n_children: 0,
        buffers: private.buffers.as_mut_ptr(),
        children: ptr::null_mut(),
        dictionary: ptr::null_mut(),
        release: Some(release_child),
        private_data: Box::into_raw(private).cast::<c_void>(),
    }
}

/// Releases one exported column; a second call is a no-op.
unsafe extern "C" fn release_child(array: *mut RawArrowArray) {
    if array.is_null() || (*array).release.is_none() {
        return;
    }
    let private = (*array).private_data.cast::<ChildPrivate>();
    if !private.is_null() {
        drop(Box::from_raw(private));
    }
    ptr::write(array, RawArrowArray::released());
}

/// Releases every child still owned by the parent, then the parent's hold on the matrix.
unsafe extern "C" fn release_parent(array: *mut RawArrowArray) {
    if array.is_null() || (*array).release.is_none() {
        return;
    }
    let private = Box::from_raw((*array).private_data.cast::<ParentPrivate>());
    for &child in &private.children {
        if child.is_null() {
            continue;
        }
        if let Some(release) = (*child).release {
            release(child);
        }
        // Already released; dropping the box runs no callback.
        drop(Box::from_raw(child));
    }
    drop(private);
    ptr::write(array, RawArrowArray::released());
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float64Array, Int32Array, StructArray};
    use arrow::ffi::{FFI_ArrowArray, from_ffi};
    use arrow_schema::{Field, Schema};

    use super::*;

    fn matrix() -> Arc<ChunkMatrix> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Float64, false),
        ]));
        ChunkMatrix::try_new(
            schema,
            vec![
                vec![
                    Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as ArrayRef,
                    Arc::new(Int32Array::from(vec![4, 5])) as ArrayRef,
                ],
                vec![
                    Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5])) as ArrayRef,
                    Arc::new(Float64Array::from(vec![3.5, 4.5])) as ArrayRef,
                ],
            ],
        )
        .expect("matrix")
    }

    #[test]
    fn exported_chunks_import_as_struct_arrays() {
        let m = matrix();
        let mut raw = m.export_chunk(0).expect("export");
        let schema = m.export_schema().expect("schema");
        // SAFETY: `raw` follows the C data interface layout of FFI_ArrowArray.
        let ffi = unsafe { FFI_ArrowArray::from_raw((&mut raw as *mut RawArrowArray).cast()) };
        assert!(raw.is_released());
        // SAFETY: array and schema come from the same export.
        let data = unsafe { from_ffi(ffi, &schema) }.expect("import");
        let arr = StructArray::from(data);
        assert_eq!(arr.len(), 3);
        let a = arr.column(0).as_any().downcast_ref::<Int32Array>().expect("a");
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![Some(1), None, Some(3)]);
        let b = arr.column(1).as_any().downcast_ref::<Float64Array>().expect("b");
        assert_eq!(b.value(2), 2.5);
    }

    #[test]
    fn child_release_is_idempotent_and_parent_cascades() {
        let m = matrix();
        let mut raw = m.export_chunk(1).expect("export");
        assert_eq!(Arc::strong_count(&m), 2);
        // SAFETY: children were produced by export_chunk and are still owned by `raw`.
        unsafe {
            let first = *raw.children;
            let release = (*first).release.expect("live child");
            release(first);
            release(first);
            assert!((*first).is_released());
            assert!(!(**raw.children.add(1)).is_released());
        }
        let release = raw.release.expect("live parent");
        // SAFETY: parent is live; children are released or still owned.
        unsafe { release(&mut raw) };
        assert!(raw.is_released());
        assert_eq!(Arc::strong_count(&m), 1);
    }

    #[test]
    fn dropping_an_unconsumed_export_releases_it() {
        let m = matrix();
        drop(m.export_chunk(0).expect("export"));
        assert_eq!(Arc::strong_count(&m), 1);
        assert!(m.export_chunk(2).is_err());
    }

    #[test]
    fn ragged_matrices_are_rejected() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]));
        let err = ChunkMatrix::try_new(
            schema,
            vec![
                vec![Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef],
                vec![Arc::new(Int32Array::from(vec![1])) as ArrayRef],
            ],
        )
        .expect_err("ragged");
        assert!(err.to_string().contains("different lengths"));
    }
}
