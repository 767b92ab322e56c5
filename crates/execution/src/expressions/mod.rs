//! Expression compilation and evaluation for scans.
//!
//! Input contract:
//! - a [`ComputeExpr`] whose field references name top-level columns of the scanned schema;
//! - literals should already carry the column's type; mismatches are cast only when the
//!   cast is exact, anything that would lose precision is an error.
//!
//! Output contract:
//! - each evaluation returns an `ArrayRef` aligned to input batch row count.

mod compute;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Datum, Scalar, make_array};
use arrow::buffer::{BooleanBuffer, NullBuffer};
use arrow::compute::kernels::{
    boolean::{and_kleene, not, or_kleene},
    cast::{CastOptions, cast_with_options},
    cmp::{eq, gt, gt_eq, lt, lt_eq, neq, not_distinct},
};
use arrow::compute::{is_not_null, is_null};
use arrow::datatypes::{Float16Type, Float32Type, Float64Type};
use arrow::record_batch::RecordBatch;
use arrow_schema::{ArrowError, DataType, SchemaRef};
use scanbridge_common::{BridgeError, Result};

pub use compute::{ComputeExpr, ComputeFunction, call, field_ref, lit_bool, literal};

use crate::scalar::ScalarValue;

/// Executable expression.
///
/// - translators produce [`ComputeExpr`] trees
/// - [`compile_expr`] binds them to a schema once per scan
/// - evaluation returns an Arrow `ArrayRef` aligned with the input `RecordBatch` length
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for every row in `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
    /// Constant value, when the expression does not depend on the batch.
    fn as_literal(&self) -> Option<&ScalarValue> {
        None
    }
}

/// Compile a compute expression against `input_schema`.
pub fn compile_expr(
    expr: &ComputeExpr,
    input_schema: &SchemaRef,
) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        ComputeExpr::Field(name) => {
            let index = input_schema.index_of(name).map_err(|_| {
                BridgeError::Contract(format!("unknown column in filter expression: {name}"))
            })?;
            let dt = input_schema.field(index).data_type().clone();
            Ok(Arc::new(ColumnExpr { index, dt }))
        }
        ComputeExpr::Literal(v) => Ok(Arc::new(LiteralExpr { v: v.clone() })),
        ComputeExpr::Call { function, args } => {
            if args.len() != function.arity() {
                return Err(BridgeError::Contract(format!(
                    "{} expects {} argument(s), got {}",
                    function.name(),
                    function.arity(),
                    args.len()
                )));
            }
            let mut compiled = args
                .iter()
                .map(|a| compile_expr(a, input_schema))
                .collect::<Result<Vec<_>>>()?;
            let inner = compiled.remove(0);
            let physical: Arc<dyn PhysicalExpr> = match function {
                ComputeFunction::Equal => cmp_expr(CmpOp::Eq, inner, compiled.remove(0)),
                ComputeFunction::NotEqual => cmp_expr(CmpOp::NotEq, inner, compiled.remove(0)),
                ComputeFunction::Less => cmp_expr(CmpOp::Lt, inner, compiled.remove(0)),
                ComputeFunction::LessEqual => cmp_expr(CmpOp::LtEq, inner, compiled.remove(0)),
                ComputeFunction::Greater => cmp_expr(CmpOp::Gt, inner, compiled.remove(0)),
                ComputeFunction::GreaterEqual => cmp_expr(CmpOp::GtEq, inner, compiled.remove(0)),
                ComputeFunction::AndKleene => Arc::new(BoolBinaryExpr {
                    left: inner,
                    right: compiled.remove(0),
                    op: BoolOp::And,
                }),
                ComputeFunction::OrKleene => Arc::new(BoolBinaryExpr {
                    left: inner,
                    right: compiled.remove(0),
                    op: BoolOp::Or,
                }),
                ComputeFunction::Invert => Arc::new(NotExpr { inner }),
                ComputeFunction::IsNan => Arc::new(IsNanExpr { inner }),
                ComputeFunction::IsNull => Arc::new(ValidityExpr {
                    inner,
                    want_null: true,
                }),
                ComputeFunction::IsValid => Arc::new(ValidityExpr {
                    inner,
                    want_null: false,
                }),
                ComputeFunction::StructField(index) => {
                    let DataType::Struct(fields) = inner.data_type() else {
                        return Err(BridgeError::Contract(format!(
                            "struct_field on non-struct type {}",
                            inner.data_type()
                        )));
                    };
                    let field = fields.get(*index).ok_or_else(|| {
                        BridgeError::Contract(format!(
                            "struct_field index {index} out of range for {} children",
                            fields.len()
                        ))
                    })?;
                    Arc::new(StructFieldExpr {
                        inner,
                        index: *index,
                        dt: field.data_type().clone(),
                    })
                }
            };
            Ok(physical)
        }
    }
}

/// Evaluates a predicate into a selection mask. Nulls select nothing downstream.
pub fn evaluate_predicate(expr: &dyn PhysicalExpr, batch: &RecordBatch) -> Result<BooleanArray> {
    let out = expr.evaluate(batch)?;
    out.as_boolean_opt().cloned().ok_or_else(|| {
        BridgeError::External(format!(
            "filter expression must be boolean, got {}",
            out.data_type()
        ))
    })
}

// =====================
// Standard expressions
// =====================

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        Ok(batch.column(self.index).clone())
    }
}

struct LiteralExpr {
    v: ScalarValue,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.v.data_type()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        self.v.to_array_of_size(batch.num_rows())
    }

    fn as_literal(&self) -> Option<&ScalarValue> {
        Some(&self.v)
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let b = arr
            .as_boolean_opt()
            .ok_or_else(|| BridgeError::External("invert expects boolean".to_string()))?;

        let out = not(b).map_err(|e| BridgeError::External(format!("invert failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

#[derive(Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;

        let lb = l.as_boolean_opt().ok_or_else(|| {
            BridgeError::External("and_kleene/or_kleene expects boolean".to_string())
        })?;
        let rb = r.as_boolean_opt().ok_or_else(|| {
            BridgeError::External("and_kleene/or_kleene expects boolean".to_string())
        })?;

        let out = match self.op {
            BoolOp::And => and_kleene(lb, rb),
            BoolOp::Or => or_kleene(lb, rb),
        }
        .map_err(|e| BridgeError::External(format!("boolean kernel failed: {e}")))?;

        Ok(Arc::new(out))
    }
}

struct IsNanExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for IsNanExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let out = match arr.data_type() {
            DataType::Float64 => {
                BooleanArray::from_unary(arr.as_primitive::<Float64Type>(), |v| v.is_nan())
            }
            DataType::Float32 => {
                BooleanArray::from_unary(arr.as_primitive::<Float32Type>(), |v| v.is_nan())
            }
            DataType::Float16 => {
                BooleanArray::from_unary(arr.as_primitive::<Float16Type>(), |v| v.is_nan())
            }
            // Non-floating values are never NaN.
            _ => BooleanArray::new(BooleanBuffer::new_unset(arr.len()), arr.nulls().cloned()),
        };
        Ok(Arc::new(out))
    }
}

struct ValidityExpr {
    inner: Arc<dyn PhysicalExpr>,
    want_null: bool,
}

impl PhysicalExpr for ValidityExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let out = if self.want_null {
            is_null(&arr)
        } else {
            is_not_null(&arr)
        }
        .map_err(|e| BridgeError::External(format!("validity kernel failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

struct StructFieldExpr {
    inner: Arc<dyn PhysicalExpr>,
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for StructFieldExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let parent = arr
            .as_struct_opt()
            .ok_or_else(|| BridgeError::External("struct_field expects a struct".to_string()))?;
        let child = parent.column(self.index).clone();
        if parent.null_count() == 0 {
            return Ok(child);
        }
        // A null parent row makes the child null as well.
        let nulls = NullBuffer::union(parent.nulls(), child.nulls());
        let data = child
            .to_data()
            .into_builder()
            .nulls(nulls)
            .build()
            .map_err(|e| BridgeError::External(format!("struct_field failed: {e}")))?;
        Ok(make_array(data))
    }
}

#[derive(Clone, Copy, Debug)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn flip(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::NotEq => CmpOp::NotEq,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
        }
    }
}

struct CmpExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: CmpOp,
}

/// Keeps a literal operand on the right so it can be compared as a scalar datum.
fn cmp_expr(
    op: CmpOp,
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
) -> Arc<dyn PhysicalExpr> {
    if left.as_literal().is_some() && right.as_literal().is_none() {
        Arc::new(CmpExpr {
            left: right,
            right: left,
            op: op.flip(),
        })
    } else {
        Arc::new(CmpExpr { left, right, op })
    }
}

impl PhysicalExpr for CmpExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let target = l.data_type().clone();
        let out = match self.right.as_literal() {
            Some(v) => {
                let r = coerce(v.to_array_of_size(1)?, &target)?;
                eval_cmp(self.op, &l, &Scalar::new(r))?
            }
            None => {
                let r = coerce(self.right.evaluate(batch)?, &target)?;
                eval_cmp(self.op, &l, &r)?
            }
        };
        Ok(Arc::new(out))
    }
}

fn coerce(arr: ArrayRef, target: &DataType) -> Result<ArrayRef> {
    cast_exact(&arr, target).map_err(|e| {
        BridgeError::External(format!(
            "cannot compare {} with {target}: {e}",
            arr.data_type()
        ))
    })
}

/// Casts `arr` to `target` only if every value survives the cast unchanged.
///
/// The cast result is cast back and compared with the input (nulls and NaNs compare equal to
/// themselves). Overflow, truncated fractions, dropped sub-units of time and rounded decimal
/// digits all fail.
pub fn cast_exact(
    arr: &ArrayRef,
    target: &DataType,
) -> std::result::Result<ArrayRef, ArrowError> {
    if arr.data_type() == target {
        return Ok(arr.clone());
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let cast = cast_with_options(arr, target, &options)?;
    let back = cast_with_options(&cast, arr.data_type(), &options)?;
    let same = not_distinct(&back, arr)?;
    if same.true_count() != same.len() {
        return Err(ArrowError::CastError(format!(
            "{} to {target} loses precision",
            arr.data_type()
        )));
    }
    Ok(cast)
}

fn eval_cmp(op: CmpOp, l: &dyn Datum, r: &dyn Datum) -> Result<BooleanArray> {
    match op {
        CmpOp::Eq => eq(l, r),
        CmpOp::NotEq => neq(l, r),
        CmpOp::Lt => lt(l, r),
        CmpOp::LtEq => lt_eq(l, r),
        CmpOp::Gt => gt(l, r),
        CmpOp::GtEq => gt_eq(l, r),
    }
    .map_err(|e| BridgeError::External(format!("cmp kernel failed for {op:?}: {e}")))
}
