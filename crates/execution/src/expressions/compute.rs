//! Compute-expression algebra accepted by the scanner.
//!
//! Function names follow the columnar library's kernel names so a rendered expression
//! reads the same as the library's own expression printer:
//! `and_kleene(greater(id, 50), equal(category, "A"))`.

use std::fmt;

use crate::scalar::ScalarValue;

/// Named kernel applied by a [`ComputeExpr::Call`].
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeFunction {
    /// `=` comparison.
    Equal,
    /// `!=` comparison.
    NotEqual,
    /// `<` comparison.
    Less,
    /// `<=` comparison.
    LessEqual,
    /// `>` comparison.
    Greater,
    /// `>=` comparison.
    GreaterEqual,
    /// IEEE NaN test; null stays null.
    IsNan,
    /// Boolean negation.
    Invert,
    /// Validity test, never null.
    IsNull,
    /// Inverse of [`ComputeFunction::IsNull`].
    IsValid,
    /// Three-valued AND.
    AndKleene,
    /// Three-valued OR.
    OrKleene,
    /// Child field of a struct by index.
    StructField(usize),
}

impl ComputeFunction {
    /// Kernel name as printed.
    pub fn name(&self) -> &'static str {
        match self {
            ComputeFunction::Equal => "equal",
            ComputeFunction::NotEqual => "not_equal",
            ComputeFunction::Less => "less",
            ComputeFunction::LessEqual => "less_equal",
            ComputeFunction::Greater => "greater",
            ComputeFunction::GreaterEqual => "greater_equal",
            ComputeFunction::IsNan => "is_nan",
            ComputeFunction::Invert => "invert",
            ComputeFunction::IsNull => "is_null",
            ComputeFunction::IsValid => "is_valid",
            ComputeFunction::AndKleene => "and_kleene",
            ComputeFunction::OrKleene => "or_kleene",
            ComputeFunction::StructField(_) => "struct_field",
        }
    }

    /// Number of arguments the kernel takes.
    pub fn arity(&self) -> usize {
        match self {
            ComputeFunction::Equal
            | ComputeFunction::NotEqual
            | ComputeFunction::Less
            | ComputeFunction::LessEqual
            | ComputeFunction::Greater
            | ComputeFunction::GreaterEqual
            | ComputeFunction::AndKleene
            | ComputeFunction::OrKleene => 2,
            ComputeFunction::IsNan
            | ComputeFunction::Invert
            | ComputeFunction::IsNull
            | ComputeFunction::IsValid
            | ComputeFunction::StructField(_) => 1,
        }
    }
}

/// Expression tree over a record batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeExpr {
    /// Top-level column by name.
    Field(String),
    /// Constant.
    Literal(ScalarValue),
    /// Kernel call.
    Call {
        /// Kernel.
        function: ComputeFunction,
        /// Arguments, `function.arity()` of them.
        args: Vec<ComputeExpr>,
    },
}

/// Reference to a top-level column.
pub fn field_ref(name: impl Into<String>) -> ComputeExpr {
    ComputeExpr::Field(name.into())
}

/// Constant expression.
pub fn literal(value: ScalarValue) -> ComputeExpr {
    ComputeExpr::Literal(value)
}

/// Boolean constant.
pub fn lit_bool(value: bool) -> ComputeExpr {
    ComputeExpr::Literal(ScalarValue::Boolean(value))
}

/// Kernel call.
pub fn call(function: ComputeFunction, args: Vec<ComputeExpr>) -> ComputeExpr {
    ComputeExpr::Call { function, args }
}

impl ComputeExpr {
    /// `and_kleene(self, other)`.
    pub fn and_kleene(self, other: ComputeExpr) -> ComputeExpr {
        call(ComputeFunction::AndKleene, vec![self, other])
    }

    /// `or_kleene(self, other)`.
    pub fn or_kleene(self, other: ComputeExpr) -> ComputeExpr {
        call(ComputeFunction::OrKleene, vec![self, other])
    }

    /// `invert(self)`.
    pub fn invert(self) -> ComputeExpr {
        call(ComputeFunction::Invert, vec![self])
    }

    /// `struct_field(self, [index])`.
    pub fn struct_field(self, index: usize) -> ComputeExpr {
        call(ComputeFunction::StructField(index), vec![self])
    }

    /// Constant boolean payload, if this is a boolean literal.
    pub fn as_bool_literal(&self) -> Option<bool> {
        match self {
            ComputeExpr::Literal(v) => v.as_bool(),
            _ => None,
        }
    }

    /// Top-level column names referenced anywhere in the tree, first occurrence order.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ComputeExpr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            ComputeExpr::Literal(_) => {}
            ComputeExpr::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
        }
    }
}

impl fmt::Display for ComputeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeExpr::Field(name) => write!(f, "{name}"),
            ComputeExpr::Literal(v) => write!(f, "{v}"),
            ComputeExpr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                if let ComputeFunction::StructField(index) = function {
                    write!(f, ", [{index}]")?;
                }
                write!(f, ")")
            }
        }
    }
}
