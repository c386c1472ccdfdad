use serde::{Deserialize, Serialize};

/// GROQ Abstract Syntax Tree types.
///
/// The tree is immutable once parsed; the same tree can be evaluated any
/// number of times, concurrently, against different contexts.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    // Literals
    StringLiteral(String),
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    Null,
    /// An eager array literal: `[1, 2, 3]`.
    ArrayLiteral(Vec<Expr>),
    /// An eager object literal: `{"a": 1, b}`.
    ObjectLiteral(Vec<ProjectionField>),

    // Identifiers & access
    /// Implicit property access on the current `this` binding.
    Ident(String),
    /// `base.prop`
    Attr(Box<Expr>, String),
    /// `base[n]`
    Index(Box<Expr>, i64),
    /// `base[from:to]`, half-open.
    Slice {
        base: Box<Expr>,
        from: i64,
        to: i64,
    },
    /// `base[]` — identity on streams, turns a plain array into a stream.
    ArrayExpand(Box<Expr>),
    /// `base->` — follow a reference to its target document.
    Deref(Box<Expr>),
    /// `@`
    This,
    /// `*`
    Everything,
    /// `$name`
    Param(String),

    // Operators
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),

    // Query constructs
    /// `base[predicate]`
    Filter(Box<Expr>, Box<Expr>),
    /// `base{field, "alias": expr, ...}`
    Projection(Box<Expr>, Vec<ProjectionField>),
    /// `base | func(arg, ...)`
    Pipe {
        base: Box<Expr>,
        func: String,
        args: Vec<PipeArg>,
    },
    /// `func(arg, ...)` — eager built-in call.
    FuncCall(String, Vec<Expr>),
}

/// Strict comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// One entry of a projection or object literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionField {
    pub key: String,
    pub expr: Expr,
}

/// Sort direction for a pipe-function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// An argument to a pipe function, with its optional `asc`/`desc` modifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeArg {
    pub expr: Expr,
    pub direction: SortDirection,
}
