use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use serde_json::{Map, Value as Json};

use crate::ast::{CompareOp, Expr};
use crate::functions;
use crate::functions::PipeRegistry;
use crate::stream::{FilterProducer, MapProducer, MapStep, SliceProducer, SourceProducer};
use crate::value::{Value, ValueStream};

/// Error type an embedder-supplied reference matcher may raise.
pub type MatcherError = Box<dyn std::error::Error + Send + Sync>;

/// Decides whether `candidate` is the document a reference `id` points at.
pub type ReferenceMatcher = dyn Fn(&str, &Json) -> Result<bool, MatcherError> + Send + Sync;

/// Evaluation error types.
///
/// The language is total wherever possible: type mismatches, missing
/// properties, failed dereferences and unbound parameters all resolve to the
/// undefined marker instead of failing. Only these remain hard errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("unknown pipe function: {0}")]
    UnknownPipeFunction(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("reference matcher failed: {0}")]
    Matcher(#[source] MatcherError),
}

/// Everything an evaluation needs: the dataset, the current `this` binding,
/// bound parameters, the reference matcher and the pipe-function registry.
///
/// Contexts are immutable from the evaluator's point of view; child
/// evaluations rebind `this` on a cheap clone without touching the parent.
#[derive(Clone)]
pub struct Context {
    pub(crate) dataset: Value,
    /// `None` means `this` still defaults to the dataset itself.
    this: Option<Value>,
    params: Arc<Map<String, Json>>,
    pub(crate) matcher: Arc<ReferenceMatcher>,
    pipes: Arc<PipeRegistry>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// An empty context: no documents, no parameters, the default
    /// `_id`-comparing reference matcher and the built-in pipe functions.
    pub fn new() -> Self {
        Self {
            dataset: Value::Stream(ValueStream::from_values(Vec::new())),
            this: None,
            params: Arc::new(Map::new()),
            matcher: Arc::new(default_matcher),
            pipes: Arc::new(PipeRegistry::default()),
        }
    }

    /// Bind an in-memory document collection as the dataset.
    pub fn with_dataset(self, documents: Vec<Json>) -> Self {
        self.with_dataset_value(Json::Array(documents))
    }

    /// Bind a dataset that may be any JSON value. An array becomes an
    /// ordered document sequence; anything else is the dataset as-is, so
    /// `*` evaluates to that single value.
    pub fn with_dataset_value(mut self, value: Json) -> Self {
        self.dataset = match value {
            Json::Array(documents) => Value::Stream(ValueStream::from_values(
                documents.into_iter().map(Value::Plain).collect(),
            )),
            other => Value::Plain(other),
        };
        self
    }

    /// Bind an incrementally-produced document source. Documents are pulled
    /// one at a time, at most once each, and only as far as the query needs.
    pub fn with_document_source(mut self, source: BoxStream<'static, Json>) -> Self {
        self.dataset = Value::Stream(ValueStream::new(SourceProducer::new(source)));
        self
    }

    /// Bind the value `@` refers to at the top level. Defaults to the
    /// dataset itself.
    pub fn with_root(mut self, root: Json) -> Self {
        self.this = Some(Value::Plain(root));
        self
    }

    /// Bind all query parameters at once.
    pub fn with_params(mut self, params: Map<String, Json>) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Bind a single query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: Json) -> Self {
        let mut params = (*self.params).clone();
        params.insert(name.into(), value);
        self.params = Arc::new(params);
        self
    }

    /// Replace the reference matcher used by `->`.
    pub fn with_reference_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str, &Json) -> Result<bool, MatcherError> + Send + Sync + 'static,
    {
        self.matcher = Arc::new(matcher);
        self
    }

    /// Register an additional pipe function, or override a built-in one.
    pub fn with_pipe_function(
        mut self,
        name: impl Into<String>,
        function: Arc<dyn functions::PipeFunction>,
    ) -> Self {
        let mut pipes = (*self.pipes).clone();
        pipes.register(name, function);
        self.pipes = Arc::new(pipes);
        self
    }

    pub(crate) fn current_this(&self) -> Value {
        self.this.clone().unwrap_or_else(|| self.dataset.clone())
    }

    pub(crate) fn param(&self, name: &str) -> Value {
        self.params
            .get(name)
            .map(|v| Value::Plain(v.clone()))
            .unwrap_or(Value::Undefined)
    }

    pub(crate) fn rebind_this(&self, value: Value) -> Self {
        let mut child = self.clone();
        child.this = Some(value);
        child
    }
}

/// Matcher used when the embedder supplies none: the reference id must equal
/// the candidate's `_id` field.
fn default_matcher(id: &str, candidate: &Json) -> Result<bool, MatcherError> {
    Ok(candidate.get("_id").and_then(Json::as_str) == Some(id))
}

/// Evaluate an AST against a context, producing a lazy [`Value`].
///
/// No dataset iteration happens here; work is deferred until the value is
/// materialized, except where an operation must pull to answer at all
/// (indexing into a stream) and for eager constructs (literals, `order`).
pub async fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, EvalError> {
    eval_boxed(expr, ctx).await
}

fn eval_boxed<'a>(expr: &'a Expr, ctx: &'a Context) -> BoxFuture<'a, Result<Value, EvalError>> {
    async move {
        match expr {
            Expr::Everything => Ok(ctx.dataset.clone()),
            Expr::This => Ok(ctx.current_this()),

            Expr::StringLiteral(s) => Ok(Value::Plain(Json::String(s.clone()))),
            Expr::IntLiteral(n) => Ok(Value::Plain(Json::from(*n))),
            Expr::FloatLiteral(n) => Ok(Value::Plain(
                serde_json::Number::from_f64(*n)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            )),
            Expr::BoolLiteral(b) => Ok(Value::Plain(Json::Bool(*b))),
            Expr::Null => Ok(Value::Plain(Json::Null)),
            Expr::Param(name) => Ok(ctx.param(name)),

            Expr::Ident(name) => apply_attr(ctx.current_this(), name, ctx),
            Expr::Attr(base, name) => {
                let base = eval_boxed(base, ctx).await?;
                apply_attr(base, name, ctx)
            }
            Expr::Index(base, index) => {
                let base = eval_boxed(base, ctx).await?;
                index_value(base, *index).await
            }
            Expr::Slice { base, from, to } => {
                let base = eval_boxed(base, ctx).await?;
                Ok(slice_value(base, *from, *to))
            }
            Expr::ArrayExpand(base) => {
                let base = eval_boxed(base, ctx).await?;
                Ok(expand_value(base))
            }
            Expr::Filter(base, predicate) => {
                let base = eval_boxed(base, ctx).await?;
                Ok(filter_value(base, predicate, ctx))
            }
            Expr::Projection(base, fields) => {
                let base = eval_boxed(base, ctx).await?;
                match base {
                    Value::Stream(stream) => Ok(Value::Stream(ValueStream::new(
                        MapProducer::new(&stream, MapStep::Projection(fields.clone()), ctx),
                    ))),
                    Value::Plain(Json::Array(items)) => {
                        let stream =
                            ValueStream::from_values(items.into_iter().map(Value::Plain).collect());
                        Ok(Value::Stream(ValueStream::new(MapProducer::new(
                            &stream,
                            MapStep::Projection(fields.clone()),
                            ctx,
                        ))))
                    }
                    other => project_one(other, fields, ctx).await,
                }
            }
            Expr::Deref(base) => {
                let base = eval_boxed(base, ctx).await?;
                match base {
                    Value::Stream(stream) => Ok(Value::Stream(ValueStream::new(
                        MapProducer::new(&stream, MapStep::Deref, ctx),
                    ))),
                    other => deref_one(other, ctx).await,
                }
            }

            Expr::Compare { op, left, right } => {
                let left = eval_boxed(left, ctx).await?;
                let right = eval_boxed(right, ctx).await?;
                compare(*op, left, right).await
            }
            Expr::And(left, right) => {
                match as_bool(&eval_boxed(left, ctx).await?) {
                    Some(false) => Ok(Value::Plain(Json::Bool(false))),
                    Some(true) => Ok(match as_bool(&eval_boxed(right, ctx).await?) {
                        Some(b) => Value::Plain(Json::Bool(b)),
                        None => Value::Undefined,
                    }),
                    None => Ok(Value::Undefined),
                }
            }
            Expr::Or(left, right) => {
                match as_bool(&eval_boxed(left, ctx).await?) {
                    Some(true) => Ok(Value::Plain(Json::Bool(true))),
                    Some(false) => Ok(match as_bool(&eval_boxed(right, ctx).await?) {
                        Some(b) => Value::Plain(Json::Bool(b)),
                        None => Value::Undefined,
                    }),
                    None => Ok(Value::Undefined),
                }
            }

            Expr::Pipe { base, func, args } => {
                let function = ctx
                    .pipes
                    .get(func)
                    .ok_or_else(|| EvalError::UnknownPipeFunction(func.clone()))?;
                let base = eval_boxed(base, ctx).await?;
                function.call(base, args, ctx).await
            }
            Expr::FuncCall(name, args) => functions::call_builtin(name, args, ctx).await,

            // Literal construction is eager: it is not dataset-backed.
            Expr::ArrayLiteral(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let value = eval_boxed(item, ctx).await?;
                    out.push(value.materialize().await?);
                }
                Ok(Value::Plain(Json::Array(out)))
            }
            Expr::ObjectLiteral(fields) => {
                let mut map = Map::new();
                for field in fields {
                    let value = eval_boxed(&field.expr, ctx).await?;
                    if value.is_undefined() {
                        continue;
                    }
                    map.insert(field.key.clone(), value.materialize().await?);
                }
                Ok(Value::Plain(Json::Object(map)))
            }
        }
    }
    .boxed()
}

/// Strict-boolean test used by filters: only the literal `true` passes.
pub(crate) fn is_true(value: &Value) -> bool {
    matches!(value, Value::Plain(Json::Bool(true)))
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Plain(Json::Bool(b)) => Some(*b),
        _ => None,
    }
}

/// Apply one access step to a single stream element. Called back from
/// [`MapProducer`] so that mapped steps and scalar steps share semantics.
pub(crate) async fn apply_step(
    element: Value,
    step: &MapStep,
    ctx: &Context,
) -> Result<Value, EvalError> {
    match step {
        MapStep::Attr(name) => apply_attr(element, name, ctx),
        MapStep::Projection(fields) => project_one(element, fields, ctx).await,
        MapStep::Deref => deref_one(element, ctx).await,
    }
}

/// Property access. On a stream (or plain array) the access maps
/// element-wise; a missing property is undefined, not null.
fn apply_attr(value: Value, name: &str, ctx: &Context) -> Result<Value, EvalError> {
    Ok(match value {
        Value::Undefined => Value::Undefined,
        Value::Plain(Json::Object(map)) => map
            .get(name)
            .map(|v| Value::Plain(v.clone()))
            .unwrap_or(Value::Undefined),
        Value::Plain(Json::Array(items)) => Value::Stream(ValueStream::from_values(
            items
                .into_iter()
                .map(|item| {
                    item.get(name)
                        .map(|v| Value::Plain(v.clone()))
                        .unwrap_or(Value::Undefined)
                })
                .collect(),
        )),
        Value::Plain(_) => Value::Undefined,
        Value::Object(fields) => fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Undefined),
        Value::Stream(stream) => Value::Stream(ValueStream::new(MapProducer::new(
            &stream,
            MapStep::Attr(name.to_string()),
            ctx,
        ))),
    })
}

/// `[n]`: pulls at most `n + 1` elements from a stream.
async fn index_value(value: Value, index: i64) -> Result<Value, EvalError> {
    if index < 0 {
        return Ok(Value::Undefined);
    }
    let index = index as usize;
    Ok(match value {
        Value::Stream(stream) => stream.get(index).await?.unwrap_or(Value::Undefined),
        Value::Plain(Json::Array(items)) => items
            .get(index)
            .map(|v| Value::Plain(v.clone()))
            .unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    })
}

/// `[from:to]`, half-open, lazy over streams.
fn slice_value(value: Value, from: i64, to: i64) -> Value {
    let from = from.max(0) as usize;
    let to = to.max(0) as usize;
    match value {
        Value::Stream(stream) => {
            Value::Stream(ValueStream::new(SliceProducer::new(&stream, from, to)))
        }
        Value::Plain(Json::Array(items)) => {
            let upper = to.min(items.len());
            let lower = from.min(upper);
            Value::Plain(Json::Array(items[lower..upper].to_vec()))
        }
        _ => Value::Undefined,
    }
}

/// `[]`: identity on streams, turns a plain array into a stream so later
/// steps map element-wise.
fn expand_value(value: Value) -> Value {
    match value {
        Value::Stream(stream) => Value::Stream(stream),
        Value::Plain(Json::Array(items)) => Value::Stream(ValueStream::from_values(
            items.into_iter().map(Value::Plain).collect(),
        )),
        _ => Value::Undefined,
    }
}

fn filter_value(value: Value, predicate: &Expr, ctx: &Context) -> Value {
    match value {
        Value::Stream(stream) => {
            Value::Stream(ValueStream::new(FilterProducer::new(&stream, predicate, ctx)))
        }
        Value::Plain(Json::Array(items)) => {
            let stream = ValueStream::from_values(items.into_iter().map(Value::Plain).collect());
            Value::Stream(ValueStream::new(FilterProducer::new(&stream, predicate, ctx)))
        }
        _ => Value::Undefined,
    }
}

/// Build one projected object, rebinding `this` to the element. Undefined
/// fields are omitted entirely; explicit nulls are kept.
pub(crate) async fn project_one(
    element: Value,
    fields: &[crate::ast::ProjectionField],
    ctx: &Context,
) -> Result<Value, EvalError> {
    if element.is_undefined() {
        return Ok(Value::Undefined);
    }
    let ctx = ctx.rebind_this(element);
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let value = evaluate(&field.expr, &ctx).await?;
        if value.is_undefined() {
            continue;
        }
        out.push((field.key.clone(), value));
    }
    Ok(Value::Object(out))
}

/// `->`: the operand must be reference-shaped (an object carrying `_ref`);
/// the first dataset document accepted by the matcher wins.
async fn deref_one(value: Value, ctx: &Context) -> Result<Value, EvalError> {
    if value.is_undefined() {
        return Ok(Value::Undefined);
    }
    let shape = value.materialize().await?;
    let Some(id) = shape.get("_ref").and_then(Json::as_str) else {
        return Ok(Value::Undefined);
    };
    tracing::debug!(id, "resolving reference");
    match &ctx.dataset {
        Value::Stream(stream) => {
            let mut cursor = stream.cursor();
            while let Some(candidate) = cursor.next().await? {
                let doc = candidate.materialize().await?;
                if (ctx.matcher)(id, &doc).map_err(EvalError::Matcher)? {
                    return Ok(Value::Plain(doc));
                }
            }
            Ok(Value::Undefined)
        }
        Value::Plain(Json::Array(documents)) => {
            for doc in documents {
                if (ctx.matcher)(id, doc).map_err(EvalError::Matcher)? {
                    return Ok(Value::Plain(doc.clone()));
                }
            }
            Ok(Value::Undefined)
        }
        Value::Plain(doc) => {
            if (ctx.matcher)(id, doc).map_err(EvalError::Matcher)? {
                Ok(Value::Plain(doc.clone()))
            } else {
                Ok(Value::Undefined)
            }
        }
        _ => Ok(Value::Undefined),
    }
}

/// Strict, type-aware comparison. Undefined operands make the whole
/// comparison undefined; kinds never cross-match except null-vs-null;
/// ordering is defined for numbers and strings only.
async fn compare(op: CompareOp, left: Value, right: Value) -> Result<Value, EvalError> {
    if left.is_undefined() || right.is_undefined() {
        return Ok(Value::Undefined);
    }
    let left = left.materialize().await?;
    let right = right.materialize().await?;
    Ok(match op {
        CompareOp::Eq => Value::Plain(Json::Bool(strict_eq(&left, &right))),
        CompareOp::Neq => Value::Plain(Json::Bool(!strict_eq(&left, &right))),
        CompareOp::Lt | CompareOp::Lte | CompareOp::Gt | CompareOp::Gte => {
            match strict_ord(&left, &right) {
                Some(ord) => Value::Plain(Json::Bool(match op {
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Lte => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    _ => unreachable!(),
                })),
                None => Value::Undefined,
            }
        }
    })
}

fn strict_eq(left: &Json, right: &Json) -> bool {
    match (left, right) {
        // Integer and float representations of the same number are equal.
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn strict_ord(left: &Json, right: &Json) -> Option<Ordering> {
    match (left, right) {
        (Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
