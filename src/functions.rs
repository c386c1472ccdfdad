use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as Json;

use crate::ast::{Expr, PipeArg, SortDirection};
use crate::eval::{self, Context, EvalError};
use crate::value::{Value, ValueStream};

/// A named post-processing function invokable after `|`.
///
/// Arguments arrive unevaluated so the function can evaluate them per
/// element with `this` rebound, the way `order` does with its sort keys.
pub trait PipeFunction: Send + Sync {
    fn call<'a>(
        &'a self,
        base: Value,
        args: &'a [PipeArg],
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Value, EvalError>>;
}

/// Registry of pipe functions. Open for extension via
/// [`Context::with_pipe_function`](crate::Context::with_pipe_function);
/// `order` is built in.
#[derive(Clone)]
pub struct PipeRegistry {
    functions: HashMap<String, Arc<dyn PipeFunction>>,
}

impl Default for PipeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register("order", Arc::new(OrderFunction));
        registry
    }
}

impl PipeRegistry {
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn PipeFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PipeFunction>> {
        self.functions.get(name)
    }
}

/// `order(key [asc|desc], ...)`: stable multi-key sort.
///
/// Ordering requires a complete view, so the base sequence is drained here;
/// this and top-level materialization are the only operations that force
/// full consumption.
struct OrderFunction;

impl PipeFunction for OrderFunction {
    fn call<'a>(
        &'a self,
        base: Value,
        args: &'a [PipeArg],
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Value, EvalError>> {
        async move {
            let elements = match base {
                Value::Stream(stream) => {
                    let mut cursor = stream.cursor();
                    let mut elements = Vec::new();
                    while let Some(element) = cursor.next().await? {
                        elements.push(element);
                    }
                    elements
                }
                Value::Plain(Json::Array(items)) => {
                    items.into_iter().map(Value::Plain).collect()
                }
                _ => return Ok(Value::Undefined),
            };

            // Evaluate every sort key once per element, then sort on the
            // decorated keys. Vec::sort_by is stable, so all-key ties keep
            // their input order.
            let mut decorated = Vec::with_capacity(elements.len());
            for element in elements {
                let element_ctx = ctx.rebind_this(element.clone());
                let mut keys = Vec::with_capacity(args.len());
                for arg in args {
                    let key = eval::evaluate(&arg.expr, &element_ctx).await?;
                    keys.push(sort_key(key).await?);
                }
                decorated.push((keys, element));
            }
            decorated.sort_by(|(a, _), (b, _)| compare_key_sets(a, b, args));

            Ok(Value::Stream(ValueStream::from_values(
                decorated.into_iter().map(|(_, element)| element).collect(),
            )))
        }
        .boxed()
    }
}

/// A fully-resolved sort key.
enum SortKey {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects: not orderable, compare as equal.
    Other,
}

async fn sort_key(value: Value) -> Result<SortKey, EvalError> {
    if value.is_undefined() {
        return Ok(SortKey::Undefined);
    }
    Ok(match value.materialize().await? {
        Json::Null => SortKey::Null,
        Json::Bool(b) => SortKey::Bool(b),
        Json::Number(n) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => SortKey::String(s),
        _ => SortKey::Other,
    })
}

fn compare_key_sets(a: &[SortKey], b: &[SortKey], args: &[PipeArg]) -> Ordering {
    for (index, (key_a, key_b)) in a.iter().zip(b).enumerate() {
        let direction = args
            .get(index)
            .map(|arg| arg.direction)
            .unwrap_or(SortDirection::Asc);
        let ord = compare_keys(key_a, key_b, direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Undefined and null sort before defined values in both directions; the
/// direction flips only the defined-value comparison.
fn compare_keys(a: &SortKey, b: &SortKey, direction: SortDirection) -> Ordering {
    let (presence_a, presence_b) = (presence_rank(a), presence_rank(b));
    if presence_a != 2 || presence_b != 2 {
        return presence_a.cmp(&presence_b);
    }
    let ord = compare_defined(a, b);
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn presence_rank(key: &SortKey) -> u8 {
    match key {
        SortKey::Undefined => 0,
        SortKey::Null => 1,
        _ => 2,
    }
}

fn compare_defined(a: &SortKey, b: &SortKey) -> Ordering {
    fn type_rank(key: &SortKey) -> u8 {
        match key {
            SortKey::Bool(_) => 0,
            SortKey::Number(_) => 1,
            SortKey::String(_) => 2,
            _ => 3,
        }
    }
    match (a, b) {
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(y),
        (SortKey::Number(x), SortKey::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SortKey::String(x), SortKey::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Evaluate an eager built-in function by name. These take a complete view
/// of their argument, so streams are drained here.
pub(crate) async fn call_builtin(
    name: &str,
    args: &[Expr],
    ctx: &Context,
) -> Result<Value, EvalError> {
    match name {
        "count" => builtin_count(args, ctx).await,
        "defined" => builtin_defined(args, ctx).await,
        "length" => builtin_length(args, ctx).await,
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

async fn eval_first(args: &[Expr], ctx: &Context) -> Result<Value, EvalError> {
    match args.first() {
        Some(expr) => eval::evaluate(expr, ctx).await,
        None => Ok(Value::Undefined),
    }
}

async fn builtin_count(args: &[Expr], ctx: &Context) -> Result<Value, EvalError> {
    match eval_first(args, ctx).await? {
        Value::Stream(stream) => {
            let mut cursor = stream.cursor();
            let mut count = 0u64;
            while cursor.next().await?.is_some() {
                count += 1;
            }
            Ok(Value::Plain(Json::from(count)))
        }
        Value::Plain(Json::Array(items)) => Ok(Value::Plain(Json::from(items.len()))),
        _ => Ok(Value::Undefined),
    }
}

async fn builtin_defined(args: &[Expr], ctx: &Context) -> Result<Value, EvalError> {
    let defined = match eval_first(args, ctx).await? {
        Value::Undefined | Value::Plain(Json::Null) => false,
        _ => true,
    };
    Ok(Value::Plain(Json::Bool(defined)))
}

async fn builtin_length(args: &[Expr], ctx: &Context) -> Result<Value, EvalError> {
    match eval_first(args, ctx).await? {
        Value::Plain(Json::String(s)) => Ok(Value::Plain(Json::from(s.chars().count()))),
        Value::Plain(Json::Array(items)) => Ok(Value::Plain(Json::from(items.len()))),
        Value::Stream(stream) => {
            let mut cursor = stream.cursor();
            let mut count = 0u64;
            while cursor.next().await?.is_some() {
                count += 1;
            }
            Ok(Value::Plain(Json::from(count)))
        }
        _ => Ok(Value::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    async fn run(query: &str, ctx: &Context) -> Json {
        let tree = parse(query).unwrap();
        let value = eval::evaluate(&tree, ctx).await.unwrap();
        value.materialize().await.unwrap()
    }

    #[tokio::test]
    async fn order_single_key() {
        let ctx = Context::new().with_dataset(vec![
            json!({"name": "b"}),
            json!({"name": "c"}),
            json!({"name": "a"}),
        ]);
        assert_eq!(run("(* | order(name)).name", &ctx).await, json!(["a", "b", "c"]));
        assert_eq!(
            run("(* | order(name desc)).name", &ctx).await,
            json!(["c", "b", "a"])
        );
    }

    #[tokio::test]
    async fn order_multi_key_with_directions() {
        let ctx = Context::new();
        assert_eq!(
            run("[[1, 2], [1, 4]] | order(@[0], @[1] desc)", &ctx).await,
            json!([[1, 4], [1, 2]])
        );
    }

    #[tokio::test]
    async fn order_is_stable_on_ties() {
        let ctx = Context::new().with_dataset(vec![
            json!({"k": 1, "tag": "first"}),
            json!({"k": 0, "tag": "zero"}),
            json!({"k": 1, "tag": "second"}),
        ]);
        assert_eq!(
            run("(* | order(k)).tag", &ctx).await,
            json!(["zero", "first", "second"])
        );
        // Direction flips key comparison, not tie order.
        assert_eq!(
            run("(* | order(k desc)).tag", &ctx).await,
            json!(["first", "second", "zero"])
        );
    }

    #[tokio::test]
    async fn order_sorts_missing_keys_first_in_both_directions() {
        let ctx = Context::new().with_dataset(vec![
            json!({"k": 2, "tag": "two"}),
            json!({"tag": "missing"}),
            json!({"k": null, "tag": "null"}),
            json!({"k": 1, "tag": "one"}),
        ]);
        assert_eq!(
            run("(* | order(k)).tag", &ctx).await,
            json!(["missing", "null", "one", "two"])
        );
        assert_eq!(
            run("(* | order(k desc)).tag", &ctx).await,
            json!(["missing", "null", "two", "one"])
        );
    }

    #[tokio::test]
    async fn count_over_streams_and_arrays() {
        let ctx = Context::new().with_dataset(vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(run("count(*)", &ctx).await, json!(2));
        assert_eq!(run("count([1, 2, 3])", &ctx).await, json!(3));
        // Not a sequence: undefined, materializes as null.
        assert_eq!(run("count(1)", &ctx).await, json!(null));
    }

    #[tokio::test]
    async fn defined_distinguishes_null_and_missing() {
        let ctx = Context::new().with_dataset(vec![json!({"a": null, "b": 1})]);
        assert_eq!(run("*[0]{\"a\": defined(a), \"c\": defined(c)}", &ctx).await,
            json!({"a": false, "c": false}));
        assert_eq!(run("*[defined(b)].b", &ctx).await, json!([1]));
    }

    #[tokio::test]
    async fn length_of_strings_and_arrays() {
        let ctx = Context::new();
        assert_eq!(run("length(\"hello\")", &ctx).await, json!(5));
        // Characters, not UTF-8 bytes.
        assert_eq!(run("length(\"héllo\")", &ctx).await, json!(5));
        assert_eq!(run("length([1, 2])", &ctx).await, json!(2));
    }
}
