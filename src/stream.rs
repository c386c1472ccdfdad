use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value as Json;

use crate::ast::{Expr, ProjectionField};
use crate::eval::{self, Context, EvalError};
use crate::value::{Cursor, Value, ValueStream};

/// Pull-based producer of stream elements.
///
/// `Ok(None)` marks end of sequence; suspension while waiting for the next
/// element is carried by the returned future. Producers are single-consumer;
/// sharing happens one level up, in [`ValueStream`]'s buffer.
pub(crate) trait Pull: Send {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<Value>, EvalError>>;
}

/// Adapts an embedder-supplied async document source.
pub(crate) struct SourceProducer {
    source: BoxStream<'static, Json>,
}

impl SourceProducer {
    pub(crate) fn new(source: BoxStream<'static, Json>) -> Self {
        Self { source }
    }
}

impl Pull for SourceProducer {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<Value>, EvalError>> {
        async move { Ok(self.source.next().await.map(Value::Plain)) }.boxed()
    }
}

/// Lazily keeps input elements for which the predicate evaluates to the
/// literal boolean `true` (no truthiness), preserving relative order.
pub(crate) struct FilterProducer {
    input: Cursor,
    predicate: Expr,
    ctx: Context,
}

impl FilterProducer {
    pub(crate) fn new(input: &ValueStream, predicate: &Expr, ctx: &Context) -> Self {
        Self {
            input: input.cursor(),
            predicate: predicate.clone(),
            ctx: ctx.clone(),
        }
    }
}

impl Pull for FilterProducer {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<Value>, EvalError>> {
        async move {
            while let Some(element) = self.input.next().await? {
                let ctx = self.ctx.rebind_this(element.clone());
                let verdict = eval::evaluate(&self.predicate, &ctx).await?;
                if eval::is_true(&verdict) {
                    return Ok(Some(element));
                }
            }
            Ok(None)
        }
        .boxed()
    }
}

/// A postfix access step applied element-wise over a stream.
pub(crate) enum MapStep {
    Attr(String),
    Projection(Vec<ProjectionField>),
    Deref,
}

/// Lazy element-wise map of an access step.
pub(crate) struct MapProducer {
    input: Cursor,
    step: MapStep,
    ctx: Context,
}

impl MapProducer {
    pub(crate) fn new(input: &ValueStream, step: MapStep, ctx: &Context) -> Self {
        Self {
            input: input.cursor(),
            step,
            ctx: ctx.clone(),
        }
    }
}

impl Pull for MapProducer {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<Value>, EvalError>> {
        async move {
            match self.input.next().await? {
                Some(element) => {
                    let mapped = eval::apply_step(element, &self.step, &self.ctx).await?;
                    Ok(Some(mapped))
                }
                None => Ok(None),
            }
        }
        .boxed()
    }
}

/// Lazily yields input elements with index in `[from, to)`.
pub(crate) struct SliceProducer {
    input: Cursor,
    remaining: usize,
}

impl SliceProducer {
    pub(crate) fn new(input: &ValueStream, from: usize, to: usize) -> Self {
        Self {
            input: input.cursor_at(from),
            remaining: to.saturating_sub(from),
        }
    }
}

impl Pull for SliceProducer {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<Value>, EvalError>> {
        async move {
            if self.remaining == 0 {
                return Ok(None);
            }
            match self.input.next().await? {
                Some(element) => {
                    self.remaining -= 1;
                    Ok(Some(element))
                }
                None => {
                    self.remaining = 0;
                    Ok(None)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain_stream(items: Vec<Json>) -> ValueStream {
        ValueStream::from_values(items.into_iter().map(Value::Plain).collect())
    }

    #[tokio::test]
    async fn source_producer_wraps_async_streams() {
        let source = futures::stream::iter(vec![json!(1), json!(2)]).boxed();
        let stream = ValueStream::new(SourceProducer::new(source));
        let value = Value::Stream(stream);
        assert_eq!(value.materialize().await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn slice_producer_is_half_open() {
        let input = plain_stream(vec![json!(0), json!(1), json!(2), json!(3)]);
        let sliced = Value::Stream(ValueStream::new(SliceProducer::new(&input, 1, 3)));
        assert_eq!(sliced.materialize().await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn slice_producer_tolerates_short_input() {
        let input = plain_stream(vec![json!(0)]);
        let sliced = Value::Stream(ValueStream::new(SliceProducer::new(&input, 2, 5)));
        assert_eq!(sliced.materialize().await.unwrap(), json!([]));
    }
}
