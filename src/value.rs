use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::lock::Mutex;
use serde_json::Value as Json;

use crate::eval::EvalError;
use crate::stream::Pull;

/// A lazily-evaluated query result.
///
/// `Undefined` is an absent value and is distinct from an explicit JSON
/// null: projections omit undefined fields but keep null ones, and
/// comparisons treat undefined as non-matching. Cloning a `Value` is cheap;
/// streams are shared handles.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent-value marker.
    Undefined,
    /// Fully-known plain data.
    Plain(Json),
    /// An object whose fields may still hold lazy values (projection output).
    Object(Vec<(String, Value)>),
    /// An ordered lazy sequence of values.
    Stream(ValueStream),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Recursively resolve into a plain JSON result, pulling from any
    /// underlying sources as needed.
    ///
    /// Idempotent: stream elements are memoized, so a second call returns a
    /// structurally equal result without re-driving the source. A top-level
    /// undefined surfaces as JSON null.
    pub async fn materialize(&self) -> Result<Json, EvalError> {
        self.materialize_boxed().await
    }

    fn materialize_boxed(&self) -> BoxFuture<'_, Result<Json, EvalError>> {
        async move {
            match self {
                Value::Undefined => Ok(Json::Null),
                Value::Plain(data) => Ok(data.clone()),
                Value::Object(fields) => {
                    let mut map = serde_json::Map::new();
                    for (key, value) in fields {
                        if value.is_undefined() {
                            continue;
                        }
                        map.insert(key.clone(), value.materialize_boxed().await?);
                    }
                    Ok(Json::Object(map))
                }
                Value::Stream(stream) => {
                    let mut items = Vec::new();
                    let mut cursor = stream.cursor();
                    while let Some(element) = cursor.next().await? {
                        items.push(element.materialize_boxed().await?);
                    }
                    Ok(Json::Array(items))
                }
            }
        }
        .boxed()
    }
}

impl From<Json> for Value {
    fn from(data: Json) -> Self {
        Value::Plain(data)
    }
}

/// A shared, memoized lazy sequence of [`Value`]s.
///
/// Elements are pulled from the producer at most once and buffered; cloning
/// the stream hands out another view over the same buffer. That is what
/// allows a dereference to scan the dataset while a filter is mid-iteration
/// over it, and what makes repeated materialization idempotent: the
/// underlying producer is single-consumer, the buffer is not.
#[derive(Clone)]
pub struct ValueStream {
    shared: Arc<Mutex<StreamState>>,
}

struct StreamState {
    buffered: Vec<Value>,
    /// Dropped once exhausted.
    producer: Option<Box<dyn Pull>>,
}

impl ValueStream {
    pub(crate) fn new(producer: impl Pull + 'static) -> Self {
        Self {
            shared: Arc::new(Mutex::new(StreamState {
                buffered: Vec::new(),
                producer: Some(Box::new(producer)),
            })),
        }
    }

    /// A stream over already-evaluated values.
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(StreamState {
                buffered: values,
                producer: None,
            })),
        }
    }

    pub(crate) fn cursor(&self) -> Cursor {
        Cursor {
            stream: self.clone(),
            index: 0,
        }
    }

    pub(crate) fn cursor_at(&self, index: usize) -> Cursor {
        Cursor {
            stream: self.clone(),
            index,
        }
    }

    /// Element at `index`, pulling from the producer only as far as needed.
    /// `Ok(None)` means the sequence ended before `index`.
    pub(crate) async fn get(&self, index: usize) -> Result<Option<Value>, EvalError> {
        let mut state = self.shared.lock().await;
        while state.buffered.len() <= index {
            let pulled = match state.producer.as_mut() {
                Some(producer) => producer.pull().await?,
                None => break,
            };
            match pulled {
                Some(value) => state.buffered.push(value),
                None => state.producer = None,
            }
        }
        Ok(state.buffered.get(index).cloned())
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.try_lock() {
            Some(state) => f
                .debug_struct("ValueStream")
                .field("buffered", &state.buffered.len())
                .field("exhausted", &state.producer.is_none())
                .finish(),
            None => f.write_str("ValueStream(<locked>)"),
        }
    }
}

/// One reader's position in a [`ValueStream`].
pub(crate) struct Cursor {
    stream: ValueStream,
    index: usize,
}

impl Cursor {
    pub(crate) async fn next(&mut self) -> Result<Option<Value>, EvalError> {
        let value = self.stream.get(self.index).await?;
        if value.is_some() {
            self.index += 1;
        }
        Ok(value)
    }
}
