//! A lazy GROQ-style query engine over semi-structured JSON documents.
//!
//! A query string is parsed once into an immutable [`Expr`] tree, which can
//! then be evaluated any number of times against different [`Context`]s.
//! Evaluation is lazy: it builds a [`Value`] that pulls from the document
//! source only as far as the query needs, so indexing into a filtered
//! unbounded source stays cheap. [`Value::materialize`] resolves the result
//! into plain JSON.
//!
//! ```no_run
//! use groq_engine::{evaluate, parse, Context};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = parse(r#"*[_type == "product"]{name}"#)?;
//! let ctx = Context::new().with_dataset(vec![
//!     json!({"_type": "product", "name": "T-shirt"}),
//!     json!({"_type": "user", "name": "Bob"}),
//! ]);
//! let value = evaluate(&tree, &ctx).await?;
//! assert_eq!(value.materialize().await?, json!([{"name": "T-shirt"}]));
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
mod stream;
pub mod value;

pub use ast::Expr;
pub use eval::{evaluate, Context, EvalError, MatcherError, ReferenceMatcher};
pub use functions::{PipeFunction, PipeRegistry};
pub use lexer::LexError;
pub use parser::{parse, ParseError};
pub use value::Value;
