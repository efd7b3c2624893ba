//! Lexer and parser for the Trellis workflow language, a strict DOT subset.
//!
//! Parses `digraph Name { ... }` with nodes, edge chains, node/edge defaults,
//! subgraphs, and typed attributes into a [`Graph`] of [`Node`]s and
//! [`Edge`]s addressed by id.
//!
//! # Example
//! ```
//! let dot = r#"digraph Pipeline { start -> process -> done [weight=2] }"#;
//! let graph = trellis_dot::parse(dot).unwrap();
//! assert_eq!(graph.name, "Pipeline");
//! assert_eq!(graph.edges.len(), 2);
//! assert_eq!(graph.edges[1].weight(), 2);
//! ```

pub mod ast;
pub mod attrs;
pub mod duration;
mod duration_serde;
pub mod lexer;
pub mod parser;
pub mod tokens;

pub use ast::*;
pub use attrs::{get_boolean_attr, get_integer_attr, get_string_attr};
pub use duration::{is_duration_string, parse_duration};
pub use lexer::tokenize;
pub use parser::{parse, parse_tokens};
pub use tokens::{Token, TokenKind};
