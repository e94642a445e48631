//! Query front end.
//!
//! Uses the `sqlparser` crate for parsing, converts to our internal AST, and
//! validates the result against the catalog before planning.

mod analyzer;
mod ast;
mod error;
mod parser;

pub use analyzer::Analyzer;
pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::Parser;
