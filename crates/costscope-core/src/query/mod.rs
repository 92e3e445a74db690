//! Query compilation
//!
//! Requests are rewritten, resolved and lowered into a [`ast::SelectQuery`]
//! before being rendered to parameterized SQL.

pub mod ast;
pub mod compiler;
pub mod resolver;

pub use ast::{RenderedSql, SelectQuery, SqlValue};
pub use compiler::{CompiledQuery, QueryCompiler, QueryKind};
pub use resolver::FilterResolver;
