//! Data models for Costscope

mod filter;
mod output;
mod query;

pub use filter::*;
pub use output::*;
pub use query::*;
