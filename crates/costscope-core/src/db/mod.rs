//! Execution adapters
//!
//! A [`QueryExecutor`] runs one compiled statement and returns every row,
//! fully read, before releasing its connection.

mod memory;
mod postgres;

pub use memory::StaticExecutor;
pub use postgres::PostgresExecutor;

use async_trait::async_trait;

use crate::decode::ScalarRow;
use crate::error::Result;
use crate::query::CompiledQuery;

/// Runs compiled queries against a billing store
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Whether the store can serve queries right now
    async fn is_available(&self) -> bool;

    /// Execute `query` and return its rows in select order
    async fn query(&self, query: &CompiledQuery) -> Result<Vec<ScalarRow>>;
}
