//! In-memory execution adapter

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::QueryExecutor;
use crate::decode::ScalarRow;
use crate::error::{Error, Result};
use crate::query::{CompiledQuery, QueryKind};

/// Executor answering from queued result sets
///
/// Result sets are queued per [`QueryKind`] and handed out in order; a query
/// with nothing queued returns no rows. Every executed query is recorded.
#[derive(Debug)]
pub struct StaticExecutor {
    available: AtomicBool,
    failing: AtomicBool,
    responses: Mutex<HashMap<QueryKind, VecDeque<Vec<ScalarRow>>>>,
    executed: Mutex<Vec<CompiledQuery>>,
}

impl Default for StaticExecutor {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            responses: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
        }
    }
}

impl StaticExecutor {
    /// Available executor with nothing queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows returned by the next query of `kind`
    pub fn push_rows(&self, kind: QueryKind, rows: Vec<ScalarRow>) {
        self.responses
            .lock()
            .entry(kind)
            .or_default()
            .push_back(rows);
    }

    /// Mark the store available or not
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every query fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queries executed so far
    pub fn executed(&self) -> Vec<CompiledQuery> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for StaticExecutor {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn query(&self, query: &CompiledQuery) -> Result<Vec<ScalarRow>> {
        self.executed.lock().push(query.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::internal("static executor set to fail"));
        }
        let rows = self
            .responses
            .lock()
            .get_mut(&query.kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        debug!(kind = ?query.kind, rows = rows.len(), "Static executor answered");
        Ok(rows)
    }
}
