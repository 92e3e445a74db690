//! # Costscope
//!
//! Cost-analytics query engine over a cloud billing fact table.
//!
//! Costscope compiles typed billing requests (filters, group-bys,
//! aggregations and sorts) into parameterized SQL, executes them against a
//! time-series billing store and assembles the rows into chart-ready shapes.
//!
//! ## Architecture
//!
//! - **Query**: filter resolution and SQL compilation
//! - **Decode**: typed row decoding with cached entity names
//! - **Analytics**: time series, entity tables, sunburst trees and trend stats
//! - **API**: REST API over the analytics pipeline
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the API server
//! costscope serve
//!
//! # Print the SQL a request compiles to
//! costscope explain request.json
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod lookup;
pub mod models;
pub mod query;
pub mod schema;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::analytics::BillingAnalytics;
    pub use crate::cache::EntityNameCache;
    pub use crate::config::Config;
    pub use crate::db::{PostgresExecutor, QueryExecutor, StaticExecutor};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::query::{CompiledQuery, FilterResolver, QueryCompiler};
    pub use crate::schema::BillingField;
}
