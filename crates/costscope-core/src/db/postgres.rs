//! PostgreSQL execution adapter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use tracing::{debug, error, info, warn};

use super::QueryExecutor;
use crate::config::DatabaseConfig;
use crate::decode::{ScalarRow, ScalarValue};
use crate::error::Result;
use crate::query::{CompiledQuery, SqlValue};
use crate::schema::{BillingField, DataType};

/// Pooled PostgreSQL executor
#[derive(Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    /// Connect a pool; every connection gets the configured statement timeout
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let statement_timeout_ms = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if statement_timeout_ms > 0 {
                        let statement = format!("SET statement_timeout = {statement_timeout_ms}");
                        conn.execute(statement.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            statement_timeout_ms, "Connected to billing database"
        );
        Ok(Self { pool })
    }

    /// Executor over an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn is_available(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        match self.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Billing database unavailable");
                false
            }
        }
    }

    async fn query(&self, query: &CompiledQuery) -> Result<Vec<ScalarRow>> {
        let mut statement = sqlx::query(&query.sql);
        for param in &query.params {
            statement = match param {
                SqlValue::Text(value) => statement.bind(value.clone()),
                SqlValue::Timestamp(value) => statement.bind(*value),
            };
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(|e| {
            error!(sql = %query.sql, error = %e, "Billing query failed");
            e
        })?;
        debug!(kind = ?query.kind, rows = rows.len(), "Billing query returned");

        rows.iter().map(|row| read_row(row, &query.fields)).collect()
    }
}

fn read_row(row: &PgRow, fields: &[BillingField]) -> Result<ScalarRow> {
    fields
        .iter()
        .enumerate()
        .map(|(index, field)| read_column(row, index, *field))
        .collect()
}

fn read_column(row: &PgRow, index: usize, field: BillingField) -> Result<ScalarValue> {
    let value = match field.data_type() {
        DataType::String => row
            .try_get::<Option<String>, _>(index)?
            .map(ScalarValue::Text),
        DataType::Integer => row
            .try_get::<Option<i64>, _>(index)?
            .map(ScalarValue::Integer),
        DataType::Double => row
            .try_get::<Option<f64>, _>(index)?
            .map(ScalarValue::Double),
        DataType::Timestamp => read_timestamp(row, index)?.map(ScalarValue::Timestamp),
    };
    Ok(value.unwrap_or(ScalarValue::Null))
}

/// `timestamptz` columns decode directly; `date_trunc(.. at time zone ..)`
/// yields a plain `timestamp` already in GMT
fn read_timestamp(row: &PgRow, index: usize) -> Result<Option<DateTime<Utc>>> {
    match row.try_get::<Option<DateTime<Utc>>, _>(index) {
        Ok(value) => Ok(value),
        Err(_) => Ok(row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|naive| Utc.from_utc_datetime(&naive))),
    }
}
