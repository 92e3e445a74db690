//! Request pipeline: compile, execute, decode, assemble

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use super::entity::{assemble_filter_values, assemble_table, total_count, unallocated_rows};
use super::sunburst::{
    assemble_grid, assemble_nodes, chart_levels, hierarchy_levels, split_hierarchy, union_nodes,
};
use super::time_series::TimeSeriesAssembler;
use super::trend::{previous_window, TrendAssembler, WindowCosts};
use crate::cache::EntityNameCache;
use crate::db::QueryExecutor;
use crate::decode::{DecodedRow, DecodedRows, RowDecoder};
use crate::error::{Error, Result};
use crate::models::{
    AggregateOperation, AggregationFunction, BillingFilter, BillingQuery, EntityGroupBy,
    EntityTable, FilterValues, GroupBy, StackedTimeSeries, SunburstChart, TimeFilter, TimeWindow,
    TrendStats,
};
use crate::query::compiler::{order_group_bys, shows_unallocated_cost, unallocated_cost_query};
use crate::query::{CompiledQuery, QueryCompiler};

fn with_aggregation(query: &mut BillingQuery, aggregation: AggregationFunction) {
    if !query.aggregations.contains(&aggregation) {
        query.aggregations.push(aggregation);
    }
}

fn idle_cost() -> AggregationFunction {
    AggregationFunction::new(AggregateOperation::Sum, "idlecost")
}

fn unallocated_cost() -> AggregationFunction {
    AggregationFunction::new(AggregateOperation::Sum, "unallocatedcost")
}

/// Same request over `window` instead of its own time filters
fn over_window(query: &BillingQuery, window: TimeWindow) -> BillingQuery {
    let mut shifted = query.clone();
    shifted.filters.retain(|f| !f.is_time());
    if let Some(start) = window.start {
        shifted
            .filters
            .push(BillingFilter::StartTime(TimeFilter::after(start)));
    }
    if let Some(end) = window.end {
        shifted.filters.push(BillingFilter::EndTime(TimeFilter::before(end)));
    }
    shifted
}

/// Cost analytics over a billing store
pub struct BillingAnalytics {
    compiler: QueryCompiler,
    executor: Arc<dyn QueryExecutor>,
    names: Arc<EntityNameCache>,
}

impl BillingAnalytics {
    /// Pipeline over `executor`, resolving names through `names`
    pub fn new(
        compiler: QueryCompiler,
        executor: Arc<dyn QueryExecutor>,
        names: Arc<EntityNameCache>,
    ) -> Self {
        Self {
            compiler,
            executor,
            names,
        }
    }

    /// Query compiler
    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Entity name cache
    pub fn names(&self) -> &EntityNameCache {
        &self.names
    }

    /// Whether the billing store can serve queries
    pub async fn is_available(&self) -> bool {
        self.executor.is_available().await
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.executor.is_available().await {
            Ok(())
        } else {
            Err(Error::unavailable("billing database is not available"))
        }
    }

    /// Execute and decode; execution failures degrade to no rows
    async fn fetch(&self, compiled: &CompiledQuery) -> Result<Vec<DecodedRow>> {
        let rows = match self.executor.query(compiled).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(sql = %compiled.sql, error = %e, "Failed to execute billing query");
                return Ok(Vec::new());
            }
        };
        debug!(kind = ?compiled.kind, rows = rows.len(), "Decoding billing rows");
        DecodedRows::new(rows, RowDecoder::new(&compiled.fields, &self.names))
            .try_collect()
            .await
    }

    /// Compile without executing
    pub async fn explain(&self, query: &BillingQuery) -> Result<CompiledQuery> {
        self.compiler.compile(query).await
    }

    /// Stacked time series of a time-bucketed request
    pub async fn time_series(&self, query: &BillingQuery) -> Result<StackedTimeSeries> {
        if query.time_granularity().is_none() {
            return Err(Error::validation("time series requests need a time group-by"));
        }
        self.ensure_available().await?;

        let compiled = self.compiler.compile(query).await?;
        let rows = self.fetch(&compiled).await?;
        let assembler =
            TimeSeriesAssembler::new(&compiled.fields, &compiled.group_by_fields, &compiled.filters);
        Ok(assembler.assemble(&rows, &compiled.filters))
    }

    /// Flat entity table, with an unallocated row set for cluster drill-downs
    pub async fn entities(&self, query: &BillingQuery) -> Result<EntityTable> {
        self.ensure_available().await?;

        let compiled = self.compiler.compile(query).await?;
        let rows = self.fetch(&compiled).await?;
        let mut table = assemble_table(&rows, &compiled.fields);

        let entities = query.entity_group_bys();
        if shows_unallocated_cost(&entities, &query.filters) {
            let mut unallocated = unallocated_cost_query(query);
            unallocated
                .group_by
                .retain(|g| !matches!(g, GroupBy::Entity(e) if e.is_cluster_drilldown()));
            let drilldown: Vec<_> = order_group_bys(&entities)
                .into_iter()
                .filter(|e| e.is_cluster_drilldown())
                .filter_map(EntityGroupBy::field)
                .collect();

            let compiled = self.compiler.compile(&unallocated).await?;
            let rows = self.fetch(&compiled).await?;
            info!(rows = rows.len(), "Adding unallocated cost rows");
            table.rows.extend(unallocated_rows(&rows, &drilldown));
        }
        Ok(table)
    }

    /// Sunburst nodes and grid; deeper hierarchies run one query per branch
    pub async fn sunburst(&self, query: &BillingQuery, add_root: bool) -> Result<SunburstChart> {
        self.ensure_available().await?;

        let levels = hierarchy_levels(&query.entity_group_bys());
        let Some(first) = levels.first().copied() else {
            return Err(Error::validation("sunburst requests need a group-by"));
        };

        let mut base = query.clone();
        base.group_by.retain(|g| matches!(g, GroupBy::Entity(_)));
        with_aggregation(&mut base, AggregationFunction::total_cost());

        let max_group_bys = self.compiler.config().max_group_bys;
        let mut node_lists = Vec::new();
        for (i, hierarchy) in split_hierarchy(&levels).into_iter().enumerate() {
            let mut branch = base.clone();
            branch.group_by = hierarchy.iter().copied().map(GroupBy::Entity).collect();
            if hierarchy.contains(&EntityGroupBy::Cluster) && branch.group_by.len() < max_group_bys {
                branch.group_by.push(GroupBy::Entity(EntityGroupBy::ClusterType));
            }

            let compiled = self.compiler.compile(&branch).await?;
            let rows = self.fetch(&compiled).await?;
            let charted = chart_levels(&compiled.group_by_fields, &hierarchy);
            node_lists.push(assemble_nodes(&rows, &charted, add_root && i == 0));
        }

        let mut grid_query = base;
        grid_query.group_by = vec![GroupBy::Entity(first)];
        with_aggregation(&mut grid_query, idle_cost());
        let compiled = self.compiler.compile(&grid_query).await?;
        let rows = self.fetch(&compiled).await?;
        let grid = match chart_levels(&compiled.group_by_fields, &[first]).first() {
            Some(field) => assemble_grid(&rows, *field),
            None => Vec::new(),
        };

        Ok(SunburstChart {
            nodes: union_nodes(node_lists),
            grid,
        })
    }

    /// Breakdown, forecast and comparison with the preceding window
    pub async fn trend(&self, query: &BillingQuery) -> Result<TrendStats> {
        self.ensure_available().await?;

        let mut query = query.clone();
        with_aggregation(&mut query, AggregationFunction::total_cost());
        with_aggregation(&mut query, idle_cost());
        with_aggregation(&mut query, unallocated_cost());

        let window = TimeWindow::from_filters(&query.filters);
        let compiled = self.compiler.compile_trend_stats(&query).await?;
        let current = WindowCosts::from_rows(&self.fetch(&compiled).await?);

        let previous_window = previous_window(window).filter(|w| w.start.is_some_and(|s| s >= 0));
        let previous = match previous_window {
            Some(previous_window) => {
                let compiled = self
                    .compiler
                    .compile_trend_stats(&over_window(&query, previous_window))
                    .await?;
                Some(WindowCosts::from_rows(&self.fetch(&compiled).await?))
            }
            None => None,
        };

        let now = Utc::now().timestamp_millis();
        Ok(TrendAssembler::new(window, now).assemble(&current, previous.as_ref()))
    }

    /// Distinct values of the requested dimensions and the total count of the
    /// first one
    pub async fn filter_values(&self, query: &BillingQuery) -> Result<FilterValues> {
        self.ensure_available().await?;

        let compiled = self.compiler.compile_filter_values(query).await?;
        let rows = self.fetch(&compiled).await?;

        let count = self.compiler.compile_total_count(query).await?;
        let total = total_count(&self.fetch(&count).await?);

        Ok(assemble_filter_values(&rows, &compiled.group_by_fields, total))
    }
}
