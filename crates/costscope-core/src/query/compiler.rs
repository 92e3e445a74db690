//! Compilation of billing requests into SQL over the fact table

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use super::ast::{AggregateFn, CompareOp, Expr, OrderItem, Predicate, SelectQuery, SqlValue};
use super::resolver::FilterResolver;
use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::models::{
    AggregateOperation, AggregationFunction, BillingFilter, BillingQuery, EntityGroupBy,
    IdDimension, IdFilter, IdOperator, SortCriterion, SortOrder, TimeGranularity, TimeOperator,
};
use crate::schema::{BillingField, DataType, UNALLOCATED};

/// Instance types that make up a cluster's own cost
pub const CLUSTER_INSTANCE_TYPES: [&str; 3] =
    ["ECS_TASK_FARGATE", "ECS_CONTAINER_INSTANCE", "K8S_NODE"];

/// Instance type of Kubernetes nodes
pub const NODE_INSTANCE_TYPE: &str = "K8S_NODE";

/// Instance type of Kubernetes pods
pub const POD_INSTANCE_TYPE: &str = "K8S_POD";

/// Instance type of rows carrying a cluster's unallocated cost
pub const CLUSTER_UNALLOCATED: &str = "CLUSTER_UNALLOCATED";

const DAY_MILLIS: i64 = 86_400_000;

/// What a compiled statement computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Aggregations grouped by entities and/or time
    Aggregate,
    /// Window totals with first and last start time
    TrendStats,
    /// Distinct dimension values
    FilterValues,
    /// Number of distinct values of one dimension
    TotalCount,
}

/// Immutable result of compiling one request
#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    /// Variant
    pub kind: QueryKind,
    /// SQL text with `$n` placeholders
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<SqlValue>,
    /// Fact table read
    pub table: String,
    /// Output fields in select order
    pub fields: Vec<BillingField>,
    /// Group-by fields in order
    pub group_by_fields: Vec<BillingField>,
    /// Filters after rewriting and resolution
    pub filters: Vec<BillingFilter>,
    /// Sort criteria that survived validation
    pub sort: Vec<SortCriterion>,
    /// Syntax tree the SQL was rendered from
    #[serde(skip)]
    pub select: SelectQuery,
}

/// Select list under construction together with its field metadata
struct Plan {
    select: SelectQuery,
    fields: Vec<BillingField>,
    group_by_fields: Vec<BillingField>,
}

impl Plan {
    fn new(table: &str) -> Self {
        Self {
            select: SelectQuery::from_table(table),
            fields: Vec::new(),
            group_by_fields: Vec::new(),
        }
    }

    fn add_aggregate(&mut self, function: AggregateFn, field: BillingField) {
        self.select
            .select(Expr::aggregate(function, field.column()), Some(field.alias()));
        self.fields.push(field);
    }

    fn add_group_by_column(&mut self, field: BillingField, not_null: bool) {
        let column = field.column();
        self.select.select(Expr::Column(column), None);
        self.select.group_by.push(Expr::Column(column));
        if not_null {
            self.select.predicates.push(Predicate::NotNull(column));
        }
        self.fields.push(field);
        self.group_by_fields.push(field);
    }

    fn add_time_bucket(&mut self, granularity: TimeGranularity) {
        let bucket = Expr::TimeBucket {
            unit: granularity.unit(),
            column: BillingField::TimeSeries.column(),
        };
        self.select
            .select(bucket.clone(), Some(BillingField::TimeSeries.alias()));
        self.select.group_by.push(bucket);
        self.select.order_by.push(OrderItem {
            expr: Expr::Alias(BillingField::TimeSeries.alias()),
            descending: false,
        });
        self.fields.push(BillingField::TimeSeries);
        self.group_by_fields.push(BillingField::TimeSeries);
    }

    /// `NODE` and `POD` restrict the instance type and group by instance
    fn add_node_or_pod(&mut self, entities: &[EntityGroupBy], filters: &mut Vec<BillingFilter>) {
        let node = entities.contains(&EntityGroupBy::Node);
        let pod = entities.contains(&EntityGroupBy::Pod);
        if !node && !pod {
            return;
        }

        let mut instance_types = Vec::new();
        if node {
            instance_types.push(NODE_INSTANCE_TYPE);
        }
        if pod {
            instance_types.push(POD_INSTANCE_TYPE);
        }
        filters.push(BillingFilter::id(
            IdDimension::InstanceType,
            IdOperator::In,
            instance_types,
        ));

        self.add_group_by_column(BillingField::InstanceId, true);
        self.add_group_by_column(BillingField::InstanceType, false);
        self.add_group_by_column(BillingField::ClusterName, false);
        if !node {
            self.add_group_by_column(BillingField::InstanceName, true);
            self.add_group_by_column(BillingField::Namespace, false);
            self.add_group_by_column(BillingField::CloudProviderId, false);
            self.add_group_by_column(BillingField::ClusterId, false);
            self.add_group_by_column(BillingField::WorkloadName, false);
        }
    }

    fn add_filters(&mut self, filters: &[BillingFilter]) {
        for filter in filters {
            match filter {
                BillingFilter::Id(id) => {
                    if let Some(predicate) = id_predicate(id) {
                        self.select.predicates.push(predicate);
                    }
                }
                BillingFilter::StartTime(time) | BillingFilter::EndTime(time) => {
                    let op = match time.operator {
                        TimeOperator::After => CompareOp::GtEq,
                        TimeOperator::Before => CompareOp::LtEq,
                    };
                    self.select.predicates.push(Predicate::Compare {
                        column: BillingField::StartTime.column(),
                        op,
                        value: SqlValue::Timestamp(time.instant()),
                    });
                }
                other => error!(filter = ?other, "Failed to apply unresolved filter"),
            }
        }
    }

    fn add_account(&mut self, account_id: &str) {
        self.select.predicates.push(Predicate::Compare {
            column: BillingField::AccountId.column(),
            op: CompareOp::Eq,
            value: SqlValue::Text(account_id.to_string()),
        });
    }

    /// Keep criteria with a direction whose key is selected
    fn add_sort(&mut self, criteria: &[SortCriterion]) -> Vec<SortCriterion> {
        let kept: Vec<SortCriterion> = criteria
            .iter()
            .filter(|c| c.order.is_some() && self.fields.contains(&c.sort_type.field()))
            .copied()
            .collect();
        for criterion in &kept {
            let field = criterion.sort_type.field();
            let expr = match field.data_type() {
                DataType::String => Expr::Column(field.column()),
                _ if field == BillingField::StartTime => Expr::Column(field.column()),
                _ => Expr::Alias(field.alias()),
            };
            self.select.order_by.push(OrderItem {
                expr,
                descending: criterion.order == Some(SortOrder::Descending),
            });
        }
        kept
    }

    fn finish(
        self,
        kind: QueryKind,
        filters: Vec<BillingFilter>,
        sort: Vec<SortCriterion>,
    ) -> Result<CompiledQuery> {
        if self.select.columns.is_empty() {
            return Err(Error::validation(
                "request selects nothing: add an aggregation or a group-by",
            ));
        }
        let rendered = self.select.render();
        debug!(?kind, sql = %rendered.sql, params = rendered.params.len(), "Compiled billing query");
        Ok(CompiledQuery {
            kind,
            sql: rendered.sql,
            params: rendered.params,
            table: self.select.from.clone(),
            fields: self.fields,
            group_by_fields: self.group_by_fields,
            filters,
            sort,
            select: self.select,
        })
    }
}

/// Predicate for an id filter, `None` when the filter is incomplete
fn id_predicate(filter: &IdFilter) -> Option<Predicate> {
    let column = filter.dimension.field().column();
    let Some(operator) = filter.operator else {
        info!(dimension = ?filter.dimension, "Not adding filter without operator");
        return None;
    };
    if filter.values.is_empty() && operator != IdOperator::NotNull {
        info!(dimension = ?filter.dimension, ?operator, "Not adding filter without values");
        return None;
    }

    let predicate = match operator {
        IdOperator::Equals | IdOperator::In => Predicate::In {
            column,
            values: filter.values.clone(),
            negated: false,
        },
        IdOperator::NotIn => Predicate::In {
            column,
            values: filter.values.clone(),
            negated: true,
        },
        IdOperator::NotNull => Predicate::NotNull(column),
        IdOperator::Like => Predicate::Like {
            column,
            pattern: format!("%{}%", filter.values[0]),
        },
    };
    Some(predicate)
}

/// Map a requested aggregation onto the allow-list
fn aggregation_field(aggregation: &AggregationFunction) -> Result<(AggregateFn, BillingField)> {
    use AggregateOperation::{Avg, Count, Max, Sum};

    let column = aggregation.column.to_ascii_lowercase();
    let field = match (aggregation.operation, column.as_str()) {
        (Sum, "billingamount") => BillingField::Sum,
        (Sum, "idlecost") => BillingField::IdleCost,
        (Sum, "cpuidlecost") => BillingField::CpuIdleCost,
        (Sum, "memoryidlecost") => BillingField::MemoryIdleCost,
        (Sum, "unallocatedcost") => BillingField::UnallocatedCost,
        (Sum, "networkcost") => BillingField::NetworkCost,
        (Sum, "systemcost") => BillingField::SystemCost,
        (Sum, "cpubillingamount") => BillingField::CpuBillingAmount,
        (Sum, "memorybillingamount") => BillingField::MemoryBillingAmount,
        (Sum, "cpurequest") => BillingField::CpuRequest,
        (Sum, "memoryrequest") => BillingField::MemoryRequest,
        (Max, "maxcpuutilization") => BillingField::MaxCpuUtilization,
        (Max, "maxmemoryutilization") => BillingField::MaxMemoryUtilization,
        (Avg, "avgcpuutilization") => BillingField::AvgCpuUtilization,
        (Avg, "avgmemoryutilization") => BillingField::AvgMemoryUtilization,
        (Count, "instanceid") => BillingField::Count,
        _ => return Err(Error::unsupported("aggregation", aggregation)),
    };
    let function = match aggregation.operation {
        Sum => AggregateFn::Sum,
        Max => AggregateFn::Max,
        Avg => AggregateFn::Avg,
        Count => AggregateFn::Count,
    };
    Ok((function, field))
}

fn has_instance_type_filter(filters: &[BillingFilter]) -> bool {
    filters.iter().any(|f| f.is_id(IdDimension::InstanceType))
}

fn has_cluster_filter(filters: &[BillingFilter]) -> bool {
    filters.iter().any(|f| f.is_id(IdDimension::Cluster))
}

/// Any filter other than cluster and time bounds
fn has_additional_filter(filters: &[BillingFilter]) -> bool {
    filters
        .iter()
        .any(|f| !(f.is_id(IdDimension::Cluster) || f.is_time()))
}

/// Whether the view shows a cluster's own cost and must exclude pod rows
fn needs_cluster_instance_types(entities: &[EntityGroupBy], filters: &[BillingFilter]) -> bool {
    if has_instance_type_filter(filters) || has_additional_filter(filters) {
        return false;
    }
    let cluster_group_by = entities.contains(&EntityGroupBy::Cluster)
        && !entities.iter().any(|e| e.is_cluster_drilldown());
    let cluster_view = has_cluster_filter(filters)
        && entities.iter().all(|e| *e == EntityGroupBy::StartTime);
    cluster_group_by || cluster_view
}

fn cluster_instance_type_filter() -> BillingFilter {
    BillingFilter::id(
        IdDimension::InstanceType,
        IdOperator::In,
        CLUSTER_INSTANCE_TYPES,
    )
}

/// Namespace first when grouping by workload, ECS dimensions last, then
/// cluster (or else application) first
pub fn order_group_bys(entities: &[EntityGroupBy]) -> Vec<EntityGroupBy> {
    let mut ordered: Vec<EntityGroupBy> = entities.to_vec();
    if ordered.contains(&EntityGroupBy::WorkloadName) && !ordered.contains(&EntityGroupBy::Namespace)
    {
        ordered.insert(0, EntityGroupBy::Namespace);
    }

    let mut drilled: Vec<EntityGroupBy> = ordered.iter().copied().filter(|e| !e.is_ecs()).collect();
    for ecs in [
        EntityGroupBy::LaunchType,
        EntityGroupBy::CloudServiceName,
        EntityGroupBy::TaskId,
    ] {
        if ordered.contains(&ecs) {
            drilled.push(ecs);
        }
    }

    for head in [EntityGroupBy::Cluster, EntityGroupBy::Application] {
        if drilled.contains(&head) {
            let mut reordered = vec![head];
            reordered.extend(drilled.iter().copied().filter(|e| *e != head));
            return reordered;
        }
    }
    drilled
}

/// Node instance ids become parent instance ids under workload and namespace
fn rewrite_instance_id_filters(
    entities: &[EntityGroupBy],
    filters: Vec<BillingFilter>,
) -> Vec<BillingFilter> {
    let by_workload = entities
        .iter()
        .any(|e| matches!(e, EntityGroupBy::WorkloadName | EntityGroupBy::Namespace));
    if !by_workload || !filters.iter().any(|f| f.is_id(IdDimension::NodeInstanceId)) {
        return filters;
    }
    let rewritten: Vec<BillingFilter> = filters
        .into_iter()
        .map(|f| match f {
            BillingFilter::Id(id) if id.dimension == IdDimension::NodeInstanceId => {
                BillingFilter::Id(IdFilter {
                    dimension: IdDimension::ParentInstanceId,
                    ..id
                })
            }
            other => other,
        })
        .collect();
    info!(filters = ?rewritten, "Rewrote node instance filters to parent instance filters");
    rewritten
}

fn add_workload_type_guard(entities: &[EntityGroupBy], filters: &mut Vec<BillingFilter>) {
    if entities.contains(&EntityGroupBy::WorkloadName)
        && !filters.iter().any(|f| f.is_id(IdDimension::WorkloadType))
    {
        filters.push(BillingFilter::Id(IdFilter {
            dimension: IdDimension::WorkloadType,
            operator: Some(IdOperator::NotNull),
            values: Vec::new(),
        }));
    }
}

fn exclude_unallocated_rows(entities: &[EntityGroupBy], filters: &mut Vec<BillingFilter>) {
    for entity in entities {
        let dimension = match entity {
            EntityGroupBy::WorkloadName => IdDimension::WorkloadName,
            EntityGroupBy::Namespace => IdDimension::Namespace,
            EntityGroupBy::CloudServiceName => IdDimension::CloudServiceName,
            EntityGroupBy::TaskId => IdDimension::TaskId,
            EntityGroupBy::LaunchType => IdDimension::LaunchType,
            _ => continue,
        };
        filters.push(BillingFilter::id(dimension, IdOperator::NotIn, [UNALLOCATED]));
    }
}

/// Whether a cluster drill-down should show an extra unallocated row
pub fn shows_unallocated_cost(entities: &[EntityGroupBy], filters: &[BillingFilter]) -> bool {
    let drilldown = entities.iter().any(|e| e.is_cluster_drilldown());
    let mut values: Vec<&str> = Vec::new();
    let mut workload_selected = false;
    for filter in filters {
        let BillingFilter::Id(id) = filter else {
            continue;
        };
        match id.dimension {
            IdDimension::WorkloadName => {
                values.extend(id.values.iter().map(String::as_str));
                workload_selected |= id.is_inclusive();
            }
            IdDimension::Namespace
            | IdDimension::CloudServiceName
            | IdDimension::LaunchType
            | IdDimension::TaskId => values.extend(id.values.iter().map(String::as_str)),
            _ => {}
        }
    }
    drilldown && !values.contains(&UNALLOCATED) && !workload_selected
}

/// Same request restricted to a cluster's unallocated rows
pub fn unallocated_cost_query(query: &BillingQuery) -> BillingQuery {
    let mut unallocated = query.clone();
    unallocated
        .filters
        .retain(|f| !f.is_id(IdDimension::InstanceType));
    unallocated.filters.push(BillingFilter::id(
        IdDimension::InstanceType,
        IdOperator::Equals,
        [CLUSTER_UNALLOCATED],
    ));
    unallocated
}

/// Compiles [`BillingQuery`] requests
#[derive(Clone)]
pub struct QueryCompiler {
    config: QueryConfig,
    resolver: FilterResolver,
}

impl QueryCompiler {
    /// Compiler over the configured tables
    pub fn new(config: QueryConfig, resolver: FilterResolver) -> Self {
        Self { config, resolver }
    }

    /// Compiler configuration
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn validate(&self, query: &BillingQuery) -> Result<()> {
        if query.account_id.trim().is_empty() {
            return Err(Error::validation("account_id is required"));
        }
        if query.group_by.len() > self.config.max_group_bys {
            return Err(Error::validation(format!(
                "at most {} group-bys are supported, got {}",
                self.config.max_group_bys,
                query.group_by.len()
            )));
        }
        let before_epoch = query.filters.iter().any(|f| {
            matches!(f, BillingFilter::StartTime(t) | BillingFilter::EndTime(t) if t.value < 0)
        });
        if before_epoch {
            return Err(Error::validation("time filters must not precede the epoch"));
        }
        Ok(())
    }

    /// Hourly table for hourly buckets or windows starting within the
    /// configured number of days before today (GMT)
    fn table(
        &self,
        granularity: Option<TimeGranularity>,
        filters: &[BillingFilter],
        now: DateTime<Utc>,
    ) -> &str {
        if granularity == Some(TimeGranularity::Hour) || self.starts_recently(filters, now) {
            &self.config.hourly_table
        } else {
            &self.config.daily_table
        }
    }

    fn starts_recently(&self, filters: &[BillingFilter], now: DateTime<Utc>) -> bool {
        let earliest = filters
            .iter()
            .filter_map(|f| match f {
                BillingFilter::StartTime(t) => Some(t.value),
                _ => None,
            })
            .min();
        let Some(start) = earliest else {
            return false;
        };
        let now_millis = now.timestamp_millis();
        let today = now_millis - now_millis.rem_euclid(DAY_MILLIS);
        start >= today - self.config.hourly_window_days * DAY_MILLIS
    }

    /// Compile an aggregate request
    pub async fn compile(&self, query: &BillingQuery) -> Result<CompiledQuery> {
        self.compile_at(query, Utc::now()).await
    }

    /// Compile an aggregate request as of `now`
    pub async fn compile_at(&self, query: &BillingQuery, now: DateTime<Utc>) -> Result<CompiledQuery> {
        self.validate(query)?;
        let entities = query.entity_group_bys();
        let granularity = query.time_granularity();
        let mut filters = query.filters.clone();

        if needs_cluster_instance_types(&entities, &filters) {
            filters.push(cluster_instance_type_filter());
        }

        let entities = order_group_bys(&entities);
        let mut plan = Plan::new(self.table(granularity, &filters, now));

        for aggregation in &query.aggregations {
            let (function, field) = aggregation_field(aggregation)?;
            plan.add_aggregate(function, field);
        }
        if let Some(granularity) = granularity {
            plan.add_time_bucket(granularity);
        }
        for entity in &entities {
            if let Some(field) = entity.field() {
                plan.add_group_by_column(field, true);
            }
        }
        plan.add_node_or_pod(&entities, &mut filters);

        let mut filters = rewrite_instance_id_filters(&entities, filters);
        add_workload_type_guard(&entities, &mut filters);

        let filters = self.resolver.resolve(&query.account_id, &filters).await;
        plan.add_filters(&filters);
        let sort = plan.add_sort(&query.sort);
        plan.add_account(&query.account_id);

        if entities
            .iter()
            .any(|e| matches!(e, EntityGroupBy::Node | EntityGroupBy::Pod))
        {
            plan.select.limit = query.limit;
            plan.select.offset = query.offset;
        }

        plan.finish(QueryKind::Aggregate, filters, sort)
    }

    /// Compile a window-total request with first and last start time
    pub async fn compile_trend_stats(&self, query: &BillingQuery) -> Result<CompiledQuery> {
        self.compile_trend_stats_at(query, Utc::now()).await
    }

    /// Compile a window-total request as of `now`
    pub async fn compile_trend_stats_at(
        &self,
        query: &BillingQuery,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery> {
        self.validate(query)?;
        let mut filters = query.filters.clone();
        let mut plan = Plan::new(self.table(None, &filters, now));

        for aggregation in &query.aggregations {
            let (function, field) = aggregation_field(aggregation)?;
            plan.add_aggregate(function, field);
        }
        plan.add_aggregate(AggregateFn::Min, BillingField::MinStartTime);
        plan.add_aggregate(AggregateFn::Max, BillingField::MaxStartTime);

        if has_cluster_filter(&filters)
            && !has_additional_filter(&filters)
            && !has_instance_type_filter(&filters)
        {
            filters.push(cluster_instance_type_filter());
        }

        let filters = self.resolver.resolve(&query.account_id, &filters).await;
        plan.add_filters(&filters);
        plan.add_account(&query.account_id);

        plan.finish(QueryKind::TrendStats, filters, Vec::new())
    }

    /// Compile a distinct-values request
    pub async fn compile_filter_values(&self, query: &BillingQuery) -> Result<CompiledQuery> {
        self.compile_filter_values_at(query, Utc::now()).await
    }

    /// Compile a distinct-values request as of `now`
    pub async fn compile_filter_values_at(
        &self,
        query: &BillingQuery,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery> {
        self.validate(query)?;
        let mut entities = query.entity_group_bys();
        if entities.is_empty() {
            return Err(Error::validation("filter values need at least one group-by"));
        }
        if entities.contains(&EntityGroupBy::Cluster) && !entities.contains(&EntityGroupBy::ClusterType)
        {
            entities.push(EntityGroupBy::ClusterType);
        }

        let mut filters = query.filters.clone();
        let mut plan = Plan::new(self.table(None, &filters, now));
        for entity in &entities {
            if let Some(field) = entity.field() {
                plan.add_group_by_column(field, true);
            }
        }
        plan.add_node_or_pod(&entities, &mut filters);

        exclude_unallocated_rows(&entities, &mut filters);
        add_workload_type_guard(&entities, &mut filters);

        let filters = self.resolver.resolve(&query.account_id, &filters).await;
        plan.add_filters(&filters);
        plan.add_account(&query.account_id);
        let sort = plan.add_sort(&query.sort);
        plan.select.limit = query.limit;
        plan.select.offset = query.offset;

        plan.finish(QueryKind::FilterValues, filters, sort)
    }

    /// Compile a count of distinct values of the first group-by within the
    /// request's time bounds
    pub async fn compile_total_count(&self, query: &BillingQuery) -> Result<CompiledQuery> {
        self.compile_total_count_at(query, Utc::now()).await
    }

    /// Compile a distinct-value count as of `now`
    pub async fn compile_total_count_at(
        &self,
        query: &BillingQuery,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery> {
        self.validate(query)?;
        let entity = query
            .entity_group_bys()
            .first()
            .copied()
            .ok_or_else(|| Error::validation("total count needs a group-by"))?;
        let counted = entity.field().unwrap_or(BillingField::InstanceId);

        let filters: Vec<BillingFilter> = query
            .filters
            .iter()
            .filter(|f| f.is_time())
            .cloned()
            .collect();
        let mut plan = Plan::new(self.table(None, &filters, now));
        plan.select.select(
            Expr::Aggregate {
                function: AggregateFn::Count,
                column: counted.column(),
                distinct: true,
            },
            Some(BillingField::Count.alias()),
        );
        plan.fields.push(BillingField::Count);
        plan.add_filters(&filters);
        plan.add_account(&query.account_id);

        plan.finish(QueryKind::TotalCount, filters, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortType, TimeFilter};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const DAY: i64 = DAY_MILLIS;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(QueryConfig::default(), FilterResolver::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    /// A window far enough in the past to read the daily table
    fn window() -> (i64, i64) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        (start, start + 10 * DAY)
    }

    fn base_query() -> BillingQuery {
        let (start, end) = window();
        BillingQuery::new("acc")
            .filter(BillingFilter::StartTime(TimeFilter::after(start)))
            .filter(BillingFilter::EndTime(TimeFilter::before(end)))
            .aggregate(AggregationFunction::total_cost())
    }

    fn instance_type_in(values: &[&str]) -> Predicate {
        Predicate::In {
            column: "instancetype",
            values: values.iter().map(|v| (*v).to_string()).collect(),
            negated: false,
        }
    }

    #[tokio::test]
    async fn test_compile_daily_cost_by_day() {
        let query = base_query().bucket_by(TimeGranularity::Day);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert_eq!(compiled.table, "billing_data");
        assert_eq!(
            compiled.fields,
            vec![BillingField::Sum, BillingField::TimeSeries]
        );
        assert_eq!(compiled.group_by_fields, vec![BillingField::TimeSeries]);
        assert_eq!(
            compiled.sql,
            "SELECT SUM(t0.billingamount) AS cost, \
             date_trunc('day', t0.starttime at time zone 'GMT') AS time_series \
             FROM billing_data t0 \
             WHERE t0.starttime >= $1 AND t0.starttime <= $2 AND t0.accountid = $3 \
             GROUP BY date_trunc('day', t0.starttime at time zone 'GMT') \
             ORDER BY time_series ASC"
        );
        assert_eq!(compiled.params.len(), 3);
        assert_eq!(compiled.params[2], SqlValue::Text("acc".into()));
    }

    #[tokio::test]
    async fn test_group_by_cap_rejects_sixth_entry() {
        let query = base_query()
            .group_by(EntityGroupBy::Cluster)
            .group_by(EntityGroupBy::Namespace)
            .group_by(EntityGroupBy::WorkloadName)
            .group_by(EntityGroupBy::Region)
            .group_by(EntityGroupBy::CloudProvider)
            .bucket_by(TimeGranularity::Day);

        let err = compiler().compile_at(&query, now()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_five_group_bys_compile() {
        let query = base_query()
            .group_by(EntityGroupBy::Cluster)
            .group_by(EntityGroupBy::Namespace)
            .group_by(EntityGroupBy::WorkloadName)
            .group_by(EntityGroupBy::Region)
            .bucket_by(TimeGranularity::Day);
        assert!(compiler().compile_at(&query, now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_time_filter_before_epoch_is_rejected() {
        let query = base_query()
            .filter(BillingFilter::StartTime(TimeFilter::after(i64::MIN)))
            .bucket_by(TimeGranularity::Day);

        let err = compiler().compile_at(&query, now()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(compiler().compile_trend_stats_at(&query, now()).await.is_err());
    }

    #[tokio::test]
    async fn test_cluster_group_by_injects_instance_types() {
        let query = base_query().group_by(EntityGroupBy::Cluster);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert!(compiled
            .select
            .has_predicate(&instance_type_in(&CLUSTER_INSTANCE_TYPES)));
        assert!(compiled.filters.contains(&cluster_instance_type_filter()));
    }

    #[tokio::test]
    async fn test_cluster_drilldown_does_not_inject_instance_types() {
        let query = base_query()
            .group_by(EntityGroupBy::Cluster)
            .group_by(EntityGroupBy::Namespace);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(!compiled
            .select
            .predicates
            .iter()
            .any(|p| p.column() == "instancetype"));
    }

    #[tokio::test]
    async fn test_additional_filter_blocks_instance_type_injection() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::Application, IdOperator::In, ["app1"]))
            .group_by(EntityGroupBy::Cluster);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(!compiled.filters.contains(&cluster_instance_type_filter()));
    }

    #[tokio::test]
    async fn test_cluster_filter_without_group_by_injects_instance_types() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::Cluster, IdOperator::In, ["c1"]))
            .bucket_by(TimeGranularity::Day);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(compiled.filters.contains(&cluster_instance_type_filter()));
    }

    #[tokio::test]
    async fn test_existing_instance_type_filter_is_kept() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::InstanceType, IdOperator::In, ["K8S_POD"]))
            .group_by(EntityGroupBy::Cluster);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(compiled.select.has_predicate(&instance_type_in(&["K8S_POD"])));
        assert!(!compiled.filters.contains(&cluster_instance_type_filter()));
    }

    #[tokio::test]
    async fn test_workload_group_by_prepends_namespace() {
        let query = base_query().group_by(EntityGroupBy::WorkloadName);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert_eq!(
            compiled.group_by_fields,
            vec![BillingField::Namespace, BillingField::WorkloadName]
        );
        assert!(compiled.select.has_predicate(&Predicate::NotNull("workloadtype")));
    }

    #[rstest]
    #[case(
        vec![EntityGroupBy::TaskId, EntityGroupBy::Cluster, EntityGroupBy::LaunchType],
        vec![EntityGroupBy::Cluster, EntityGroupBy::LaunchType, EntityGroupBy::TaskId]
    )]
    #[case(
        vec![EntityGroupBy::Service, EntityGroupBy::Application],
        vec![EntityGroupBy::Application, EntityGroupBy::Service]
    )]
    #[case(
        vec![EntityGroupBy::WorkloadName, EntityGroupBy::Cluster],
        vec![EntityGroupBy::Cluster, EntityGroupBy::Namespace, EntityGroupBy::WorkloadName]
    )]
    #[case(
        vec![EntityGroupBy::CloudServiceName, EntityGroupBy::Region],
        vec![EntityGroupBy::Region, EntityGroupBy::CloudServiceName]
    )]
    fn test_order_group_bys(#[case] input: Vec<EntityGroupBy>, #[case] expected: Vec<EntityGroupBy>) {
        assert_eq!(order_group_bys(&input), expected);
    }

    #[tokio::test]
    async fn test_sort_keeps_only_selected_keys() {
        let query = base_query()
            .group_by(EntityGroupBy::Application)
            .sort_by(SortType::Amount, SortOrder::Descending)
            .sort_by(SortType::Cluster, SortOrder::Ascending)
            .sort_by(SortType::Workload, SortOrder::Ascending);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert_eq!(
            compiled.sort,
            vec![SortCriterion::new(SortType::Amount, SortOrder::Descending)]
        );
        assert!(compiled.sql.ends_with("ORDER BY cost DESC"));
    }

    #[tokio::test]
    async fn test_sort_without_direction_is_dropped() {
        let mut query = base_query().group_by(EntityGroupBy::Application);
        query.sort.push(SortCriterion {
            sort_type: SortType::Application,
            order: None,
        });
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(compiled.sort.is_empty());
        assert!(!compiled.sql.contains("ORDER BY"));
    }

    #[tokio::test]
    async fn test_unsupported_aggregation_names_value() {
        let query = BillingQuery::new("acc")
            .aggregate(AggregationFunction::new(AggregateOperation::Max, "billingamount"));
        let err = compiler().compile_at(&query, now()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported aggregation: MAX(billingamount)");
    }

    #[tokio::test]
    async fn test_node_group_by_restricts_instance_type_and_pages() {
        let mut query = base_query()
            .filter(BillingFilter::id(IdDimension::Cluster, IdOperator::In, ["c1"]))
            .group_by(EntityGroupBy::Node);
        query.limit = Some(25);
        query.offset = Some(50);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert_eq!(
            compiled.group_by_fields,
            vec![
                BillingField::InstanceId,
                BillingField::InstanceType,
                BillingField::ClusterName
            ]
        );
        assert!(compiled.select.has_predicate(&instance_type_in(&["K8S_NODE"])));
        assert!(compiled.sql.ends_with("LIMIT 25 OFFSET 50"));
    }

    #[tokio::test]
    async fn test_pod_group_by_adds_pod_columns() {
        let query = base_query().group_by(EntityGroupBy::Pod);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert_eq!(compiled.group_by_fields.len(), 8);
        assert!(compiled.select.has_predicate(&instance_type_in(&["K8S_POD"])));
        assert!(compiled.select.has_predicate(&Predicate::NotNull("instancename")));
    }

    #[tokio::test]
    async fn test_aggregate_without_node_ignores_limit() {
        let mut query = base_query().group_by(EntityGroupBy::Cluster);
        query.limit = Some(5);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert!(!compiled.sql.contains("LIMIT"));
    }

    #[tokio::test]
    async fn test_node_instance_filter_rewritten_under_workload() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::NodeInstanceId, IdOperator::In, ["node-1"]))
            .group_by(EntityGroupBy::WorkloadName);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();

        assert!(compiled
            .filters
            .contains(&BillingFilter::id(IdDimension::ParentInstanceId, IdOperator::In, ["node-1"])));
        assert!(compiled.select.has_predicate(&Predicate::In {
            column: "parentinstanceid",
            values: vec!["node-1".into()],
            negated: false,
        }));
    }

    #[tokio::test]
    async fn test_id_operators() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::Namespace, IdOperator::Like, ["kube"]))
            .filter(BillingFilter::id(IdDimension::Region, IdOperator::NotIn, ["us-east-1"]))
            .filter(BillingFilter::id(IdDimension::Service, IdOperator::Equals, ["svc"]))
            .filter(BillingFilter::id(IdDimension::Environment, IdOperator::In, Vec::<String>::new()))
            .group_by(EntityGroupBy::Service);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        let select = &compiled.select;

        assert!(select.has_predicate(&Predicate::Like {
            column: "namespace",
            pattern: "%kube%".into()
        }));
        assert!(select.has_predicate(&Predicate::In {
            column: "region",
            values: vec!["us-east-1".into()],
            negated: true
        }));
        assert!(select.has_predicate(&Predicate::In {
            column: "serviceid",
            values: vec!["svc".into()],
            negated: false
        }));
        assert!(!select.predicates.iter().any(|p| p.column() == "envid"));
    }

    #[tokio::test]
    async fn test_account_predicate_is_last() {
        let query = base_query().group_by(EntityGroupBy::Cluster);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert_eq!(
            compiled.select.predicates.last(),
            Some(&Predicate::Compare {
                column: "accountid",
                op: CompareOp::Eq,
                value: SqlValue::Text("acc".into()),
            })
        );
    }

    #[rstest]
    #[case(TimeGranularity::Hour, 0, "billing_data_hourly")]
    #[case(TimeGranularity::Day, 0, "billing_data")]
    #[case(TimeGranularity::Day, 7, "billing_data_hourly")]
    #[case(TimeGranularity::Day, 8, "billing_data")]
    #[tokio::test]
    async fn test_table_selection(
        #[case] granularity: TimeGranularity,
        #[case] days_back: i64,
        #[case] table: &str,
    ) {
        let today = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap().timestamp_millis();
        let start = if days_back == 0 {
            window().0
        } else {
            today - days_back * DAY
        };
        let query = BillingQuery::new("acc")
            .filter(BillingFilter::StartTime(TimeFilter::after(start)))
            .aggregate(AggregationFunction::total_cost())
            .bucket_by(granularity);
        let compiled = compiler().compile_at(&query, now()).await.unwrap();
        assert_eq!(compiled.table, table);
    }

    #[tokio::test]
    async fn test_trend_stats_selects_min_max_start_time() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::Cluster, IdOperator::In, ["c1"]))
            .aggregate(AggregationFunction::new(AggregateOperation::Sum, "idlecost"));
        let compiled = compiler().compile_trend_stats_at(&query, now()).await.unwrap();

        assert_eq!(compiled.kind, QueryKind::TrendStats);
        assert_eq!(
            compiled.fields,
            vec![
                BillingField::Sum,
                BillingField::IdleCost,
                BillingField::MinStartTime,
                BillingField::MaxStartTime
            ]
        );
        assert!(compiled.filters.contains(&cluster_instance_type_filter()));
        assert!(compiled.sql.starts_with(
            "SELECT SUM(t0.billingamount) AS cost, SUM(t0.actualidlecost) AS idlecost, \
             MIN(t0.starttime) AS minstarttime, MAX(t0.starttime) AS maxstarttime"
        ));
    }

    #[tokio::test]
    async fn test_filter_values_adds_cluster_type_and_pages() {
        let mut query = base_query().group_by(EntityGroupBy::Cluster);
        query.aggregations.clear();
        query.limit = Some(10);
        query.offset = Some(0);
        let compiled = compiler().compile_filter_values_at(&query, now()).await.unwrap();

        assert_eq!(
            compiled.fields,
            vec![BillingField::ClusterId, BillingField::ClusterType]
        );
        assert!(compiled.sql.ends_with("LIMIT 10 OFFSET 0"));
    }

    #[tokio::test]
    async fn test_filter_values_exclude_unallocated() {
        let mut query = base_query().group_by(EntityGroupBy::Namespace);
        query.aggregations.clear();
        let compiled = compiler().compile_filter_values_at(&query, now()).await.unwrap();
        assert!(compiled.select.has_predicate(&Predicate::In {
            column: "namespace",
            values: vec![UNALLOCATED.to_string()],
            negated: true,
        }));
    }

    #[tokio::test]
    async fn test_total_count_uses_time_filters_only() {
        let query = base_query()
            .filter(BillingFilter::id(IdDimension::Application, IdOperator::In, ["app1"]))
            .group_by(EntityGroupBy::WorkloadName);
        let compiled = compiler().compile_total_count_at(&query, now()).await.unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT COUNT(DISTINCT t0.workloadname) AS count FROM billing_data t0 \
             WHERE t0.starttime >= $1 AND t0.starttime <= $2 AND t0.accountid = $3"
        );
        assert_eq!(compiled.fields, vec![BillingField::Count]);
    }

    #[test]
    fn test_shows_unallocated_cost() {
        let entities = [EntityGroupBy::WorkloadName];
        assert!(shows_unallocated_cost(&entities, &[]));

        let selected = [BillingFilter::id(IdDimension::WorkloadName, IdOperator::In, ["api"])];
        assert!(!shows_unallocated_cost(&entities, &selected));

        let unallocated = [BillingFilter::id(IdDimension::Namespace, IdOperator::In, [UNALLOCATED])];
        assert!(!shows_unallocated_cost(&entities, &unallocated));

        assert!(!shows_unallocated_cost(&[EntityGroupBy::Cluster], &[]));
    }

    #[test]
    fn test_unallocated_cost_query_replaces_instance_type() {
        let query = BillingQuery::new("acc")
            .filter(BillingFilter::id(IdDimension::InstanceType, IdOperator::In, ["K8S_POD"]));
        let unallocated = unallocated_cost_query(&query);
        assert_eq!(
            unallocated.filters,
            vec![BillingFilter::id(
                IdDimension::InstanceType,
                IdOperator::Equals,
                [CLUSTER_UNALLOCATED]
            )]
        );
    }
}
