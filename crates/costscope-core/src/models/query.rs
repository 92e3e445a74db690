//! Query request types: group-bys, aggregations, sort criteria

use std::fmt;

use serde::{Deserialize, Serialize};

use super::filter::BillingFilter;
use crate::schema::BillingField;

/// Entity dimension a request can group by
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityGroupBy {
    Application,
    Service,
    Environment,
    Cluster,
    ClusterName,
    ClusterType,
    CloudProvider,
    Region,
    Namespace,
    WorkloadName,
    WorkloadType,
    CloudServiceName,
    TaskId,
    LaunchType,
    InstanceType,
    InstanceName,
    StartTime,
    /// Per-node details; groups by instance id instead of a column of its own
    Node,
    /// Per-pod details; groups by instance id instead of a column of its own
    Pod,
}

impl EntityGroupBy {
    /// Column this group-by selects, `None` for the node and pod pseudo-dimensions
    pub fn field(self) -> Option<BillingField> {
        let field = match self {
            Self::Application => BillingField::AppId,
            Self::Service => BillingField::ServiceId,
            Self::Environment => BillingField::EnvId,
            Self::Cluster => BillingField::ClusterId,
            Self::ClusterName => BillingField::ClusterName,
            Self::ClusterType => BillingField::ClusterType,
            Self::CloudProvider => BillingField::CloudProviderId,
            Self::Region => BillingField::Region,
            Self::Namespace => BillingField::Namespace,
            Self::WorkloadName => BillingField::WorkloadName,
            Self::WorkloadType => BillingField::WorkloadType,
            Self::CloudServiceName => BillingField::CloudServiceName,
            Self::TaskId => BillingField::TaskId,
            Self::LaunchType => BillingField::LaunchType,
            Self::InstanceType => BillingField::InstanceType,
            Self::InstanceName => BillingField::InstanceName,
            Self::StartTime => BillingField::StartTime,
            Self::Node | Self::Pod => return None,
        };
        Some(field)
    }

    /// Dimensions that drill into a cluster
    pub fn is_cluster_drilldown(self) -> bool {
        matches!(
            self,
            Self::WorkloadName
                | Self::Namespace
                | Self::CloudServiceName
                | Self::TaskId
                | Self::LaunchType
        )
    }

    /// Dimensions only present on ECS rows
    pub fn is_ecs(self) -> bool {
        matches!(self, Self::CloudServiceName | Self::TaskId | Self::LaunchType)
    }

    /// Dimensions only present on Kubernetes rows
    pub fn is_kubernetes(self) -> bool {
        matches!(self, Self::WorkloadName | Self::Namespace)
    }
}

/// Time bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeGranularity {
    /// One hour
    Hour,
    /// One day
    Day,
    /// One ISO week
    Week,
    /// One calendar month
    Month,
}

impl TimeGranularity {
    /// `date_trunc` unit
    pub fn unit(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// One group-by entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Group by an entity dimension
    Entity(EntityGroupBy),
    /// Bucket by time
    Time(TimeGranularity),
}

/// Aggregate operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateOperation {
    /// `SUM`
    Sum,
    /// `MAX`
    Max,
    /// `AVG`
    Avg,
    /// `COUNT`
    Count,
}

impl fmt::Display for AggregateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "SUM",
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
        };
        f.write_str(name)
    }
}

/// Requested aggregation over a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationFunction {
    /// Operation
    pub operation: AggregateOperation,
    /// Logical column name, e.g. `billingamount`
    pub column: String,
}

impl AggregationFunction {
    /// Build an aggregation
    pub fn new(operation: AggregateOperation, column: impl Into<String>) -> Self {
        Self {
            operation,
            column: column.into(),
        }
    }

    /// `SUM(billingamount)`
    pub fn total_cost() -> Self {
        Self::new(AggregateOperation::Sum, "billingamount")
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.column)
    }
}

/// Sort key
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    Time,
    Amount,
    IdleCost,
    Application,
    Service,
    Environment,
    Cluster,
    Namespace,
    Workload,
    CloudServiceName,
    TaskId,
    LaunchType,
    CloudProvider,
    Node,
    Pod,
}

impl SortType {
    /// Output field the key orders by
    pub fn field(self) -> BillingField {
        match self {
            Self::Time => BillingField::StartTime,
            Self::Amount => BillingField::Sum,
            Self::IdleCost => BillingField::IdleCost,
            Self::Application => BillingField::AppId,
            Self::Service => BillingField::ServiceId,
            Self::Environment => BillingField::EnvId,
            Self::Cluster => BillingField::ClusterId,
            Self::Namespace => BillingField::Namespace,
            Self::Workload => BillingField::WorkloadName,
            Self::CloudServiceName => BillingField::CloudServiceName,
            Self::TaskId => BillingField::TaskId,
            Self::LaunchType => BillingField::LaunchType,
            Self::CloudProvider => BillingField::CloudProviderId,
            Self::Node | Self::Pod => BillingField::InstanceId,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    /// Ascending
    Ascending,
    /// Descending
    Descending,
}

/// Requested ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    /// Key
    pub sort_type: SortType,
    /// Direction; criteria without one are dropped
    #[serde(default)]
    pub order: Option<SortOrder>,
}

impl SortCriterion {
    /// Build a criterion
    pub fn new(sort_type: SortType, order: SortOrder) -> Self {
        Self {
            sort_type,
            order: Some(order),
        }
    }
}

/// Declarative billing request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BillingQuery {
    /// Account every row is scoped to
    pub account_id: String,
    /// Filters, AND-ed
    #[serde(default)]
    pub filters: Vec<BillingFilter>,
    /// Aggregations, selected first
    #[serde(default)]
    pub aggregations: Vec<AggregationFunction>,
    /// Group-bys, at most five
    #[serde(default)]
    pub group_by: Vec<GroupBy>,
    /// Sort criteria
    #[serde(default)]
    pub sort: Vec<SortCriterion>,
    /// Row limit, honoured by filter-value and node/pod queries
    #[serde(default)]
    pub limit: Option<u32>,
    /// Row offset, honoured by filter-value and node/pod queries
    #[serde(default)]
    pub offset: Option<u32>,
}

impl BillingQuery {
    /// Empty request for an account
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// Add a filter
    #[must_use]
    pub fn filter(mut self, filter: BillingFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an aggregation
    #[must_use]
    pub fn aggregate(mut self, aggregation: AggregationFunction) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Add an entity group-by
    #[must_use]
    pub fn group_by(mut self, entity: EntityGroupBy) -> Self {
        self.group_by.push(GroupBy::Entity(entity));
        self
    }

    /// Add a time group-by
    #[must_use]
    pub fn bucket_by(mut self, granularity: TimeGranularity) -> Self {
        self.group_by.push(GroupBy::Time(granularity));
        self
    }

    /// Add a sort criterion
    #[must_use]
    pub fn sort_by(mut self, sort_type: SortType, order: SortOrder) -> Self {
        self.sort.push(SortCriterion::new(sort_type, order));
        self
    }

    /// Entity group-bys in request order
    pub fn entity_group_bys(&self) -> Vec<EntityGroupBy> {
        self.group_by
            .iter()
            .filter_map(|g| match g {
                GroupBy::Entity(e) => Some(*e),
                GroupBy::Time(_) => None,
            })
            .collect()
    }

    /// First time group-by
    pub fn time_granularity(&self) -> Option<TimeGranularity> {
        self.group_by.iter().find_map(|g| match g {
            GroupBy::Time(t) => Some(*t),
            GroupBy::Entity(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_request() {
        let query: BillingQuery = serde_json::from_str(
            r#"{
                "account_id": "acc",
                "aggregations": [{"operation": "SUM", "column": "billingamount"}],
                "group_by": [{"entity": "cluster"}, {"time": "DAY"}],
                "sort": [{"sort_type": "amount", "order": "DESCENDING"}]
            }"#,
        )
        .unwrap();

        assert_eq!(query.entity_group_bys(), vec![EntityGroupBy::Cluster]);
        assert_eq!(query.time_granularity(), Some(TimeGranularity::Day));
        assert_eq!(query.aggregations[0].to_string(), "SUM(billingamount)");
        assert_eq!(query.sort[0].order, Some(SortOrder::Descending));
    }

    #[test]
    fn test_pseudo_dimensions_have_no_column() {
        assert_eq!(EntityGroupBy::Node.field(), None);
        assert_eq!(EntityGroupBy::Pod.field(), None);
        assert_eq!(EntityGroupBy::Cluster.field(), Some(BillingField::ClusterId));
    }

    #[test]
    fn test_unknown_granularity_is_rejected() {
        let result: std::result::Result<GroupBy, _> = serde_json::from_str(r#"{"time":"YEAR"}"#);
        assert!(result.unwrap_err().to_string().contains("YEAR"));
    }
}
