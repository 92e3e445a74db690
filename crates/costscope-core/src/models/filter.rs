//! Request filters
//!
//! Id and time filters compile directly into predicates. Tag, label and
//! environment-type filters name higher-level concepts and are resolved into
//! id filters before compilation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::BillingField;

/// Operator of an id filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdOperator {
    /// Equality; compiled as `IN` when values are present
    Equals,
    /// Membership
    In,
    /// Negated membership
    NotIn,
    /// Column is not null; values are ignored
    NotNull,
    /// Substring match on the first value
    Like,
}

/// Dimension an id filter applies to
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdDimension {
    Application,
    Service,
    Environment,
    Cluster,
    CloudProvider,
    CloudServiceName,
    LaunchType,
    TaskId,
    InstanceType,
    InstanceName,
    WorkloadName,
    WorkloadType,
    Namespace,
    NodeInstanceId,
    PodInstanceId,
    ParentInstanceId,
}

impl IdDimension {
    /// Column the dimension filters on
    pub fn field(self) -> BillingField {
        match self {
            Self::Application => BillingField::AppId,
            Self::Service => BillingField::ServiceId,
            Self::Environment => BillingField::EnvId,
            Self::Cluster => BillingField::ClusterId,
            Self::CloudProvider => BillingField::CloudProviderId,
            Self::CloudServiceName => BillingField::CloudServiceName,
            Self::LaunchType => BillingField::LaunchType,
            Self::TaskId => BillingField::TaskId,
            Self::InstanceType => BillingField::InstanceType,
            Self::InstanceName => BillingField::InstanceName,
            Self::WorkloadName => BillingField::WorkloadName,
            Self::WorkloadType => BillingField::WorkloadType,
            Self::Namespace => BillingField::Namespace,
            Self::NodeInstanceId | Self::PodInstanceId => BillingField::InstanceId,
            Self::ParentInstanceId => BillingField::ParentInstanceId,
        }
    }
}

/// Predicate over a string dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFilter {
    /// Filtered dimension
    pub dimension: IdDimension,
    /// Operator; a filter without one is skipped
    #[serde(default)]
    pub operator: Option<IdOperator>,
    /// Operand values
    #[serde(default)]
    pub values: Vec<String>,
}

impl IdFilter {
    /// Build a filter with an operator and values
    pub fn new<I, S>(dimension: IdDimension, operator: IdOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimension,
            operator: Some(operator),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the filter selects specific ids (drill-down)
    pub fn is_inclusive(&self) -> bool {
        matches!(self.operator, Some(IdOperator::In | IdOperator::Equals)) && !self.values.is_empty()
    }
}

/// Operator of a time filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeOperator {
    /// `starttime <= value`
    Before,
    /// `starttime >= value`
    After,
}

/// Bound on the start time of billing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilter {
    /// Comparison
    pub operator: TimeOperator,
    /// Epoch milliseconds
    pub value: i64,
}

impl TimeFilter {
    /// Lower bound
    pub fn after(value: i64) -> Self {
        Self {
            operator: TimeOperator::After,
            value,
        }
    }

    /// Upper bound
    pub fn before(value: i64) -> Self {
        Self {
            operator: TimeOperator::Before,
            value,
        }
    }

    /// The bound as a UTC timestamp
    pub fn instant(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.value)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Entity type a tag filter targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagEntityType {
    /// Applications
    #[default]
    Application,
    /// Services
    Service,
    /// Environments
    Environment,
}

impl TagEntityType {
    /// Dimension the resolved ids filter on
    pub fn dimension(self) -> IdDimension {
        match self {
            Self::Application => IdDimension::Application,
            Self::Service => IdDimension::Service,
            Self::Environment => IdDimension::Environment,
        }
    }
}

/// Single tag `name=value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name
    pub name: String,
    /// Tag value
    pub value: String,
}

/// Filter on entities carrying tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    /// Target entity type, application when absent
    #[serde(default)]
    pub entity_type: Option<TagEntityType>,
    /// Tags to match
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Operator applied to the resolved ids
    #[serde(default)]
    pub operator: Option<IdOperator>,
}

/// Kubernetes label with accepted values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Accepted values
    #[serde(default)]
    pub values: Vec<String>,
}

/// Filter on workloads carrying labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFilter {
    /// Labels to match
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Operator applied to the resolved workloads and namespaces
    #[serde(default)]
    pub operator: Option<IdOperator>,
}

/// Filter on environments of a given type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentTypeFilter {
    /// Operator (informational)
    #[serde(default)]
    pub operator: Option<IdOperator>,
    /// Environment type in the first position, `ALL` when absent
    #[serde(default)]
    pub values: Vec<String>,
}

/// A request filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingFilter {
    /// Predicate on a string dimension
    Id(IdFilter),
    /// Lower or upper bound coming from the window start
    StartTime(TimeFilter),
    /// Lower or upper bound coming from the window end
    EndTime(TimeFilter),
    /// Entities carrying tags
    Tag(TagFilter),
    /// Workloads carrying labels
    Label(LabelFilter),
    /// Environments of a type
    EnvironmentType(EnvironmentTypeFilter),
}

impl BillingFilter {
    /// Shorthand for an id filter
    pub fn id<I, S>(dimension: IdDimension, operator: IdOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Id(IdFilter::new(dimension, operator, values))
    }

    /// The id filter if this is one on `dimension`
    pub fn as_id(&self, dimension: IdDimension) -> Option<&IdFilter> {
        match self {
            Self::Id(f) if f.dimension == dimension => Some(f),
            _ => None,
        }
    }

    /// Whether this is an id filter on `dimension`
    pub fn is_id(&self, dimension: IdDimension) -> bool {
        self.as_id(dimension).is_some()
    }

    /// Whether this is a start or end time filter
    pub fn is_time(&self) -> bool {
        matches!(self, Self::StartTime(_) | Self::EndTime(_))
    }
}

/// Time bounds carried by a filter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Latest start-time bound, epoch millis
    pub start: Option<i64>,
    /// Earliest end-time bound, epoch millis
    pub end: Option<i64>,
}

impl TimeWindow {
    /// Collect the tightest window from `filters`
    pub fn from_filters(filters: &[BillingFilter]) -> Self {
        let mut window = Self {
            start: None,
            end: None,
        };
        for filter in filters {
            match filter {
                BillingFilter::StartTime(t) => {
                    window.start = Some(window.start.map_or(t.value, |s| s.max(t.value)));
                }
                BillingFilter::EndTime(t) => {
                    window.end = Some(window.end.map_or(t.value, |e| e.min(t.value)));
                }
                _ => {}
            }
        }
        window
    }
}

/// First start-time filter in `filters`
pub fn start_time_filter(filters: &[BillingFilter]) -> Option<&TimeFilter> {
    filters.iter().find_map(|f| match f {
        BillingFilter::StartTime(t) => Some(t),
        _ => None,
    })
}

/// First end-time filter in `filters`
pub fn end_time_filter(filters: &[BillingFilter]) -> Option<&TimeFilter> {
    filters.iter().find_map(|f| match f {
        BillingFilter::EndTime(t) => Some(t),
        _ => None,
    })
}
