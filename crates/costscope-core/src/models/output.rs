//! Response shapes produced by the assemblers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::BillingField;

/// Reference to an entity: opaque id plus display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Raw value stored in the fact table
    pub id: String,
    /// Display name, equal to `id` when the column has no indirection
    pub name: String,
    /// Entity type label
    #[serde(rename = "type")]
    pub entity_type: String,
}

impl EntityRef {
    /// Build a reference
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }

    /// Reference whose name is its id
    pub fn raw(field: BillingField, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            entity_type: field.entity_type().to_string(),
        }
    }
}

// ============================================================================
// Time series
// ============================================================================

/// One keyed value inside a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Stack key
    pub key: EntityRef,
    /// Summed value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Maximum (utilization stacks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Average (utilization stacks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
}

impl DataPoint {
    /// Whether the point carries no value at all
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.max.is_none() && self.avg.is_none()
    }
}

/// All points of one time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBucket {
    /// Bucket start, epoch millis
    pub time: i64,
    /// Points in database row order
    pub values: Vec<DataPoint>,
}

/// Independent stacks of a time-series response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackedTimeSeries {
    /// Primary metric
    pub data: Vec<TimeSeriesBucket>,
    /// CPU idle cost
    pub cpu_idle_cost: Vec<TimeSeriesBucket>,
    /// Memory idle cost
    pub memory_idle_cost: Vec<TimeSeriesBucket>,
    /// CPU utilization, max and avg
    pub cpu_utilization: Vec<TimeSeriesBucket>,
    /// Memory utilization, max and avg
    pub memory_utilization: Vec<TimeSeriesBucket>,
}

// ============================================================================
// Sunburst
// ============================================================================

/// Node of a hierarchical cost breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunburstNode {
    /// Node id
    pub id: String,
    /// Display name
    pub name: String,
    /// Parent node id, the root sentinel for first-level nodes
    pub parent: String,
    /// Entity type label
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Cost attributed to the node
    pub value: f64,
    /// Cluster type, only on cluster nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
}

/// Row of the grid shown next to the chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunburstGridRow {
    /// Entity id
    pub id: String,
    /// Display name
    pub name: String,
    /// Formatted total cost
    pub value: String,
    /// Formatted idle cost share, `-` without a total
    pub idle_cost_percentage: String,
}

/// Sunburst response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunburstChart {
    /// Tree nodes, root first when requested
    pub nodes: Vec<SunburstNode>,
    /// One-level grid
    pub grid: Vec<SunburstGridRow>,
}

// ============================================================================
// Trend
// ============================================================================

/// Display triple with the numeric value behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStat {
    /// Stat label, e.g. "Total Cost"
    pub label: String,
    /// Description, e.g. the covered window or the share of total
    pub description: String,
    /// Formatted value
    pub value: String,
    /// Numeric value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

/// Comparison with the preceding window of equal length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTrend {
    /// Cost in the preceding window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_cost: Option<f64>,
    /// Current minus previous cost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Percentage change, `NA` when it cannot be computed
    pub percentage: String,
}

/// Trend and forecast statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    /// Total cost
    pub total_cost: TrendStat,
    /// Idle cost
    pub idle_cost: TrendStat,
    /// Unallocated cost
    pub unallocated_cost: TrendStat,
    /// Utilized cost
    pub utilized_cost: TrendStat,
    /// Forecast for the full window
    pub forecast_cost: TrendStat,
    /// Change against the preceding window
    pub cost_trend: CostTrend,
}

// ============================================================================
// Entity tables
// ============================================================================

/// Flat row keyed by field alias
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    /// Dimension values
    pub keys: BTreeMap<String, EntityRef>,
    /// Numeric values
    pub metrics: BTreeMap<String, f64>,
    /// Counts
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub counts: BTreeMap<String, i64>,
    /// Timestamps, epoch millis
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub times: BTreeMap<String, i64>,
}

/// Flat entity table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTable {
    /// Output fields in select order
    pub fields: Vec<BillingField>,
    /// Rows in database order
    pub rows: Vec<EntityRow>,
}

/// Distinct values of one dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterValueColumn {
    /// Dimension
    pub field: BillingField,
    /// Distinct values in database order
    pub values: Vec<EntityRef>,
}

/// Filter-values response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterValues {
    /// One column per group-by
    pub columns: Vec<FilterValueColumn>,
    /// Total number of distinct values of the first dimension
    pub total: i64,
}
