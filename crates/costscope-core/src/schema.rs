//! Static catalog of the billing fact table
//!
//! Every value the compiler selects is described by a [`BillingField`]: its
//! physical column, the name it is selected as, and the [`DataType`] the
//! decoder expects to find in that position of a row.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Daily-granularity fact table
pub const DAILY_TABLE: &str = "billing_data";

/// Hourly-granularity fact table
pub const HOURLY_TABLE: &str = "billing_data_hourly";

/// Alias every compiled statement gives the fact table
pub const TABLE_ALIAS: &str = "t0";

/// Time zone used for time bucketing
pub const STANDARD_TIME_ZONE: &str = "GMT";

/// Placeholder value stored for rows that could not be attributed
pub const UNALLOCATED: &str = "Unallocated";

/// Column type as seen by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Text column
    String,
    /// 64-bit integer (counts)
    Integer,
    /// Timestamp, read in UTC
    Timestamp,
    /// Double precision, rounded to cents on decode
    Double,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Timestamp => "TIMESTAMP",
            Self::Double => "DOUBLE",
        };
        f.write_str(name)
    }
}

/// Logical output field of a compiled query
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingField {
    // Aggregated measures
    Sum,
    IdleCost,
    CpuIdleCost,
    MemoryIdleCost,
    UnallocatedCost,
    NetworkCost,
    SystemCost,
    CpuBillingAmount,
    MemoryBillingAmount,
    CpuRequest,
    MemoryRequest,
    MaxCpuUtilization,
    MaxMemoryUtilization,
    AvgCpuUtilization,
    AvgMemoryUtilization,
    Count,
    MinStartTime,
    MaxStartTime,
    TimeSeries,

    // Dimensions
    StartTime,
    AppId,
    ServiceId,
    EnvId,
    ClusterId,
    ClusterName,
    ClusterType,
    Region,
    Namespace,
    WorkloadName,
    WorkloadType,
    CloudServiceName,
    TaskId,
    LaunchType,
    InstanceId,
    InstanceName,
    InstanceType,
    ParentInstanceId,
    CloudProviderId,
    AccountId,
}

impl BillingField {
    /// Physical column backing this field
    pub fn column(self) -> &'static str {
        match self {
            Self::Sum => "billingamount",
            Self::IdleCost => "actualidlecost",
            Self::CpuIdleCost => "cpuactualidlecost",
            Self::MemoryIdleCost => "memoryactualidlecost",
            Self::UnallocatedCost => "unallocatedcost",
            Self::NetworkCost => "networkcost",
            Self::SystemCost => "systemcost",
            Self::CpuBillingAmount => "cpubillingamount",
            Self::MemoryBillingAmount => "memorybillingamount",
            Self::CpuRequest => "cpurequest",
            Self::MemoryRequest => "memoryrequest",
            Self::MaxCpuUtilization => "maxcpuutilization",
            Self::MaxMemoryUtilization => "maxmemoryutilization",
            Self::AvgCpuUtilization => "avgcpuutilization",
            Self::AvgMemoryUtilization => "avgmemoryutilization",
            Self::Count | Self::InstanceId => "instanceid",
            Self::MinStartTime | Self::MaxStartTime | Self::TimeSeries | Self::StartTime => {
                "starttime"
            }
            Self::AppId => "appid",
            Self::ServiceId => "serviceid",
            Self::EnvId => "envid",
            Self::ClusterId => "clusterid",
            Self::ClusterName => "clustername",
            Self::ClusterType => "clustertype",
            Self::Region => "region",
            Self::Namespace => "namespace",
            Self::WorkloadName => "workloadname",
            Self::WorkloadType => "workloadtype",
            Self::CloudServiceName => "cloudservicename",
            Self::TaskId => "taskid",
            Self::LaunchType => "launchtype",
            Self::InstanceName => "instancename",
            Self::InstanceType => "instancetype",
            Self::ParentInstanceId => "parentinstanceid",
            Self::CloudProviderId => "cloudproviderid",
            Self::AccountId => "accountid",
        }
    }

    /// Name the field is selected as
    pub fn alias(self) -> &'static str {
        match self {
            Self::Sum => "cost",
            Self::IdleCost => "idlecost",
            Self::CpuIdleCost => "cpuidlecost",
            Self::MemoryIdleCost => "memoryidlecost",
            Self::Count => "count",
            Self::MinStartTime => "minstarttime",
            Self::MaxStartTime => "maxstarttime",
            Self::TimeSeries => "time_series",
            other => other.column(),
        }
    }

    /// Type the decoder expects for this field
    pub fn data_type(self) -> DataType {
        match self {
            Self::Sum
            | Self::IdleCost
            | Self::CpuIdleCost
            | Self::MemoryIdleCost
            | Self::UnallocatedCost
            | Self::NetworkCost
            | Self::SystemCost
            | Self::CpuBillingAmount
            | Self::MemoryBillingAmount
            | Self::CpuRequest
            | Self::MemoryRequest
            | Self::MaxCpuUtilization
            | Self::MaxMemoryUtilization
            | Self::AvgCpuUtilization
            | Self::AvgMemoryUtilization => DataType::Double,
            Self::Count => DataType::Integer,
            Self::MinStartTime | Self::MaxStartTime | Self::TimeSeries | Self::StartTime => {
                DataType::Timestamp
            }
            _ => DataType::String,
        }
    }

    /// Whether values of this field are opaque ids with a separate display name
    pub fn requires_name_resolution(self) -> bool {
        matches!(
            self,
            Self::AppId | Self::ServiceId | Self::EnvId | Self::ClusterId | Self::CloudProviderId
        )
    }

    /// Entity type label attached to references of this field
    pub fn entity_type(self) -> &'static str {
        match self {
            Self::AppId => "APPLICATION",
            Self::ServiceId => "SERVICE",
            Self::EnvId => "ENVIRONMENT",
            Self::ClusterId | Self::ClusterName => "CLUSTER",
            Self::CloudProviderId => "CLOUD_PROVIDER",
            Self::Namespace => "NAMESPACE",
            Self::WorkloadName => "WORKLOAD",
            Self::CloudServiceName => "CLOUD_SERVICE",
            Self::TaskId => "TASK",
            Self::LaunchType => "LAUNCH_TYPE",
            Self::InstanceId | Self::InstanceName => "INSTANCE",
            Self::Region => "REGION",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for BillingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}
