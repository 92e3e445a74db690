//! External id lookups
//!
//! The engine never owns entity metadata. Tags, labels, environment types and
//! display names are resolved through these traits; [`StaticDirectory`] is an
//! in-memory implementation used for local runs and tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::models::{Label, Tag, TagEntityType};
use crate::schema::BillingField;

/// Workload identified by name and namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadRef {
    /// Workload name
    pub workload: String,
    /// Namespace
    pub namespace: String,
}

impl WorkloadRef {
    /// Build a reference
    pub fn new(workload: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            namespace: namespace.into(),
        }
    }
}

/// Where label lookups search for workloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelScope {
    /// Workloads of one cluster
    Cluster(String),
    /// Workloads seen in `[start, end]`, epoch millis
    Window {
        /// Lower bound
        start: i64,
        /// Upper bound
        end: i64,
    },
}

/// Resolves tags to entity ids
#[async_trait]
pub trait TagLookup: Send + Sync {
    /// Ids of entities of `entity_type` carrying all of `tags`
    async fn entity_ids(
        &self,
        account_id: &str,
        tags: &[Tag],
        entity_type: TagEntityType,
    ) -> Result<BTreeSet<String>>;
}

/// Resolves Kubernetes labels to workloads
#[async_trait]
pub trait LabelLookup: Send + Sync {
    /// Workloads carrying any of `labels` within `scope`
    async fn workloads(
        &self,
        account_id: &str,
        scope: &LabelScope,
        labels: &[Label],
    ) -> Result<BTreeSet<WorkloadRef>>;
}

/// Resolves environment types to environment ids
#[async_trait]
pub trait EnvironmentLookup: Send + Sync {
    /// Environments of `env_type` (or all of them for `ALL`) in `app_ids`;
    /// an empty `app_ids` means every application
    async fn environment_ids(&self, app_ids: &[String], env_type: &str) -> Result<Vec<String>>;
}

/// Resolves opaque ids to display names
#[async_trait]
pub trait EntityNameLookup: Send + Sync {
    /// Display name for `id`, `None` when unknown
    async fn name(&self, field: BillingField, id: &str) -> Result<Option<String>>;
}

/// Lookup that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLookup;

#[async_trait]
impl TagLookup for NoopLookup {
    async fn entity_ids(&self, _: &str, _: &[Tag], _: TagEntityType) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }
}

#[async_trait]
impl LabelLookup for NoopLookup {
    async fn workloads(&self, _: &str, _: &LabelScope, _: &[Label]) -> Result<BTreeSet<WorkloadRef>> {
        Ok(BTreeSet::new())
    }
}

#[async_trait]
impl EnvironmentLookup for NoopLookup {
    async fn environment_ids(&self, _: &[String], _: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl EntityNameLookup for NoopLookup {
    async fn name(&self, _: BillingField, _: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct TaggedEntity {
    entity_type: TagEntityType,
    id: String,
    tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
struct LabeledWorkload {
    cluster_id: String,
    workload: WorkloadRef,
    labels: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Environment {
    app_id: String,
    id: String,
    env_type: String,
}

#[derive(Debug, Default)]
struct DirectoryState {
    names: HashMap<(BillingField, String), String>,
    tagged: Vec<TaggedEntity>,
    workloads: Vec<LabeledWorkload>,
    environments: Vec<Environment>,
}

/// In-memory entity directory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    state: RwLock<DirectoryState>,
}

impl StaticDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a display name
    pub fn add_name(&self, field: BillingField, id: impl Into<String>, name: impl Into<String>) {
        self.state
            .write()
            .names
            .insert((field, id.into()), name.into());
    }

    /// Register a tagged entity
    pub fn add_tagged(&self, entity_type: TagEntityType, id: impl Into<String>, tags: Vec<Tag>) {
        self.state.write().tagged.push(TaggedEntity {
            entity_type,
            id: id.into(),
            tags,
        });
    }

    /// Register a labeled workload
    pub fn add_workload(
        &self,
        cluster_id: impl Into<String>,
        workload: WorkloadRef,
        labels: Vec<(String, String)>,
    ) {
        self.state.write().workloads.push(LabeledWorkload {
            cluster_id: cluster_id.into(),
            workload,
            labels,
        });
    }

    /// Register an environment
    pub fn add_environment(
        &self,
        app_id: impl Into<String>,
        id: impl Into<String>,
        env_type: impl Into<String>,
    ) {
        self.state.write().environments.push(Environment {
            app_id: app_id.into(),
            id: id.into(),
            env_type: env_type.into(),
        });
    }
}

#[async_trait]
impl TagLookup for StaticDirectory {
    async fn entity_ids(
        &self,
        _account_id: &str,
        tags: &[Tag],
        entity_type: TagEntityType,
    ) -> Result<BTreeSet<String>> {
        let state = self.state.read();
        Ok(state
            .tagged
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .map(|e| e.id.clone())
            .collect())
    }
}

#[async_trait]
impl LabelLookup for StaticDirectory {
    async fn workloads(
        &self,
        _account_id: &str,
        scope: &LabelScope,
        labels: &[Label],
    ) -> Result<BTreeSet<WorkloadRef>> {
        let state = self.state.read();
        Ok(state
            .workloads
            .iter()
            .filter(|w| match scope {
                LabelScope::Cluster(cluster_id) => &w.cluster_id == cluster_id,
                LabelScope::Window { .. } => true,
            })
            .filter(|w| {
                labels.iter().any(|label| {
                    w.labels
                        .iter()
                        .any(|(name, value)| name == &label.name && label.values.contains(value))
                })
            })
            .map(|w| w.workload.clone())
            .collect())
    }
}

#[async_trait]
impl EnvironmentLookup for StaticDirectory {
    async fn environment_ids(&self, app_ids: &[String], env_type: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .environments
            .iter()
            .filter(|e| app_ids.is_empty() || app_ids.contains(&e.app_id))
            .filter(|e| env_type == "ALL" || e.env_type == env_type)
            .map(|e| e.id.clone())
            .collect())
    }
}

#[async_trait]
impl EntityNameLookup for StaticDirectory {
    async fn name(&self, field: BillingField, id: &str) -> Result<Option<String>> {
        Ok(self.state.read().names.get(&(field, id.to_string())).cloned())
    }
}
