//! Resolution of tag, label and environment-type filters into id filters

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::lookup::{
    EnvironmentLookup, LabelLookup, LabelScope, NoopLookup, TagLookup, WorkloadRef,
};
use crate::models::{
    BillingFilter, EnvironmentTypeFilter, IdDimension, IdFilter, IdOperator, LabelFilter,
    TagFilter, TimeWindow,
};

/// Environment type used when a filter names none
pub const DEFAULT_ENVIRONMENT_TYPE: &str = "ALL";

/// Rewrites higher-level filters into id filters via external lookups
///
/// Lookup failures never fail a request: they are logged and treated as an
/// empty result.
#[derive(Clone)]
pub struct FilterResolver {
    tags: Arc<dyn TagLookup>,
    labels: Arc<dyn LabelLookup>,
    environments: Arc<dyn EnvironmentLookup>,
}

impl Default for FilterResolver {
    fn default() -> Self {
        let noop = Arc::new(NoopLookup);
        Self {
            tags: noop.clone(),
            labels: noop.clone(),
            environments: noop,
        }
    }
}

impl FilterResolver {
    /// Resolver backed by the given lookups
    pub fn new(
        tags: Arc<dyn TagLookup>,
        labels: Arc<dyn LabelLookup>,
        environments: Arc<dyn EnvironmentLookup>,
    ) -> Self {
        Self {
            tags,
            labels,
            environments,
        }
    }

    /// Resolve every filter; id and time filters pass through in order
    pub async fn resolve(&self, account_id: &str, filters: &[BillingFilter]) -> Vec<BillingFilter> {
        let mut resolved = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                BillingFilter::Tag(tag) => {
                    resolved.extend(self.resolve_tag(account_id, tag).await);
                }
                BillingFilter::Label(label) => {
                    resolved.extend(self.resolve_label(account_id, label, filters).await);
                }
                BillingFilter::EnvironmentType(env) => {
                    resolved.push(self.resolve_environment_type(env, filters).await);
                }
                other => resolved.push(other.clone()),
            }
        }
        resolved
    }

    async fn resolve_tag(&self, account_id: &str, tag: &TagFilter) -> Option<BillingFilter> {
        let entity_type = tag.entity_type.unwrap_or_default();
        let ids = match self.tags.entity_ids(account_id, &tag.tags, entity_type).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(account_id, error = %e, "Tag lookup failed, ignoring tag filter");
                return None;
            }
        };
        if ids.is_empty() {
            debug!(account_id, ?entity_type, "Tag filter matched no entities");
            return None;
        }
        Some(BillingFilter::Id(IdFilter {
            dimension: entity_type.dimension(),
            operator: tag.operator,
            values: ids.into_iter().collect(),
        }))
    }

    async fn resolve_label(
        &self,
        account_id: &str,
        label: &LabelFilter,
        filters: &[BillingFilter],
    ) -> Vec<BillingFilter> {
        let scope = label_scope(filters);
        let workloads = match self.labels.workloads(account_id, &scope, &label.labels).await {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!(account_id, error = %e, "Label lookup failed, ignoring label filter");
                return Vec::new();
            }
        };

        let (names, namespaces) = split_workloads(&workloads);
        let mut resolved = Vec::new();
        if !names.is_empty() {
            resolved.push(BillingFilter::Id(IdFilter {
                dimension: IdDimension::WorkloadName,
                operator: label.operator,
                values: names,
            }));
        }
        if !namespaces.is_empty() {
            resolved.push(BillingFilter::Id(IdFilter {
                dimension: IdDimension::Namespace,
                operator: label.operator,
                values: namespaces,
            }));
        }
        resolved
    }

    async fn resolve_environment_type(
        &self,
        env: &EnvironmentTypeFilter,
        filters: &[BillingFilter],
    ) -> BillingFilter {
        let env_type = env
            .values
            .first()
            .map_or(DEFAULT_ENVIRONMENT_TYPE, String::as_str);
        let app_ids = filters
            .iter()
            .find_map(|f| f.as_id(IdDimension::Application))
            .map(|f| f.values.clone())
            .unwrap_or_default();

        let env_ids = self
            .environments
            .environment_ids(&app_ids, env_type)
            .await
            .unwrap_or_else(|e| {
                warn!(env_type, error = %e, "Environment lookup failed");
                Vec::new()
            });
        BillingFilter::id(IdDimension::Environment, IdOperator::In, env_ids)
    }
}

/// Cluster-scoped when the filters name a cluster, otherwise the time window
fn label_scope(filters: &[BillingFilter]) -> LabelScope {
    let cluster = filters
        .iter()
        .find_map(|f| f.as_id(IdDimension::Cluster))
        .and_then(|f| f.values.first());
    if let Some(cluster_id) = cluster {
        return LabelScope::Cluster(cluster_id.clone());
    }
    let window = TimeWindow::from_filters(filters);
    LabelScope::Window {
        start: window.start.unwrap_or(0),
        end: window.end.unwrap_or(i64::MAX),
    }
}

fn split_workloads(workloads: &BTreeSet<WorkloadRef>) -> (Vec<String>, Vec<String>) {
    let mut names = BTreeSet::new();
    let mut namespaces = BTreeSet::new();
    for w in workloads {
        names.insert(w.workload.clone());
        namespaces.insert(w.namespace.clone());
    }
    (names.into_iter().collect(), namespaces.into_iter().collect())
}
