//! Hierarchical cost breakdown

use std::collections::{HashMap, HashSet};

use super::trend::{format_cost, EMPTY};
use crate::decode::{round_cents, DecodedRow};
use crate::models::{EntityGroupBy, EntityRef, SunburstGridRow, SunburstNode};
use crate::query::compiler::order_group_bys;
use crate::schema::BillingField;

/// Id of the root node every first-level node hangs from
pub const ROOT_PARENT_ID: &str = "ROOT_PARENT_ID";

const ROOT_NAME: &str = "";

/// Hierarchies the chart is built from
///
/// Up to two levels are charted from one query. Deeper requests are split
/// into one hierarchy without the Kubernetes dimensions and one without the
/// ECS dimensions, since no row carries both.
pub fn split_hierarchy(entities: &[EntityGroupBy]) -> Vec<Vec<EntityGroupBy>> {
    if entities.len() <= 2 {
        return vec![entities.to_vec()];
    }
    let without_kubernetes = entities.iter().copied().filter(|e| !e.is_kubernetes()).collect();
    let without_ecs = entities.iter().copied().filter(|e| !e.is_ecs()).collect();
    vec![without_kubernetes, without_ecs]
}

/// Requested hierarchy in drill-down order
///
/// The compiler prepends `Namespace` to workload group-bys; that column is
/// only a level when the caller asked for it.
pub fn hierarchy_levels(requested: &[EntityGroupBy]) -> Vec<EntityGroupBy> {
    let mut levels = order_group_bys(requested);
    if !requested.contains(&EntityGroupBy::Namespace) {
        levels.retain(|e| *e != EntityGroupBy::Namespace);
    }
    levels
}

fn level_field(entity: EntityGroupBy) -> Option<BillingField> {
    match entity {
        EntityGroupBy::Node | EntityGroupBy::Pod => Some(BillingField::InstanceId),
        other => other.field(),
    }
}

/// Chart levels of a compiled query: its group-by columns that belong to
/// `hierarchy`, in select order, at most two
pub fn chart_levels(group_by_fields: &[BillingField], hierarchy: &[EntityGroupBy]) -> Vec<BillingField> {
    let charted: Vec<BillingField> = hierarchy.iter().copied().filter_map(level_field).collect();
    group_by_fields
        .iter()
        .copied()
        .filter(|f| charted.contains(f))
        .take(2)
        .collect()
}

fn cost(row: &DecodedRow) -> f64 {
    row.double(BillingField::Sum).unwrap_or(0.0)
}

fn cluster_type(row: &DecodedRow, field: BillingField) -> Option<String> {
    if field != BillingField::ClusterId {
        return None;
    }
    row.reference(BillingField::ClusterType).map(|r| r.id.clone())
}

fn node(entity: &EntityRef, parent: &str, value: f64, cluster_type: Option<String>) -> SunburstNode {
    SunburstNode {
        id: entity.id.clone(),
        name: entity.name.clone(),
        parent: parent.to_string(),
        entity_type: entity.entity_type.clone(),
        value,
        cluster_type,
    }
}

/// Build tree nodes from rows grouped by `levels` (one or two fields)
pub fn assemble_nodes(rows: &[DecodedRow], levels: &[BillingField], add_root: bool) -> Vec<SunburstNode> {
    let mut nodes = Vec::new();
    if add_root {
        let total = round_cents(rows.iter().map(cost).sum());
        nodes.push(SunburstNode {
            id: ROOT_PARENT_ID.to_string(),
            name: ROOT_NAME.to_string(),
            parent: String::new(),
            entity_type: "ROOT".to_string(),
            value: total,
            cluster_type: None,
        });
    }

    match levels {
        [first] => {
            for row in rows {
                if let Some(entity) = row.reference(*first) {
                    nodes.push(node(entity, ROOT_PARENT_ID, cost(row), cluster_type(row, *first)));
                }
            }
        }
        [first, second, ..] => {
            // First-level values are summed over their children
            let mut totals: HashMap<&str, f64> = HashMap::new();
            for row in rows {
                if let Some(entity) = row.reference(*first) {
                    *totals.entry(entity.id.as_str()).or_default() += cost(row);
                }
            }

            let mut seen = HashSet::new();
            for row in rows {
                let Some(parent) = row.reference(*first) else {
                    continue;
                };
                if seen.insert(parent.id.clone()) {
                    let total = totals.get(parent.id.as_str()).copied().unwrap_or(0.0);
                    nodes.push(node(
                        parent,
                        ROOT_PARENT_ID,
                        round_cents(total),
                        cluster_type(row, *first),
                    ));
                }
                if let Some(child) = row.reference(*second) {
                    nodes.push(node(child, &parent.id, cost(row), cluster_type(row, *second)));
                }
            }
        }
        [] => {}
    }
    nodes
}

/// Union of node lists, keeping the first node per (id, parent)
pub fn union_nodes(lists: Vec<Vec<SunburstNode>>) -> Vec<SunburstNode> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|n| seen.insert((n.id.clone(), n.parent.clone())))
        .collect()
}

/// Flat rows of a one-level query: total cost and idle share
pub fn assemble_grid(rows: &[DecodedRow], field: BillingField) -> Vec<SunburstGridRow> {
    rows.iter()
        .filter_map(|row| {
            let entity = row.reference(field)?;
            let total = row.double(BillingField::Sum);
            let idle_cost_percentage = match (total, row.double(BillingField::IdleCost)) {
                (Some(total), Some(idle)) if total != 0.0 => {
                    format!("{}%", round_cents(100.0 * idle / total))
                }
                _ => EMPTY.to_string(),
            };
            Some(SunburstGridRow {
                id: entity.id.clone(),
                name: entity.name.clone(),
                value: total.map_or_else(|| EMPTY.to_string(), format_cost),
                idle_cost_percentage,
            })
        })
        .collect()
}
