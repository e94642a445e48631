//! Initial plan construction.
//!
//! Turns an analyzed query into the canonical starting shape
//! `Projection -> [Selection]* -> (Product(Scan, ...) | Scan)`.

use super::error::{PlanError, PlanResult};
use super::logical::{LogicalNode, LogicalPlan, NodeId};
use crate::sql::{AnalyzedQuery, PredicateKind};

/// Build the initial logical plan for `query`.
///
/// Selections are stacked in predicate order with the first predicate on
/// top; scans appear in FROM order.
pub fn build_initial_plan(query: &AnalyzedQuery) -> PlanResult<LogicalPlan> {
    if query.tables.is_empty() {
        return Err(PlanError::Unsupported("query without tables".into()));
    }
    if query.projection.is_empty() {
        return Err(PlanError::Unsupported("query without projected columns".into()));
    }

    let mut plan = LogicalPlan::new();

    let scans: Vec<NodeId> = query
        .tables
        .iter()
        .enumerate()
        .map(|(i, table)| plan.add(LogicalNode::scan(table.clone(), i)))
        .collect();

    let mut current = match scans.as_slice() {
        [single] => *single,
        _ => plan.add_with_children(LogicalNode::Product, &scans)?,
    };

    for predicate in query.predicates.iter().rev() {
        let node = LogicalNode::Selection {
            kind: predicate.kind,
            left: predicate.left.clone(),
            op: predicate.op,
            right: predicate.right.clone(),
        };
        current = plan.add_with_children(node, &[current])?;
    }

    let projection = LogicalNode::projection(query.projection.iter().cloned());
    let root = plan.add_with_children(projection, &[current])?;
    plan.set_root(root)?;

    Ok(plan)
}

/// Check that `plan` has the shape produced by [`build_initial_plan`].
pub fn validate_initial_shape(plan: &LogicalPlan) -> PlanResult<()> {
    plan.validate()?;
    let root = plan.root_id()?;
    if !matches!(plan.kind(root), LogicalNode::Projection { .. }) {
        return Err(PlanError::malformed(root, "plan root must be a projection"));
    }

    let mut current = single_child(plan, root)?;
    let mut saw_join_predicate = false;
    while let LogicalNode::Selection { kind, .. } = plan.kind(current) {
        saw_join_predicate |= *kind == PredicateKind::Join;
        current = single_child(plan, current)?;
    }

    match plan.kind(current) {
        LogicalNode::Scan { .. } => {
            if saw_join_predicate {
                return Err(PlanError::malformed(
                    current,
                    "join predicates present but no product to join",
                ));
            }
            Ok(())
        }
        LogicalNode::Product => {
            let children = plan.children(current);
            if children.len() < 2 {
                return Err(PlanError::malformed(current, "product needs at least two inputs"));
            }
            match children.iter().find(|&&c| !plan.kind(c).is_scan()) {
                Some(&bad) => Err(PlanError::malformed(bad, "product inputs must be scans")),
                None => Ok(()),
            }
        }
        other => Err(PlanError::malformed(
            current,
            format!("unexpected {} below the selection chain", other),
        )),
    }
}

fn single_child(plan: &LogicalPlan, id: NodeId) -> PlanResult<NodeId> {
    match plan.children(id) {
        [child] => Ok(*child),
        children => Err(PlanError::malformed(
            id,
            format!("expected exactly one child, found {}", children.len()),
        )),
    }
}
