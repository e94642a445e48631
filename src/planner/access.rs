//! Cost-based physical planning.
//!
//! Walks an estimated logical plan and picks a physical operator for every
//! node. Access paths are chosen per selection:
//! - no index on the filtered column: `SeqScan` wrapped in `Filter`;
//! - clustered index: always `IndexScan`;
//! - unclustered index: the cheaper of the two, ties go to the scan.
//!
//! A projection whose attributes are exactly the key of one index is
//! answered by an `IndexSeek` when every selection beneath it filters on a
//! projected column.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::cost::CostModel;
use super::error::{PlanError, PlanResult};
use super::logical::{LogicalNode, LogicalPlan, NodeId};
use super::physical::{JoinStrategy, PhysicalOperator, PhysicalPlan, PhysicalPlanNode};
use crate::sql::{CompareOp, Operand, PredicateKind, QualifiedName};

/// Translates estimated logical plans into physical plans.
pub struct PhysicalPlanner<'m, 'a> {
    model: &'m CostModel<'a>,
}

impl<'m, 'a> PhysicalPlanner<'m, 'a> {
    pub fn new(model: &'m CostModel<'a>) -> Self {
        Self { model }
    }

    /// Build the physical plan for the whole tree.
    ///
    /// Every reachable node must already carry an estimate.
    pub fn plan(&self, plan: &LogicalPlan) -> PlanResult<PhysicalPlan> {
        let root = self.to_physical(plan, plan.root_id()?)?;
        debug!(cost = root.estimated_cost, rows = root.estimated_rows, "physical plan chosen");
        Ok(PhysicalPlan::new(root))
    }

    fn to_physical(&self, plan: &LogicalPlan, id: NodeId) -> PlanResult<PhysicalPlanNode> {
        match plan.kind(id) {
            LogicalNode::Scan { table, .. } => self.seq_scan(plan, id, table),

            LogicalNode::Selection {
                kind: PredicateKind::Filter,
                left,
                op,
                right,
            } => {
                let child = single_input(plan, id)?;
                if plan.kind(child).is_scan() {
                    return self.access_path(plan, id, child, left, *op, right);
                }
                let input = self.to_physical(plan, child)?;
                self.filter(plan, id, left, *op, right, input)
            }

            LogicalNode::Selection {
                kind: PredicateKind::Join,
                left,
                op,
                right,
            } => {
                let input = self.to_physical(plan, single_input(plan, id)?)?;
                self.filter(plan, id, left, *op, right, input)
            }

            LogicalNode::Projection { attributes } => {
                if let Some(seek) = self.index_seek(plan, id, attributes)? {
                    return Ok(seek);
                }
                let child = single_input(plan, id)?;
                let input = self.to_physical(plan, child)?;
                let tuple_size = self.tuple_size(plan, child)?;
                let cost = self
                    .model
                    .projection_cost(attributes.len(), tuple_size, input.estimated_cost);
                Ok(PhysicalPlanNode::new(PhysicalOperator::Projection {
                    attributes: attributes.clone(),
                })
                .with_cost(cost)
                .with_rows(self.model.cardinality(plan, id)?)
                .with_child(Arc::new(input)))
            }

            LogicalNode::Join { op, left, right } => {
                if !op.is_equality() {
                    return Err(PlanError::Unsupported(format!(
                        "join operator {} has no physical strategy",
                        op
                    )));
                }
                let (l, r) = match plan.children(id) {
                    [l, r] => (*l, *r),
                    _ => return Err(PlanError::malformed(id, "join needs exactly two inputs")),
                };
                let left_input = self.to_physical(plan, l)?;
                let right_input = self.to_physical(plan, r)?;
                let cost = self
                    .model
                    .nested_loop_cost(left_input.estimated_cost, right_input.estimated_cost);
                Ok(PhysicalPlanNode::new(PhysicalOperator::Join {
                    strategy: JoinStrategy::NestedLoop,
                    left: left.clone(),
                    right: right.clone(),
                })
                .with_cost(cost)
                .with_rows(self.model.cardinality(plan, id)?)
                .with_children(vec![Arc::new(left_input), Arc::new(right_input)]))
            }

            LogicalNode::Product => self.cross_product(plan, id),
        }
    }

    fn seq_scan(&self, plan: &LogicalPlan, id: NodeId, table: &str) -> PlanResult<PhysicalPlanNode> {
        Ok(PhysicalPlanNode::new(PhysicalOperator::SeqScan {
            table: table.to_string(),
        })
        .with_cost(self.model.seq_scan_cost(table)?)
        .with_rows(self.model.cardinality(plan, id)?))
    }

    fn filter(
        &self,
        plan: &LogicalPlan,
        id: NodeId,
        left: &QualifiedName,
        op: CompareOp,
        right: &Operand,
        input: PhysicalPlanNode,
    ) -> PlanResult<PhysicalPlanNode> {
        Ok(PhysicalPlanNode::new(PhysicalOperator::Filter {
            left: left.clone(),
            op,
            right: right.clone(),
        })
        .with_cost(self.model.filter_cost(input.estimated_cost))
        .with_rows(self.model.cardinality(plan, id)?)
        .with_child(Arc::new(input)))
    }

    /// Access path for a filter sitting directly on a base table scan.
    fn access_path(
        &self,
        plan: &LogicalPlan,
        id: NodeId,
        scan: NodeId,
        left: &QualifiedName,
        op: CompareOp,
        right: &Operand,
    ) -> PlanResult<PhysicalPlanNode> {
        let table = plan
            .kind(scan)
            .scan_table()
            .ok_or_else(|| PlanError::malformed(scan, "expected a scan"))?;
        let rows = self.model.cardinality(plan, id)?;
        let key = right
            .as_literal()
            .ok_or_else(|| PlanError::malformed(id, "filter without a constant"))?;

        let seq = self.seq_scan(plan, scan, table)?;
        let index = self.model.catalog().index_on_column(table, &left.column);
        let Some(index) = index else {
            debug!(table, column = %left.column, "no index, sequential scan");
            return self.filter(plan, id, left, op, right, seq);
        };

        let index_cost = self.model.index_scan_cost(table, &left.column, op)?;
        let index_scan = PhysicalPlanNode::new(PhysicalOperator::IndexScan {
            table: table.to_string(),
            index: index.name.clone(),
            column: left.column.clone(),
            op,
            key: key.clone(),
        })
        .with_cost(index_cost)
        .with_rows(rows);

        if index.clustered {
            debug!(table, index = %index.name, cost = index_cost, "clustered index scan");
            return Ok(index_scan);
        }

        let scan_cost = self.model.filter_cost(seq.estimated_cost);
        debug!(
            table,
            index = %index.name,
            index_cost,
            scan_cost,
            "comparing unclustered index with sequential scan"
        );
        if index_cost < scan_cost {
            Ok(index_scan)
        } else {
            self.filter(plan, id, left, op, right, seq)
        }
    }

    /// An index-only plan for `attributes`, if one applies.
    fn index_seek(
        &self,
        plan: &LogicalPlan,
        id: NodeId,
        attributes: &[QualifiedName],
    ) -> PlanResult<Option<PhysicalPlanNode>> {
        let Some(first) = attributes.first() else {
            return Ok(None);
        };
        let table = &first.table;
        if attributes.iter().any(|a| &a.table != table) {
            return Ok(None);
        }
        let columns: BTreeSet<String> = attributes.iter().map(|a| a.column.clone()).collect();

        // the projection must sit on a filter chain ending at the table's scan
        let mut filters = Vec::new();
        let mut current = single_input(plan, id)?;
        loop {
            match plan.kind(current) {
                LogicalNode::Scan { table: scanned, .. } if scanned == table => break,
                LogicalNode::Selection {
                    kind: PredicateKind::Filter,
                    left,
                    ..
                } if columns.contains(&left.column) => {
                    filters.push(current);
                    current = single_input(plan, current)?;
                }
                _ => return Ok(None),
            }
        }

        let Some(index) = self.model.catalog().compound_index(table, &columns) else {
            return Ok(None);
        };
        debug!(table = %table, index = %index.name, "index seek covers projection");

        let cost = self.model.index_seek_cost();
        let mut node = PhysicalPlanNode::new(PhysicalOperator::IndexSeek {
            table: table.clone(),
            index: index.name.clone(),
            columns: index.columns.clone(),
        })
        .with_cost(cost)
        .with_rows(self.model.cardinality(plan, current)?);

        // filters still apply, on top of the seek, bottom-up
        for &filter in filters.iter().rev() {
            if let LogicalNode::Selection { left, op, right, .. } = plan.kind(filter) {
                node = self.filter(plan, filter, left, *op, right, node)?;
            }
        }
        Ok(Some(node))
    }

    /// Left-deep chain of cross products over the inputs of `id`.
    fn cross_product(&self, plan: &LogicalPlan, id: NodeId) -> PlanResult<PhysicalPlanNode> {
        let inputs = plan.children(id);
        let (&first, rest) = inputs
            .split_first()
            .ok_or_else(|| PlanError::malformed(id, "product without inputs"))?;
        if rest.is_empty() {
            return Err(PlanError::malformed(id, "product needs at least two inputs"));
        }

        let mut acc = self.to_physical(plan, first)?;
        for &input in rest {
            let right = self.to_physical(plan, input)?;
            let rows = acc.estimated_rows.saturating_mul(right.estimated_rows);
            let cost = self
                .model
                .cross_product_cost(acc.estimated_cost, right.estimated_cost);
            acc = PhysicalPlanNode::new(PhysicalOperator::CrossProduct {
                left_tables: acc.tables(),
                right_tables: right.tables(),
            })
            .with_cost(cost)
            .with_rows(rows)
            .with_children(vec![Arc::new(acc), Arc::new(right)]);
        }
        // the outermost product carries the logical estimate
        acc.estimated_rows = self.model.cardinality(plan, id)?;
        Ok(acc)
    }

    /// Combined tuple size of every table below `id`.
    fn tuple_size(&self, plan: &LogicalPlan, id: NodeId) -> PlanResult<u64> {
        plan.subtree_tables(id)
            .iter()
            .map(|t| self.model.table_stats(t).map(|s| s.tuple_size))
            .sum()
    }
}

fn single_input(plan: &LogicalPlan, id: NodeId) -> PlanResult<NodeId> {
    match plan.children(id) {
        [child] => Ok(*child),
        children => Err(PlanError::malformed(
            id,
            format!("expected exactly one input, found {}", children.len()),
        )),
    }
}
