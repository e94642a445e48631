//! Cardinality estimation and physical operator costs.
//!
//! Cardinalities are estimated bottom-up and cached on the logical nodes.
//! Each estimate also carries a distinct-value count per column name, which
//! drives the estimates of the operators above it.
//!
//! Estimation rules:
//! - scan: catalog row count and distinct counts;
//! - equality filter directly over a scan: sum of the histogram buckets
//!   containing the constant (text constants use `rows / distinct`);
//! - equality filter over a derived input: `rows / distinct(column)`;
//! - any other comparison: a third of the input rows;
//! - join of two base inputs: bucket-by-bucket overlay of the join column
//!   histograms, falling back to the containment formula
//!   `left * right / max(distinct)` when no bucket ranges match;
//! - join over a derived input: the containment formula;
//! - product: exact product of the input rows.

use std::collections::BTreeMap;

use tracing::trace;

use super::error::{PlanError, PlanResult};
use super::logical::{Estimate, LogicalNode, LogicalPlan, NodeId};
use crate::catalog::{CatalogReader, TableStats};
use crate::sql::{CompareOp, Literal, PredicateKind, QualifiedName};

/// Cost model constants.
pub mod constants {
    /// Divisor applied by a non-equality comparison.
    pub const RANGE_SELECTIVITY_DIVISOR: u64 = 3;
    /// Bytes per projected attribute.
    pub const ATTRIBUTE_WIDTH: u64 = 4;
    /// Cost of an index-only seek.
    pub const INDEX_SEEK_COST: f64 = 0.0;
}

/// One input of a join being estimated.
#[derive(Debug, Clone, Copy)]
pub struct JoinInput<'e> {
    pub estimate: &'e Estimate,
    /// Set when the input is an unfiltered base table.
    pub base_table: Option<&'e str>,
}

/// Statistics-driven cost model.
pub struct CostModel<'a> {
    catalog: &'a dyn CatalogReader,
    attribute_width: u64,
}

impl<'a> CostModel<'a> {
    pub fn new(catalog: &'a dyn CatalogReader) -> Self {
        Self {
            catalog,
            attribute_width: constants::ATTRIBUTE_WIDTH,
        }
    }

    pub fn with_attribute_width(mut self, width: u64) -> Self {
        self.attribute_width = width;
        self
    }

    pub fn catalog(&self) -> &'a dyn CatalogReader {
        self.catalog
    }

    pub fn table_stats(&self, table: &str) -> PlanResult<&'a TableStats> {
        self.catalog
            .table_stats(table)
            .ok_or_else(|| PlanError::UnknownTable(table.to_string()))
    }

    /// Fill in every missing estimate of the reachable tree.
    ///
    /// Nodes that still hold an estimate are left alone; tree mutations
    /// clear the estimates above the changed position.
    pub fn estimate(&self, plan: &mut LogicalPlan) -> PlanResult<u64> {
        let root = plan.root_id()?;
        let mut computed = 0usize;
        for id in plan.postorder(root) {
            if plan.estimate(id).is_some() {
                continue;
            }
            let estimate = self.estimate_node(plan, id)?;
            trace!(node = %id, rows = estimate.cardinality, "estimated");
            plan.set_estimate(id, estimate);
            computed += 1;
        }
        trace!(computed, "estimation pass finished");
        self.cardinality(plan, root)
    }

    /// Cached cardinality of `id`.
    pub fn cardinality(&self, plan: &LogicalPlan, id: NodeId) -> PlanResult<u64> {
        plan.estimate(id)
            .map(|e| e.cardinality)
            .ok_or_else(|| PlanError::Internal(format!("node {} has not been estimated", id)))
    }

    /// Estimate one node from its children's cached estimates.
    pub fn estimate_node(&self, plan: &LogicalPlan, id: NodeId) -> PlanResult<Estimate> {
        let child_estimate = |i: usize| input_estimate(plan, id, i);

        match plan.kind(id) {
            LogicalNode::Scan { table, .. } => self.scan_estimate(table),

            LogicalNode::Selection {
                kind: PredicateKind::Filter,
                left,
                op,
                right,
            } => {
                let input = child_estimate(0)?;
                let over_scan = plan
                    .children(id)
                    .first()
                    .is_some_and(|&c| plan.kind(c).is_scan());
                let literal = right
                    .as_literal()
                    .ok_or_else(|| PlanError::malformed(id, "filter without a constant"))?;
                if over_scan {
                    self.base_filter_estimate(input, left, *op, literal)
                } else {
                    Ok(Self::derived_filter_estimate(input, &left.column, *op))
                }
            }

            LogicalNode::Selection {
                kind: PredicateKind::Join,
                left,
                right,
                ..
            } => {
                let right = right
                    .as_column()
                    .ok_or_else(|| PlanError::malformed(id, "join selection without a column"))?;
                Ok(Self::residual_join_estimate(child_estimate(0)?, left, right))
            }

            LogicalNode::Projection { attributes } => {
                Ok(Self::projection_estimate(child_estimate(0)?, attributes))
            }

            LogicalNode::Product => {
                let inputs = plan.children(id);
                if inputs.is_empty() {
                    return Err(PlanError::malformed(id, "product without inputs"));
                }
                let mut acc = child_estimate(0)?.clone();
                for i in 1..inputs.len() {
                    acc = Self::product_estimate(&acc, child_estimate(i)?);
                }
                Ok(acc)
            }

            LogicalNode::Join { left, right, .. } => {
                let children = plan.children(id);
                if children.len() != 2 {
                    return Err(PlanError::malformed(id, "join needs exactly two inputs"));
                }
                let l = JoinInput {
                    estimate: child_estimate(0)?,
                    base_table: base_table(plan, children[0]),
                };
                let r = JoinInput {
                    estimate: child_estimate(1)?,
                    base_table: base_table(plan, children[1]),
                };
                self.join_estimate(l, r, left, right)
            }
        }
    }

    fn scan_estimate(&self, table: &str) -> PlanResult<Estimate> {
        let stats = self.table_stats(table)?;
        let distinct = stats
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), col.distinct_values))
            .collect();
        Ok(Estimate::new(stats.row_count, distinct))
    }

    fn base_filter_estimate(
        &self,
        input: &Estimate,
        column: &QualifiedName,
        op: CompareOp,
        literal: &Literal,
    ) -> PlanResult<Estimate> {
        if !op.is_equality() {
            return Ok(Self::range_estimate(input, &column.column));
        }

        let stats = self.table_stats(&column.table)?;
        let col_stats = stats.column(&column.column);
        let histogram_rows = match (literal, col_stats) {
            (Literal::Integer(value), Some(cs)) if !cs.histogram.is_empty() => {
                Some(cs.histogram.rows_containing(*value))
            }
            _ => None,
        };

        match histogram_rows {
            Some(rows) => {
                let cardinality = rows.min(input.cardinality);
                let mut distinct = clamp_distinct(&input.distinct, cardinality);
                distinct.insert(column.column.clone(), cardinality.min(1));
                Ok(Estimate::new(cardinality, distinct))
            }
            None => Ok(Self::derived_filter_estimate(input, &column.column, op)),
        }
    }

    fn derived_filter_estimate(input: &Estimate, column: &str, op: CompareOp) -> Estimate {
        if !op.is_equality() {
            return Self::range_estimate(input, column);
        }
        let dv = input.distinct_of(column).unwrap_or(1).max(1);
        let cardinality = input.cardinality / dv;
        let mut distinct = clamp_distinct(&input.distinct, cardinality);
        distinct.insert(column.to_string(), cardinality.min(1));
        Estimate::new(cardinality, distinct)
    }

    fn range_estimate(input: &Estimate, column: &str) -> Estimate {
        let cardinality = input.cardinality / constants::RANGE_SELECTIVITY_DIVISOR;
        let mut distinct = clamp_distinct(&input.distinct, cardinality);
        if let Some(dv) = input.distinct_of(column) {
            let reduced = (dv / constants::RANGE_SELECTIVITY_DIVISOR).max(1).min(cardinality.max(1));
            distinct.insert(column.to_string(), reduced);
        }
        Estimate::new(cardinality, distinct)
    }

    pub(crate) fn residual_join_estimate(input: &Estimate, left: &QualifiedName, right: &QualifiedName) -> Estimate {
        let dl = input.distinct_of(&left.column).unwrap_or(1);
        let dr = input.distinct_of(&right.column).unwrap_or(1);
        let cardinality = input.cardinality / dl.max(dr).max(1);
        let mut distinct = clamp_distinct(&input.distinct, cardinality);
        let joined = dl.min(dr).min(cardinality);
        distinct.insert(left.column.clone(), joined);
        distinct.insert(right.column.clone(), joined);
        Estimate::new(cardinality, distinct)
    }

    fn projection_estimate(input: &Estimate, attributes: &[QualifiedName]) -> Estimate {
        let distinct = attributes
            .iter()
            .filter_map(|a| input.distinct_of(&a.column).map(|dv| (a.column.clone(), dv)))
            .collect();
        Estimate::new(input.cardinality, distinct)
    }

    /// Cartesian product of two inputs.
    pub fn product_estimate(left: &Estimate, right: &Estimate) -> Estimate {
        let cardinality = left.cardinality.saturating_mul(right.cardinality);
        Estimate::new(cardinality, merge_distinct(&left.distinct, &right.distinct))
    }

    /// Equi-join of two inputs on `left_col = right_col`.
    pub fn join_estimate(
        &self,
        left: JoinInput<'_>,
        right: JoinInput<'_>,
        left_col: &QualifiedName,
        right_col: &QualifiedName,
    ) -> PlanResult<Estimate> {
        let overlay = match (left.base_table, right.base_table) {
            (Some(lt), Some(rt)) => self.histogram_join(left, right, lt, rt, left_col, right_col)?,
            _ => None,
        };
        let cardinality = match overlay {
            Some(rows) => rows,
            None => containment(left.estimate, right.estimate, &left_col.column, &right_col.column),
        };

        let mut distinct = merge_distinct(&left.estimate.distinct, &right.estimate.distinct);
        let dl = left.estimate.distinct_of(&left_col.column);
        let dr = right.estimate.distinct_of(&right_col.column);
        if let Some(joined) = dl.into_iter().chain(dr).min() {
            distinct.insert(left_col.column.clone(), joined);
            distinct.insert(right_col.column.clone(), joined);
        }
        Ok(Estimate::new(cardinality, distinct))
    }

    /// Bucket overlay of the two join columns' histograms. `None` when the
    /// histograms share no bucket range.
    fn histogram_join(
        &self,
        left: JoinInput<'_>,
        right: JoinInput<'_>,
        left_table: &str,
        right_table: &str,
        left_col: &QualifiedName,
        right_col: &QualifiedName,
    ) -> PlanResult<Option<u64>> {
        let lh = self.table_stats(left_table)?.column(&left_col.column);
        let rh = self.table_stats(right_table)?.column(&right_col.column);
        let (Some(lh), Some(rh)) = (lh, rh) else {
            return Ok(None);
        };
        let lcard = left.estimate.cardinality;
        let rcard = right.estimate.cardinality;
        if lcard == 0 || rcard == 0 {
            return Ok(Some(0));
        }

        // sum of lcard * (lrows / lcard) * (rrows / rcard), kept exact
        let mut matched = false;
        let mut numerator: u128 = 0;
        for lb in &lh.histogram.buckets {
            for rb in rh.histogram.buckets.iter().filter(|rb| rb.same_range(lb)) {
                matched = true;
                numerator += lb.row_count as u128 * rb.row_count as u128;
            }
        }
        let rows = numerator.div_ceil(rcard as u128);
        Ok(matched.then(|| u64::try_from(rows).unwrap_or(u64::MAX)))
    }

    /// Cost of a full sequential scan: the table's block count.
    pub fn seq_scan_cost(&self, table: &str) -> PlanResult<f64> {
        Ok(self.table_stats(table)?.blocks() as f64)
    }

    /// Cost of an index scan searching `column` with `op`.
    pub fn index_scan_cost(&self, table: &str, column: &str, op: CompareOp) -> PlanResult<f64> {
        let stats = self.table_stats(table)?;
        let blocks = stats.blocks() as f64;
        if op.is_equality() {
            // no distinct count: treat the column as single-valued, like the estimator
            let dv = stats.distinct_values(column).unwrap_or(1);
            Ok(blocks / dv.max(1) as f64)
        } else {
            Ok(blocks / constants::RANGE_SELECTIVITY_DIVISOR as f64)
        }
    }

    pub fn index_seek_cost(&self) -> f64 {
        constants::INDEX_SEEK_COST
    }

    /// Filtering is free once the rows are fetched.
    pub fn filter_cost(&self, child_cost: f64) -> f64 {
        child_cost
    }

    /// Projection cost: the projected share of the input tuple times the input cost.
    pub fn projection_cost(&self, attributes: usize, tuple_size: u64, child_cost: f64) -> f64 {
        let width = attributes as f64 * self.attribute_width as f64;
        width / tuple_size.max(1) as f64 * child_cost
    }

    /// Block nested-loop cost `B(L) + B(L) * B(R)` over the input costs.
    pub fn nested_loop_cost(&self, left_cost: f64, right_cost: f64) -> f64 {
        left_cost + left_cost * right_cost
    }

    pub fn cross_product_cost(&self, left_cost: f64, right_cost: f64) -> f64 {
        self.nested_loop_cost(left_cost, right_cost)
    }
}

fn input_estimate(plan: &LogicalPlan, id: NodeId, i: usize) -> PlanResult<&Estimate> {
    let child = *plan
        .children(id)
        .get(i)
        .ok_or_else(|| PlanError::malformed(id, format!("missing input {}", i)))?;
    plan.estimate(child)
        .ok_or_else(|| PlanError::Internal(format!("input {} of {} not estimated", child, id)))
}

/// Table read by `id` when it is a bare scan or a projection of one.
pub fn base_table(plan: &LogicalPlan, id: NodeId) -> Option<&str> {
    match plan.kind(id) {
        LogicalNode::Scan { table, .. } => Some(table.as_str()),
        LogicalNode::Projection { .. } => match plan.children(id) {
            [child] => plan.kind(*child).scan_table(),
            _ => None,
        },
        _ => None,
    }
}

fn containment(left: &Estimate, right: &Estimate, left_col: &str, right_col: &str) -> u64 {
    let dl = left.distinct_of(left_col).unwrap_or(1);
    let dr = right.distinct_of(right_col).unwrap_or(1);
    let rows = left.cardinality as u128 * right.cardinality as u128 / dl.max(dr).max(1) as u128;
    u64::try_from(rows).unwrap_or(u64::MAX)
}

/// Union of two distinct maps; columns present on both sides are averaged.
fn merge_distinct(left: &BTreeMap<String, u64>, right: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut merged = left.clone();
    for (column, &dv) in right {
        merged
            .entry(column.clone())
            .and_modify(|existing| *existing = (*existing + dv) / 2)
            .or_insert(dv);
    }
    merged
}

fn clamp_distinct(distinct: &BTreeMap<String, u64>, cardinality: u64) -> BTreeMap<String, u64> {
    distinct
        .iter()
        .map(|(c, &dv)| (c.clone(), dv.min(cardinality)))
        .collect()
}
