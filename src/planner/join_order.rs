//! Join-order search.
//!
//! After rewriting, the first join or product in the plan roots a tree whose
//! leaves are the *relations*: a scan, possibly under pushed-down filters
//! and a replicated projection. The search treats each relation as opaque,
//! keeps the join predicates of the existing join nodes as edges, and
//! rebuilds the cheapest bracketing.
//!
//! The cost of a bracketing is the sum of the output cardinalities of every
//! join or product it performs. Plans with fewer cross products always win;
//! cost decides between plans with the same number. Two strategies are
//! available:
//! - subset DP over every subset of relations, growing left-deep plans one
//!   relation at a time (exact for left-deep plans, O(2^n * n));
//! - interval DP over the relations in their current order (O(n^3)), used
//!   when there are too many relations for the subset DP.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::cost::{base_table, CostModel, JoinInput};
use super::error::{PlanError, PlanResult};
use super::logical::{Estimate, LogicalNode, LogicalPlan, NodeId};
use crate::sql::{CompareOp, Operand, PredicateKind, QualifiedName};

/// Upper bound on the relation count the subset DP accepts.
pub const MAX_SUBSET_RELATIONS: usize = 20;

/// A leaf of the join tree.
#[derive(Debug, Clone)]
pub struct Relation {
    pub root: NodeId,
    pub tables: BTreeSet<String>,
    pub estimate: Estimate,
    pub base_table: Option<String>,
}

/// An equi-join predicate between two relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub left: QualifiedName,
    pub right: QualifiedName,
}

/// Join predicates connecting two relation sets, oriented so the first
/// column of each pair belongs to the left set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedJoin {
    /// Predicate that becomes the join condition.
    pub condition: (QualifiedName, QualifiedName),
    /// Further crossing predicates, applied above the join.
    pub residual: Vec<(QualifiedName, QualifiedName)>,
}

/// Join predicates crossing from `a` to `b`, or `None` when only a cross
/// product can combine them.
pub fn shared_join_column(
    edges: &[JoinEdge],
    a: &BTreeSet<String>,
    b: &BTreeSet<String>,
) -> Option<SharedJoin> {
    let mut crossing = edges.iter().filter_map(|e| {
        if a.contains(&e.left.table) && b.contains(&e.right.table) {
            Some((e.left.clone(), e.right.clone()))
        } else if b.contains(&e.left.table) && a.contains(&e.right.table) {
            Some((e.right.clone(), e.left.clone()))
        } else {
            None
        }
    });
    let condition = crossing.next()?;
    Some(SharedJoin {
        condition,
        residual: crossing.collect(),
    })
}

/// Which search produced the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrderStrategy {
    Subset,
    Interval,
}

/// Summary of one join-order search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOrderOutcome {
    pub relations: usize,
    pub cost: u64,
    pub strategy: JoinOrderStrategy,
}

/// How a DP entry was formed.
#[derive(Debug, Clone, Copy)]
enum Split {
    Leaf(usize),
    Pair { left: u64, right: u64 },
}

#[derive(Debug, Clone)]
struct Entry {
    cost: u64,
    /// Cross products in the sub-plan; ranked before cost.
    products: u32,
    estimate: Estimate,
    split: Split,
}

impl Entry {
    fn beats(&self, other: &Entry) -> bool {
        (self.products, self.cost) < (other.products, other.cost)
    }
}

/// Searches for the cheapest join order.
pub struct JoinOrderOptimizer<'m, 'a> {
    model: &'m CostModel<'a>,
    subset_limit: usize,
}

impl<'m, 'a> JoinOrderOptimizer<'m, 'a> {
    pub fn new(model: &'m CostModel<'a>) -> Self {
        Self {
            model,
            subset_limit: 12,
        }
    }

    /// Largest relation count handled by the subset DP.
    pub fn with_subset_limit(mut self, limit: usize) -> Self {
        self.subset_limit = limit.min(MAX_SUBSET_RELATIONS);
        self
    }

    /// Reorder the join tree of an estimated plan.
    ///
    /// Returns `None` when the plan has no join or product. The plan's
    /// estimates must be current; the rebuilt nodes are left unestimated.
    pub fn optimize(&self, plan: &mut LogicalPlan) -> PlanResult<Option<JoinOrderOutcome>> {
        let Some(join_root) = plan.find_first(LogicalNode::is_binary) else {
            return Ok(None);
        };
        let (relations, edges) = Self::collect(plan, join_root)?;
        if relations.len() < 2 {
            return Ok(None);
        }

        let (strategy, cost, shape) = if relations.len() <= self.subset_limit {
            let (cost, shape) = self.subset_dp(&relations, &edges)?;
            (JoinOrderStrategy::Subset, cost, shape)
        } else {
            let (cost, shape) = self.interval_dp(&relations, &edges)?;
            (JoinOrderStrategy::Interval, cost, shape)
        };

        for relation in &relations {
            plan.detach(relation.root)?;
        }
        let new_root = Self::materialize(plan, &relations, &edges, &shape)?;
        plan.replace_subtree(join_root, new_root)?;

        debug!(relations = relations.len(), cost, ?strategy, "join order chosen");
        Ok(Some(JoinOrderOutcome {
            relations: relations.len(),
            cost,
            strategy,
        }))
    }

    /// Relations (left to right) and join edges of the tree at `join_root`.
    pub fn collect(plan: &LogicalPlan, join_root: NodeId) -> PlanResult<(Vec<Relation>, Vec<JoinEdge>)> {
        let mut relations = Vec::new();
        let mut edges = Vec::new();
        let mut stack = vec![join_root];
        while let Some(id) = stack.pop() {
            match plan.kind(id) {
                LogicalNode::Join { left, right, .. } => {
                    edges.push(JoinEdge {
                        left: left.clone(),
                        right: right.clone(),
                    });
                    stack.extend(plan.children(id).iter().rev());
                }
                LogicalNode::Product => stack.extend(plan.children(id).iter().rev()),
                _ => {
                    let estimate = plan.estimate(id).cloned().ok_or_else(|| {
                        PlanError::Internal(format!("relation {} has not been estimated", id))
                    })?;
                    relations.push(Relation {
                        root: id,
                        tables: plan.subtree_tables(id),
                        estimate,
                        base_table: base_table(plan, id).map(str::to_string),
                    });
                }
            }
        }
        Ok((relations, edges))
    }

    fn tables_of(relations: &[Relation], mask: u64) -> BTreeSet<String> {
        relations
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .flat_map(|(_, r)| r.tables.iter().cloned())
            .collect()
    }

    /// Estimate of joining two disjoint relation sets, and whether a join
    /// predicate connects them.
    fn combine(
        &self,
        relations: &[Relation],
        edges: &[JoinEdge],
        left: (u64, &Estimate),
        right: (u64, &Estimate),
    ) -> PlanResult<(Estimate, bool)> {
        let (lmask, lest) = left;
        let (rmask, rest) = right;
        let Some(shared) = shared_join_column(
            edges,
            &Self::tables_of(relations, lmask),
            &Self::tables_of(relations, rmask),
        ) else {
            return Ok((CostModel::product_estimate(lest, rest), false));
        };
        let (lcol, rcol) = &shared.condition;

        let mut estimate = self.model.join_estimate(
            JoinInput {
                estimate: lest,
                base_table: single_base(relations, lmask),
            },
            JoinInput {
                estimate: rest,
                base_table: single_base(relations, rmask),
            },
            lcol,
            rcol,
        )?;
        for (l, r) in &shared.residual {
            estimate = CostModel::residual_join_estimate(&estimate, l, r);
        }
        Ok((estimate, true))
    }

    fn subset_dp(&self, relations: &[Relation], edges: &[JoinEdge]) -> PlanResult<(u64, Vec<(u64, Split)>)> {
        let n = relations.len();
        if n > MAX_SUBSET_RELATIONS {
            return Err(PlanError::Unsupported(format!(
                "subset join ordering over {} relations",
                n
            )));
        }
        let full: u64 = (1u64 << n) - 1;
        let mut table: Vec<Option<Entry>> = vec![None; 1usize << n];

        for (i, relation) in relations.iter().enumerate() {
            table[1usize << i] = Some(Entry {
                cost: 0,
                products: 0,
                estimate: relation.estimate.clone(),
                split: Split::Leaf(i),
            });
        }

        for mask in 1..=full {
            if mask.count_ones() < 2 {
                continue;
            }
            let mut best: Option<Entry> = None;

            if mask.count_ones() == 2 {
                let low = 1u64 << mask.trailing_zeros();
                let high = mask & !low;
                let (l, r) = (entry(&table, low)?, entry(&table, high)?);
                let (estimate, joined) =
                    self.combine(relations, edges, (low, &l.estimate), (high, &r.estimate))?;
                best = Some(Entry {
                    cost: estimate.cardinality,
                    products: u32::from(!joined),
                    estimate,
                    split: Split::Pair { left: low, right: high },
                });
            } else {
                for r in 0..n {
                    let bit = 1u64 << r;
                    if mask & bit == 0 {
                        continue;
                    }
                    let rest = mask & !bit;
                    let (sub, single) = (entry(&table, rest)?, entry(&table, bit)?);
                    let (estimate, joined) =
                        self.combine(relations, edges, (rest, &sub.estimate), (bit, &single.estimate))?;
                    let candidate = Entry {
                        cost: sub.cost.saturating_add(estimate.cardinality),
                        products: sub.products + u32::from(!joined),
                        estimate,
                        split: Split::Pair { left: rest, right: bit },
                    };
                    if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                        best = Some(candidate);
                    }
                }
            }

            if let Some(best) = &best {
                trace!(mask, cost = best.cost, rows = best.estimate.cardinality, "subset entry");
            }
            table[mask as usize] = best;
        }

        let cost = entry(&table, full)?.cost;
        debug!(relations = n, subsets = full, cost, "subset join ordering finished");
        let shape = table
            .into_iter()
            .enumerate()
            .filter_map(|(mask, e)| e.map(|e| (mask as u64, e.split)))
            .collect();
        Ok((cost, shape))
    }

    fn interval_dp(&self, relations: &[Relation], edges: &[JoinEdge]) -> PlanResult<(u64, Vec<(u64, Split)>)> {
        let n = relations.len();
        if n > 64 {
            return Err(PlanError::Unsupported(format!("join ordering over {} relations", n)));
        }
        let span = |i: usize, j: usize| -> u64 {
            let width = j - i + 1;
            let ones = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
            ones << i
        };

        // best[i][j] covers relations i..=j
        let mut best: Vec<Vec<Option<Entry>>> = vec![vec![None; n]; n];
        for (i, relation) in relations.iter().enumerate() {
            best[i][i] = Some(Entry {
                cost: 0,
                products: 0,
                estimate: relation.estimate.clone(),
                split: Split::Leaf(i),
            });
        }

        for len in 2..=n {
            for i in 0..=n - len {
                let j = i + len - 1;
                let mut winner: Option<Entry> = None;
                for k in i..j {
                    let (l, r) = match (&best[i][k], &best[k + 1][j]) {
                        (Some(l), Some(r)) => (l, r),
                        _ => return Err(PlanError::Internal("interval entry missing".into())),
                    };
                    let (estimate, joined) = self.combine(
                        relations,
                        edges,
                        (span(i, k), &l.estimate),
                        (span(k + 1, j), &r.estimate),
                    )?;
                    let candidate = Entry {
                        cost: l.cost.saturating_add(r.cost).saturating_add(estimate.cardinality),
                        products: l.products + r.products + u32::from(!joined),
                        estimate,
                        split: Split::Pair {
                            left: span(i, k),
                            right: span(k + 1, j),
                        },
                    };
                    if winner.as_ref().map_or(true, |w| candidate.beats(w)) {
                        winner = Some(candidate);
                    }
                }
                best[i][j] = winner;
            }
        }

        let cost = best[0][n - 1]
            .as_ref()
            .map(|e| e.cost)
            .ok_or_else(|| PlanError::Internal("interval search produced no plan".into()))?;
        debug!(relations = n, cost, "interval join ordering finished");

        let mut shape = Vec::new();
        for (i, row) in best.into_iter().enumerate() {
            for (j, e) in row.into_iter().enumerate() {
                if let Some(e) = e {
                    shape.push((span(i, j), e.split));
                }
            }
        }
        Ok((cost, shape))
    }

    /// Build the winning tree from the DP backpointers.
    fn materialize(
        plan: &mut LogicalPlan,
        relations: &[Relation],
        edges: &[JoinEdge],
        shape: &[(u64, Split)],
    ) -> PlanResult<NodeId> {
        let full = shape
            .iter()
            .map(|(mask, _)| *mask)
            .max()
            .ok_or_else(|| PlanError::Internal("empty join order".into()))?;
        Self::build(plan, relations, edges, shape, full)
    }

    fn build(
        plan: &mut LogicalPlan,
        relations: &[Relation],
        edges: &[JoinEdge],
        shape: &[(u64, Split)],
        mask: u64,
    ) -> PlanResult<NodeId> {
        let split = shape
            .iter()
            .find(|(m, _)| *m == mask)
            .map(|(_, s)| *s)
            .ok_or_else(|| PlanError::Internal(format!("no plan for relation set {:#b}", mask)))?;

        match split {
            Split::Leaf(i) => Ok(relations[i].root),
            Split::Pair { left, right } => {
                let l = Self::build(plan, relations, edges, shape, left)?;
                let r = Self::build(plan, relations, edges, shape, right)?;
                let Some(SharedJoin { condition, residual }) = shared_join_column(
                    edges,
                    &Self::tables_of(relations, left),
                    &Self::tables_of(relations, right),
                ) else {
                    return plan.add_with_children(LogicalNode::Product, &[l, r]);
                };
                let (lcol, rcol) = condition;
                let mut node =
                    plan.add_with_children(LogicalNode::equi_join(lcol, rcol), &[l, r])?;
                for (lcol, rcol) in residual {
                    node = plan.add_with_children(
                        LogicalNode::Selection {
                            kind: PredicateKind::Join,
                            left: lcol,
                            op: CompareOp::Eq,
                            right: Operand::Column(rcol),
                        },
                        &[node],
                    )?;
                }
                Ok(node)
            }
        }
    }
}

/// Base table of a single-relation set.
fn single_base(relations: &[Relation], mask: u64) -> Option<&str> {
    if mask.count_ones() == 1 {
        relations
            .get(mask.trailing_zeros() as usize)
            .and_then(|r| r.base_table.as_deref())
    } else {
        None
    }
}

fn entry(table: &[Option<Entry>], mask: u64) -> PlanResult<&Entry> {
    table
        .get(mask as usize)
        .and_then(Option::as_ref)
        .ok_or_else(|| PlanError::Internal(format!("no entry for relation set {:#b}", mask)))
}
