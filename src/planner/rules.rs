//! Rule-based rewriting of logical plans.
//!
//! The rules run once each, in order, on the initial plan shape:
//! 1. [`CreateJoinNodes`] turns join predicates over the product into a
//!    connected join tree;
//! 2. [`PushDownSelections`] moves each filter directly above its table's scan;
//! 3. [`ReplicateProjections`] adds a per-table projection above each scan.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::error::{PlanError, PlanResult};
use super::logical::{LogicalNode, LogicalPlan, NodeId};
use crate::sql::{Operand, QualifiedName};

/// A rewrite rule.
pub trait RewriteRule: Send + Sync {
    /// Name of the rule.
    fn name(&self) -> &str;

    /// Rewrite `plan` in place, returning whether anything changed.
    fn apply(&self, plan: &mut LogicalPlan) -> PlanResult<bool>;
}

/// Replaces the product of scans with joins driven by the join predicates.
///
/// Predicates are consumed in plan order. A predicate whose tables are both
/// new starts a component; one that touches an existing component extends it
/// (the existing side becomes the left input); one that links two components
/// merges them. A predicate whose tables already share a component stays as
/// a residual join selection. Inputs no predicate connects are producted
/// onto the result, left-deep.
pub struct CreateJoinNodes;

impl RewriteRule for CreateJoinNodes {
    fn name(&self) -> &str {
        "CreateJoinNodes"
    }

    fn apply(&self, plan: &mut LogicalPlan) -> PlanResult<bool> {
        let join_selections = plan.find_all(LogicalNode::is_join_selection);
        let Some(product) = plan.find_first(|n| matches!(n, LogicalNode::Product)) else {
            if let Some(&sel) = join_selections.first() {
                return Err(PlanError::malformed(sel, "join predicate without a product"));
            }
            return Ok(false);
        };

        let inputs: Vec<NodeId> = plan.children(product).to_vec();
        if join_selections.is_empty() && inputs.len() <= 2 {
            return Ok(false);
        }

        let mut owner: HashMap<String, usize> = HashMap::new();
        for (i, &input) in inputs.iter().enumerate() {
            for table in plan.subtree_tables(input) {
                owner.insert(table, i);
            }
        }
        for &input in &inputs {
            plan.detach(input)?;
        }

        // component id per input, and the current root of each component
        let mut component: Vec<Option<usize>> = vec![None; inputs.len()];
        let mut roots: Vec<NodeId> = Vec::new();
        let mut joins = 0usize;

        for sel in join_selections {
            let (left, right) = match plan.kind(sel) {
                LogicalNode::Selection {
                    left,
                    right: Operand::Column(right),
                    ..
                } => (left.clone(), right.clone()),
                _ => return Err(PlanError::malformed(sel, "join selection without a column operand")),
            };
            let side = |col: &QualifiedName| {
                owner.get(&col.table).copied().ok_or_else(|| {
                    PlanError::malformed(sel, format!("{} is not produced by the product", col.table))
                })
            };
            let (li, ri) = (side(&left)?, side(&right)?);

            let (outer, inner, left_col, right_col, comp) = match (component[li], component[ri]) {
                (Some(a), Some(b)) if a == b => {
                    trace!(node = %sel, "join predicate kept as residual selection");
                    continue;
                }
                (None, None) if li == ri => {
                    trace!(node = %sel, "join predicate within one input kept as selection");
                    continue;
                }
                (None, None) => {
                    roots.push(inputs[li]);
                    let c = roots.len() - 1;
                    component[li] = Some(c);
                    (inputs[li], inputs[ri], left, right, c)
                }
                (Some(c), None) => (roots[c], inputs[ri], left, right, c),
                (None, Some(c)) => (roots[c], inputs[li], right, left, c),
                (Some(a), Some(b)) => {
                    for slot in component.iter_mut().filter(|s| **s == Some(b)) {
                        *slot = Some(a);
                    }
                    (roots[a], roots[b], left, right, a)
                }
            };

            plan.remove_node(sel)?;
            let join = plan.add_with_children(LogicalNode::equi_join(left_col, right_col), &[outer, inner])?;
            roots[comp] = join;
            component[li] = Some(comp);
            component[ri] = Some(comp);
            joins += 1;
        }

        // components in order of their first input, then unconnected inputs
        let mut pieces: Vec<NodeId> = Vec::new();
        let mut emitted: Vec<usize> = Vec::new();
        for (i, &input) in inputs.iter().enumerate() {
            match component[i] {
                Some(c) if !emitted.contains(&c) => {
                    emitted.push(c);
                    pieces.push(roots[c]);
                }
                Some(_) => {}
                None => pieces.push(input),
            }
        }

        let mut pieces = pieces.into_iter();
        let mut result = pieces
            .next()
            .ok_or_else(|| PlanError::malformed(product, "product has no inputs"))?;
        for piece in pieces {
            result = plan.add_with_children(LogicalNode::Product, &[result, piece])?;
        }
        plan.replace_subtree(product, result)?;

        debug!(joins, inputs = inputs.len(), "created join nodes");
        Ok(true)
    }
}

/// Moves every filter selection directly above the scan of its table.
///
/// Several filters on one table form a chain above the scan, keeping their
/// relative order.
pub struct PushDownSelections;

impl PushDownSelections {
    /// Whether `sel` already sits in the filter chain directly above `scan`.
    fn in_place(plan: &LogicalPlan, sel: NodeId, scan: NodeId, table: &str) -> bool {
        let mut current = sel;
        loop {
            match plan.children(current) {
                [child] if *child == scan => return true,
                [child] if filter_table(plan, *child) == Some(table) => current = *child,
                _ => return false,
            }
        }
    }
}

impl RewriteRule for PushDownSelections {
    fn name(&self) -> &str {
        "PushDownSelections"
    }

    fn apply(&self, plan: &mut LogicalPlan) -> PlanResult<bool> {
        let mut moved = 0usize;
        for sel in plan.find_all(LogicalNode::is_filter) {
            let table = match filter_table(plan, sel) {
                Some(table) => table.to_string(),
                None => continue,
            };
            let scan = plan
                .scan_of(&table)
                .ok_or_else(|| PlanError::malformed(sel, format!("no scan of {} to push onto", table)))?;
            if Self::in_place(plan, sel, scan, &table) {
                continue;
            }
            plan.remove_node(sel)?;
            plan.insert_above(sel, scan)?;
            trace!(node = %sel, table = %table, "pushed selection");
            moved += 1;
        }
        debug!(moved, "pushed down selections");
        Ok(moved > 0)
    }
}

/// Adds a projection of the needed columns above each table's scan (and its
/// pushed-down filters) when the plan reads more than one table.
///
/// A table's needed columns are those in the final projection plus those
/// used by joins or residual join selections. Tables with no needed columns
/// get no projection.
pub struct ReplicateProjections;

impl ReplicateProjections {
    fn needed_columns(plan: &LogicalPlan, root: NodeId) -> BTreeMap<String, Vec<QualifiedName>> {
        let mut needed: BTreeMap<String, Vec<QualifiedName>> = BTreeMap::new();
        let mut add = |col: &QualifiedName| {
            let cols = needed.entry(col.table.clone()).or_default();
            if !cols.contains(col) {
                cols.push(col.clone());
            }
        };
        if let LogicalNode::Projection { attributes } = plan.kind(root) {
            attributes.iter().for_each(&mut add);
        }
        for id in plan.preorder(root) {
            let kind = plan.kind(id);
            if matches!(kind, LogicalNode::Join { .. }) || kind.is_join_selection() {
                kind.referenced_columns().into_iter().for_each(&mut add);
            }
        }
        needed
    }
}

impl RewriteRule for ReplicateProjections {
    fn name(&self) -> &str {
        "ReplicateProjections"
    }

    fn apply(&self, plan: &mut LogicalPlan) -> PlanResult<bool> {
        let scans = plan.find_all(LogicalNode::is_scan);
        if scans.len() <= 1 {
            return Ok(false);
        }
        let root = plan.root_id()?;
        if !matches!(plan.kind(root), LogicalNode::Projection { .. }) {
            return Err(PlanError::malformed(root, "plan root must be a projection"));
        }

        let needed = Self::needed_columns(plan, root);
        let mut inserted = 0usize;
        for scan in scans {
            let table = match plan.kind(scan).scan_table() {
                Some(t) => t.to_string(),
                None => continue,
            };
            // A table read only by its own filters gets no projection. The
            // filter sits below the insertion point and none of its columns
            // flow upward.
            let Some(columns) = needed.get(&table).filter(|c| !c.is_empty()) else {
                continue;
            };

            let mut target = scan;
            while let Some(parent) = plan.parent(target) {
                if filter_table(plan, parent) == Some(table.as_str()) {
                    target = parent;
                } else {
                    break;
                }
            }
            if let Some(parent) = plan.parent(target) {
                if parent != root && matches!(plan.kind(parent), LogicalNode::Projection { .. }) {
                    continue;
                }
            }

            let projection = plan.add(LogicalNode::projection(columns.iter().cloned()));
            plan.insert_above(projection, target)?;
            inserted += 1;
        }
        debug!(inserted, "replicated projections");
        Ok(inserted > 0)
    }
}

fn filter_table(plan: &LogicalPlan, id: NodeId) -> Option<&str> {
    match plan.kind(id) {
        LogicalNode::Selection { left, .. } if plan.kind(id).is_filter() => Some(left.table.as_str()),
        _ => None,
    }
}

/// Runs rewrite rules in sequence.
pub struct Rewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter {
    /// Create a rewriter with the standard rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(CreateJoinNodes),
                Box::new(PushDownSelections),
                Box::new(ReplicateProjections),
            ],
        }
    }

    /// Create a rewriter with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a custom rule, run after the existing ones.
    pub fn add_rule(&mut self, rule: Box<dyn RewriteRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Apply every rule once, calling `after_rule` after each.
    pub fn rewrite<F>(&self, plan: &mut LogicalPlan, mut after_rule: F) -> PlanResult<()>
    where
        F: FnMut(&str, &LogicalPlan),
    {
        for rule in &self.rules {
            let changed = rule.apply(plan)?;
            trace!(rule = rule.name(), changed, "applied rule");
            after_rule(rule.name(), plan);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::builder::build_initial_plan;
    use crate::sql::{AnalyzedQuery, CompareOp, Literal, Predicate, PredicateKind};

    fn filter(table: &str, column: &str, value: i64) -> Predicate {
        Predicate {
            kind: PredicateKind::Filter,
            left: QualifiedName::new(table, column),
            op: CompareOp::Eq,
            right: Operand::Literal(Literal::Integer(value)),
        }
    }

    fn join(lt: &str, lc: &str, rt: &str, rc: &str) -> Predicate {
        Predicate {
            kind: PredicateKind::Join,
            left: QualifiedName::new(lt, lc),
            op: CompareOp::Eq,
            right: Operand::Column(QualifiedName::new(rt, rc)),
        }
    }

    fn plan_for(tables: &[&str], projection: &[(&str, &str)], predicates: Vec<Predicate>) -> LogicalPlan {
        let query = AnalyzedQuery {
            projection: projection.iter().map(|(t, c)| QualifiedName::new(*t, *c)).collect(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            predicates,
        };
        build_initial_plan(&query).unwrap()
    }

    fn count(plan: &LogicalPlan, f: impl Fn(&LogicalNode) -> bool) -> usize {
        plan.find_all(f).len()
    }

    #[test]
    fn test_create_joins_two_tables() {
        let mut plan = plan_for(
            &["radnik", "radproj"],
            &[("radnik", "mbr")],
            vec![filter("radnik", "plt", 3000), join("radnik", "mbr", "radproj", "mbr")],
        );
        assert!(CreateJoinNodes.apply(&mut plan).unwrap());
        plan.validate().unwrap();

        let expected = "\
Projection: [radnik.mbr]
  Selection(FILTER): radnik.plt = 3000
    Join: radnik.mbr = radproj.mbr
      Scan: radnik
      Scan: radproj
";
        assert_eq!(plan.to_string(), expected);
    }

    #[test]
    fn test_create_joins_no_predicates_left_deep() {
        let mut plan = plan_for(&["a", "b", "c", "d"], &[("a", "x")], vec![]);
        assert!(CreateJoinNodes.apply(&mut plan).unwrap());
        plan.validate().unwrap();

        assert_eq!(count(&plan, |n| matches!(n, LogicalNode::Join { .. })), 0);
        let products = plan.find_all(|n| matches!(n, LogicalNode::Product));
        assert_eq!(products.len(), 3);
        for p in products {
            let children = plan.children(p);
            assert_eq!(children.len(), 2);
            assert!(plan.kind(children[1]).is_scan());
        }
        assert_eq!(count(&plan, LogicalNode::is_scan), 4);
    }

    #[test]
    fn test_create_joins_single_scan_noop() {
        let mut plan = plan_for(&["a"], &[("a", "x")], vec![filter("a", "x", 1)]);
        let before = plan.to_string();
        assert!(!CreateJoinNodes.apply(&mut plan).unwrap());
        assert_eq!(plan.to_string(), before);
    }

    #[test]
    fn test_create_joins_chain_is_connected() {
        let mut plan = plan_for(
            &["a", "b", "c", "d"],
            &[("a", "x")],
            vec![
                join("a", "x", "b", "x"),
                join("c", "y", "d", "y"),
                join("b", "y", "c", "y"),
            ],
        );
        CreateJoinNodes.apply(&mut plan).unwrap();
        plan.validate().unwrap();

        assert_eq!(count(&plan, |n| matches!(n, LogicalNode::Join { .. })), 3);
        assert_eq!(count(&plan, |n| matches!(n, LogicalNode::Product)), 0);
        assert_eq!(count(&plan, LogicalNode::is_join_selection), 0);

        // every join's left column comes from its left input
        for id in plan.find_all(|n| matches!(n, LogicalNode::Join { .. })) {
            if let LogicalNode::Join { left, right, .. } = plan.kind(id) {
                let children = plan.children(id);
                assert!(plan.subtree_tables(children[0]).contains(&left.table));
                assert!(plan.subtree_tables(children[1]).contains(&right.table));
            }
        }
    }

    #[test]
    fn test_create_joins_orients_existing_component_left() {
        let mut plan = plan_for(
            &["a", "b", "c"],
            &[("a", "x")],
            vec![join("a", "x", "b", "x"), join("c", "y", "b", "y")],
        );
        CreateJoinNodes.apply(&mut plan).unwrap();

        let top = plan.find_first(|n| matches!(n, LogicalNode::Join { .. })).unwrap();
        assert_eq!(
            plan.kind(top),
            &LogicalNode::equi_join(QualifiedName::new("b", "y"), QualifiedName::new("c", "y"))
        );
    }

    #[test]
    fn test_create_joins_residual_and_leftover() {
        let mut plan = plan_for(
            &["a", "b", "c"],
            &[("a", "x")],
            vec![join("a", "x", "b", "x"), join("a", "z", "b", "z")],
        );
        CreateJoinNodes.apply(&mut plan).unwrap();
        plan.validate().unwrap();

        assert_eq!(count(&plan, LogicalNode::is_join_selection), 1);
        assert_eq!(count(&plan, |n| matches!(n, LogicalNode::Join { .. })), 1);
        let product = plan.find_first(|n| matches!(n, LogicalNode::Product)).unwrap();
        let children = plan.children(product);
        assert!(matches!(plan.kind(children[0]), LogicalNode::Join { .. }));
        assert_eq!(plan.kind(children[1]).scan_table(), Some("c"));
    }

    #[test]
    fn test_push_down_selections() {
        let mut plan = plan_for(
            &["radnik", "radproj"],
            &[("radnik", "mbr")],
            vec![filter("radnik", "plt", 3000), join("radnik", "mbr", "radproj", "mbr")],
        );
        CreateJoinNodes.apply(&mut plan).unwrap();
        assert!(PushDownSelections.apply(&mut plan).unwrap());
        plan.validate().unwrap();

        let expected = "\
Projection: [radnik.mbr]
  Join: radnik.mbr = radproj.mbr
    Selection(FILTER): radnik.plt = 3000
      Scan: radnik
    Scan: radproj
";
        assert_eq!(plan.to_string(), expected);
        assert!(!PushDownSelections.apply(&mut plan).unwrap());
    }

    #[test]
    fn test_push_down_chains_filters() {
        let mut plan = plan_for(
            &["a", "b"],
            &[("a", "x")],
            vec![filter("a", "x", 1), filter("b", "y", 2), filter("a", "z", 3)],
        );
        CreateJoinNodes.apply(&mut plan).unwrap();
        PushDownSelections.apply(&mut plan).unwrap();
        plan.validate().unwrap();

        for sel in plan.find_all(LogicalNode::is_filter) {
            let table = filter_table(&plan, sel).unwrap().to_string();
            let child = plan.children(sel)[0];
            let below = plan.kind(child);
            assert!(below.scan_table() == Some(table.as_str()) || filter_table(&plan, child) == Some(table.as_str()));
        }
        let scan_a = plan.scan_of("a").unwrap();
        let above = plan.parent(scan_a).unwrap();
        assert!(matches!(plan.kind(above), LogicalNode::Selection { left, .. } if left.column == "z"));
    }

    #[test]
    fn test_replicate_projections() {
        let mut plan = plan_for(
            &["radnik", "radproj"],
            &[("radnik", "mbr")],
            vec![filter("radnik", "plt", 3000), join("radnik", "mbr", "radproj", "mbr")],
        );
        Rewriter::new().rewrite(&mut plan, |_, _| {}).unwrap();
        plan.validate().unwrap();

        let expected = "\
Projection: [radnik.mbr]
  Join: radnik.mbr = radproj.mbr
    Projection: [radnik.mbr]
      Selection(FILTER): radnik.plt = 3000
        Scan: radnik
    Projection: [radproj.mbr]
      Scan: radproj
";
        assert_eq!(plan.to_string(), expected);
        assert!(!ReplicateProjections.apply(&mut plan).unwrap());
    }

    #[test]
    fn test_replicate_skips_unreferenced_table() {
        let mut plan = plan_for(&["a", "b"], &[("a", "x")], vec![]);
        Rewriter::new().rewrite(&mut plan, |_, _| {}).unwrap();

        let scan_b = plan.scan_of("b").unwrap();
        assert!(matches!(plan.kind(plan.parent(scan_b).unwrap()), LogicalNode::Product));
        let scan_a = plan.scan_of("a").unwrap();
        assert!(matches!(plan.kind(plan.parent(scan_a).unwrap()), LogicalNode::Projection { .. }));
    }

    #[test]
    fn test_replicate_skips_filter_only_table() {
        let mut plan = plan_for(
            &["radnik", "projekat"],
            &[("radnik", "mbr")],
            vec![filter("projekat", "ruk", 3)],
        );
        Rewriter::new().rewrite(&mut plan, |_, _| {}).unwrap();
        plan.validate().unwrap();

        let scan = plan.scan_of("projekat").unwrap();
        let sel = plan.parent(scan).unwrap();
        assert!(plan.kind(sel).is_filter());
        assert!(matches!(plan.kind(plan.parent(sel).unwrap()), LogicalNode::Product));

        let scan = plan.scan_of("radnik").unwrap();
        assert!(matches!(
            plan.kind(plan.parent(scan).unwrap()),
            LogicalNode::Projection { attributes } if attributes == &[QualifiedName::new("radnik", "mbr")]
        ));
        assert_eq!(count(&plan, |n| matches!(n, LogicalNode::Projection { .. })), 2);
    }

    #[test]
    fn test_rewriter_reports_stages() {
        let mut plan = plan_for(&["a"], &[("a", "x")], vec![]);
        let mut seen = Vec::new();
        Rewriter::new()
            .rewrite(&mut plan, |name, _| seen.push(name.to_string()))
            .unwrap();
        assert_eq!(seen, vec!["CreateJoinNodes", "PushDownSelections", "ReplicateProjections"]);
    }
}
