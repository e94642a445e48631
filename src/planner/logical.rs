//! Logical query plan representation.
//!
//! Logical plans describe *what* the query does, not *how* it runs. The plan
//! is an arena: nodes live in a `Vec` owned by the [`LogicalPlan`] and refer
//! to each other by [`NodeId`]. Children are id lists and the parent link is
//! only used for navigation, so re-parenting a node is a pair of list edits.
//!
//! Every mutation keeps two invariants:
//! - a node has at most one parent, and it is listed in that parent's
//!   children exactly once;
//! - the reachable tree is acyclic.
//!
//! Mutations also drop the cached [`Estimate`] of every node above the
//! changed position, so a later estimation pass recomputes exactly the
//! nodes whose inputs changed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::error::{PlanError, PlanResult};
use crate::sql::{CompareOp, Operand, PredicateKind, QualifiedName};

/// Index of a node in its plan's arena.
///
/// Ids are allocated by the plan itself in increasing order, so two
/// independently built plans number their nodes the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalNode {
    /// Read a base table.
    Scan { table: String, alias_id: usize },

    /// Keep rows satisfying `left op right`.
    Selection {
        kind: PredicateKind,
        left: QualifiedName,
        op: CompareOp,
        right: Operand,
    },

    /// Keep only the listed attributes.
    Projection { attributes: Vec<QualifiedName> },

    /// Cartesian product of all children.
    Product,

    /// Binary join on `left op right`; `left` belongs to the first child.
    Join {
        op: CompareOp,
        left: QualifiedName,
        right: QualifiedName,
    },
}

impl LogicalNode {
    pub fn scan(table: impl Into<String>, alias_id: usize) -> Self {
        LogicalNode::Scan {
            table: table.into(),
            alias_id,
        }
    }

    /// Projection with duplicate attributes removed, first occurrence kept.
    pub fn projection<I>(attributes: I) -> Self
    where
        I: IntoIterator<Item = QualifiedName>,
    {
        let mut seen = BTreeSet::new();
        let attributes = attributes
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .collect();
        LogicalNode::Projection { attributes }
    }

    pub fn equi_join(left: QualifiedName, right: QualifiedName) -> Self {
        LogicalNode::Join {
            op: CompareOp::Eq,
            left,
            right,
        }
    }

    pub fn is_scan(&self) -> bool {
        matches!(self, LogicalNode::Scan { .. })
    }

    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            LogicalNode::Selection {
                kind: PredicateKind::Filter,
                ..
            }
        )
    }

    pub fn is_join_selection(&self) -> bool {
        matches!(
            self,
            LogicalNode::Selection {
                kind: PredicateKind::Join,
                ..
            }
        )
    }

    /// Join or product.
    pub fn is_binary(&self) -> bool {
        matches!(self, LogicalNode::Join { .. } | LogicalNode::Product)
    }

    pub fn scan_table(&self) -> Option<&str> {
        match self {
            LogicalNode::Scan { table, .. } => Some(table.as_str()),
            _ => None,
        }
    }

    /// Every column this node mentions.
    pub fn referenced_columns(&self) -> Vec<&QualifiedName> {
        match self {
            LogicalNode::Scan { .. } | LogicalNode::Product => Vec::new(),
            LogicalNode::Selection { left, right, .. } => {
                let mut cols = vec![left];
                cols.extend(right.as_column());
                cols
            }
            LogicalNode::Projection { attributes } => attributes.iter().collect(),
            LogicalNode::Join { left, right, .. } => vec![left, right],
        }
    }
}

impl fmt::Display for LogicalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalNode::Scan { table, .. } => write!(f, "Scan: {}", table),
            LogicalNode::Selection {
                kind,
                left,
                op,
                right,
            } => write!(f, "Selection({}): {} {} {}", kind, left, op, right),
            LogicalNode::Projection { attributes } => {
                let cols: Vec<String> = attributes.iter().map(ToString::to_string).collect();
                write!(f, "Projection: [{}]", cols.join(", "))
            }
            LogicalNode::Product => write!(f, "Product"),
            LogicalNode::Join { op, left, right } => write!(f, "Join: {} {} {}", left, op, right),
        }
    }
}

/// Cardinality estimate cached on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Estimate {
    /// Estimated output rows.
    pub cardinality: u64,
    /// Estimated distinct values per (unqualified) column name.
    pub distinct: BTreeMap<String, u64>,
}

impl Estimate {
    pub fn new(cardinality: u64, distinct: BTreeMap<String, u64>) -> Self {
        Self {
            cardinality,
            distinct,
        }
    }

    pub fn distinct_of(&self, column: &str) -> Option<u64> {
        self.distinct.get(column).copied()
    }
}

/// A node slot in the arena.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub kind: LogicalNode,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    estimate: Option<Estimate>,
}

impl PlanNode {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn estimate(&self) -> Option<&Estimate> {
        self.estimate.as_ref()
    }
}

/// Arena-backed logical plan tree.
#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    nodes: Vec<PlanNode>,
    root: Option<NodeId>,
}

impl LogicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a detached node.
    pub fn add(&mut self, kind: LogicalNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PlanNode {
            kind,
            children: Vec::new(),
            parent: None,
            estimate: None,
        });
        id
    }

    /// Allocate a node and attach the given detached nodes as its children.
    pub fn add_with_children(&mut self, kind: LogicalNode, children: &[NodeId]) -> PlanResult<NodeId> {
        let id = self.add(kind);
        for &child in children {
            self.append_node(child, id)?;
        }
        Ok(id)
    }

    /// Make a detached node the root.
    pub fn set_root(&mut self, id: NodeId) -> PlanResult<()> {
        self.check(id)?;
        if self.nodes[id.0].parent.is_some() {
            return Err(PlanError::malformed(id, "root must not have a parent"));
        }
        self.root = Some(id);
        Ok(())
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Root id, or an error for an empty plan.
    pub fn root_id(&self) -> PlanResult<NodeId> {
        self.root
            .ok_or_else(|| PlanError::Internal("plan has no root".into()))
    }

    /// Number of allocated nodes, reachable or not.
    pub fn allocated(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &LogicalNode {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn estimate(&self, id: NodeId) -> Option<&Estimate> {
        self.nodes[id.0].estimate.as_ref()
    }

    pub fn set_estimate(&mut self, id: NodeId, estimate: Estimate) {
        self.nodes[id.0].estimate = Some(estimate);
    }

    /// Drop every cached estimate.
    pub fn clear_estimates(&mut self) {
        for node in &mut self.nodes {
            node.estimate = None;
        }
    }

    /// Whether `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if Some(c) == self.root {
                return true;
            }
            current = self.nodes[c.0].parent;
        }
        false
    }

    /// Nodes of the subtree at `start` in pre-order.
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev());
        }
        out
    }

    /// Nodes of the subtree at `start` in post-order.
    pub fn postorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = self.preorder_mirrored(start);
        out.reverse();
        out
    }

    // root, right-to-left; reversing it yields left-to-right post-order
    fn preorder_mirrored(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter());
        }
        out
    }

    /// First node in pre-order whose operator matches.
    pub fn find_first<F>(&self, predicate: F) -> Option<NodeId>
    where
        F: Fn(&LogicalNode) -> bool,
    {
        let root = self.root?;
        self.find_first_in(root, predicate)
    }

    pub fn find_first_in<F>(&self, start: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&LogicalNode) -> bool,
    {
        self.preorder(start)
            .into_iter()
            .find(|id| predicate(&self.nodes[id.0].kind))
    }

    /// Every node in pre-order whose operator matches.
    pub fn find_all<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&LogicalNode) -> bool,
    {
        match self.root {
            Some(root) => self.find_all_in(root, predicate),
            None => Vec::new(),
        }
    }

    pub fn find_all_in<F>(&self, start: NodeId, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&LogicalNode) -> bool,
    {
        self.preorder(start)
            .into_iter()
            .filter(|id| predicate(&self.nodes[id.0].kind))
            .collect()
    }

    /// The reachable scan of `table`.
    pub fn scan_of(&self, table: &str) -> Option<NodeId> {
        self.find_first(|n| n.scan_table() == Some(table))
    }

    /// Tables scanned anywhere under `id`.
    pub fn subtree_tables(&self, id: NodeId) -> BTreeSet<String> {
        self.preorder(id)
            .into_iter()
            .filter_map(|n| self.nodes[n.0].kind.scan_table().map(str::to_string))
            .collect()
    }

    /// Attach a detached node as the last child of `parent`.
    pub fn append_node(&mut self, child: NodeId, parent: NodeId) -> PlanResult<()> {
        let len = self.check(parent)?.children.len();
        self.insert_child(parent, len, child)
    }

    /// Re-parent `node` under `new_parent`, detaching it from its old parent.
    pub fn move_node(&mut self, node: NodeId, new_parent: NodeId) -> PlanResult<()> {
        self.check(new_parent)?;
        if self.is_ancestor_or_self(node, new_parent) {
            return Err(PlanError::malformed(
                node,
                format!("moving under {} would create a cycle", new_parent),
            ));
        }
        self.detach(node)?;
        self.append_node(node, new_parent)
    }

    /// Unlink `node` from its parent (or from the root slot). Its subtree is kept.
    pub fn detach(&mut self, node: NodeId) -> PlanResult<()> {
        self.check(node)?;
        match self.nodes[node.0].parent.take() {
            Some(parent) => {
                self.nodes[parent.0].children.retain(|&c| c != node);
                self.invalidate_from(parent);
            }
            None => {
                if self.root == Some(node) {
                    self.root = None;
                }
            }
        }
        Ok(())
    }

    /// Remove `node` from the tree, splicing its children into its place.
    ///
    /// The children keep their order and take the position `node` had in its
    /// parent. Removing the root requires it to have exactly one child, which
    /// becomes the new root. The removed node ends up detached and childless.
    pub fn remove_node(&mut self, node: NodeId) -> PlanResult<()> {
        self.check(node)?;
        let children = std::mem::take(&mut self.nodes[node.0].children);
        let parent = self.nodes[node.0].parent.take();

        match parent {
            Some(parent) => {
                let siblings = &mut self.nodes[parent.0].children;
                let pos = siblings
                    .iter()
                    .position(|&c| c == node)
                    .ok_or_else(|| PlanError::malformed(node, "missing from parent's children"))?;
                siblings.splice(pos..=pos, children.iter().copied());
                for &child in &children {
                    self.nodes[child.0].parent = Some(parent);
                }
                self.invalidate_from(parent);
            }
            None if self.root == Some(node) => match children.as_slice() {
                [only] => {
                    self.nodes[only.0].parent = None;
                    self.root = Some(*only);
                }
                _ => {
                    self.nodes[node.0].children = children;
                    return Err(PlanError::malformed(
                        node,
                        "cannot remove a root without exactly one child",
                    ));
                }
            },
            None => {
                for &child in &children {
                    self.nodes[child.0].parent = None;
                }
            }
        }
        self.nodes[node.0].estimate = None;
        Ok(())
    }

    /// Put the detached `node` where `target` is and make `target` its last child.
    pub fn insert_above(&mut self, node: NodeId, target: NodeId) -> PlanResult<()> {
        self.check(target)?;
        self.ensure_detached(node)?;
        if self.is_ancestor_or_self(node, target) {
            return Err(PlanError::malformed(node, "cannot insert a node above its own descendant"));
        }
        self.take_slot(target, node)?;
        self.append_node(target, node)
    }

    /// Put the detached subtree `new` where `old` is. `old` ends up detached.
    pub fn replace_subtree(&mut self, old: NodeId, new: NodeId) -> PlanResult<()> {
        self.check(old)?;
        self.ensure_detached(new)?;
        if self.is_ancestor_or_self(new, old) {
            return Err(PlanError::malformed(new, format!("replacement contains {}", old)));
        }
        self.take_slot(old, new)
    }

    /// Check parent/child consistency and acyclicity of the reachable tree.
    pub fn validate(&self) -> PlanResult<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        if let Some(parent) = self.nodes[root.0].parent {
            return Err(PlanError::malformed(root, format!("root has parent {}", parent)));
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return Err(PlanError::malformed(id, "reachable more than once"));
            }
            for &child in &self.nodes[id.0].children {
                if self.nodes[child.0].parent != Some(id) {
                    return Err(PlanError::malformed(child, format!("parent link does not point to {}", id)));
                }
                stack.push(child);
            }
        }
        Ok(())
    }

    /// Render the subtree at `id`.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.format_indent(&mut out, id, 0);
        out
    }

    fn format_indent(&self, out: &mut String, id: NodeId, indent: usize) {
        use std::fmt::Write;

        let node = &self.nodes[id.0];
        let pad = "  ".repeat(indent);
        let _ = write!(out, "{}{}", pad, node.kind);
        if let Some(est) = &node.estimate {
            let _ = write!(out, " (rows: {})", est.cardinality);
        }
        out.push('\n');
        for &child in &node.children {
            self.format_indent(out, child, indent + 1);
        }
    }

    fn check(&self, id: NodeId) -> PlanResult<&PlanNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| PlanError::Internal(format!("node {} does not belong to this plan", id)))
    }

    fn ensure_detached(&self, id: NodeId) -> PlanResult<()> {
        let node = self.check(id)?;
        if node.parent.is_some() || self.root == Some(id) {
            return Err(PlanError::malformed(id, "node is already attached"));
        }
        Ok(())
    }

    /// Whether `ancestor` is `node` or lies on its parent chain.
    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes[c.0].parent;
        }
        false
    }

    fn insert_child(&mut self, parent: NodeId, position: usize, child: NodeId) -> PlanResult<()> {
        self.ensure_detached(child)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(PlanError::malformed(
                child,
                format!("attaching under {} would create a cycle", parent),
            ));
        }
        let siblings = &mut self.nodes[parent.0].children;
        let position = position.min(siblings.len());
        siblings.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
        self.invalidate_from(parent);
        Ok(())
    }

    /// Move `replacement` into the slot `current` occupies and detach `current`.
    fn take_slot(&mut self, current: NodeId, replacement: NodeId) -> PlanResult<()> {
        match self.nodes[current.0].parent {
            Some(parent) => {
                let pos = self.nodes[parent.0]
                    .children
                    .iter()
                    .position(|&c| c == current)
                    .ok_or_else(|| PlanError::malformed(current, "missing from parent's children"))?;
                self.nodes[parent.0].children[pos] = replacement;
                self.nodes[replacement.0].parent = Some(parent);
                self.nodes[current.0].parent = None;
                self.invalidate_from(parent);
            }
            None => {
                if self.root == Some(current) {
                    self.root = Some(replacement);
                }
            }
        }
        Ok(())
    }

    /// Drop cached estimates of `id` and all its ancestors.
    fn invalidate_from(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(c) = current {
            self.nodes[c.0].estimate = None;
            current = self.nodes[c.0].parent;
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => f.write_str(&self.render(root)),
            None => writeln!(f, "<empty plan>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Literal;

    fn filter(table: &str, column: &str, value: i64) -> LogicalNode {
        LogicalNode::Selection {
            kind: PredicateKind::Filter,
            left: QualifiedName::new(table, column),
            op: CompareOp::Eq,
            right: Operand::Literal(Literal::Integer(value)),
        }
    }

    /// Projection -> Selection -> Product(Scan a, Scan b)
    fn sample_plan() -> (LogicalPlan, [NodeId; 5]) {
        let mut plan = LogicalPlan::new();
        let a = plan.add(LogicalNode::scan("a", 0));
        let b = plan.add(LogicalNode::scan("b", 1));
        let product = plan.add_with_children(LogicalNode::Product, &[a, b]).unwrap();
        let sel = plan.add_with_children(filter("a", "x", 1), &[product]).unwrap();
        let proj = plan
            .add_with_children(
                LogicalNode::projection([QualifiedName::new("a", "x")]),
                &[sel],
            )
            .unwrap();
        plan.set_root(proj).unwrap();
        (plan, [proj, sel, product, a, b])
    }

    #[test]
    fn test_ids_are_plan_scoped() {
        let (first, ids) = sample_plan();
        let (second, other) = sample_plan();
        assert_eq!(ids, other);
        assert_eq!(first.allocated(), second.allocated());
    }

    #[test]
    fn test_find_preorder() {
        let (plan, [proj, sel, product, a, b]) = sample_plan();
        assert_eq!(plan.preorder(proj), vec![proj, sel, product, a, b]);
        assert_eq!(plan.postorder(proj), vec![a, b, product, sel, proj]);
        assert_eq!(plan.find_first(LogicalNode::is_scan), Some(a));
        assert_eq!(plan.find_all(LogicalNode::is_scan), vec![a, b]);
        assert_eq!(plan.scan_of("b"), Some(b));
    }

    #[test]
    fn test_remove_node_splices_children() {
        let (mut plan, [proj, sel, product, _, _]) = sample_plan();
        plan.remove_node(sel).unwrap();

        assert_eq!(plan.children(proj), &[product]);
        assert_eq!(plan.parent(product), Some(proj));
        assert_eq!(plan.parent(sel), None);
        assert!(plan.children(sel).is_empty());
        plan.validate().unwrap();
    }

    #[test]
    fn test_remove_root() {
        let (mut plan, [proj, sel, _, _, _]) = sample_plan();
        plan.remove_node(proj).unwrap();
        assert_eq!(plan.root(), Some(sel));
        plan.validate().unwrap();

        let (mut plan, [_, _, product, _, _]) = sample_plan();
        plan.remove_node(product).unwrap();
        // product's two scans now hang off the selection
        assert!(matches!(plan.remove_node(plan.root().unwrap()), Ok(())));
        let root = plan.root().unwrap();
        assert!(plan.remove_node(root).is_err());
        assert_eq!(plan.root(), Some(root));
    }

    #[test]
    fn test_insert_above() {
        let (mut plan, [_, sel, product, a, _]) = sample_plan();
        plan.remove_node(sel).unwrap();
        plan.insert_above(sel, a).unwrap();

        assert_eq!(plan.children(product)[0], sel);
        assert_eq!(plan.children(sel), &[a]);
        assert_eq!(plan.parent(a), Some(sel));
        plan.validate().unwrap();
    }

    #[test]
    fn test_append_requires_detached() {
        let (mut plan, [proj, _, _, a, b]) = sample_plan();
        assert!(matches!(
            plan.append_node(a, b),
            Err(PlanError::MalformedPlan { node, .. }) if node == a
        ));
        assert!(plan.append_node(proj, a).is_err());
    }

    #[test]
    fn test_move_node_rejects_cycles() {
        let (mut plan, [_, sel, product, a, b]) = sample_plan();
        assert!(plan.move_node(sel, a).is_err());

        plan.move_node(b, a).unwrap();
        assert_eq!(plan.children(product), &[a]);
        assert_eq!(plan.children(a), &[b]);
        plan.validate().unwrap();
    }

    #[test]
    fn test_replace_subtree() {
        let (mut plan, [_, sel, product, a, b]) = sample_plan();
        plan.detach(a).unwrap();
        plan.detach(b).unwrap();
        let join = plan
            .add_with_children(
                LogicalNode::equi_join(QualifiedName::new("a", "x"), QualifiedName::new("b", "x")),
                &[a, b],
            )
            .unwrap();
        plan.replace_subtree(product, join).unwrap();

        assert_eq!(plan.children(sel), &[join]);
        assert_eq!(plan.parent(product), None);
        assert!(!plan.is_attached(product));
        plan.validate().unwrap();
    }

    #[test]
    fn test_mutation_invalidates_ancestors() {
        let (mut plan, [proj, sel, product, a, b]) = sample_plan();
        for id in [proj, sel, product, a, b] {
            plan.set_estimate(id, Estimate::new(10, BTreeMap::new()));
        }
        plan.move_node(b, a).unwrap();

        assert!(plan.estimate(proj).is_none());
        assert!(plan.estimate(sel).is_none());
        assert!(plan.estimate(product).is_none());
        assert!(plan.estimate(a).is_none());
        assert!(plan.estimate(b).is_some());
    }

    #[test]
    fn test_projection_dedup() {
        let node = LogicalNode::projection([
            QualifiedName::new("a", "x"),
            QualifiedName::new("a", "y"),
            QualifiedName::new("a", "x"),
        ]);
        assert_eq!(node.to_string(), "Projection: [a.x, a.y]");
    }

    #[test]
    fn test_render() {
        let (mut plan, [_, _, _, a, _]) = sample_plan();
        plan.set_estimate(a, Estimate::new(42, BTreeMap::new()));
        let text = plan.to_string();
        let expected = "Projection: [a.x]\n  Selection(FILTER): a.x = 1\n    Product\n      Scan: a (rows: 42)\n      Scan: b\n";
        assert_eq!(text, expected);
    }
}
