//! Physical query plan representation.
//!
//! Physical plans specify *how* the query runs: the access path for every
//! table and the strategy for every join. Each node carries its estimated
//! cost, which already includes the cost of its inputs.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::sql::{CompareOp, Literal, Operand, QualifiedName};

/// Join algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Block nested-loop join.
    NestedLoop,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::NestedLoop => write!(f, "NestedLoopJoin"),
        }
    }
}

/// Physical execution operators.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalOperator {
    /// Sequential table scan.
    SeqScan { table: String },

    /// Scan through an index searched with `column op key`.
    IndexScan {
        table: String,
        index: String,
        column: String,
        op: CompareOp,
        key: Literal,
    },

    /// Answer a projection from the index alone.
    IndexSeek {
        table: String,
        index: String,
        columns: Vec<String>,
    },

    /// Filter operator.
    Filter {
        left: QualifiedName,
        op: CompareOp,
        right: Operand,
    },

    /// Project specific columns.
    Projection { attributes: Vec<QualifiedName> },

    /// Cartesian product of two inputs.
    CrossProduct {
        left_tables: Vec<String>,
        right_tables: Vec<String>,
    },

    /// Equi-join of two inputs.
    Join {
        strategy: JoinStrategy,
        left: QualifiedName,
        right: QualifiedName,
    },
}

impl PhysicalOperator {
    /// Table accessed directly by this operator.
    pub fn access_table(&self) -> Option<&str> {
        match self {
            PhysicalOperator::SeqScan { table }
            | PhysicalOperator::IndexScan { table, .. }
            | PhysicalOperator::IndexSeek { table, .. } => Some(table.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalOperator::SeqScan { table } => write!(f, "SeqScan: {}", table),
            PhysicalOperator::IndexScan {
                table,
                index,
                column,
                op,
                key,
            } => write!(f, "IndexScan: {} using {} ({} {} {})", table, index, column, op, key),
            PhysicalOperator::IndexSeek {
                table,
                index,
                columns,
            } => write!(f, "IndexSeek: {} using {} [{}]", table, index, columns.join(", ")),
            PhysicalOperator::Filter { left, op, right } => {
                write!(f, "Filter: {} {} {}", left, op, right)
            }
            PhysicalOperator::Projection { attributes } => {
                let cols: Vec<String> = attributes.iter().map(ToString::to_string).collect();
                write!(f, "Projection: [{}]", cols.join(", "))
            }
            PhysicalOperator::CrossProduct {
                left_tables,
                right_tables,
            } => write!(
                f,
                "CrossProduct: [{}] x [{}]",
                left_tables.join(", "),
                right_tables.join(", ")
            ),
            PhysicalOperator::Join {
                strategy,
                left,
                right,
            } => write!(f, "{}: {} = {}", strategy, left, right),
        }
    }
}

/// A physical plan node.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlanNode {
    pub operator: PhysicalOperator,
    pub children: Vec<Arc<PhysicalPlanNode>>,
    /// Cost of producing this node's output, inputs included.
    pub estimated_cost: f64,
    pub estimated_rows: u64,
}

impl PhysicalPlanNode {
    /// Create a new physical plan node.
    pub fn new(operator: PhysicalOperator) -> Self {
        Self {
            operator,
            children: Vec::new(),
            estimated_cost: 0.0,
            estimated_rows: 0,
        }
    }

    /// Add a child node.
    pub fn with_child(mut self, child: Arc<PhysicalPlanNode>) -> Self {
        self.children.push(child);
        self
    }

    /// Add multiple children.
    pub fn with_children(mut self, children: Vec<Arc<PhysicalPlanNode>>) -> Self {
        self.children = children;
        self
    }

    /// Set estimated cost.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Set estimated rows.
    pub fn with_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    /// Tables read anywhere in this subtree, in plan order.
    pub fn tables(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.collect_tables(&mut seen, &mut out);
        out
    }

    fn collect_tables(&self, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if let Some(table) = self.operator.access_table() {
            if seen.insert(table.to_string()) {
                out.push(table.to_string());
            }
        }
        for child in &self.children {
            child.collect_tables(seen, out);
        }
    }

    /// Pre-order walk of the subtree.
    pub fn walk(&self) -> Vec<&PhysicalPlanNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// A complete physical query plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlan {
    pub root: Arc<PhysicalPlanNode>,
}

impl PhysicalPlan {
    /// Create a new physical plan.
    pub fn new(root: PhysicalPlanNode) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// Get the total estimated cost.
    pub fn total_cost(&self) -> f64 {
        self.root.estimated_cost
    }

    /// Get the estimated output rows.
    pub fn estimated_rows(&self) -> u64 {
        self.root.estimated_rows
    }

    /// Pre-order list of operators.
    pub fn operators(&self) -> Vec<&PhysicalOperator> {
        self.root.walk().into_iter().map(|n| &n.operator).collect()
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Physical Plan (estimated cost: {:.2}):", self.total_cost())?;
        self.format_node(f, &self.root, 0)
    }
}

impl PhysicalPlan {
    fn format_node(&self, f: &mut fmt::Formatter<'_>, node: &PhysicalPlanNode, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        writeln!(
            f,
            "{}{} (rows: {}, cost: {:.2})",
            pad, node.operator, node.estimated_rows, node.estimated_cost
        )?;
        for child in &node.children {
            self.format_node(f, child, indent + 1)?;
        }
        Ok(())
    }
}
