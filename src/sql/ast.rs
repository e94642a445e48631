//! Query AST types.
//!
//! The parser produces a [`Query`] whose column references may still be
//! unqualified. Semantic analysis turns it into an [`AnalyzedQuery`] where
//! every reference is a validated [`QualifiedName`] and every predicate is
//! classified as a filter or a join predicate. The analyzed types are the
//! ones the planner works with.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::DataType;

/// A `table.column` reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub table: String,
    pub column: String,
}

impl QualifiedName {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Constant value in a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Text(String),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Integer(_) => DataType::Integer,
            Literal::Text(_) => DataType::Text,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Literal::Integer(i) => Some(*i),
            Literal::Text(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Comparison operators allowed in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Column reference as written in the query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// One side of a parsed comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Column(ColumnRef),
    Literal(Literal),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Column(c) => write!(f, "{}", c),
            Term::Literal(l) => write!(f, "{}", l),
        }
    }
}

/// A parsed `left op right` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left: Term,
    pub op: CompareOp,
    pub right: Term,
}

/// A parsed `SELECT ... FROM ... WHERE ...` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub projection: Vec<ColumnRef>,
    pub from: Vec<String>,
    /// Conjuncts of the WHERE clause, in source order.
    pub predicates: Vec<Comparison>,
}

/// Right-hand side of a validated predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Column(QualifiedName),
    Literal(Literal),
}

impl Operand {
    pub fn as_column(&self) -> Option<&QualifiedName> {
        match self {
            Operand::Column(c) => Some(c),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Operand::Column(_) => None,
            Operand::Literal(l) => Some(l),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(c) => write!(f, "{}", c),
            Operand::Literal(l) => write!(f, "{}", l),
        }
    }
}

/// Whether a predicate compares against a constant or another column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateKind {
    Filter,
    Join,
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateKind::Filter => f.write_str("FILTER"),
            PredicateKind::Join => f.write_str("JOIN"),
        }
    }
}

/// A validated, classified predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub kind: PredicateKind,
    pub left: QualifiedName,
    pub op: CompareOp,
    pub right: Operand,
}

/// A query whose references have been checked against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedQuery {
    pub projection: Vec<QualifiedName>,
    pub tables: Vec<String>,
    pub predicates: Vec<Predicate>,
}
