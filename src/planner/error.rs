//! Planning errors.

use thiserror::Error;

use super::logical::NodeId;
use crate::catalog::CatalogError;
use crate::sql::ParseError;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Query planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The plan does not have the shape a pass requires.
    #[error("malformed plan at node {node}: {reason}")]
    MalformedPlan { node: NodeId, reason: String },

    #[error("table not found: {0}")]
    UnknownTable(String),

    #[error("column not found: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A column refers to a table that is missing from FROM, or is unqualified.
    #[error("invalid table reference: {0}")]
    UnknownTableReference(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlanError {
    pub(crate) fn malformed(node: NodeId, reason: impl Into<String>) -> Self {
        PlanError::MalformedPlan {
            node,
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        PlanError::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}
