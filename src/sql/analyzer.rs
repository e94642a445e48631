//! Semantic analysis of parsed queries against the catalog.

use std::collections::HashSet;

use tracing::trace;

use super::ast::*;
use crate::catalog::{CatalogReader, DataType};
use crate::planner::{PlanError, PlanResult};

/// Validates a [`Query`] and classifies its predicates.
pub struct Analyzer<'a> {
    catalog: &'a dyn CatalogReader,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a dyn CatalogReader) -> Self {
        Self { catalog }
    }

    /// Check every reference and produce an [`AnalyzedQuery`].
    pub fn analyze(&self, query: &Query) -> PlanResult<AnalyzedQuery> {
        let tables = self.check_tables(&query.from)?;

        let projection = query
            .projection
            .iter()
            .map(|c| self.resolve_column(c, &tables))
            .collect::<PlanResult<Vec<_>>>()?;

        let predicates = query
            .predicates
            .iter()
            .map(|p| self.check_predicate(p, &tables))
            .collect::<PlanResult<Vec<_>>>()?;

        trace!(
            tables = tables.len(),
            predicates = predicates.len(),
            "query analyzed"
        );

        Ok(AnalyzedQuery {
            projection,
            tables,
            predicates,
        })
    }

    fn check_tables(&self, from: &[String]) -> PlanResult<Vec<String>> {
        let mut seen = HashSet::new();
        for table in from {
            if !self.catalog.table_exists(table) {
                return Err(PlanError::UnknownTable(table.clone()));
            }
            if !seen.insert(table.as_str()) {
                return Err(PlanError::Unsupported(format!(
                    "table {} listed more than once in FROM",
                    table
                )));
            }
        }
        Ok(from.to_vec())
    }

    fn resolve_column(&self, column: &ColumnRef, tables: &[String]) -> PlanResult<QualifiedName> {
        let table = column.table.as_ref().ok_or_else(|| {
            PlanError::UnknownTableReference(format!(
                "column {} must be written as table.column",
                column.column
            ))
        })?;
        if !tables.contains(table) {
            return Err(PlanError::UnknownTableReference(format!(
                "table {} is not listed in FROM",
                table
            )));
        }
        if !self.catalog.column_exists(table, &column.column) {
            return Err(PlanError::unknown_column(table.clone(), column.column.clone()));
        }
        Ok(QualifiedName::new(table.clone(), column.column.clone()))
    }

    fn column_type(&self, name: &QualifiedName) -> PlanResult<DataType> {
        self.catalog
            .column_type(&name.table, &name.column)
            .ok_or_else(|| PlanError::unknown_column(name.table.clone(), name.column.clone()))
    }

    fn check_predicate(&self, cmp: &Comparison, tables: &[String]) -> PlanResult<Predicate> {
        let left = match &cmp.left {
            Term::Column(c) => self.resolve_column(c, tables)?,
            Term::Literal(_) => {
                let reason = if matches!(cmp.right, Term::Literal(_)) {
                    "comparison between two constants"
                } else {
                    "left operand must be a column"
                };
                return Err(PlanError::InvalidPredicate(format!(
                    "{} {} {}: {}",
                    cmp.left, cmp.op, cmp.right, reason
                )));
            }
        };
        let left_type = self.column_type(&left)?;

        match &cmp.right {
            Term::Literal(literal) => {
                if literal.data_type() != left_type {
                    return Err(PlanError::TypeMismatch(format!(
                        "{} is {} but {} is {}",
                        left,
                        left_type,
                        literal,
                        literal.data_type()
                    )));
                }
                Ok(Predicate {
                    kind: PredicateKind::Filter,
                    left,
                    op: cmp.op,
                    right: Operand::Literal(literal.clone()),
                })
            }
            Term::Column(c) => {
                let right = self.resolve_column(c, tables)?;
                let right_type = self.column_type(&right)?;
                if right_type != left_type {
                    return Err(PlanError::TypeMismatch(format!(
                        "{} is {} but {} is {}",
                        left, left_type, right, right_type
                    )));
                }
                if !cmp.op.is_equality() {
                    return Err(PlanError::Unsupported(format!(
                        "non-equality join predicate {} {} {}",
                        left, cmp.op, right
                    )));
                }
                if left.table == right.table {
                    return Err(PlanError::Unsupported(format!(
                        "predicate {} = {} compares columns of the same table",
                        left, right
                    )));
                }
                Ok(Predicate {
                    kind: PredicateKind::Join,
                    left,
                    op: cmp.op,
                    right: Operand::Column(right),
                })
            }
        }
    }
}
