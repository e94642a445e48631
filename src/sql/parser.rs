//! Query parser implementation.
//!
//! Converts query text to our internal AST using sqlparser. Only the flat
//! `SELECT t.c, ... FROM t, ... WHERE a AND b ...` shape is accepted.

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::ast::*;
use super::error::{ParseError, ParseResult};

/// Query parser.
pub struct Parser;

impl Parser {
    /// Parse query text into a [`Query`].
    pub fn parse(sql: &str) -> ParseResult<Query> {
        let sql = sql.trim();
        if sql.trim_end_matches(';').trim().is_empty() {
            return Err(ParseError::EmptyQuery);
        }

        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;

        match statements.as_slice() {
            [] => Err(ParseError::EmptyQuery),
            [statement] => Self::convert_statement(statement),
            _ => Err(ParseError::MultipleStatements),
        }
    }

    fn convert_statement(stmt: &sp::Statement) -> ParseResult<Query> {
        match stmt {
            sp::Statement::Query(query) => Self::convert_query(query),
            other => Err(ParseError::UnsupportedStatement(format!("{}", other))),
        }
    }

    fn convert_query(query: &sp::Query) -> ParseResult<Query> {
        if query.with.is_some() {
            return Err(ParseError::UnsupportedStatement("WITH clause".into()));
        }
        if query.order_by.is_some() {
            return Err(ParseError::UnsupportedStatement("ORDER BY".into()));
        }
        if query.limit.is_some() || query.offset.is_some() {
            return Err(ParseError::UnsupportedStatement("LIMIT/OFFSET".into()));
        }

        let select = match query.body.as_ref() {
            sp::SetExpr::Select(s) => s,
            other => {
                return Err(ParseError::UnsupportedStatement(format!(
                    "Unsupported query type: {}",
                    other
                )))
            }
        };

        if select.distinct.is_some() {
            return Err(ParseError::UnsupportedStatement("DISTINCT".into()));
        }
        if select.having.is_some() {
            return Err(ParseError::UnsupportedStatement("HAVING".into()));
        }

        if select.from.is_empty() {
            return Err(ParseError::MissingClause("FROM".into()));
        }
        let from = select
            .from
            .iter()
            .map(Self::extract_from_table)
            .collect::<ParseResult<Vec<_>>>()?;

        let projection = Self::convert_projection(&select.projection)?;

        let mut predicates = Vec::new();
        if let Some(selection) = &select.selection {
            Self::collect_conjuncts(selection, &mut predicates)?;
        }

        Ok(Query {
            projection,
            from,
            predicates,
        })
    }

    fn convert_projection(items: &[sp::SelectItem]) -> ParseResult<Vec<ColumnRef>> {
        items
            .iter()
            .map(|item| match item {
                sp::SelectItem::UnnamedExpr(expr) => Self::convert_column(expr),
                other => Err(ParseError::UnsupportedExpression(format!(
                    "projection item: {}",
                    other
                ))),
            })
            .collect()
    }

    /// Flatten an `AND` tree into its comparisons.
    fn collect_conjuncts(expr: &sp::Expr, out: &mut Vec<Comparison>) -> ParseResult<()> {
        match expr {
            sp::Expr::Nested(inner) => Self::collect_conjuncts(inner, out),
            sp::Expr::BinaryOp {
                left,
                op: sp::BinaryOperator::And,
                right,
            } => {
                Self::collect_conjuncts(left, out)?;
                Self::collect_conjuncts(right, out)
            }
            sp::Expr::BinaryOp { left, op, right } => {
                let op = Self::convert_compare_op(op)?;
                out.push(Comparison {
                    left: Self::convert_term(left)?,
                    op,
                    right: Self::convert_term(right)?,
                });
                Ok(())
            }
            other => Err(ParseError::UnsupportedExpression(format!("{}", other))),
        }
    }

    fn convert_compare_op(op: &sp::BinaryOperator) -> ParseResult<CompareOp> {
        match op {
            sp::BinaryOperator::Eq => Ok(CompareOp::Eq),
            sp::BinaryOperator::NotEq => Ok(CompareOp::NotEq),
            sp::BinaryOperator::Lt => Ok(CompareOp::Lt),
            sp::BinaryOperator::LtEq => Ok(CompareOp::LtEq),
            sp::BinaryOperator::Gt => Ok(CompareOp::Gt),
            sp::BinaryOperator::GtEq => Ok(CompareOp::GtEq),
            other => Err(ParseError::UnsupportedExpression(format!(
                "Unsupported operator: {}",
                other
            ))),
        }
    }

    fn convert_term(expr: &sp::Expr) -> ParseResult<Term> {
        match expr {
            sp::Expr::Nested(inner) => Self::convert_term(inner),
            sp::Expr::Value(v) => Ok(Term::Literal(Self::convert_value(v)?)),
            sp::Expr::UnaryOp {
                op: sp::UnaryOperator::Minus,
                expr,
            } => match Self::convert_term(expr)? {
                Term::Literal(Literal::Integer(i)) => i
                    .checked_neg()
                    .map(|n| Term::Literal(Literal::Integer(n)))
                    .ok_or_else(|| ParseError::UnsupportedExpression(format!("-{}", i))),
                other => Err(ParseError::UnsupportedExpression(format!("-{}", other))),
            },
            other => Self::convert_column(other).map(Term::Column),
        }
    }

    fn convert_column(expr: &sp::Expr) -> ParseResult<ColumnRef> {
        match expr {
            sp::Expr::Identifier(id) => Ok(ColumnRef::bare(id.value.clone())),
            sp::Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [table, column] => Ok(ColumnRef::qualified(
                    table.value.clone(),
                    column.value.clone(),
                )),
                _ => Err(ParseError::InvalidIdentifier(
                    parts
                        .iter()
                        .map(|p| p.value.as_str())
                        .collect::<Vec<_>>()
                        .join("."),
                )),
            },
            other => Err(ParseError::UnsupportedExpression(format!("{}", other))),
        }
    }

    fn convert_value(v: &sp::ValueWithSpan) -> ParseResult<Literal> {
        match &v.value {
            sp::Value::Number(s, _) => s
                .parse::<i64>()
                .map(Literal::Integer)
                .map_err(|_| ParseError::UnsupportedExpression(format!("Invalid number: {}", s))),
            sp::Value::SingleQuotedString(s) => Ok(Literal::Text(s.clone())),
            other => Err(ParseError::UnsupportedExpression(format!(
                "Unsupported value: {}",
                other
            ))),
        }
    }

    fn extract_table_name(name: &sp::ObjectName) -> ParseResult<String> {
        name.0
            .last()
            .map(|i| i.as_ident().map(|id| id.value.clone()).unwrap_or_else(|| i.to_string()))
            .ok_or_else(|| ParseError::InvalidIdentifier("empty table name".into()))
    }

    fn extract_from_table(from: &sp::TableWithJoins) -> ParseResult<String> {
        if !from.joins.is_empty() {
            return Err(ParseError::UnsupportedFrom(
                "explicit JOIN syntax; list tables separated by commas".into(),
            ));
        }
        match &from.relation {
            sp::TableFactor::Table {
                name, alias: None, ..
            } => Self::extract_table_name(name),
            sp::TableFactor::Table { alias: Some(a), .. } => {
                Err(ParseError::UnsupportedFrom(format!("table alias {}", a)))
            }
            other => Err(ParseError::UnsupportedFrom(format!("{}", other))),
        }
    }
}
