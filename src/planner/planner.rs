//! Query planner: query text in, optimized plan out.
//!
//! The planner is the entry point for query optimization.

use std::fmt::Write as _;

use tracing::debug;

use super::builder::build_initial_plan;
use super::error::PlanResult;
use super::optimizer::{OptimizedPlan, OptimizerConfig, QueryOptimizer};
use crate::catalog::CatalogReader;
use crate::sql::{Analyzer, Parser};

/// The query planner.
pub struct QueryPlanner<'a> {
    catalog: &'a dyn CatalogReader,
    config: OptimizerConfig,
}

impl<'a> QueryPlanner<'a> {
    /// Create a new query planner.
    pub fn new(catalog: &'a dyn CatalogReader) -> Self {
        Self {
            catalog,
            config: OptimizerConfig::default(),
        }
    }

    /// Create a planner with a custom optimizer configuration.
    pub fn with_config(catalog: &'a dyn CatalogReader, config: OptimizerConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn set_capture_stages(&mut self, enabled: bool) {
        self.config.capture_stages = enabled;
    }

    /// Parse, analyze and optimize one query.
    pub fn plan(&self, sql: &str) -> PlanResult<OptimizedPlan> {
        let query = Parser::parse(sql)?;
        let analyzed = Analyzer::new(self.catalog).analyze(&query)?;
        debug!(
            tables = analyzed.tables.len(),
            predicates = analyzed.predicates.len(),
            "query analyzed"
        );
        let initial = build_initial_plan(&analyzed)?;
        QueryOptimizer::new(self.catalog)
            .with_config(self.config.clone())
            .optimize(initial)
    }

    /// Plan a query and render the result.
    ///
    /// Lists every captured stage first, then the final logical and
    /// physical plans.
    pub fn explain(&self, sql: &str) -> PlanResult<String> {
        let optimized = self.plan(sql)?;
        Ok(render_explanation(&optimized))
    }
}

/// Text form of an optimization result.
pub fn render_explanation(optimized: &OptimizedPlan) -> String {
    let mut out = String::new();
    for (stage, rendered) in &optimized.stages {
        if stage == "physical" {
            continue;
        }
        let _ = writeln!(out, "-- {} --", stage);
        out.push_str(rendered);
    }
    out.push_str("Logical Plan:\n");
    out.push_str(&optimized.logical.to_string());
    if let Some(order) = &optimized.join_order {
        let _ = writeln!(
            out,
            "Join order: {:?} search over {} relations (cost {})",
            order.strategy, order.relations, order.cost
        );
    }
    out.push_str(&optimized.physical.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;
    use crate::planner::error::PlanError;
    use crate::sql::ParseError;

    #[test]
    fn test_plan_single_table() {
        let catalog = sample_catalog().unwrap();
        let planner = QueryPlanner::new(&catalog);
        let optimized = planner
            .plan("SELECT radnik.god FROM radnik WHERE radnik.plt > 3000")
            .unwrap();
        assert!(optimized.physical.total_cost() > 0.0);
    }

    #[test]
    fn test_explain_sections() {
        let catalog = sample_catalog().unwrap();
        let mut planner = QueryPlanner::new(&catalog);
        planner.set_capture_stages(true);
        let text = planner
            .explain("SELECT radnik.mbr FROM radnik, radproj WHERE radnik.mbr = radproj.mbr")
            .unwrap();

        assert!(text.contains("-- initial --"));
        assert!(text.contains("-- PushDownSelections --"));
        assert!(text.contains("Logical Plan:"));
        assert!(text.contains("Join order: Subset search over 2 relations"));
        assert!(text.contains("Physical Plan (estimated cost:"));
        assert!(!text.contains("-- physical --"));
    }

    #[test]
    fn test_errors_propagate() {
        let catalog = sample_catalog().unwrap();
        let planner = QueryPlanner::new(&catalog);
        assert!(matches!(
            planner.plan("SELECT radnik.mbr FROM"),
            Err(PlanError::Parse(ParseError::Syntax(_)))
        ));
        assert!(matches!(
            planner.plan("SELECT nope.x FROM nope"),
            Err(PlanError::UnknownTable(_))
        ));
    }
}
