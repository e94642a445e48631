//! Query optimizer pipeline.
//!
//! One `optimize` call takes an initial logical plan through every pass:
//! shape validation, the rewrite rules, cardinality estimation, join
//! ordering, re-estimation and physical planning. All state lives in the
//! plan being optimized, so independent calls can share one catalog.

use tracing::{debug, info};

use super::access::PhysicalPlanner;
use super::builder::validate_initial_shape;
use super::cost::{constants, CostModel};
use super::error::PlanResult;
use super::join_order::{JoinOrderOptimizer, JoinOrderOutcome, MAX_SUBSET_RELATIONS};
use super::logical::LogicalPlan;
use super::physical::PhysicalPlan;
use super::rules::Rewriter;
use crate::catalog::CatalogReader;

/// Default relation count up to which the subset DP is used.
pub const DEFAULT_SUBSET_DP_LIMIT: usize = 12;

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Run the join-order search after rewriting.
    pub reorder_joins: bool,
    /// Largest relation count searched with the subset DP; bigger join
    /// trees fall back to the interval DP.
    pub subset_dp_limit: usize,
    /// Record a rendered plan after every pass.
    pub capture_stages: bool,
    /// Bytes per projected attribute.
    pub attribute_width: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            reorder_joins: true,
            subset_dp_limit: DEFAULT_SUBSET_DP_LIMIT,
            capture_stages: false,
            attribute_width: constants::ATTRIBUTE_WIDTH,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reorder_joins(mut self, enabled: bool) -> Self {
        self.reorder_joins = enabled;
        self
    }

    /// Capped at the largest relation count a subset bitmask can hold.
    pub fn subset_dp_limit(mut self, limit: usize) -> Self {
        self.subset_dp_limit = limit.min(MAX_SUBSET_RELATIONS);
        self
    }

    pub fn capture_stages(mut self, enabled: bool) -> Self {
        self.capture_stages = enabled;
        self
    }

    pub fn attribute_width(mut self, width: u64) -> Self {
        self.attribute_width = width;
        self
    }
}

/// Result of one optimization.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    /// Final logical plan, estimates included.
    pub logical: LogicalPlan,
    pub physical: PhysicalPlan,
    /// `(stage, rendered plan)` pairs, empty unless stages are captured.
    pub stages: Vec<(String, String)>,
    /// Set when the join-order search ran.
    pub join_order: Option<JoinOrderOutcome>,
}

impl OptimizedPlan {
    pub fn estimated_cost(&self) -> f64 {
        self.physical.total_cost()
    }
}

/// Drives every optimization pass over a plan.
pub struct QueryOptimizer<'a> {
    catalog: &'a dyn CatalogReader,
    rewriter: Rewriter,
    config: OptimizerConfig,
}

impl<'a> QueryOptimizer<'a> {
    /// Create an optimizer with the standard rules and default settings.
    pub fn new(catalog: &'a dyn CatalogReader) -> Self {
        Self {
            catalog,
            rewriter: Rewriter::new(),
            config: OptimizerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the rewrite rules.
    pub fn with_rewriter(mut self, rewriter: Rewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    /// Optimize `plan` into a physical plan.
    ///
    /// Any failure aborts the whole call; the input plan is consumed either
    /// way.
    pub fn optimize(&self, mut plan: LogicalPlan) -> PlanResult<OptimizedPlan> {
        validate_initial_shape(&plan)?;

        let mut stages = Vec::new();
        let capture = self.config.capture_stages;
        let record = |stages: &mut Vec<(String, String)>, name: &str, plan: &LogicalPlan| {
            if capture {
                stages.push((name.to_string(), plan.to_string()));
            }
        };
        record(&mut stages, "initial", &plan);

        self.rewriter
            .rewrite(&mut plan, |rule, plan| record(&mut stages, rule, plan))?;
        debug!(rules = ?self.rewriter.rule_names(), "rewrite finished");

        let model = CostModel::new(self.catalog).with_attribute_width(self.config.attribute_width);
        let rows = model.estimate(&mut plan)?;
        debug!(rows, "initial estimate");
        record(&mut stages, "estimated", &plan);

        let join_order = if self.config.reorder_joins {
            let outcome = JoinOrderOptimizer::new(&model)
                .with_subset_limit(self.config.subset_dp_limit)
                .optimize(&mut plan)?;
            if outcome.is_some() {
                // only the nodes above the replaced subtree are recomputed
                model.estimate(&mut plan)?;
                record(&mut stages, "join order", &plan);
            }
            outcome
        } else {
            None
        };
        plan.validate()?;

        let physical = PhysicalPlanner::new(&model).plan(&plan)?;
        if capture {
            stages.push(("physical".to_string(), physical.to_string()));
        }
        info!(
            cost = physical.total_cost(),
            rows = physical.estimated_rows(),
            "query optimized"
        );

        Ok(OptimizedPlan {
            logical: plan,
            physical,
            stages,
            join_order,
        })
    }
}
