//! Query planning and optimization.
//!
//! Logical plans are rewritten by rules, estimated with catalog
//! statistics, join-ordered with dynamic programming and finally turned
//! into physical plans by cost-based access path selection.

mod access;
mod builder;
pub mod cost;
mod error;
pub mod join_order;
mod logical;
mod optimizer;
mod physical;
#[allow(clippy::module_inception)]
mod planner;
pub mod rules;

pub use access::PhysicalPlanner;
pub use builder::{build_initial_plan, validate_initial_shape};
pub use cost::{CostModel, JoinInput};
pub use error::{PlanError, PlanResult};
pub use join_order::{JoinOrderOptimizer, JoinOrderOutcome, JoinOrderStrategy};
pub use logical::{Estimate, LogicalNode, LogicalPlan, NodeId, PlanNode};
pub use optimizer::{OptimizedPlan, OptimizerConfig, QueryOptimizer, DEFAULT_SUBSET_DP_LIMIT};
pub use physical::{JoinStrategy, PhysicalOperator, PhysicalPlan, PhysicalPlanNode};
pub use planner::{render_explanation, QueryPlanner};
pub use rules::{
    CreateJoinNodes, PushDownSelections, ReplicateProjections, RewriteRule, Rewriter,
};
