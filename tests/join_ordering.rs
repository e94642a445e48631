//! Join ordering through the whole pipeline.

use miniopt::catalog::{Catalog, ColumnStats, DataType, Histogram, Table, TableBuilder};
use miniopt::planner::{
    JoinOrderStrategy, LogicalNode, LogicalPlan, OptimizedPlan, OptimizerConfig, QueryPlanner,
};

fn table(name: &str, rows: u64, columns: &[(&str, u64)]) -> Table {
    let mut builder = TableBuilder::new(name).row_count(rows).clustered(true);
    for (column, distinct) in columns {
        builder = builder
            .add_column(*column, DataType::Integer)
            .column_stats(*column, ColumnStats::new(*distinct, Histogram::default()));
    }
    builder.build().unwrap()
}

/// a -- b -- c, where a product of the two small ends looks cheap.
fn bridge_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.add_table(table("a", 10, &[("x", 10)])).unwrap();
    catalog.add_table(table("b", 10_000, &[("x", 10), ("y", 10)])).unwrap();
    catalog.add_table(table("c", 10, &[("y", 10)])).unwrap();
    catalog
}

const BRIDGE_QUERY: &str = "SELECT a.x FROM a, c, b WHERE a.x = b.x AND b.y = c.y";

fn optimize(catalog: &Catalog, config: OptimizerConfig) -> OptimizedPlan {
    QueryPlanner::with_config(catalog, config)
        .plan(BRIDGE_QUERY)
        .unwrap()
}

/// Tables named by every join node.
fn join_pairs(plan: &LogicalPlan) -> Vec<(String, String)> {
    plan.find_all(|n| matches!(n, LogicalNode::Join { .. }))
        .into_iter()
        .filter_map(|id| match plan.kind(id) {
            LogicalNode::Join { left, right, .. } => Some((left.table.clone(), right.table.clone())),
            _ => None,
        })
        .collect()
}

fn assert_bridged(plan: &LogicalPlan) {
    plan.validate().unwrap();
    assert!(plan.find_first(|n| matches!(n, LogicalNode::Product)).is_none(), "{}", plan);

    let pairs = join_pairs(plan);
    assert_eq!(pairs.len(), 2);
    for (l, r) in &pairs {
        assert!(l == "b" || r == "b", "a and c joined directly:\n{}", plan);
    }
}

#[test]
fn test_subset_search_bridges_through_b() {
    let catalog = bridge_catalog();
    let optimized = optimize(&catalog, OptimizerConfig::new());

    let outcome = optimized.join_order.unwrap();
    assert_eq!(outcome.strategy, JoinOrderStrategy::Subset);
    assert_eq!(outcome.relations, 3);
    assert_bridged(&optimized.logical);
}

#[test]
fn test_interval_search_bridges_through_b() {
    let catalog = bridge_catalog();
    let optimized = optimize(&catalog, OptimizerConfig::new().subset_dp_limit(1));

    let outcome = optimized.join_order.unwrap();
    assert_eq!(outcome.strategy, JoinOrderStrategy::Interval);
    assert_bridged(&optimized.logical);
}

#[test]
fn test_chain_produces_one_join_per_predicate() {
    let mut catalog = Catalog::new();
    catalog.add_table(table("t0", 100, &[("k0", 100)])).unwrap();
    catalog.add_table(table("t1", 200, &[("k0", 50), ("k1", 20)])).unwrap();
    catalog.add_table(table("t2", 300, &[("k1", 30), ("k2", 10)])).unwrap();
    catalog.add_table(table("t3", 400, &[("k2", 40), ("k3", 40)])).unwrap();
    catalog.add_table(table("t4", 500, &[("k3", 25)])).unwrap();

    let sql = "SELECT t0.k0 FROM t0, t1, t2, t3, t4 \
               WHERE t0.k0 = t1.k0 AND t1.k1 = t2.k1 AND t2.k2 = t3.k2 AND t3.k3 = t4.k3";
    let planner = QueryPlanner::new(&catalog);
    let optimized = planner.plan(sql).unwrap();
    let plan = &optimized.logical;
    plan.validate().unwrap();

    assert_eq!(join_pairs(plan).len(), 4);
    assert!(plan.find_first(|n| matches!(n, LogicalNode::Product)).is_none());
    assert!(plan.find_first(LogicalNode::is_join_selection).is_none());

    // every join's columns come from the inputs it joins
    for id in plan.find_all(|n| matches!(n, LogicalNode::Join { .. })) {
        if let LogicalNode::Join { left, right, .. } = plan.kind(id) {
            let children = plan.children(id);
            assert!(plan.subtree_tables(children[0]).contains(&left.table));
            assert!(plan.subtree_tables(children[1]).contains(&right.table));
        }
    }
}

#[test]
fn test_disconnected_relations_keep_one_product() {
    let mut catalog = bridge_catalog();
    catalog.add_table(table("d", 5, &[("z", 5)])).unwrap();

    let sql = "SELECT a.x FROM a, b, c, d WHERE a.x = b.x AND b.y = c.y";
    let optimized = QueryPlanner::new(&catalog).plan(sql).unwrap();
    let plan = &optimized.logical;
    plan.validate().unwrap();

    assert_eq!(plan.find_all(|n| matches!(n, LogicalNode::Product)).len(), 1);
    assert_eq!(join_pairs(plan).len(), 2);
}
