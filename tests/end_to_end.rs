//! Full pipeline tests: query text to physical plan over the sample catalog.

use miniopt::catalog::{
    sample_catalog, sample_catalog_from_dir, write_sample_data, Catalog, CatalogReader,
    ColumnStats, DataType, Histogram, Index, StatsConfig, TableBuilder,
};
use miniopt::planner::{
    build_initial_plan, CreateJoinNodes, JoinStrategy, LogicalNode, LogicalPlan, OptimizerConfig,
    PhysicalOperator, PushDownSelections, QueryOptimizer, QueryPlanner, RewriteRule,
};
use miniopt::sql::{Analyzer, CompareOp, Parser};

const RADNIK_RADPROJ: &str = "SELECT radnik.mbr FROM radnik, radproj \
                              WHERE radnik.plt = 3000 AND radnik.mbr = radproj.mbr";

fn initial_plan(catalog: &Catalog, sql: &str) -> LogicalPlan {
    let query = Parser::parse(sql).unwrap();
    let analyzed = Analyzer::new(catalog).analyze(&query).unwrap();
    build_initial_plan(&analyzed).unwrap()
}

fn count(plan: &LogicalPlan, f: impl Fn(&LogicalNode) -> bool) -> usize {
    plan.find_all(f).len()
}

#[test]
fn test_rewrite_stages_for_two_tables() {
    let catalog = sample_catalog().unwrap();
    let mut plan = initial_plan(&catalog, RADNIK_RADPROJ);

    assert_eq!(
        plan.to_string(),
        "\
Projection: [radnik.mbr]
  Selection(FILTER): radnik.plt = 3000
    Selection(JOIN): radnik.mbr = radproj.mbr
      Product
        Scan: radnik
        Scan: radproj
"
    );

    CreateJoinNodes.apply(&mut plan).unwrap();
    assert_eq!(
        plan.to_string(),
        "\
Projection: [radnik.mbr]
  Selection(FILTER): radnik.plt = 3000
    Join: radnik.mbr = radproj.mbr
      Scan: radnik
      Scan: radproj
"
    );

    PushDownSelections.apply(&mut plan).unwrap();
    assert_eq!(
        plan.to_string(),
        "\
Projection: [radnik.mbr]
  Join: radnik.mbr = radproj.mbr
    Selection(FILTER): radnik.plt = 3000
      Scan: radnik
    Scan: radproj
"
    );
}

#[test]
fn test_two_table_physical_plan() {
    let catalog = sample_catalog().unwrap();
    let optimized = QueryPlanner::new(&catalog).plan(RADNIK_RADPROJ).unwrap();

    let ops = optimized.physical.operators();
    assert_eq!(ops.len(), 6);
    assert!(matches!(ops[0], PhysicalOperator::Projection { .. }));
    assert!(matches!(
        ops[1],
        PhysicalOperator::Join { strategy: JoinStrategy::NestedLoop, .. }
    ));
    assert!(matches!(ops[2], PhysicalOperator::Projection { .. }));
    // the unclustered salary index beats a full scan for an equality lookup
    assert!(matches!(
        ops[3],
        PhysicalOperator::IndexScan { index, op: CompareOp::Eq, .. } if index == "IX_radnik_plt"
    ));
    assert!(matches!(ops[4], PhysicalOperator::Projection { .. }));
    assert!(matches!(ops[5], PhysicalOperator::SeqScan { table } if table == "radproj"));

    let join = &optimized.physical.root.children[0];
    let (l, r) = (join.children[0].estimated_cost, join.children[1].estimated_cost);
    assert_eq!(join.estimated_cost, l + l * r);
}

#[test]
fn test_clustered_index_forced() {
    let catalog = sample_catalog().unwrap();
    let planner = QueryPlanner::new(&catalog);
    for sql in [
        "SELECT radnik.god FROM radnik WHERE radnik.mbr = 10",
        "SELECT radnik.god FROM radnik WHERE radnik.mbr > 10",
    ] {
        let optimized = planner.plan(sql).unwrap();
        let ops = optimized.physical.operators();
        assert!(
            matches!(ops[1], PhysicalOperator::IndexScan { index, .. } if index == "PK_Index_radnik_mbr"),
            "{}",
            optimized.physical
        );
    }
}

#[test]
fn test_index_seek_on_radproj_key() {
    let catalog = sample_catalog().unwrap();
    let planner = QueryPlanner::new(&catalog);

    let optimized = planner
        .plan("SELECT radproj.mbr, radproj.spr FROM radproj")
        .unwrap();
    assert_eq!(optimized.physical.total_cost(), 0.0);
    assert!(matches!(
        &optimized.physical.root.operator,
        PhysicalOperator::IndexSeek { index, .. } if index == "PK_Index_radproj_mbr_spr"
    ));

    let filtered = planner
        .plan("SELECT radproj.mbr, radproj.spr FROM radproj WHERE radproj.spr = 7")
        .unwrap();
    assert_eq!(filtered.physical.total_cost(), 0.0);
    let ops = filtered.physical.operators();
    assert!(matches!(ops[0], PhysicalOperator::Filter { .. }));
    assert!(matches!(ops[1], PhysicalOperator::IndexSeek { .. }));
}

#[test]
fn test_four_table_query() {
    let catalog = sample_catalog().unwrap();
    let sql = "SELECT radnik.mbr, projekat.spr \
               FROM radnik, radproj, projekat, angazovanje \
               WHERE radnik.mbr = radproj.mbr \
               AND radproj.spr = projekat.spr \
               AND angazovanje.mbr = radnik.mbr \
               AND projekat.trajanje = 6";
    let optimized = QueryOptimizer::new(&catalog)
        .optimize(initial_plan(&catalog, sql))
        .unwrap();
    let logical = &optimized.logical;
    logical.validate().unwrap();

    assert_eq!(count(logical, |n| matches!(n, LogicalNode::Join { .. })), 3);
    assert_eq!(count(logical, |n| matches!(n, LogicalNode::Product)), 0);
    assert_eq!(count(logical, LogicalNode::is_scan), 4);
    for table in ["radnik", "radproj", "projekat", "angazovanje"] {
        assert!(logical.scan_of(table).is_some(), "missing {}", table);
    }

    // the filter stays directly above its table
    let filter = logical.find_first(LogicalNode::is_filter).unwrap();
    let below = logical.children(filter)[0];
    assert_eq!(logical.kind(below).scan_table(), Some("projekat"));

    let outcome = optimized.join_order.unwrap();
    assert_eq!(outcome.relations, 4);

    let joins = optimized
        .physical
        .operators()
        .into_iter()
        .filter(|op| matches!(op, PhysicalOperator::Join { .. }))
        .count();
    assert_eq!(joins, 3);
}

#[test]
fn test_cross_product_is_exact() {
    let catalog = sample_catalog().unwrap();
    let optimized = QueryPlanner::new(&catalog)
        .plan("SELECT radnik.mbr FROM radnik, projekat")
        .unwrap();
    assert_eq!(optimized.physical.estimated_rows(), 10_000 * 5_000);
    assert!(optimized
        .physical
        .operators()
        .iter()
        .any(|op| matches!(op, PhysicalOperator::CrossProduct { .. })));
}

#[test]
fn test_estimates_survive_reordering() {
    let catalog = sample_catalog().unwrap();
    let optimized = QueryPlanner::new(&catalog).plan(RADNIK_RADPROJ).unwrap();
    let logical = &optimized.logical;
    let root = logical.root().unwrap();
    for id in logical.preorder(root) {
        assert!(logical.estimate(id).is_some(), "node {} not estimated", id);
    }
    assert_eq!(
        optimized.physical.estimated_rows(),
        logical.estimate(root).unwrap().cardinality
    );
}

#[test]
fn test_catalog_file_round_trip() {
    let catalog = sample_catalog().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    catalog.save_json_file(&path).unwrap();

    let loaded = Catalog::from_json_file(&path).unwrap();
    assert_eq!(loaded, catalog);
    assert!(loaded.table_exists("radproj"));

    let expected = QueryPlanner::new(&catalog).explain(RADNIK_RADPROJ).unwrap();
    let actual = QueryPlanner::new(&loaded).explain(RADNIK_RADPROJ).unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn test_failures_are_isolated() {
    let catalog = sample_catalog().unwrap();
    let planner = QueryPlanner::with_config(&catalog, OptimizerConfig::new().capture_stages(true));
    assert!(planner.plan("SELECT radnik.mbr FROM radnik WHERE 1 = radnik.mbr").is_err());
    assert!(planner.plan("SELECT radnik.mbr FROM radnik OR").is_err());
    assert!(planner
        .plan("SELECT radnik.mbr FROM radnik WHERE radnik.mbr = 'x'")
        .is_err());
    assert!(planner.plan(RADNIK_RADPROJ).is_ok());
}

#[test]
fn test_indexed_column_without_stats_is_planned() {
    let mut catalog = Catalog::new();
    catalog
        .add_table(
            TableBuilder::new("t")
                .add_key_column("a", DataType::Integer)
                .add_column("b", DataType::Integer)
                .index(Index::new("IX_t_b", ["b"]).with_clustered(false))
                .row_count(50)
                .column_stats("a", ColumnStats::new(50, Histogram::default()))
                .build()
                .unwrap(),
        )
        .unwrap();

    let optimized = QueryPlanner::new(&catalog)
        .plan("SELECT t.a FROM t WHERE t.b = 5")
        .unwrap();
    // the index costs as much as a full scan, so the scan wins the tie
    assert!(optimized
        .physical
        .operators()
        .iter()
        .any(|op| matches!(op, PhysicalOperator::SeqScan { table } if table == "t")));
}

#[test]
fn test_catalog_from_generated_data_files() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_data(dir.path(), 11).unwrap();
    let catalog = sample_catalog_from_dir(dir.path(), &StatsConfig::default()).unwrap();

    let optimized = QueryPlanner::new(&catalog).plan(RADNIK_RADPROJ).unwrap();
    assert!(optimized
        .physical
        .operators()
        .iter()
        .any(|op| matches!(op, PhysicalOperator::Join { .. })));
    assert!(optimized.physical.total_cost() > 0.0);
}
