//! Property-based tests for cardinality estimation.

use proptest::prelude::*;

use miniopt::catalog::{Bucket, Catalog, ColumnStats, DataType, Histogram, StatsConfig, TableBuilder};
use miniopt::planner::{CostModel, LogicalNode, LogicalPlan};
use miniopt::sql::{CompareOp, Literal, Operand, PredicateKind, QualifiedName};

fn single_table(rows: u64, stats: ColumnStats) -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .add_table(
            TableBuilder::new("t")
                .add_column("v", DataType::Integer)
                .row_count(rows)
                .column_stats("v", stats)
                .build()
                .expect("valid table"),
        )
        .expect("fresh catalog");
    catalog
}

fn equality_filter(value: i64) -> LogicalPlan {
    let mut plan = LogicalPlan::new();
    let scan = plan.add(LogicalNode::scan("t", 0));
    let sel = plan
        .add_with_children(
            LogicalNode::Selection {
                kind: PredicateKind::Filter,
                left: QualifiedName::new("t", "v"),
                op: CompareOp::Eq,
                right: Operand::Literal(Literal::Integer(value)),
            },
            &[scan],
        )
        .expect("scan is detached");
    plan.set_root(sel).expect("root exists");
    plan
}

/// Buckets with arbitrary (possibly inconsistent) row counts.
fn arb_histogram() -> impl Strategy<Value = Histogram> {
    prop::collection::vec((-1000i64..1000, 0i64..200, 0u64..1_000_000), 0..12).prop_map(|raw| {
        let buckets = raw
            .into_iter()
            .map(|(lower, width, row_count)| Bucket {
                lower,
                upper: lower + width,
                row_count,
            })
            .collect();
        Histogram { buckets }
    })
}

proptest! {
    #[test]
    fn equality_filter_never_exceeds_table(
        values in prop::collection::vec(-1000i64..1000, 1..400),
        buckets in 1usize..20,
        key in -2000i64..2000,
    ) {
        let config = StatsConfig::default().buckets(buckets);
        let stats = ColumnStats::from_values(&values, &config);
        let rows = values.len() as u64;
        let catalog = single_table(rows, stats);

        let mut plan = equality_filter(key);
        let estimated = CostModel::new(&catalog).estimate(&mut plan).expect("estimate");
        prop_assert!(estimated <= rows);
    }

    #[test]
    fn equality_filter_bounded_for_any_histogram(
        rows in 0u64..100_000,
        distinct in 0u64..5_000,
        histogram in arb_histogram(),
        key in -1500i64..1500,
    ) {
        let catalog = single_table(rows, ColumnStats::new(distinct, histogram));
        let mut plan = equality_filter(key);
        let estimated = CostModel::new(&catalog).estimate(&mut plan).expect("estimate");
        prop_assert!(estimated <= rows);
    }

    #[test]
    fn histogram_accounts_for_every_value(
        values in prop::collection::vec(any::<i64>(), 1..300),
        buckets in 1usize..32,
    ) {
        let config = StatsConfig::default().buckets(buckets);
        let stats = ColumnStats::from_values(&values, &config);
        prop_assert_eq!(stats.histogram.total_rows(), values.len() as u64);
        prop_assert!(stats.histogram.buckets.len() <= buckets);
    }

    #[test]
    fn product_cardinality_is_exact(
        left_rows in 0u64..1_000_000,
        right_rows in 0u64..1_000_000,
    ) {
        let mut catalog = Catalog::new();
        for (name, rows) in [("l", left_rows), ("r", right_rows)] {
            catalog
                .add_table(
                    TableBuilder::new(name)
                        .add_column("k", DataType::Integer)
                        .row_count(rows)
                        .build()
                        .expect("valid table"),
                )
                .expect("unique table");
        }

        let mut plan = LogicalPlan::new();
        let l = plan.add(LogicalNode::scan("l", 0));
        let r = plan.add(LogicalNode::scan("r", 1));
        let product = plan
            .add_with_children(LogicalNode::Product, &[l, r])
            .expect("scans are detached");
        plan.set_root(product).expect("root exists");

        let estimated = CostModel::new(&catalog).estimate(&mut plan).expect("estimate");
        prop_assert_eq!(estimated, left_rows * right_rows);
    }
}
