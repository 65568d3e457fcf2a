/// Property tests over random inputs
use filequery_engine::query::{
    col, AggregateExpr, GroupingSpec, JoinType, OrderByExpr, ProjectionExpr, WindowFunction, WindowFunctionExpr,
};
use filequery_engine::storage::{Column, Field};
use filequery_engine::{Batch, DataType, EngineConfig, PlanOperator, QueryExecutor, Schema, Value};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn executor() -> QueryExecutor {
    QueryExecutor::new(EngineConfig::default().with_worker_threads(2).with_batch_size(7)).unwrap()
}

/// Two nullable integer columns a, b, split into batches of 5 rows
fn pairs(alias: &str, rows: &[(Option<i64>, Option<i64>)]) -> PlanOperator {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Integer, true),
        Field::new("b", DataType::Integer, true),
    ]));
    let batches = rows
        .chunks(5)
        .map(|chunk| {
            Batch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Column::from_i64(chunk.iter().map(|r| r.0).collect())),
                    Arc::new(Column::from_i64(chunk.iter().map(|r| r.1).collect())),
                ],
            )
            .unwrap()
        })
        .collect();
    PlanOperator::values(Some(alias), schema, batches)
}

fn rows_strategy() -> impl Strategy<Value = Vec<(Option<i64>, Option<i64>)>> {
    prop::collection::vec((prop::option::of(0i64..4), prop::option::of(0i64..3)), 0..40)
}

proptest! {
    #[test]
    fn batches_have_equal_column_lengths(rows in rows_strategy()) {
        let result = executor().execute(&pairs("t", &rows)).unwrap();
        for batch in &result.batches {
            for column in batch.columns() {
                prop_assert_eq!(column.len(), batch.row_count());
            }
        }
        prop_assert_eq!(result.row_count, rows.len());
    }

    #[test]
    fn cube_group_counts_match_distinct_keys(rows in rows_strategy()) {
        let plan = pairs("t", &rows).aggregate(
            vec![ProjectionExpr::new(col("a")), ProjectionExpr::new(col("b"))],
            GroupingSpec::Cube,
            vec![AggregateExpr::count_star()],
        )
        .with_grouping_id();
        let out = executor().execute(&plan).unwrap().rows();
        let both: HashSet<_> = rows.iter().copied().collect();
        let a: HashSet<_> = rows.iter().map(|r| r.0).collect();
        let b: HashSet<_> = rows.iter().map(|r| r.1).collect();
        prop_assert_eq!(out.len(), both.len() + a.len() + b.len() + 1);
        let totals: Vec<_> = out.iter().filter(|r| r[3] == Value::Integer(3)).collect();
        prop_assert_eq!(totals.len(), 1);
        prop_assert_eq!(totals[0][2].clone(), Value::Integer(rows.len() as i64));
    }

    #[test]
    fn top_k_is_prefix_of_full_sort(rows in rows_strategy(), k in 0usize..12) {
        let order = vec![OrderByExpr::desc(col("a")), OrderByExpr::asc(col("b"))];
        let full = executor().execute(&pairs("t", &rows).sort(order.clone())).unwrap().rows();
        let top = executor().execute(&pairs("t", &rows).sort(order).limit(k)).unwrap().rows();
        prop_assert_eq!(&top[..], &full[..k.min(full.len())]);
    }

    #[test]
    fn rank_jumps_by_tie_count(rows in rows_strategy()) {
        let plan = pairs("t", &rows)
            .window(vec![WindowFunctionExpr::new(WindowFunction::Rank, vec![])
                .order_by(vec![OrderByExpr::asc(col("a"))])
                .with_alias("rnk")])
            .sort(vec![OrderByExpr::asc(col("rnk"))]);
        let out = executor().execute(&plan).unwrap().rows();
        for (i, row) in out.iter().enumerate() {
            let rank = row[2].as_i64().unwrap();
            let first_peer = out.iter().position(|r| r[0] == row[0]).unwrap();
            prop_assert_eq!(rank, first_peer as i64 + 1);
            prop_assert!(rank <= i as i64 + 1);
        }
    }

    #[test]
    fn inner_join_matches_nested_loop(
        left in rows_strategy(),
        right in rows_strategy(),
    ) {
        let plan = pairs("l", &left).join(pairs("r", &right), JoinType::Inner, vec![(col("l.a"), col("r.a"))]);
        let out = executor().execute(&plan).unwrap();
        let expected = left
            .iter()
            .map(|l| right.iter().filter(|r| l.0.is_some() && r.0 == l.0).count())
            .sum::<usize>();
        prop_assert_eq!(out.row_count, expected);

        let plan = pairs("l", &left).join(pairs("r", &right), JoinType::Left, vec![(col("l.a"), col("r.a"))]);
        let out = executor().execute(&plan).unwrap();
        prop_assert!(out.row_count >= left.len());
    }
}
