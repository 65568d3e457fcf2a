/// Hash join semantics through the executor
use filequery_engine::query::{col, JoinType, OrderByExpr};
use filequery_engine::storage::{Column, Field};
use filequery_engine::{Batch, DataType, EngineConfig, EngineError, PlanOperator, QueryExecutor, Schema, Value};
use std::sync::Arc;

fn table(alias: &str, keys: Vec<Option<i64>>, tags: Vec<&str>) -> PlanOperator {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Integer, true),
        Field::new("tag", DataType::String, false),
    ]));
    let batch = Batch::try_new(
        schema.clone(),
        vec![
            Arc::new(Column::from_i64(keys)),
            Arc::new(Column::from_strings(tags.into_iter().map(Some).collect())),
        ],
    )
    .unwrap();
    PlanOperator::values(Some(alias), schema, vec![batch])
}

fn executor(config: EngineConfig) -> QueryExecutor {
    QueryExecutor::new(config.with_worker_threads(2)).unwrap()
}

fn tags(rows: &[Vec<Value>]) -> Vec<(String, Option<String>)> {
    rows.iter()
        .map(|r| (r[1].to_string(), r[3].as_str().map(str::to_string)))
        .collect()
}

#[test]
fn test_inner_join_emits_every_match() {
    let left = table("l", vec![Some(1), Some(2), None, Some(1)], vec!["a", "b", "c", "d"]);
    let right = table("r", vec![Some(1), None, Some(1), Some(3)], vec!["x", "y", "z", "w"]);
    let plan = left.join(right, JoinType::Inner, vec![(col("l.k"), col("r.k"))]);
    let rows = executor(EngineConfig::default()).execute(&plan).unwrap().rows();
    assert_eq!(
        tags(&rows),
        vec![
            ("a".to_string(), Some("x".to_string())),
            ("a".to_string(), Some("z".to_string())),
            ("d".to_string(), Some("x".to_string())),
            ("d".to_string(), Some("z".to_string())),
        ]
    );
    assert!(rows.iter().all(|r| !r[0].is_null() && !r[2].is_null()));
}

#[test]
fn test_left_join_keeps_every_probe_row() {
    let left = table("l", vec![Some(1), Some(2), None], vec!["a", "b", "c"]);
    let right = table("r", vec![Some(1), None], vec!["x", "y"]);
    let plan = left
        .join(right, JoinType::Left, vec![(col("l.k"), col("r.k"))])
        .sort(vec![OrderByExpr::asc(col("l.tag"))]);
    let rows = executor(EngineConfig::default()).execute(&plan).unwrap().rows();
    assert_eq!(
        tags(&rows),
        vec![
            ("a".to_string(), Some("x".to_string())),
            ("b".to_string(), None),
            ("c".to_string(), None),
        ]
    );
}

#[test]
fn test_build_side_over_budget_is_resource_exhausted() {
    let n = 20_000;
    let left = table("l", vec![Some(1)], vec!["a"]);
    let right = table("r", (0..n).map(Some).collect(), vec!["payload"; n as usize]);
    let plan = left.join(right, JoinType::Inner, vec![(col("l.k"), col("r.k"))]);
    let err = executor(EngineConfig::default().with_memory_budget(64 * 1024))
        .execute(&plan)
        .unwrap_err();
    assert!(matches!(err, EngineError::ResourceExhausted { .. }), "{err}");
}
