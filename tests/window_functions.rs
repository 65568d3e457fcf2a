/// Window functions through the executor
use filequery_engine::query::{
    col, AggregateFunction, FrameBound, FrameType, OrderByExpr, WindowFrame, WindowFunction, WindowFunctionExpr,
};
use filequery_engine::{EngineConfig, FileFormat, PlanOperator, QueryExecutor, Value};
use std::collections::BTreeMap;
use std::io::Write;

fn csv_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn column(plan: &PlanOperator, name: &str) -> Vec<Value> {
    QueryExecutor::new(EngineConfig::default().with_worker_threads(2))
        .unwrap()
        .execute(plan)
        .unwrap()
        .column_values(name)
        .unwrap()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Integer(v)).collect()
}

#[test]
fn test_rank_leaves_gaps_after_ties() {
    let file = csv_file("player,score\na,10\nb,20\nc,10\nd,30\ne,20\nf,10\n");
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv).window(vec![
        WindowFunctionExpr::new(WindowFunction::Rank, vec![])
            .order_by(vec![OrderByExpr::asc(col("score"))])
            .with_alias("rnk"),
        WindowFunctionExpr::new(WindowFunction::RowNumber, vec![])
            .order_by(vec![OrderByExpr::asc(col("score"))])
            .with_alias("rn"),
    ]);
    assert_eq!(column(&plan, "rnk"), ints(&[1, 4, 1, 6, 4, 1]));
    // ties keep input order
    assert_eq!(column(&plan, "rn"), ints(&[1, 4, 2, 6, 5, 3]));
}

#[test]
fn test_ntile_four_over_ten_rows() {
    let rows: String = (1..=10).map(|i| format!("{}\n", i)).collect();
    let file = csv_file(&format!("x\n{}", rows));
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv).window(vec![
        WindowFunctionExpr::new(WindowFunction::Ntile(4), vec![])
            .order_by(vec![OrderByExpr::asc(col("x"))])
            .with_alias("bucket"),
    ]);
    let mut sizes: BTreeMap<i64, usize> = BTreeMap::new();
    for bucket in column(&plan, "bucket") {
        *sizes.entry(bucket.as_i64().unwrap()).or_default() += 1;
    }
    assert_eq!(sizes.into_iter().collect::<Vec<_>>(), vec![(1, 3), (2, 3), (3, 2), (4, 2)]);
}

#[test]
fn test_partitioned_lag_lead_stay_in_partition() {
    let file = csv_file("store,day,sales\nA,1,10\nB,1,5\nA,2,20\nB,2,7\nA,3,30\n");
    let order = vec![OrderByExpr::asc(col("day"))];
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv).window(vec![
        WindowFunctionExpr::new(
            WindowFunction::Lag {
                offset: 1,
                default: None,
            },
            vec![col("sales")],
        )
        .partition_by(vec![col("store")])
        .order_by(order.clone())
        .with_alias("prev"),
        WindowFunctionExpr::new(
            WindowFunction::Lead {
                offset: 2,
                default: Some(Value::Integer(0)),
            },
            vec![col("sales")],
        )
        .partition_by(vec![col("store")])
        .order_by(order)
        .with_alias("next2"),
    ]);
    assert_eq!(
        column(&plan, "prev"),
        vec![Value::Null, Value::Null, Value::Integer(10), Value::Integer(5), Value::Integer(20)]
    );
    assert_eq!(column(&plan, "next2"), ints(&[30, 0, 0, 0, 0]));
}

#[test]
fn test_framed_aggregates() {
    let file = csv_file("day,v\n1,1\n2,2\n3,3\n4,4\n5,5\n");
    let order = vec![OrderByExpr::asc(col("day"))];
    let centered = WindowFrame::new(FrameType::Rows, FrameBound::Preceding(1), FrameBound::Following(1));
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv).window(vec![
        WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Sum), vec![col("v")])
            .order_by(order.clone())
            .with_alias("running"),
        WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Sum), vec![col("v")])
            .order_by(order.clone())
            .frame(centered)
            .with_alias("centered"),
        WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Max), vec![col("v")])
            .order_by(order)
            .frame(WindowFrame::whole_partition())
            .with_alias("max_all"),
    ]);
    assert_eq!(column(&plan, "running"), ints(&[1, 3, 6, 10, 15]));
    assert_eq!(column(&plan, "centered"), ints(&[3, 6, 9, 12, 9]));
    assert_eq!(column(&plan, "max_all"), ints(&[5, 5, 5, 5, 5]));
}
