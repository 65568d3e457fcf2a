/// Cancellation and timeouts
use filequery_engine::query::{col, OrderByExpr};
use filequery_engine::{CancellationToken, EngineConfig, FileFormat, PlanOperator, QueryExecutor};
use std::io::Write;
use std::time::Duration;

fn big_csv(rows: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "id,v").unwrap();
    for i in 0..rows {
        writeln!(file, "{},{}", i, (i * 7919) % 1000).unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_cancelled_query_returns_error_not_rows() {
    let file = big_csv(100);
    let executor = QueryExecutor::new(EngineConfig::default().with_worker_threads(2)).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv);
    let err = executor.execute_with_token(&plan, token).unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_async_execution_completes() {
    let file = big_csv(1000);
    let executor = QueryExecutor::new(EngineConfig::default().with_worker_threads(2)).unwrap();
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv)
        .sort(vec![OrderByExpr::desc(col("v"))])
        .limit(5);
    let result = executor.execute_async(plan, Some(Duration::from_secs(60))).await.unwrap();
    assert_eq!(result.row_count, 5);
}

#[tokio::test]
async fn test_timeout_cancels_query() {
    let file = big_csv(300_000);
    let executor = QueryExecutor::new(EngineConfig::default().with_worker_threads(2).with_batch_size(64)).unwrap();
    let plan = PlanOperator::scan(file.path().display().to_string(), FileFormat::Csv)
        .sort(vec![OrderByExpr::asc(col("v"))]);
    let err = executor
        .execute_async(plan, Some(Duration::from_millis(1)))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
