/// Benchmark suite for query performance
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filequery_engine::ingestion::writer::{write_csv, write_parquet, ParquetWriteOptions};
use filequery_engine::query::{
    col, lit, AggregateExpr, AggregateFunction, GroupingSpec, JoinType, OrderByExpr, ProjectionExpr, WindowFunction,
    WindowFunctionExpr,
};
use filequery_engine::storage::{Column, Field};
use filequery_engine::{Batch, DataType, EngineConfig, FileFormat, PlanOperator, QueryExecutor, Schema};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;

const ROWS: usize = 200_000;

struct Dataset {
    _dir: tempfile::TempDir,
    csv: PathBuf,
    parquet: PathBuf,
    schema: Arc<Schema>,
    batch: Batch,
}

fn dataset() -> Dataset {
    let mut rng = StdRng::seed_from_u64(42);
    let regions = ["EU", "US", "APAC", "LATAM"];
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Integer, false),
        Field::new("customer", DataType::Integer, false),
        Field::new("region", DataType::String, false),
        Field::new("amount", DataType::Double, true),
    ]));
    let batch = Batch::try_new(
        schema.clone(),
        vec![
            Arc::new(Column::from_i64((0..ROWS as i64).map(Some).collect())),
            Arc::new(Column::from_i64((0..ROWS).map(|_| Some(rng.gen_range(0..5_000))).collect())),
            Arc::new(Column::from_strings(
                (0..ROWS).map(|_| Some(regions[rng.gen_range(0..regions.len())])).collect(),
            )),
            Arc::new(Column::from_f64(
                (0..ROWS)
                    .map(|_| rng.gen_bool(0.95).then(|| rng.gen_range(1.0..500.0)))
                    .collect(),
            )),
        ],
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("orders.csv");
    let parquet = dir.path().join("orders.parquet");
    write_csv(&csv, &schema, &[batch.clone()]).unwrap();
    let options = ParquetWriteOptions {
        row_group_size: 16_384,
        ..Default::default()
    };
    write_parquet(&parquet, &schema, &[batch.clone()], &options).unwrap();
    Dataset {
        _dir: dir,
        csv,
        parquet,
        schema,
        batch,
    }
}

fn bench_scans(c: &mut Criterion) {
    let data = dataset();
    let executor = QueryExecutor::new(EngineConfig::default()).unwrap();
    for (name, path, format) in [
        ("scan_filter_csv", &data.csv, FileFormat::Csv),
        ("scan_filter_parquet", &data.parquet, FileFormat::Parquet),
    ] {
        let plan = PlanOperator::scan(path.display().to_string(), format)
            .filter(col("id").gt_eq(lit((ROWS - 1_000) as i64)))
            .project(vec![ProjectionExpr::new(col("amount"))]);
        c.bench_function(name, |b| b.iter(|| executor.execute(black_box(&plan)).unwrap()));
    }
}

fn bench_operators(c: &mut Criterion) {
    let data = dataset();
    let executor = QueryExecutor::new(EngineConfig::default()).unwrap();
    let orders = |alias: &str| PlanOperator::values(Some(alias), data.schema.clone(), vec![data.batch.clone()]);

    let cube = orders("o").aggregate(
        vec![ProjectionExpr::new(col("region")), ProjectionExpr::new(col("customer"))],
        GroupingSpec::Cube,
        vec![AggregateExpr::new(AggregateFunction::Sum, vec![col("amount")])],
    );
    c.bench_function("aggregate_cube", |b| b.iter(|| executor.execute(black_box(&cube)).unwrap()));

    let join = orders("o").join(
        orders("c").limit(5_000),
        JoinType::Inner,
        vec![(col("o.customer"), col("c.id"))],
    );
    c.bench_function("hash_join", |b| b.iter(|| executor.execute(black_box(&join)).unwrap()));

    let window = orders("o").window(vec![WindowFunctionExpr::new(WindowFunction::Rank, vec![])
        .partition_by(vec![col("region")])
        .order_by(vec![OrderByExpr::desc(col("amount"))])]);
    c.bench_function("window_rank", |b| b.iter(|| executor.execute(black_box(&window)).unwrap()));

    let top_k = orders("o").sort(vec![OrderByExpr::desc(col("amount"))]).limit(100);
    c.bench_function("top_k_100", |b| b.iter(|| executor.execute(black_box(&top_k)).unwrap()));
}

criterion_group!(benches, bench_scans, bench_operators);
criterion_main!(benches);
