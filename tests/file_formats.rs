/// Reading and writing CSV, line-delimited JSON and Parquet through the executor
use filequery_engine::config::MalformedRecordPolicy;
use filequery_engine::ingestion::writer::{
    write_csv_with, write_json, write_parquet, ParquetCodec, ParquetWriteOptions,
};
use filequery_engine::ingestion::CsvOptions;
use filequery_engine::ingestion::parquet::read_metadata;
use filequery_engine::query::{col, lit, AggregateExpr, GroupingSpec, OrderByExpr, ProjectionExpr};
use filequery_engine::storage::{Column, ColumnBuilder, Field};
use filequery_engine::{
    Batch, DataType, EngineConfig, EngineError, FileFormat, PlanOperator, QueryExecutor, ReaderOptions, Schema, Value,
};
use std::path::Path;
use std::sync::Arc;

fn executor() -> QueryExecutor {
    QueryExecutor::new(EngineConfig::default().with_worker_threads(2)).unwrap()
}

fn typed_batch() -> (Arc<Schema>, Batch) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Integer, false),
        Field::new("price", DataType::Double, true),
        Field::new("active", DataType::Boolean, true),
        Field::new("name", DataType::String, true),
        Field::new("day", DataType::Date, true),
        Field::new("seen_at", DataType::Timestamp, true),
    ]));
    let rows = vec![
        vec![
            Value::Integer(1),
            Value::Double(1.5),
            Value::Boolean(true),
            Value::from("alpha"),
            Value::date("2024-01-31").unwrap(),
            Value::timestamp("2024-01-31 08:30:00").unwrap(),
        ],
        vec![Value::Integer(2), Value::Null, Value::Null, Value::Null, Value::Null, Value::Null],
        vec![
            Value::Integer(3),
            Value::Double(-2.0),
            Value::Boolean(false),
            Value::from("gamma delta"),
            Value::date("1999-12-31").unwrap(),
            Value::timestamp("2000-01-01 00:00:00.250").unwrap(),
        ],
        vec![Value::Integer(4), Value::Double(0.0), Value::Null, Value::from(""), Value::Null, Value::Null],
    ];
    let columns = (0..schema.len())
        .map(|c| {
            let mut builder = ColumnBuilder::with_capacity(schema.field(c).data_type, rows.len());
            for row in &rows {
                builder.append_value(&row[c]).unwrap();
            }
            builder.finish_arc()
        })
        .collect();
    let batch = Batch::try_new(schema.clone(), columns).unwrap();
    (schema, batch)
}

fn read_back(path: &Path, format: FileFormat, options: ReaderOptions) -> (Vec<DataType>, Vec<Vec<Value>>) {
    let plan = PlanOperator::scan_with(path.display().to_string(), format, None, options);
    let result = executor().execute(&plan).unwrap();
    let types = result.schema.fields().iter().map(|f| f.data_type).collect();
    (types, result.rows())
}

#[test]
fn test_round_trip_all_formats() {
    let dir = tempfile::tempdir().unwrap();
    let (schema, batch) = typed_batch();
    let expected_types: Vec<DataType> = schema.fields().iter().map(|f| f.data_type).collect();
    let expected_rows: Vec<Vec<Value>> = (0..batch.row_count()).map(|i| batch.row(i)).collect();

    let csv_options = CsvOptions::default().with_null_string("\\N");
    let csv = dir.path().join("t.csv");
    write_csv_with(&csv, &schema, &[batch.clone()], &csv_options).unwrap();
    let json = dir.path().join("t.jsonl");
    write_json(&json, &schema, &[batch.clone()]).unwrap();
    let parquet = dir.path().join("t.parquet");
    write_parquet(&parquet, &schema, &[batch], &ParquetWriteOptions::default()).unwrap();

    for (path, format) in [(csv, FileFormat::Csv), (json, FileFormat::Json), (parquet, FileFormat::Parquet)] {
        let options = ReaderOptions::new().with_csv(csv_options.clone());
        let (types, rows) = read_back(&path, format, options);
        assert_eq!(types, expected_types, "{:?}", format);
        assert_eq!(rows, expected_rows, "{:?}", format);
    }
}

#[test]
fn test_glob_with_filename_column() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sales_2023.csv"), "region,amount\nEU,1\nUS,2\n").unwrap();
    std::fs::write(dir.path().join("sales_2024.csv"), "region,amount\nEU,3\n").unwrap();
    std::fs::write(dir.path().join("other.csv"), "region,amount\nEU,100\n").unwrap();

    let pattern = format!("{}/sales_*.csv", dir.path().display());
    let plan = PlanOperator::scan_with(pattern, FileFormat::Csv, None, ReaderOptions::new().with_filename())
        .aggregate(
            vec![ProjectionExpr::new(col("filename"))],
            GroupingSpec::Simple,
            vec![AggregateExpr::count_star().with_alias("n")],
        )
        .sort(vec![OrderByExpr::asc(col("filename"))]);
    let rows = executor().execute(&plan).unwrap().rows();
    assert_eq!(rows.len(), 2);
    assert!(rows[0][0].as_str().unwrap().ends_with("sales_2023.csv"));
    assert_eq!(rows[0][1], Value::Integer(2));
    assert!(rows[1][0].as_str().unwrap().ends_with("sales_2024.csv"));
    assert_eq!(rows[1][1], Value::Integer(1));
}

#[test]
fn test_malformed_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    std::fs::write(&path, "a,b\n1,2\n3\n4,5\n").unwrap();
    let path = path.display().to_string();

    let strict = executor().execute(&PlanOperator::scan(path.clone(), FileFormat::Csv));
    assert!(matches!(strict, Err(EngineError::Format { .. })));

    let skipping = QueryExecutor::new(
        EngineConfig::default()
            .with_worker_threads(1)
            .with_malformed_record_policy(MalformedRecordPolicy::Skip),
    )
    .unwrap();
    let result = skipping.execute(&PlanOperator::scan(path, FileFormat::Csv)).unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.diagnostics.malformed_rows_skipped, 1);
}

#[test]
fn test_parquet_row_groups_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Integer, false),
        Field::new("v", DataType::Double, true),
    ]));
    let batch = Batch::try_new(
        schema.clone(),
        vec![
            Arc::new(Column::from_i64((0..1000).map(Some).collect())),
            Arc::new(Column::from_f64((0..1000).map(|i| Some(i as f64 / 2.0)).collect())),
        ],
    )
    .unwrap();
    let options = ParquetWriteOptions {
        codec: ParquetCodec::Zstd,
        row_group_size: 100,
    };
    write_parquet(&path, &schema, &[batch], &options).unwrap();

    let info = read_metadata(&path).unwrap();
    assert_eq!(info.num_rows, 1000);
    assert_eq!(info.row_groups.len(), 10);
    assert!(info.codecs().iter().all(|c| c.starts_with("ZSTD")));

    let plan = PlanOperator::scan(path.display().to_string(), FileFormat::Parquet)
        .filter(col("id").gt_eq(lit(950i64)))
        .project(vec![ProjectionExpr::new(col("v"))]);
    let result = executor().execute(&plan).unwrap();
    assert_eq!(result.row_count, 50);
    assert_eq!(result.rows()[0], vec![Value::Double(475.0)]);
    assert_eq!(result.diagnostics.blocks_total, 10);
    assert_eq!(result.diagnostics.blocks_skipped, 9);
    assert_eq!(result.diagnostics.rows_scanned, 100);
}
