use anyhow::{anyhow, bail, Context, Result};
use filequery_engine::ingestion::parquet::read_metadata;
use filequery_engine::ingestion::{table_schema, FileFormat, ReaderOptions};
use filequery_engine::result_format::{format_avg, format_results, format_table, ResultFormat};
use filequery_engine::{EngineConfig, PlanOperator, QueryExecutor};
use std::env;
use std::path::Path;

struct Args {
    path: String,
    format: Option<FileFormat>,
    limit: usize,
    summary: bool,
    config: Option<String>,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} <file-or-glob> [--format csv|parquet|json] [--limit N] [--summary] [--config engine.json]",
        program
    )
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("filequery");
    let mut args = Args {
        path: String::new(),
        format: None,
        limit: 10,
        summary: false,
        config: None,
    };
    let mut rest = argv.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--format" => {
                let value = rest.next().ok_or_else(|| anyhow!(usage(program)))?;
                args.format = Some(match value.as_str() {
                    "csv" => FileFormat::Csv,
                    "parquet" => FileFormat::Parquet,
                    "json" => FileFormat::Json,
                    other => bail!("unknown format '{}'", other),
                });
            }
            "--limit" => {
                let value = rest.next().ok_or_else(|| anyhow!(usage(program)))?;
                args.limit = value.parse().with_context(|| format!("invalid limit '{}'", value))?;
            }
            "--summary" => args.summary = true,
            "--config" => args.config = Some(rest.next().ok_or_else(|| anyhow!(usage(program)))?.clone()),
            path if args.path.is_empty() && !path.starts_with("--") => args.path = path.to_string(),
            other => bail!("unexpected argument '{}'\n{}", other, usage(program)),
        }
    }
    if args.path.is_empty() {
        bail!(usage(program));
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("filequery_engine=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let format = args
        .format
        .or_else(|| FileFormat::from_path(&args.path))
        .ok_or_else(|| anyhow!("cannot tell the format of '{}'; pass --format", args.path))?;

    let options = ReaderOptions::default().resolved(&config);
    let schema = table_schema(&args.path, format, &options)?;
    println!("{} ({})", args.path, format.name());
    for field in schema.fields() {
        let nullable = if field.nullable { "" } else { " NOT NULL" };
        println!("  {:<24} {}{}", field.name, field.data_type, nullable);
    }

    if format == FileFormat::Parquet && Path::new(&args.path).is_file() {
        let info = read_metadata(Path::new(&args.path))?;
        println!();
        println!(
            "{} rows in {} row groups, codecs: {}",
            info.num_rows,
            info.row_groups.len(),
            info.codecs().join(", ")
        );
        for (idx, rg) in info.row_groups.iter().enumerate() {
            println!("  row group {}: {} rows, {} bytes", idx, rg.num_rows, rg.total_byte_size);
        }
    }

    let executor = QueryExecutor::new(config)?;
    let scan = PlanOperator::scan(args.path.clone(), format);
    println!();
    if args.summary {
        let result = executor.execute(&scan)?;
        let formatted = format_results(&result, ResultFormat::Summary);
        for column in formatted.summary.unwrap_or_default() {
            println!(
                "  {:<24} nulls={} distinct={} min={} max={} avg={}",
                column.name,
                column.null_count,
                column.distinct_estimate,
                column.min.as_deref().unwrap_or("-"),
                column.max.as_deref().unwrap_or("-"),
                format_avg(column.avg)
            );
        }
        println!("{} rows, {:.1} ms", result.row_count, result.execution_time_ms);
    } else {
        let result = executor.execute(&scan.limit(args.limit))?;
        print!("{}", format_table(&result.schema, &result.rows()));
        println!(
            "({} rows, {:.1} ms, {} rows scanned)",
            result.row_count, result.execution_time_ms, result.diagnostics.rows_scanned
        );
    }
    Ok(())
}
