/// Batch writers for CSV, line-delimited JSON and Parquet
///
/// Text output uses the same value formatting the readers infer from, so a written file
/// reads back with the same schema. Parquet output always carries chunk statistics.
use crate::error::{EngineError, EngineResult};
use crate::ingestion::CsvOptions;
use crate::storage::arrow_interop::{to_arrow_schema, to_record_batch};
use crate::storage::columnar::{Batch, Schema};
use crate::storage::value::Value;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParquetCodec {
    Uncompressed,
    #[default]
    Snappy,
    Zstd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParquetWriteOptions {
    pub codec: ParquetCodec,
    /// Rows per row group
    pub row_group_size: usize,
}

impl Default for ParquetWriteOptions {
    fn default() -> Self {
        Self {
            codec: ParquetCodec::Snappy,
            row_group_size: 122_880,
        }
    }
}

fn create(path: &Path) -> EngineResult<File> {
    File::create(path).map_err(|e| EngineError::io_with_path(e.to_string(), path.display().to_string()))
}

fn check_schema(schema: &Schema, batches: &[Batch]) -> EngineResult<()> {
    for batch in batches {
        let same = batch.schema().len() == schema.len()
            && batch
                .schema()
                .fields()
                .iter()
                .zip(schema.fields())
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type);
        if !same {
            return Err(EngineError::schema("batches passed to a writer must share one schema"));
        }
    }
    Ok(())
}

/// Write batches as CSV with a header row and default options; NULL is an empty field
pub fn write_csv(path: &Path, schema: &Schema, batches: &[Batch]) -> EngineResult<u64> {
    write_csv_with(path, schema, batches, &CsvOptions::default())
}

/// Write batches as CSV. NULL is written as `null_string`; reading the file with the same
/// options gives back the same NULL positions, empty strings included once `null_string`
/// is non-empty.
pub fn write_csv_with(path: &Path, schema: &Schema, batches: &[Batch], options: &CsvOptions) -> EngineResult<u64> {
    check_schema(schema, batches)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .from_writer(BufWriter::new(create(path)?));
    if options.has_header {
        writer.write_record(schema.fields().iter().map(|f| f.name.as_str()))?;
    }
    let mut rows = 0u64;
    let mut record: Vec<String> = Vec::with_capacity(schema.len());
    for batch in batches {
        for row in 0..batch.row_count() {
            record.clear();
            record.extend(batch.columns().iter().map(|c| match c.value(row) {
                Value::Null => options.null_string.clone(),
                v => v.to_string(),
            }));
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!(path = %path.display(), rows, "wrote csv");
    Ok(rows)
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(v) => serde_json::Value::from(v),
        Value::Double(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Boolean(v) => serde_json::Value::Bool(v),
        Value::String(v) => serde_json::Value::String(v),
        other @ (Value::Date(_) | Value::Timestamp(_)) => serde_json::Value::String(other.to_string()),
    }
}

/// One JSON object per row; dates and timestamps as text, non-finite doubles as null
pub fn batch_to_json_rows(batch: &Batch) -> Vec<serde_json::Map<String, serde_json::Value>> {
    (0..batch.row_count())
        .map(|row| {
            batch
                .schema()
                .fields()
                .iter()
                .zip(batch.columns())
                .map(|(field, column)| (field.name.clone(), to_json(column.value(row))))
                .collect()
        })
        .collect()
}

/// Write batches as line-delimited JSON
pub fn write_json(path: &Path, schema: &Schema, batches: &[Batch]) -> EngineResult<u64> {
    check_schema(schema, batches)?;
    let mut out = BufWriter::new(create(path)?);
    let mut rows = 0u64;
    for batch in batches {
        for object in batch_to_json_rows(batch) {
            serde_json::to_writer(&mut out, &object)?;
            out.write_all(b"\n")?;
            rows += 1;
        }
    }
    out.flush()?;
    info!(path = %path.display(), rows, "wrote json");
    Ok(rows)
}

/// Write batches as Parquet
pub fn write_parquet(
    path: &Path,
    schema: &Schema,
    batches: &[Batch],
    options: &ParquetWriteOptions,
) -> EngineResult<u64> {
    check_schema(schema, batches)?;
    let compression = match options.codec {
        ParquetCodec::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCodec::Snappy => Compression::SNAPPY,
        ParquetCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
    };
    let props = WriterProperties::builder()
        .set_compression(compression)
        .set_max_row_group_size(options.row_group_size.max(1))
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .build();
    let arrow_schema = Arc::new(to_arrow_schema(schema));
    let mut writer = ArrowWriter::try_new(create(path)?, arrow_schema, Some(props))?;
    let mut rows = 0u64;
    for batch in batches {
        writer.write(&to_record_batch(batch)?)?;
        rows += batch.row_count() as u64;
    }
    writer.close()?;
    info!(
        path = %path.display(),
        rows,
        codec = ?options.codec,
        "wrote parquet"
    );
    Ok(rows)
}
