/// Parquet reader and metadata inspection
///
/// Row groups are the skippable blocks: before decoding, every pushed-down predicate is
/// checked against the row group's column chunk statistics and the row group is dropped
/// when any predicate proves it empty. Decoding errors always abort, whatever the
/// malformed-record policy.
use crate::error::{EngineError, EngineResult};
use crate::ingestion::source::FileReader;
use crate::ingestion::{ReaderMetrics, ReaderOptions};
use crate::storage::arrow_interop::{from_arrow_schema, from_record_batch};
use crate::storage::columnar::{Batch, Schema, SchemaRef};
use crate::storage::statistics::{ColumnStatistics, ScanPredicate};
use crate::storage::value::Value;
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::{ParquetMetaData, RowGroupMetaData};
use parquet::file::statistics::Statistics;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

fn open_builder(path: &Path) -> EngineResult<ParquetRecordBatchReaderBuilder<File>> {
    let path_str = path.display().to_string();
    let file = File::open(path).map_err(|e| EngineError::io_with_path(e.to_string(), path_str.clone()))?;
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| EngineError::from(e).with_path(path_str))
}

/// Engine schema of a Parquet file
pub fn file_schema(path: &Path) -> EngineResult<Schema> {
    let builder = open_builder(path)?;
    from_arrow_schema(builder.schema()).map_err(|e| e.with_path(path.display().to_string()))
}

/// Statistics of column `column` in one row group, as engine values.
/// Only physical/logical pairs whose order matches the engine type are converted.
fn column_statistics(
    row_group: &RowGroupMetaData,
    column: usize,
    arrow_type: &ArrowDataType,
) -> ColumnStatistics {
    let chunk = row_group.column(column);
    let mut stats = ColumnStatistics {
        row_count: row_group.num_rows().max(0) as u64,
        ..Default::default()
    };
    let Some(statistics) = chunk.statistics() else {
        return stats;
    };
    stats.null_count = statistics.null_count_opt();
    let (min, max) = match (statistics, arrow_type) {
        (Statistics::Boolean(s), ArrowDataType::Boolean) => (
            s.min_opt().map(|v| Value::Boolean(*v)),
            s.max_opt().map(|v| Value::Boolean(*v)),
        ),
        (Statistics::Int32(s), ArrowDataType::Int32 | ArrowDataType::Int16 | ArrowDataType::Int8) => (
            s.min_opt().map(|v| Value::Integer(*v as i64)),
            s.max_opt().map(|v| Value::Integer(*v as i64)),
        ),
        (Statistics::Int32(s), ArrowDataType::Date32) => (
            s.min_opt().map(|v| Value::Date(*v)),
            s.max_opt().map(|v| Value::Date(*v)),
        ),
        (Statistics::Int64(s), ArrowDataType::Int64) => (
            s.min_opt().map(|v| Value::Integer(*v)),
            s.max_opt().map(|v| Value::Integer(*v)),
        ),
        (Statistics::Int64(s), ArrowDataType::Timestamp(TimeUnit::Microsecond, _)) => (
            s.min_opt().map(|v| Value::Timestamp(*v)),
            s.max_opt().map(|v| Value::Timestamp(*v)),
        ),
        (Statistics::Float(s), ArrowDataType::Float32) => (
            s.min_opt().map(|v| Value::Double(*v as f64)),
            s.max_opt().map(|v| Value::Double(*v as f64)),
        ),
        (Statistics::Double(s), ArrowDataType::Float64) => (
            s.min_opt().map(|v| Value::Double(*v)),
            s.max_opt().map(|v| Value::Double(*v)),
        ),
        (Statistics::ByteArray(s), ArrowDataType::Utf8 | ArrowDataType::LargeUtf8) => (
            s.min_opt()
                .and_then(|v| v.as_utf8().ok())
                .map(|v| Value::String(v.to_string())),
            s.max_opt()
                .and_then(|v| v.as_utf8().ok())
                .map(|v| Value::String(v.to_string())),
        ),
        _ => (None, None),
    };
    // float statistics may hold NaN, which says nothing about the range
    let usable = |v: &Option<Value>| !matches!(v, Some(Value::Double(d)) if d.is_nan());
    if usable(&min) && usable(&max) {
        stats.min = min;
        stats.max = max;
    }
    stats
}

/// Row groups that survive the predicates, and the total count
fn prune_row_groups(
    metadata: &ParquetMetaData,
    arrow_schema: &arrow::datatypes::Schema,
    predicates: &[ScanPredicate],
) -> (Vec<usize>, usize) {
    let total = metadata.num_row_groups();
    let columns: Vec<(usize, &ScanPredicate, &ArrowDataType)> = predicates
        .iter()
        .filter_map(|p| {
            let idx = arrow_schema.index_of(&p.column).ok()?;
            Some((idx, p, arrow_schema.field(idx).data_type()))
        })
        .collect();
    let keep = (0..total)
        .filter(|&rg| {
            let row_group = metadata.row_group(rg);
            !columns.iter().any(|(col, predicate, arrow_type)| {
                predicate.can_skip(&column_statistics(row_group, *col, arrow_type))
            })
        })
        .collect();
    (keep, total)
}

pub struct ParquetFileReader {
    path: String,
    reader: ParquetRecordBatchReader,
    output_schema: SchemaRef,
    metrics: ReaderMetrics,
}

impl ParquetFileReader {
    pub fn open(
        path: &Path,
        schema: SchemaRef,
        projection: Vec<usize>,
        predicates: &[ScanPredicate],
        options: &ReaderOptions,
    ) -> EngineResult<Self> {
        let path_str = path.display().to_string();
        let builder = open_builder(path)?;
        let arrow_schema = builder.schema().clone();
        // projection masks and statistics are addressed by leaf index
        if builder.parquet_schema().num_columns() != arrow_schema.fields().len() {
            return Err(EngineError::format(format!(
                "nested columns are not supported ({} leaves for {} fields)",
                builder.parquet_schema().num_columns(),
                arrow_schema.fields().len()
            ))
            .with_path(path_str));
        }

        let (row_groups, total) = prune_row_groups(builder.metadata(), &arrow_schema, predicates);
        let skipped = total - row_groups.len();
        info!(
            path = %path_str,
            row_groups = total,
            skipped,
            "parquet row groups pruned"
        );

        let mask = ProjectionMask::roots(builder.parquet_schema(), projection.iter().copied());
        let reader = builder
            .with_projection(mask)
            .with_row_groups(row_groups)
            .with_batch_size(options.batch_size())
            .build()
            .map_err(|e| EngineError::from(e).with_path(path_str.clone()))?;

        Ok(Self {
            path: path_str,
            reader,
            output_schema: Arc::new(schema.project(&projection)),
            metrics: ReaderMetrics {
                blocks_total: total as u64,
                blocks_skipped: skipped as u64,
                ..Default::default()
            },
        })
    }
}

impl FileReader for ParquetFileReader {
    fn next_batch(&mut self) -> EngineResult<Option<Batch>> {
        let Some(next) = self.reader.next() else {
            return Ok(None);
        };
        let record_batch = next.map_err(|e| EngineError::from(e).with_path(self.path.clone()))?;
        let batch = from_record_batch(&record_batch, &self.output_schema)?;
        self.metrics.rows_read += batch.row_count() as u64;
        debug!(path = %self.path, rows = batch.row_count(), "decoded parquet batch");
        Ok(Some(batch))
    }

    fn metrics(&self) -> ReaderMetrics {
        self.metrics
    }
}

/// One column chunk of a row group
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnChunkInfo {
    pub column: String,
    pub codec: String,
    pub compressed_bytes: i64,
    pub uncompressed_bytes: i64,
    pub statistics: ColumnStatistics,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowGroupInfo {
    pub num_rows: i64,
    pub total_byte_size: i64,
    pub columns: Vec<ColumnChunkInfo>,
}

/// File-level metadata: schema and per-row-group statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParquetFileInfo {
    pub path: String,
    pub schema: Schema,
    pub num_rows: i64,
    pub created_by: Option<String>,
    pub row_groups: Vec<RowGroupInfo>,
}

impl ParquetFileInfo {
    /// Codecs used by any column chunk
    pub fn codecs(&self) -> Vec<String> {
        let mut codecs: Vec<String> = self
            .row_groups
            .iter()
            .flat_map(|rg| rg.columns.iter().map(|c| c.codec.clone()))
            .collect();
        codecs.sort();
        codecs.dedup();
        codecs
    }
}

/// Inspect a Parquet file without decoding its data
pub fn read_metadata(path: &Path) -> EngineResult<ParquetFileInfo> {
    let path_str = path.display().to_string();
    let builder = open_builder(path)?;
    let arrow_schema = builder.schema().clone();
    let schema = from_arrow_schema(&arrow_schema).map_err(|e| e.with_path(path_str.clone()))?;
    let metadata = builder.metadata();

    let row_groups = metadata
        .row_groups()
        .iter()
        .map(|rg| RowGroupInfo {
            num_rows: rg.num_rows(),
            total_byte_size: rg.total_byte_size(),
            columns: rg
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, chunk)| {
                    let statistics = arrow_schema
                        .fields()
                        .get(idx)
                        .map(|f| column_statistics(rg, idx, f.data_type()))
                        .unwrap_or_default();
                    ColumnChunkInfo {
                        column: chunk.column_path().string(),
                        codec: chunk.compression().to_string(),
                        compressed_bytes: chunk.compressed_size(),
                        uncompressed_bytes: chunk.uncompressed_size(),
                        statistics,
                    }
                })
                .collect(),
        })
        .collect();

    Ok(ParquetFileInfo {
        path: path_str,
        schema,
        num_rows: metadata.file_metadata().num_rows(),
        created_by: metadata.file_metadata().created_by().map(str::to_string),
        row_groups,
    })
}
