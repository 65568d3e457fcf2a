/// File ingestion: format readers, schema inference, glob expansion and writers
///
/// `open` turns a path or glob into a `ReaderHandle` that yields batches of the requested
/// columns. Every format goes through `source::MultiFileReader`, which expands the glob,
/// unifies per-file schemas and appends the optional `filename` column.
pub mod csv;
pub mod json;
pub mod parquet;
pub mod schema_inference;
pub mod source;
pub mod writer;

use crate::config::{EngineConfig, MalformedRecordPolicy};
use crate::error::EngineResult;
use crate::storage::columnar::{Batch, SchemaRef};
use crate::storage::statistics::ScanPredicate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the column added by `include_filename`
pub const FILENAME_COLUMN: &str = "filename";

const DEFAULT_BATCH_SIZE: usize = 8192;
const DEFAULT_SAMPLE_ROWS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    Csv,
    Parquet,
    /// Line-delimited JSON objects (or one top-level array, see `JsonOptions`)
    Json,
}

impl FileFormat {
    /// Format implied by a file extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Some(FileFormat::Csv),
            "parquet" | "pq" => Some(FileFormat::Parquet),
            "json" | "jsonl" | "ndjson" => Some(FileFormat::Json),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
            FileFormat::Json => "json",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
    /// First record holds column names; without it columns are `column0, column1, ..`
    pub has_header: bool,
    /// Field text read and written as NULL. When set to something other than the empty
    /// string, an empty field is an empty string
    #[serde(default)]
    pub null_string: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_header: true,
            null_string: String::new(),
        }
    }
}

impl CsvOptions {
    pub fn with_null_string(mut self, null_string: impl Into<String>) -> Self {
        self.null_string = null_string.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonOptions {
    /// One object per line; false reads a single top-level array of objects
    pub line_delimited: bool,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            line_delimited: true,
        }
    }
}

/// Reader options; unset values fall back to the engine configuration
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    pub batch_size: Option<usize>,
    /// Rows sampled for schema inference
    pub sample_rows: Option<usize>,
    /// Skip inference and read with this schema
    pub schema: Option<SchemaRef>,
    pub malformed_record_policy: Option<MalformedRecordPolicy>,
    /// Append a `filename` column with the source path of each row
    pub include_filename: bool,
    /// Unify the schemas of all matched files by column name
    pub union_by_name: bool,
    pub csv: CsvOptions,
    pub json: JsonOptions,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_malformed_record_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.malformed_record_policy = Some(policy);
        self
    }

    pub fn with_filename(mut self) -> Self {
        self.include_filename = true;
        self
    }

    pub fn with_union_by_name(mut self) -> Self {
        self.union_by_name = true;
        self
    }

    pub fn with_csv(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }

    pub fn with_json(mut self, json: JsonOptions) -> Self {
        self.json = json;
        self
    }

    /// Fill unset values from `config`
    pub fn resolved(&self, config: &EngineConfig) -> ReaderOptions {
        let mut out = self.clone();
        out.batch_size.get_or_insert(config.batch_size);
        out.sample_rows.get_or_insert(config.scan.sample_rows);
        out.malformed_record_policy
            .get_or_insert(config.scan.malformed_record_policy);
        out
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    pub fn sample_rows(&self) -> usize {
        self.sample_rows.unwrap_or(DEFAULT_SAMPLE_ROWS).max(1)
    }

    pub fn policy(&self) -> MalformedRecordPolicy {
        self.malformed_record_policy.unwrap_or_default()
    }
}

/// What a scan asks of its reader
#[derive(Clone, Debug, Default)]
pub struct ReadRequest {
    /// Columns to decode, by name; None = all
    pub projection: Option<Vec<String>>,
    /// Conjunction used to skip blocks; rows are not filtered by the reader
    pub predicates: Vec<ScanPredicate>,
}

impl ReadRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            projection: Some(columns.into_iter().map(Into::into).collect()),
            predicates: vec![],
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<ScanPredicate>) -> Self {
        self.predicates = predicates;
        self
    }
}

/// Reader counters, summed over all files of a glob
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderMetrics {
    pub rows_read: u64,
    pub malformed_rows_skipped: u64,
    pub blocks_total: u64,
    pub blocks_skipped: u64,
}

impl ReaderMetrics {
    pub fn merge(&mut self, other: &ReaderMetrics) {
        self.rows_read += other.rows_read;
        self.malformed_rows_skipped += other.malformed_rows_skipped;
        self.blocks_total += other.blocks_total;
        self.blocks_skipped += other.blocks_skipped;
    }
}

/// Batch source over one or more files
pub trait FormatReader: Send {
    /// Schema of the batches this reader yields
    fn schema(&self) -> SchemaRef;

    /// Next batch; Ok(None) at end of input
    fn next_batch(&mut self) -> EngineResult<Option<Batch>>;

    fn metrics(&self) -> ReaderMetrics;
}

pub type ReaderHandle = Box<dyn FormatReader>;

/// Open a path or glob for reading
pub fn open(
    path: &str,
    format: FileFormat,
    options: &ReaderOptions,
    request: &ReadRequest,
) -> EngineResult<ReaderHandle> {
    let reader = source::MultiFileReader::open(path, format, options, request)?;
    Ok(Box::new(reader))
}

/// Full schema a scan of `path` exposes (all columns, plus `filename` when requested)
pub fn table_schema(path: &str, format: FileFormat, options: &ReaderOptions) -> EngineResult<SchemaRef> {
    source::table_schema(path, format, options)
}
