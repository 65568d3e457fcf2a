/// CSV reader
///
/// Records are parsed with the `csv` crate in flexible mode so that a wrong field count is
/// reported as a malformed record of this file rather than a parser failure. Only the
/// projected fields are converted. A field equal to the null string is NULL; with the default
/// empty null string an empty field is NULL in every column.
use crate::config::MalformedRecordPolicy;
use crate::error::{EngineError, EngineResult};
use crate::ingestion::schema_inference::SchemaInference;
use crate::ingestion::source::FileReader;
use crate::ingestion::{CsvOptions, ReaderMetrics, ReaderOptions};
use crate::storage::column::ColumnBuilder;
use crate::storage::columnar::{Batch, Schema, SchemaRef};
use crate::storage::value::{parse_text, DataType, Value};
use fxhash::FxHashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

fn reader_builder(options: &ReaderOptions) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(options.csv.delimiter)
        .quote(options.csv.quote)
        .has_headers(options.csv.has_header)
        .flexible(true);
    builder
}

fn open_reader(path: &Path, options: &ReaderOptions) -> EngineResult<csv::Reader<File>> {
    let file = File::open(path)
        .map_err(|e| EngineError::io_with_path(e.to_string(), path.display().to_string()))?;
    Ok(reader_builder(options).from_reader(file))
}

/// Convert one field; None when the text does not parse as `data_type`
fn field_value(text: &str, data_type: DataType, csv: &CsvOptions) -> Option<Value> {
    if text == csv.null_string {
        return Some(Value::Null);
    }
    if text.is_empty() && data_type == DataType::String {
        return Some(Value::String(String::new()));
    }
    parse_text(text, data_type)
}

/// Make header names unique: a repeated `x` becomes `x_1`, `x_2`, ..
fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let base = if name.is_empty() { format!("column{}", i) } else { name };
            let mut candidate = base.clone();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Infer a schema from the header and the first `sample_rows` records
pub fn infer_schema(path: &Path, options: &ReaderOptions) -> EngineResult<Schema> {
    let path_str = path.display().to_string();
    let mut reader = open_reader(path, options)?;
    let mut names = if options.csv.has_header {
        let headers = reader
            .headers()
            .map_err(|e| EngineError::from(e).with_path(path_str.clone()))?;
        dedupe_names(headers.iter().map(|h| h.trim().to_string()).collect())
    } else {
        Vec::new()
    };
    let mut inference = SchemaInference::with_columns(names.iter().cloned());

    let mut record = csv::StringRecord::new();
    let mut sampled = 0;
    while sampled < options.sample_rows() {
        sampled += 1;
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if options.policy() == MalformedRecordPolicy::Skip => {
                warn!(path = %path_str, error = %e, "skipping unreadable record during inference");
                continue;
            }
            Err(e) => return Err(EngineError::from(e).with_path(path_str)),
        }
        if names.is_empty() && !options.csv.has_header {
            names = (0..record.len()).map(|i| format!("column{}", i)).collect();
            inference = SchemaInference::with_columns(names.iter().cloned());
        }
        // records with the wrong width are reported when read, not when sampled
        if record.len() == names.len() {
            for (name, field) in names.iter().zip(record.iter()) {
                let text = if field == options.csv.null_string { "" } else { field };
                inference.observe_text(name, text);
            }
        }
    }
    Ok(inference.finish())
}

pub struct CsvFileReader {
    path: String,
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    /// Full schema of the file; records must have exactly this many fields
    schema: SchemaRef,
    projection: Vec<usize>,
    output_schema: SchemaRef,
    batch_size: usize,
    policy: MalformedRecordPolicy,
    csv: CsvOptions,
    metrics: ReaderMetrics,
    done: bool,
}

impl CsvFileReader {
    pub fn open(
        path: &Path,
        schema: SchemaRef,
        projection: Vec<usize>,
        options: &ReaderOptions,
    ) -> EngineResult<Self> {
        let output_schema = Arc::new(schema.project(&projection));
        Ok(Self {
            path: path.display().to_string(),
            reader: open_reader(path, options)?,
            record: csv::StringRecord::new(),
            schema,
            projection,
            output_schema,
            batch_size: options.batch_size(),
            policy: options.policy(),
            csv: options.csv.clone(),
            metrics: ReaderMetrics::default(),
            done: false,
        })
    }

    /// Strict: fail with the record location. Skip: count it and carry on.
    fn malformed(&mut self, message: String, line: u64) -> EngineResult<()> {
        match self.policy {
            MalformedRecordPolicy::Strict => {
                Err(EngineError::format_at(message, self.path.clone(), line))
            }
            MalformedRecordPolicy::Skip => {
                self.metrics.malformed_rows_skipped += 1;
                warn!(path = %self.path, line, "skipping malformed record: {}", message);
                Ok(())
            }
        }
    }

    /// Convert the projected fields of the current record
    fn parse_record(&self) -> Result<Vec<Value>, String> {
        if self.record.len() != self.schema.len() {
            return Err(format!(
                "expected {} fields, found {}",
                self.schema.len(),
                self.record.len()
            ));
        }
        self.projection
            .iter()
            .map(|&idx| {
                let field = self.schema.field(idx);
                let text = self.record.get(idx).unwrap_or_default();
                field_value(text, field.data_type, &self.csv).ok_or_else(|| {
                    format!("cannot parse '{}' as {} for column '{}'", text, field.data_type, field.name)
                })
            })
            .collect()
    }
}

impl FileReader for CsvFileReader {
    fn next_batch(&mut self) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        let mut builders: Vec<ColumnBuilder> = self
            .output_schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::with_capacity(f.data_type, self.batch_size))
            .collect();
        let mut rows = 0;
        while rows < self.batch_size {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    if e.is_io_error() {
                        return Err(EngineError::io_with_path(e.to_string(), self.path.clone()));
                    }
                    self.malformed(e.to_string(), line)?;
                    continue;
                }
            }
            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            match self.parse_record() {
                Ok(values) => {
                    for (builder, value) in builders.iter_mut().zip(&values) {
                        builder.append_value(value)?;
                    }
                    rows += 1;
                }
                Err(message) => self.malformed(message, line)?,
            }
        }
        if rows == 0 && self.done {
            return Ok(None);
        }
        self.metrics.rows_read += rows as u64;
        let columns = builders.into_iter().map(ColumnBuilder::finish_arc).collect();
        Batch::try_new_with_row_count(self.output_schema.clone(), columns, rows).map(Some)
    }

    fn metrics(&self) -> ReaderMetrics {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_infer_types_and_nulls() {
        let file = csv_file("id,amt,day,flag\n1,,2024-01-01,true\n2,10.5,2024-01-02,false\n");
        let schema = infer_schema(file.path(), &ReaderOptions::default()).unwrap();
        let types: Vec<DataType> = schema.fields().iter().map(|f| f.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Integer, DataType::Double, DataType::Date, DataType::Boolean]
        );
    }

    #[test]
    fn test_headerless_column_names() {
        let file = csv_file("1|a\n2|b\n");
        let mut options = ReaderOptions::default();
        options.csv.has_header = false;
        options.csv.delimiter = b'|';
        let schema = infer_schema(file.path(), &options).unwrap();
        assert_eq!(schema.field(0).name, "column0");
        assert_eq!(schema.field(1).name, "column1");
    }

    #[test]
    fn test_malformed_strict_and_skip() {
        let file = csv_file("a,b\n1,2\n3\n4,5\n");
        let schema = Arc::new(infer_schema(file.path(), &ReaderOptions::default()).unwrap());

        let strict = ReaderOptions::default();
        let mut reader = CsvFileReader::open(file.path(), schema.clone(), vec![0, 1], &strict).unwrap();
        match reader.next_batch() {
            Err(EngineError::Format { line, .. }) => assert_eq!(line, Some(3)),
            other => panic!("expected format error, got {:?}", other.map(|b| b.map(|b| b.row_count()))),
        }

        let skip = ReaderOptions::default().with_malformed_record_policy(MalformedRecordPolicy::Skip);
        let mut reader = CsvFileReader::open(file.path(), schema, vec![1], &skip).unwrap();
        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(reader.metrics().malformed_rows_skipped, 1);
    }

    #[test]
    fn test_batch_size_splits_output() {
        let file = csv_file("x\n1\n2\n3\n");
        let options = ReaderOptions::default().with_batch_size(2);
        let schema = Arc::new(infer_schema(file.path(), &options).unwrap());
        let mut reader = CsvFileReader::open(file.path(), schema, vec![0], &options).unwrap();
        assert_eq!(reader.next_batch().unwrap().unwrap().row_count(), 2);
        assert_eq!(reader.next_batch().unwrap().unwrap().row_count(), 1);
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_null_string_keeps_empty_strings() {
        let file = csv_file("name,qty\nx,1\n,\\N\n\\N,3\n");
        let options = ReaderOptions::default().with_csv(CsvOptions::default().with_null_string("\\N"));
        let schema = Arc::new(infer_schema(file.path(), &options).unwrap());
        assert_eq!(schema.field(0).data_type, DataType::String);
        assert_eq!(schema.field(1).data_type, DataType::Integer);
        let mut reader = CsvFileReader::open(file.path(), schema, vec![0, 1], &options).unwrap();
        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.row(0), vec![Value::from("x"), Value::Integer(1)]);
        assert_eq!(batch.row(1), vec![Value::from(""), Value::Null]);
        assert_eq!(batch.row(2), vec![Value::Null, Value::Integer(3)]);
    }

    #[test]
    fn test_duplicate_headers() {
        assert_eq!(
            dedupe_names(vec!["a".into(), "a".into(), "".into()]),
            vec!["a", "a_1", "column2"]
        );
    }
}
