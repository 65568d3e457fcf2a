/// Multi-file sources
///
/// A path with glob characters expands to every matching file in lexicographic order.
/// Files are opened one at a time; each file's batches are mapped onto the table schema
/// (columns matched by name, cast to the table type, missing columns NULL).
use crate::error::{EngineError, EngineResult};
use crate::ingestion::{
    csv, json, parquet, schema_inference, FileFormat, FormatReader, ReadRequest, ReaderMetrics,
    ReaderOptions, FILENAME_COLUMN,
};
use crate::storage::column::Column;
use crate::storage::columnar::{Batch, Field, Schema, SchemaRef};
use crate::storage::statistics::ScanPredicate;
use crate::storage::value::{DataType, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Reader over a single file, yielding columns `projection` (ascending indices) of its schema
pub(crate) trait FileReader: Send {
    fn next_batch(&mut self) -> EngineResult<Option<Batch>>;

    fn metrics(&self) -> ReaderMetrics;
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Files named by a path or glob, sorted; no match is an I/O error
pub fn expand_paths(pattern: &str) -> EngineResult<Vec<PathBuf>> {
    if !has_glob_chars(pattern) {
        let path = PathBuf::from(pattern);
        if !path.is_file() {
            return Err(EngineError::io_with_path("file not found", pattern));
        }
        return Ok(vec![path]);
    }
    let entries = glob::glob(pattern)
        .map_err(|e| EngineError::io_with_path(format!("invalid glob pattern: {}", e), pattern))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::io(e.to_string()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(EngineError::io_with_path("no file matches the pattern", pattern));
    }
    files.sort();
    debug!(pattern, files = files.len(), "expanded glob");
    Ok(files)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn infer_file_schema(path: &Path, format: FileFormat, options: &ReaderOptions) -> EngineResult<Schema> {
    match format {
        FileFormat::Csv => csv::infer_schema(path, options),
        FileFormat::Json => json::infer_schema(path, options),
        FileFormat::Parquet => parquet::file_schema(path),
    }
}

fn open_file(
    path: &Path,
    format: FileFormat,
    file_schema: SchemaRef,
    projection: Vec<usize>,
    predicates: Vec<ScanPredicate>,
    options: &ReaderOptions,
) -> EngineResult<Box<dyn FileReader>> {
    Ok(match format {
        FileFormat::Csv => Box::new(csv::CsvFileReader::open(path, file_schema, projection, options)?),
        FileFormat::Json => {
            Box::new(json::JsonFileReader::open(path, file_schema, projection, options)?)
        }
        FileFormat::Parquet => Box::new(parquet::ParquetFileReader::open(
            path,
            file_schema,
            projection,
            &predicates,
            options,
        )?),
    })
}

/// Data columns shared by all files of the source
fn data_schema(files: &[PathBuf], format: FileFormat, options: &ReaderOptions) -> EngineResult<SchemaRef> {
    if let Some(schema) = &options.schema {
        return Ok(schema.clone());
    }
    let first = files
        .first()
        .ok_or_else(|| EngineError::internal("source without files"))?;
    if !options.union_by_name {
        return Ok(Arc::new(infer_file_schema(first, format, options)?));
    }
    let schemas = files
        .iter()
        .map(|f| infer_file_schema(f, format, options).map(Arc::new))
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(Arc::new(schema_inference::unify_by_name(&schemas)))
}

fn with_filename(schema: &Schema, include_filename: bool) -> Schema {
    let mut fields = schema.fields().to_vec();
    if include_filename {
        fields.push(Field::new(FILENAME_COLUMN, DataType::String, false));
    }
    Schema::new(fields)
}

/// Full schema of a path or glob
pub fn table_schema(path: &str, format: FileFormat, options: &ReaderOptions) -> EngineResult<SchemaRef> {
    let files = expand_paths(path)?;
    let data = data_schema(&files, format, options)?;
    Ok(Arc::new(with_filename(&data, options.include_filename)))
}

/// Where each output column of the current file comes from
#[derive(Debug)]
enum ColumnSource {
    /// Position in the file reader's batch
    File(usize),
    Missing,
    Filename,
}

struct OpenFile {
    reader: Box<dyn FileReader>,
    sources: Vec<ColumnSource>,
    filename: String,
}

pub struct MultiFileReader {
    format: FileFormat,
    options: ReaderOptions,
    files: Vec<PathBuf>,
    next_file: usize,
    /// Data columns of the whole source
    data_schema: SchemaRef,
    /// Requested data columns, as indices into `data_schema`
    requested: Vec<usize>,
    include_filename: bool,
    output_schema: SchemaRef,
    predicates: Vec<ScanPredicate>,
    current: Option<OpenFile>,
    /// Metrics of finished files
    finished: ReaderMetrics,
}

impl MultiFileReader {
    pub fn open(
        path: &str,
        format: FileFormat,
        options: &ReaderOptions,
        request: &ReadRequest,
    ) -> EngineResult<Self> {
        let files = expand_paths(path)?;
        let data_schema = data_schema(&files, format, options)?;
        let full = with_filename(&data_schema, options.include_filename);

        let mut requested = Vec::new();
        let mut include_filename = false;
        match &request.projection {
            None => {
                requested = (0..data_schema.len()).collect();
                include_filename = options.include_filename;
            }
            Some(names) => {
                for name in names {
                    let idx = full.index_of(name)?;
                    if idx >= data_schema.len() {
                        include_filename = true;
                    } else if !requested.contains(&idx) {
                        requested.push(idx);
                    }
                }
                requested.sort_unstable();
            }
        }
        let mut fields: Vec<Field> = requested.iter().map(|&i| data_schema.field(i).clone()).collect();
        if include_filename {
            fields.push(Field::new(FILENAME_COLUMN, DataType::String, false));
        }

        info!(
            path,
            format = format.name(),
            files = files.len(),
            columns = fields.len(),
            "opened source"
        );
        Ok(Self {
            format,
            options: options.clone(),
            files,
            next_file: 0,
            data_schema,
            requested,
            include_filename,
            output_schema: Arc::new(Schema::new(fields)),
            predicates: request.predicates.clone(),
            current: None,
            finished: ReaderMetrics::default(),
        })
    }

    /// Open the next file and work out how its columns map onto the output
    fn open_next(&mut self) -> EngineResult<bool> {
        let Some(path) = self.files.get(self.next_file).cloned() else {
            return Ok(false);
        };
        self.next_file += 1;

        // Parquet files carry their own schema; text files share the table schema unless
        // each one is inferred separately for union_by_name
        let file_schema = match self.format {
            FileFormat::Parquet => Arc::new(parquet::file_schema(&path)?),
            _ if self.options.union_by_name && self.options.schema.is_none() => {
                Arc::new(infer_file_schema(&path, self.format, &self.options)?)
            }
            _ => self.data_schema.clone(),
        };
        let position = |name: &str| file_schema.fields().iter().position(|f| f.name == name);

        if self.format == FileFormat::Parquet && !self.options.union_by_name {
            let mut expected: Vec<&str> = self.data_schema.fields().iter().map(|f| f.name.as_str()).collect();
            let mut actual: Vec<&str> = file_schema.fields().iter().map(|f| f.name.as_str()).collect();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                return Err(EngineError::schema(format!(
                    "columns [{}] differ from the first file's columns [{}]",
                    actual.join(", "),
                    expected.join(", ")
                ))
                .with_context(display(&path)));
            }
        }

        let mut projection: Vec<usize> = self
            .requested
            .iter()
            .filter_map(|&i| position(&self.data_schema.field(i).name))
            .collect();
        projection.sort_unstable();
        projection.dedup();

        let mut sources: Vec<ColumnSource> = self
            .requested
            .iter()
            .map(|&i| match position(&self.data_schema.field(i).name) {
                Some(file_idx) => projection
                    .iter()
                    .position(|&p| p == file_idx)
                    .map(ColumnSource::File)
                    .unwrap_or(ColumnSource::Missing),
                None => ColumnSource::Missing,
            })
            .collect();
        if self.include_filename {
            sources.push(ColumnSource::Filename);
        }

        let predicates: Vec<ScanPredicate> = self
            .predicates
            .iter()
            .filter(|p| position(&p.column).is_some())
            .cloned()
            .collect();
        let reader = open_file(
            &path,
            self.format,
            file_schema.clone(),
            projection,
            predicates,
            &self.options,
        )?;
        debug!(file = %path.display(), "opened file");
        self.current = Some(OpenFile {
            reader,
            sources,
            filename: display(&path),
        });
        Ok(true)
    }

    fn map_batch(&self, batch: &Batch, sources: &[ColumnSource], filename: &str) -> EngineResult<Batch> {
        let rows = batch.row_count();
        let mut columns = Vec::with_capacity(sources.len());
        for (field, source) in self.output_schema.fields().iter().zip(sources) {
            let column = match source {
                ColumnSource::File(idx) => {
                    let column = batch.column(*idx);
                    if column.data_type() == field.data_type {
                        column.clone()
                    } else {
                        Arc::new(column.cast(field.data_type).map_err(|e| e.with_context(filename.to_string()))?)
                    }
                }
                ColumnSource::Missing => Arc::new(Column::new_null(field.data_type, rows)),
                ColumnSource::Filename => Arc::new(Column::from_scalar(
                    &Value::String(filename.to_string()),
                    DataType::String,
                    rows,
                )?),
            };
            columns.push(column);
        }
        Batch::try_new_with_row_count(self.output_schema.clone(), columns, rows)
    }
}

impl FormatReader for MultiFileReader {
    fn schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn next_batch(&mut self) -> EngineResult<Option<Batch>> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }
            let batch = match self.current.as_mut() {
                Some(open) => open.reader.next_batch()?,
                None => continue,
            };
            match (batch, self.current.as_ref()) {
                (Some(batch), Some(open)) => {
                    return self.map_batch(&batch, &open.sources, &open.filename).map(Some);
                }
                _ => {
                    if let Some(open) = self.current.take() {
                        self.finished.merge(&open.reader.metrics());
                    }
                }
            }
        }
    }

    fn metrics(&self) -> ReaderMetrics {
        let mut metrics = self.finished;
        if let Some(open) = &self.current {
            metrics.merge(&open.reader.metrics());
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, text: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_glob_is_sorted_and_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.csv", "x\n2\n");
        write(dir.path(), "a.csv", "x\n1\n");
        let pattern = format!("{}/*.csv", dir.path().display());
        let files = expand_paths(&pattern).unwrap();
        assert!(files[0].ends_with("a.csv"));
        assert!(files[1].ends_with("b.csv"));

        let none = format!("{}/*.parquet", dir.path().display());
        assert!(matches!(expand_paths(&none), Err(EngineError::Io { .. })));
    }

    #[test]
    fn test_filename_column_and_projection() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.csv", "x,y\n1,a\n");
        write(dir.path(), "b.csv", "x,y\n2,b\n");
        let pattern = format!("{}/*.csv", dir.path().display());
        let options = ReaderOptions::new().with_filename();
        let request = ReadRequest::columns(["filename", "x"]);
        let mut reader = MultiFileReader::open(&pattern, FileFormat::Csv, &options, &request).unwrap();
        assert_eq!(reader.schema().len(), 2);
        let first = reader.next_batch().unwrap().unwrap();
        assert_eq!(first.row(0)[0], Value::Integer(1));
        assert!(first.row(0)[1].as_str().unwrap().ends_with("a.csv"));
        let second = reader.next_batch().unwrap().unwrap();
        assert!(second.row(0)[1].as_str().unwrap().ends_with("b.csv"));
        assert!(reader.next_batch().unwrap().is_none());
        assert_eq!(reader.metrics().rows_read, 2);
    }

    #[test]
    fn test_union_by_name_fills_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1.csv", "id,v\n1,10\n");
        write(dir.path(), "2.csv", "id,w\n2,x\n");
        let pattern = format!("{}/*.csv", dir.path().display());
        let options = ReaderOptions::new().with_union_by_name();
        let mut reader = MultiFileReader::open(&pattern, FileFormat::Csv, &options, &ReadRequest::all()).unwrap();
        let names: Vec<String> = reader.schema().fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["id", "v", "w"]);
        let a = reader.next_batch().unwrap().unwrap();
        assert_eq!(a.row(0), vec![Value::Integer(1), Value::Integer(10), Value::Null]);
        let b = reader.next_batch().unwrap().unwrap();
        assert_eq!(b.row(0), vec![Value::Integer(2), Value::Null, Value::from("x")]);
    }
}
