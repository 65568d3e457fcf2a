/// JSON reader
///
/// Reads one object per line, or a single top-level array of objects when
/// `line_delimited` is off. Keys become columns in first-seen order; nested arrays and
/// objects are kept as their JSON text. Missing keys are NULL.
use crate::config::MalformedRecordPolicy;
use crate::error::{EngineError, EngineResult};
use crate::ingestion::schema_inference::{infer_json_string, SchemaInference};
use crate::ingestion::source::FileReader;
use crate::ingestion::{ReaderMetrics, ReaderOptions};
use crate::storage::column::ColumnBuilder;
use crate::storage::columnar::{Batch, Schema, SchemaRef};
use crate::storage::value::{parse_text, DataType, Value};
use serde_json::{Map, Value as JsonValue};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Records of one file, each with its 1-based line (or array position)
enum JsonRecords {
    Lines {
        lines: Lines<BufReader<File>>,
        line: u64,
    },
    Array {
        items: std::vec::IntoIter<JsonValue>,
        position: u64,
    },
}

impl JsonRecords {
    fn open(path: &Path, options: &ReaderOptions) -> EngineResult<Self> {
        let path_str = path.display().to_string();
        let file = File::open(path).map_err(|e| EngineError::io_with_path(e.to_string(), path_str.clone()))?;
        if options.json.line_delimited {
            return Ok(JsonRecords::Lines {
                lines: BufReader::new(file).lines(),
                line: 0,
            });
        }
        let value: JsonValue = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| EngineError::from(e).with_path(path_str.clone()))?;
        match value {
            JsonValue::Array(items) => Ok(JsonRecords::Array {
                items: items.into_iter(),
                position: 0,
            }),
            _ => Err(EngineError::format_at("expected a top-level JSON array", path_str, 1)),
        }
    }

    /// Next record as (line, parsed object or error message); blank lines are skipped
    fn next_record(&mut self) -> EngineResult<Option<(u64, Result<Map<String, JsonValue>, String>)>> {
        match self {
            JsonRecords::Lines { lines, line } => loop {
                let Some(text) = lines.next() else {
                    return Ok(None);
                };
                let text = text?;
                *line += 1;
                if text.trim().is_empty() {
                    continue;
                }
                let parsed = match serde_json::from_str::<JsonValue>(&text) {
                    Ok(JsonValue::Object(map)) => Ok(map),
                    Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
                    Err(e) => Err(format!("invalid JSON: {}", e)),
                };
                return Ok(Some((*line, parsed)));
            },
            JsonRecords::Array { items, position } => {
                let Some(item) = items.next() else {
                    return Ok(None);
                };
                *position += 1;
                let parsed = match item {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(format!("expected a JSON object, found {}", json_kind(&other))),
                };
                Ok(Some((*position, parsed)))
            }
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn json_type(value: &JsonValue) -> Option<DataType> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(_) => Some(DataType::Boolean),
        JsonValue::Number(n) if n.is_i64() => Some(DataType::Integer),
        JsonValue::Number(_) => Some(DataType::Double),
        JsonValue::String(s) => Some(infer_json_string(s)),
        JsonValue::Array(_) | JsonValue::Object(_) => Some(DataType::String),
    }
}

/// Convert a JSON value to a column of type `target`; None when it does not fit
fn to_value(value: &JsonValue, target: DataType) -> Option<Value> {
    let converted = match (value, target) {
        (JsonValue::Null, _) => Value::Null,
        (JsonValue::Bool(b), DataType::Boolean) => Value::Boolean(*b),
        (JsonValue::Number(n), DataType::Integer) => Value::Integer(n.as_i64()?),
        (JsonValue::Number(n), DataType::Double) => Value::Double(n.as_f64()?),
        (JsonValue::String(s), DataType::String) => Value::String(s.clone()),
        (JsonValue::String(s), _) => parse_text(s, target)?,
        (other, DataType::String) => Value::String(other.to_string()),
        _ => return None,
    };
    Some(converted)
}

/// Infer a schema from the first `sample_rows` records
pub fn infer_schema(path: &Path, options: &ReaderOptions) -> EngineResult<Schema> {
    let path_str = path.display().to_string();
    let mut records = JsonRecords::open(path, options)?;
    let mut inference = SchemaInference::new();
    let mut sampled = 0;
    while sampled < options.sample_rows() {
        let Some((line, record)) = records.next_record()? else {
            break;
        };
        sampled += 1;
        match record {
            Ok(map) => {
                for (key, value) in &map {
                    inference.observe(key, json_type(value));
                }
            }
            Err(message) if options.policy() == MalformedRecordPolicy::Skip => {
                warn!(path = %path_str, line, "skipping malformed record during inference: {}", message);
            }
            Err(message) => return Err(EngineError::format_at(message, path_str, line)),
        }
    }
    Ok(inference.finish())
}

pub struct JsonFileReader {
    path: String,
    records: JsonRecords,
    schema: SchemaRef,
    projection: Vec<usize>,
    output_schema: SchemaRef,
    batch_size: usize,
    policy: MalformedRecordPolicy,
    metrics: ReaderMetrics,
    done: bool,
}

impl JsonFileReader {
    pub fn open(
        path: &Path,
        schema: SchemaRef,
        projection: Vec<usize>,
        options: &ReaderOptions,
    ) -> EngineResult<Self> {
        let output_schema = Arc::new(schema.project(&projection));
        Ok(Self {
            path: path.display().to_string(),
            records: JsonRecords::open(path, options)?,
            schema,
            projection,
            output_schema,
            batch_size: options.batch_size(),
            policy: options.policy(),
            metrics: ReaderMetrics::default(),
            done: false,
        })
    }

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

    /// Extract the projected keys of one object
    fn extract(&self, map: &Map<String, JsonValue>) -> Result<Vec<Value>, String> {
        self.projection
            .iter()
            .map(|&idx| {
                let field = self.schema.field(idx);
                match map.get(&field.name) {
                    None => Ok(Value::Null),
                    Some(v) => to_value(v, field.data_type).ok_or_else(|| {
                        format!("cannot read {} as {} for key '{}'", v, field.data_type, field.name)
                    }),
                }
            })
            .collect()
    }
}

impl FileReader for JsonFileReader {
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
            let (line, record) = match self
                .records
                .next_record()
                .map_err(|e| e.with_path(self.path.clone()))?
            {
                Some(next) => next,
                None => {
                    self.done = true;
                    break;
                }
            };
            match record.and_then(|map| self.extract(&map)) {
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

    fn json_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_infer_keeps_key_order_and_nested_text() {
        let file = json_file(
            "{\"id\": 1, \"tags\": [\"a\"], \"when\": \"2024-01-01\"}\n{\"id\": 2.5, \"extra\": null}\n",
        );
        let schema = infer_schema(file.path(), &ReaderOptions::default()).unwrap();
        let fields: Vec<(&str, DataType)> = schema
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f.data_type))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("id", DataType::Double),
                ("tags", DataType::String),
                ("when", DataType::Date),
                ("extra", DataType::String),
            ]
        );
    }

    #[test]
    fn test_non_object_line_is_malformed() {
        let file = json_file("{\"a\": 1}\n[1, 2]\n{\"a\": 3}\n");
        let schema = Arc::new(Schema::new(vec![crate::storage::columnar::Field::new(
            "a",
            DataType::Integer,
            true,
        )]));
        let mut reader =
            JsonFileReader::open(file.path(), schema.clone(), vec![0], &ReaderOptions::default()).unwrap();
        assert!(matches!(
            reader.next_batch(),
            Err(EngineError::Format { line: Some(2), .. })
        ));

        let skip = ReaderOptions::default().with_malformed_record_policy(MalformedRecordPolicy::Skip);
        let mut reader = JsonFileReader::open(file.path(), schema, vec![0], &skip).unwrap();
        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(reader.metrics().malformed_rows_skipped, 1);
    }

    #[test]
    fn test_top_level_array() {
        let file = json_file("[{\"a\": 1, \"b\": \"x\"}, {\"a\": 2}]");
        let mut options = ReaderOptions::default();
        options.json.line_delimited = false;
        let schema = Arc::new(infer_schema(file.path(), &options).unwrap());
        let mut reader = JsonFileReader::open(file.path(), schema, vec![0, 1], &options).unwrap();
        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.row(1), vec![Value::Integer(2), Value::Null]);
    }
}
