/// Materialized query output
use crate::error::EngineResult;
use crate::execution::context::DiagnosticsSnapshot;
use crate::ingestion::writer::batch_to_json_rows;
use crate::storage::arrow_interop::to_record_batch;
use crate::storage::columnar::{Batch, SchemaRef};
use crate::storage::value::Value;
use arrow::record_batch::RecordBatch;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<Batch>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub diagnostics: DiagnosticsSnapshot,
}

impl QueryResult {
    pub fn new(schema: SchemaRef, batches: Vec<Batch>, elapsed: Duration, diagnostics: DiagnosticsSnapshot) -> Self {
        let row_count = batches.iter().map(Batch::row_count).sum();
        Self {
            schema,
            batches,
            row_count,
            execution_time_ms: elapsed.as_secs_f64() * 1000.0,
            diagnostics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name.clone()).collect()
    }

    /// All rows in output order
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.batches
            .iter()
            .flat_map(|b| (0..b.row_count()).map(move |i| b.row(i)))
            .collect()
    }

    /// Values of one output column, resolved like any column reference
    pub fn column_values(&self, name: &str) -> EngineResult<Vec<Value>> {
        let idx = self.schema.index_of(name)?;
        Ok(self.batches.iter().flat_map(|b| b.column(idx).values()).collect())
    }

    pub fn to_record_batches(&self) -> EngineResult<Vec<RecordBatch>> {
        self.batches.iter().map(to_record_batch).collect()
    }

    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.batches.iter().flat_map(batch_to_json_rows).collect()
    }
}
