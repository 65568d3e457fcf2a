/// File scan with projection and predicate pushdown
///
/// The reader decodes the projected columns plus any column a pushed predicate needs and
/// uses the predicates to skip whole blocks. Surviving rows are filtered here with the same
/// predicates, then trimmed to the projection and qualified with the scan alias.
use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::{bind_predicate, evaluate_predicate};
use crate::ingestion::{self, FileFormat, ReadRequest, ReaderHandle, ReaderMetrics, ReaderOptions};
use crate::query::expression::Expr;
use crate::storage::columnar::{Batch, SchemaRef};
use crate::storage::statistics::ScanPredicate;
use std::sync::Arc;
use tracing::info;

pub struct ScanOperator {
    path: String,
    reader: ReaderHandle,
    residual: Option<Expr>,
    /// Positions of the output columns in the reader's batches
    output_indices: Vec<usize>,
    schema: SchemaRef,
    /// Reader metrics already pushed to the query diagnostics
    reported: ReaderMetrics,
    finished: bool,
}

impl ScanOperator {
    pub fn new(
        path: &str,
        format: FileFormat,
        alias: Option<&str>,
        options: &ReaderOptions,
        projection: Option<&[String]>,
        predicates: &[ScanPredicate],
        ctx: &QueryContext,
    ) -> EngineResult<Self> {
        let options = options.resolved(ctx.config());
        let read_columns = projection.map(|cols| {
            let mut read: Vec<String> = cols.to_vec();
            for p in predicates {
                if !read.contains(&p.column) {
                    read.push(p.column.clone());
                }
            }
            read
        });
        let request = ReadRequest {
            projection: read_columns,
            predicates: predicates.to_vec(),
        };
        let reader = ingestion::open(path, format, &options, &request)?;
        let reader_schema = reader.schema();

        let residual = Expr::conjunction(predicates.iter().map(ScanPredicate::to_expr).collect());
        if let Some(predicate) = &residual {
            bind_predicate(predicate, &reader_schema)?;
        }
        let output_indices = match projection {
            Some(cols) => cols
                .iter()
                .map(|c| reader_schema.index_of(c))
                .collect::<EngineResult<Vec<_>>>()?,
            None => (0..reader_schema.len()).collect(),
        };
        let schema = Arc::new(reader_schema.project(&output_indices).with_qualifier(alias));
        info!(
            path,
            format = format.name(),
            columns = schema.len(),
            predicates = predicates.len(),
            "scan opened"
        );
        Ok(Self {
            path: path.to_string(),
            reader,
            residual,
            output_indices,
            schema,
            reported: ReaderMetrics::default(),
            finished: false,
        })
    }

    /// Push counters accumulated since the last call into the query diagnostics
    fn report(&mut self, ctx: &QueryContext) {
        let now = self.reader.metrics();
        let diagnostics = ctx.diagnostics();
        diagnostics.add_rows_scanned(now.rows_read - self.reported.rows_read);
        diagnostics.add_malformed_rows_skipped(now.malformed_rows_skipped - self.reported.malformed_rows_skipped);
        diagnostics.add_blocks(
            now.blocks_total - self.reported.blocks_total,
            now.blocks_skipped - self.reported.blocks_skipped,
        );
        self.reported = now;
    }
}

impl BatchIterator for ScanOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            ctx.check_cancelled()?;
            let pulled = self.reader.next_batch();
            self.report(ctx);
            let Some(batch) = pulled? else {
                self.finished = true;
                info!(
                    path = %self.path,
                    rows = self.reported.rows_read,
                    malformed_skipped = self.reported.malformed_rows_skipped,
                    blocks = self.reported.blocks_total,
                    blocks_skipped = self.reported.blocks_skipped,
                    "scan finished"
                );
                return Ok(None);
            };
            let batch = match &self.residual {
                Some(predicate) => {
                    let selection = evaluate_predicate(predicate, &batch)?;
                    batch.filter(&selection)
                }
                None => batch,
            };
            if batch.is_empty() {
                continue;
            }
            return batch
                .project(&self.output_indices)
                .with_schema(self.schema.clone())
                .map(Some);
        }
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "Scan"
    }
}
