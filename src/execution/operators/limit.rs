/// LIMIT / OFFSET
///
/// Stops pulling from its input as soon as the limit is reached, so an upstream scan never
/// reads past what the query needs.
use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::operators::BoxedOperator;
use crate::storage::columnar::{Batch, SchemaRef};

pub struct LimitOperator {
    input: BoxedOperator,
    limit: Option<usize>,
    offset: usize,
    skipped: usize,
    emitted: usize,
}

impl LimitOperator {
    pub fn new(input: BoxedOperator, limit: Option<usize>, offset: usize) -> Self {
        Self {
            input,
            limit,
            offset,
            skipped: 0,
            emitted: 0,
        }
    }

    fn satisfied(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }
}

impl BatchIterator for LimitOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        loop {
            if self.satisfied() {
                return Ok(None);
            }
            ctx.check_cancelled()?;
            let Some(mut batch) = self.input.next(ctx)? else {
                return Ok(None);
            };
            if self.skipped < self.offset {
                let skip = (self.offset - self.skipped).min(batch.row_count());
                self.skipped += skip;
                batch = batch.slice(skip, batch.row_count() - skip);
            }
            if let Some(limit) = self.limit {
                let remaining = limit - self.emitted;
                if batch.row_count() > remaining {
                    batch = batch.slice(0, remaining);
                }
            }
            if batch.is_empty() {
                continue;
            }
            self.emitted += batch.row_count();
            return Ok(Some(batch));
        }
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn name(&self) -> &'static str {
        "Limit"
    }
}
