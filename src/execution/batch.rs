use crate::error::EngineResult;
use crate::execution::context::QueryContext;
use crate::storage::columnar::{Batch, SchemaRef};

/// Pull-based operator interface.
///
/// `next` returns `Ok(None)` once the operator is exhausted. Streaming operators hold at most
/// one input batch; blocking operators drain their input on the first call.
pub trait BatchIterator: Send {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>>;

    /// Output schema, known before the first pull
    fn schema(&self) -> SchemaRef;

    /// Operator name for logs and errors
    fn name(&self) -> &'static str;
}

/// Drain an operator into a list of non-empty batches
pub fn collect_batches(
    op: &mut dyn BatchIterator,
    ctx: &QueryContext,
) -> EngineResult<Vec<Batch>> {
    let mut batches = Vec::new();
    while let Some(batch) = op.next(ctx)? {
        if !batch.is_empty() {
            batches.push(batch);
        }
    }
    Ok(batches)
}
