/// WHERE / HAVING / QUALIFY
use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::{bind_predicate, evaluate_predicate};
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::storage::columnar::{Batch, SchemaRef};

pub struct FilterOperator {
    input: BoxedOperator,
    predicate: Expr,
}

impl FilterOperator {
    pub fn new(input: BoxedOperator, predicate: Expr) -> EngineResult<Self> {
        bind_predicate(&predicate, &input.schema())?;
        Ok(Self { input, predicate })
    }
}

impl BatchIterator for FilterOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        loop {
            ctx.check_cancelled()?;
            let Some(batch) = self.input.next(ctx)? else {
                return Ok(None);
            };
            let selection = evaluate_predicate(&self.predicate, &batch)?;
            if selection.all() {
                return Ok(Some(batch));
            }
            let filtered = batch.filter(&selection);
            if !filtered.is_empty() {
                return Ok(Some(filtered));
            }
        }
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}
