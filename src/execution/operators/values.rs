/// In-memory table source
use crate::error::{EngineError, EngineResult};
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::storage::columnar::{Batch, SchemaRef};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct ValuesOperator {
    schema: SchemaRef,
    batches: VecDeque<Batch>,
}

impl ValuesOperator {
    /// Every batch must carry the column types of `schema`; fields are qualified by `alias`
    pub fn new(alias: Option<&str>, schema: SchemaRef, batches: Vec<Batch>) -> EngineResult<Self> {
        let schema: SchemaRef = Arc::new(schema.with_qualifier(alias));
        let batches = batches
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(|b| {
                if b.num_columns() != schema.len() {
                    return Err(EngineError::schema(format!(
                        "values batch has {} columns, schema has {}",
                        b.num_columns(),
                        schema.len()
                    )));
                }
                b.with_schema(schema.clone())
            })
            .collect::<EngineResult<VecDeque<_>>>()?;
        Ok(Self { schema, batches })
    }
}

impl BatchIterator for ValuesOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        ctx.check_cancelled()?;
        Ok(self.batches.pop_front())
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "Values"
    }
}
