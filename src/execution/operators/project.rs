/// SELECT list evaluation
use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::evaluate;
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::query::plan::ProjectionExpr;
use crate::storage::columnar::{Batch, Field, Schema, SchemaRef};
use std::sync::Arc;

/// Output field of a projected expression. A bare column keeps its qualifier and
/// nullability, so `o.id` stays addressable above the projection.
pub(crate) fn projected_field(expr: &ProjectionExpr, input: &Schema) -> EngineResult<Field> {
    let data_type = expr.expr.data_type(input)?;
    if let (Expr::Column(name), None) = (&expr.expr, &expr.alias) {
        let source = input.field(input.index_of(name)?);
        return Ok(Field::new(source.name.clone(), data_type, source.nullable)
            .with_qualifier(source.qualifier.clone()));
    }
    Ok(Field::new(expr.output_name(), data_type, true))
}

pub struct ProjectOperator {
    input: BoxedOperator,
    exprs: Vec<Expr>,
    schema: SchemaRef,
}

impl ProjectOperator {
    pub fn new(input: BoxedOperator, exprs: &[ProjectionExpr]) -> EngineResult<Self> {
        let input_schema = input.schema();
        let fields = exprs
            .iter()
            .map(|e| projected_field(e, &input_schema))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            input,
            exprs: exprs.iter().map(|e| e.expr.clone()).collect(),
            schema: Arc::new(Schema::new(fields)),
        })
    }
}

impl BatchIterator for ProjectOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        ctx.check_cancelled()?;
        let Some(batch) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut columns = Vec::with_capacity(self.exprs.len());
        for (expr, field) in self.exprs.iter().zip(self.schema.fields()) {
            let column = evaluate(expr, &batch)?;
            let column = if column.data_type() == field.data_type {
                column
            } else {
                Arc::new(column.cast(field.data_type)?)
            };
            columns.push(column);
        }
        Batch::try_new_with_row_count(self.schema.clone(), columns, batch.row_count()).map(Some)
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "Project"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::batch::collect_batches;
    use crate::execution::operators::filter::FilterOperator;
    use crate::execution::operators::values::ValuesOperator;
    use crate::query::expression::{col, lit};
    use crate::storage::column::Column;
    use crate::storage::value::{DataType, Value};

    fn orders() -> BoxedOperator {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Integer, false),
            Field::new("amount", DataType::Double, true),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![
                Arc::new(Column::from_i64(vec![Some(1), Some(2), Some(3)])),
                Arc::new(Column::from_f64(vec![Some(10.0), None, Some(30.0)])),
            ],
        )
        .unwrap();
        Box::new(ValuesOperator::new(Some("o"), schema, vec![batch]).unwrap())
    }

    #[test]
    fn test_filter_then_project() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let filtered = FilterOperator::new(orders(), col("amount").gt(lit(15.0))).unwrap();
        let mut op = ProjectOperator::new(
            Box::new(filtered),
            &[
                ProjectionExpr::new(col("o.id")),
                ProjectionExpr::aliased(col("amount").add(lit(1.0)), "bumped"),
            ],
        )
        .unwrap();
        let schema = op.schema();
        assert_eq!(schema.field(0).qualified_name(), "o.id");
        assert_eq!(schema.field(1).name, "bumped");
        let batches = collect_batches(&mut op, &ctx).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].row(0), vec![Value::Integer(3), Value::Double(31.0)]);
    }

    #[test]
    fn test_non_boolean_filter_is_rejected_before_execution() {
        assert!(FilterOperator::new(orders(), col("amount")).is_err());
    }

    #[test]
    fn test_unknown_column_is_a_schema_error() {
        let err = ProjectOperator::new(orders(), &[ProjectionExpr::new(col("missing"))])
            .err()
            .unwrap();
        assert!(matches!(err, crate::error::EngineError::Schema { .. }));
    }
}
