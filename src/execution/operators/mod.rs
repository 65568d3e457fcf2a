/// Physical operators and the plan-to-operator builder
///
/// Every operator binds its expressions against its input schema when it is built, so
/// unknown columns and type errors are reported before any file is read past its header.
pub mod aggregate;
pub mod filter;
pub mod join;
pub mod limit;
pub mod project;
pub mod scan;
pub mod sort;
pub mod values;
pub mod window;

use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::query::plan::PlanOperator;

pub use aggregate::{HashAggregateOperator, GROUPING_ID_COLUMN};
pub use filter::FilterOperator;
pub use join::HashJoinOperator;
pub use limit::LimitOperator;
pub use project::ProjectOperator;
pub use scan::ScanOperator;
pub use sort::SortOperator;
pub use values::ValuesOperator;
pub use window::WindowOperator;

pub type BoxedOperator = Box<dyn BatchIterator>;

/// Build the operator tree for `plan`. A LIMIT directly over a SORT becomes a top-k sort.
pub fn build_operator(plan: &PlanOperator, ctx: &QueryContext) -> EngineResult<BoxedOperator> {
    let op: BoxedOperator = match plan {
        PlanOperator::Scan {
            path,
            format,
            alias,
            options,
            projection,
            predicates,
        } => Box::new(ScanOperator::new(
            path,
            *format,
            alias.as_deref(),
            options,
            projection.as_deref(),
            predicates,
            ctx,
        )?),
        PlanOperator::Values { alias, schema, batches } => {
            Box::new(ValuesOperator::new(alias.as_deref(), schema.clone(), batches.clone())?)
        }
        PlanOperator::Filter { input, predicate } => {
            Box::new(FilterOperator::new(build_operator(input, ctx)?, predicate.clone())?)
        }
        PlanOperator::Project { input, exprs } => {
            Box::new(ProjectOperator::new(build_operator(input, ctx)?, exprs)?)
        }
        PlanOperator::Join {
            left,
            right,
            join_type,
            on,
        } => Box::new(HashJoinOperator::new(
            build_operator(left, ctx)?,
            build_operator(right, ctx)?,
            *join_type,
            on,
        )?),
        PlanOperator::Aggregate {
            input,
            group_by,
            grouping,
            aggregates,
            emit_grouping_id,
        } => Box::new(HashAggregateOperator::new(
            build_operator(input, ctx)?,
            group_by,
            grouping,
            aggregates,
            *emit_grouping_id,
        )?),
        PlanOperator::Window { input, functions } => {
            Box::new(WindowOperator::new(build_operator(input, ctx)?, functions, ctx)?)
        }
        PlanOperator::Sort { input, order_by } => {
            Box::new(SortOperator::new(build_operator(input, ctx)?, order_by, ctx)?)
        }
        PlanOperator::Limit { input, limit, offset } => match (input.as_ref(), limit) {
            (PlanOperator::Sort { input: sort_input, order_by }, Some(limit)) => {
                let k = limit.saturating_add(*offset);
                let sorted = SortOperator::top_k(build_operator(sort_input, ctx)?, order_by, k, ctx)?;
                Box::new(LimitOperator::new(Box::new(sorted), Some(*limit), *offset))
            }
            _ => Box::new(LimitOperator::new(build_operator(input, ctx)?, *limit, *offset)),
        },
    };
    Ok(op)
}
