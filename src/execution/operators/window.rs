/// Window functions
///
/// The operator is blocking: it drains its input into one batch, then evaluates each
/// function over partitions sorted by the function's ORDER BY. Functions sharing the same
/// PARTITION BY and ORDER BY share one partitioning pass. Results are scattered back to the
/// input row order and appended as new columns.
///
/// Aggregates over frames starting at UNBOUNDED PRECEDING are computed incrementally;
/// other frames recompute the aggregate per row.
use crate::error::{EngineError, EngineResult};
use crate::execution::aggregate_state::{output_type, Accumulator};
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::evaluate;
use crate::execution::group_key::{GroupKey, KeyEncoder};
use crate::execution::memory_pool::MemoryReservation;
use crate::execution::operators::sort::{bind_order, chunk, compare_rows, evaluate_keys, KeyOrder};
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::query::plan::{FrameBound, FrameType, OrderByExpr, WindowFrame, WindowFunction, WindowFunctionExpr};
use crate::storage::column::{Column, ColumnBuilder};
use crate::storage::columnar::{Batch, Field, Schema, SchemaRef};
use crate::storage::value::{DataType, Value};
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// A window function after binding
struct BoundWindow {
    function: WindowFunction,
    args: Vec<Expr>,
    arg_types: Vec<DataType>,
    frame: WindowFrame,
    /// LAG/LEAD default cast to the argument type
    default: Value,
}

/// Functions sharing PARTITION BY and ORDER BY
struct WindowGroup {
    partition_by: Vec<Expr>,
    order_by: Vec<(Expr, KeyOrder)>,
    /// Indices into `functions`
    members: Vec<usize>,
}

pub struct WindowOperator {
    input: BoxedOperator,
    input_schema: SchemaRef,
    functions: Vec<BoundWindow>,
    groups: Vec<WindowGroup>,
    schema: SchemaRef,
    output: Option<VecDeque<Batch>>,
    reservation: Option<MemoryReservation>,
}

fn validate_frame(frame: &WindowFrame) -> EngineResult<()> {
    if matches!(frame.start, FrameBound::UnboundedFollowing)
        || matches!(frame.end, FrameBound::UnboundedPreceding)
    {
        return Err(EngineError::planning(format!("invalid window frame {:?}", frame)));
    }
    if frame.frame_type == FrameType::Range {
        let offset = |b: &FrameBound| matches!(b, FrameBound::Preceding(_) | FrameBound::Following(_));
        if offset(&frame.start) || offset(&frame.end) {
            return Err(EngineError::planning(
                "RANGE frames support only UNBOUNDED and CURRENT ROW bounds",
            ));
        }
    }
    Ok(())
}

fn bind_window(expr: &WindowFunctionExpr, schema: &Schema) -> EngineResult<(BoundWindow, DataType)> {
    let arg_types = expr
        .args
        .iter()
        .map(|a| a.data_type(schema))
        .collect::<EngineResult<Vec<_>>>()?;
    let expect_args = |n: usize| -> EngineResult<()> {
        if arg_types.len() != n {
            return Err(EngineError::planning(format!(
                "{} takes {} argument(s), got {}",
                expr.function.name(),
                n,
                arg_types.len()
            )));
        }
        Ok(())
    };
    let mut default = Value::Null;
    let output = match &expr.function {
        WindowFunction::RowNumber | WindowFunction::Rank | WindowFunction::DenseRank => {
            expect_args(0)?;
            DataType::Integer
        }
        WindowFunction::Ntile(buckets) => {
            expect_args(0)?;
            if *buckets == 0 {
                return Err(EngineError::planning("NTILE needs a positive bucket count"));
            }
            DataType::Integer
        }
        WindowFunction::Lag { default: d, .. } | WindowFunction::Lead { default: d, .. } => {
            expect_args(1)?;
            if let Some(d) = d {
                default = d.cast_to(arg_types[0])?;
            }
            arg_types[0]
        }
        WindowFunction::FirstValue | WindowFunction::LastValue => {
            expect_args(1)?;
            arg_types[0]
        }
        WindowFunction::Aggregate(function) => output_type(*function, &arg_types)?,
    };
    let frame = expr.effective_frame();
    validate_frame(&frame)?;
    Ok((
        BoundWindow {
            function: expr.function.clone(),
            args: expr.args.clone(),
            arg_types,
            frame,
            default,
        },
        output,
    ))
}

impl WindowOperator {
    pub fn new(input: BoxedOperator, functions: &[WindowFunctionExpr], ctx: &QueryContext) -> EngineResult<Self> {
        let input_schema = input.schema();
        let mut fields: Vec<Field> = input_schema.fields().to_vec();
        let mut bound = Vec::with_capacity(functions.len());
        let mut groups: Vec<(Vec<Expr>, Vec<OrderByExpr>, Vec<usize>)> = Vec::new();
        for (idx, expr) in functions.iter().enumerate() {
            for p in &expr.partition_by {
                p.data_type(&input_schema)?;
            }
            let (window, data_type) = bind_window(expr, &input_schema)?;
            fields.push(Field::new(expr.output_name(), data_type, true));
            bound.push(window);
            match groups
                .iter_mut()
                .find(|(p, o, _)| *p == expr.partition_by && *o == expr.order_by)
            {
                Some((_, _, members)) => members.push(idx),
                None => groups.push((expr.partition_by.clone(), expr.order_by.clone(), vec![idx])),
            }
        }
        let groups = groups
            .into_iter()
            .map(|(partition_by, order_by, members)| {
                Ok(WindowGroup {
                    partition_by,
                    order_by: bind_order(&order_by, &input_schema, ctx.config())?,
                    members,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            input,
            input_schema,
            functions: bound,
            groups,
            schema: Arc::new(Schema::new(fields)),
            output: None,
            reservation: None,
        })
    }

    fn compute(&mut self, ctx: &QueryContext) -> EngineResult<VecDeque<Batch>> {
        let mut reservation = ctx.reserve_memory(self.name());
        let mut batches = Vec::new();
        while let Some(batch) = self.input.next(ctx)? {
            ctx.check_cancelled()?;
            reservation.try_grow(batch.memory_size())?;
            batches.push(batch);
        }
        let input = Batch::concat(&self.input_schema, &batches)?;
        drop(batches);
        reservation.resize(input.memory_size())?;
        let rows = input.row_count();

        let mut results: Vec<Option<Vec<Value>>> = vec![None; self.functions.len()];
        for group in &self.groups {
            ctx.check_cancelled()?;
            let partitions = partition_rows(group, &input)?;
            debug!(partitions = partitions.len(), functions = group.members.len(), "window partitions");
            for &member in &group.members {
                let function = &self.functions[member];
                let args = function
                    .args
                    .iter()
                    .map(|a| evaluate(a, &input))
                    .collect::<EngineResult<Vec<_>>>()?;
                let arg_refs: Vec<&Column> = args.iter().map(|c| c.as_ref()).collect();
                let mut out = vec![Value::Null; rows];
                for partition in &partitions {
                    ctx.check_cancelled()?;
                    evaluate_partition(function, &arg_refs, partition, &mut out)?;
                }
                results[member] = Some(out);
            }
        }

        let mut columns: Vec<Arc<Column>> = input.columns().to_vec();
        for (field, values) in self.schema.fields()[self.input_schema.len()..].iter().zip(results) {
            let values = values.unwrap_or_else(|| vec![Value::Null; rows]);
            let mut builder = ColumnBuilder::with_capacity(field.data_type, rows);
            for value in &values {
                builder.append_value(value)?;
            }
            let column = builder.finish_arc();
            reservation.try_grow(column.memory_size())?;
            columns.push(column);
        }
        let output = Batch::try_new_with_row_count(self.schema.clone(), columns, rows)?;
        info!(rows, functions = self.functions.len(), "window evaluation complete");
        self.reservation = Some(reservation);
        Ok(chunk(&output, ctx.batch_size()))
    }
}

/// Rows of one partition in window order, with peer group bounds per position
struct Partition {
    rows: Vec<u32>,
    /// Start (inclusive) and end (exclusive) of each position's peer group
    peers: Vec<(usize, usize)>,
}

/// Split rows by PARTITION BY (first-appearance order) and stably sort each by ORDER BY
fn partition_rows(group: &WindowGroup, input: &Batch) -> EngineResult<Vec<Partition>> {
    let rows = input.row_count();
    let partition_cols = group
        .partition_by
        .iter()
        .map(|e| evaluate(e, input))
        .collect::<EngineResult<Vec<_>>>()?;
    let order_cols = evaluate_keys(&group.order_by, input)?;

    let mut buckets: Vec<Vec<u32>> = Vec::new();
    if partition_cols.is_empty() {
        buckets.push((0..rows as u32).collect());
    } else {
        KeyEncoder::check_width(partition_cols.len())?;
        let encoder = KeyEncoder::new();
        let refs: Vec<&Column> = partition_cols.iter().map(|c| c.as_ref()).collect();
        let mut index: FxHashMap<GroupKey, usize> = FxHashMap::default();
        for row in 0..rows {
            let key = encoder.encode_row(&refs, row);
            let next = buckets.len();
            let bucket = *index.entry(key).or_insert(next);
            if bucket == buckets.len() {
                buckets.push(Vec::new());
            }
            buckets[bucket].push(row as u32);
        }
    }

    Ok(buckets
        .into_iter()
        .map(|mut rows| {
            rows.sort_by(|&a, &b| compare_rows(&order_cols, a as usize, b as usize));
            let peers = peer_groups(&rows, &order_cols);
            Partition { rows, peers }
        })
        .collect())
}

fn peer_groups(rows: &[u32], order_cols: &[(Arc<Column>, KeyOrder)]) -> Vec<(usize, usize)> {
    let mut peers = vec![(0, 0); rows.len()];
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len()
            && compare_rows(order_cols, rows[start] as usize, rows[end] as usize).is_eq()
        {
            end += 1;
        }
        for peer in &mut peers[start..end] {
            *peer = (start, end);
        }
        start = end;
    }
    peers
}

/// Frame of position `i` as a half-open range of partition positions
fn frame_bounds(frame: &WindowFrame, i: usize, len: usize, peers: (usize, usize)) -> (usize, usize) {
    let start = match (frame.frame_type, frame.start) {
        (_, FrameBound::UnboundedPreceding) => 0,
        (FrameType::Range, FrameBound::CurrentRow) => peers.0,
        (_, FrameBound::CurrentRow) => i,
        (_, FrameBound::Preceding(n)) => i.saturating_sub(n),
        (_, FrameBound::Following(n)) => i.saturating_add(n),
        (_, FrameBound::UnboundedFollowing) => len,
    };
    let end = match (frame.frame_type, frame.end) {
        (_, FrameBound::UnboundedFollowing) => len,
        (FrameType::Range, FrameBound::CurrentRow) => peers.1,
        (_, FrameBound::CurrentRow) => i + 1,
        (_, FrameBound::Following(n)) => i.saturating_add(n).saturating_add(1),
        (_, FrameBound::Preceding(n)) => (i + 1).saturating_sub(n),
        (_, FrameBound::UnboundedPreceding) => 0,
    };
    let end = end.min(len);
    (start.min(end), end)
}

/// NTILE bucket (1-based) of position `i` among `len` rows; the first `len % k` buckets
/// get one extra row
fn ntile_bucket(i: usize, len: usize, k: usize) -> i64 {
    let base = len / k;
    let extra = len % k;
    let bucket = if i < extra * (base + 1) {
        i / (base + 1)
    } else {
        extra + (i - extra * (base + 1)) / base
    };
    bucket as i64 + 1
}

fn evaluate_partition(
    function: &BoundWindow,
    args: &[&Column],
    partition: &Partition,
    out: &mut [Value],
) -> EngineResult<()> {
    let rows = &partition.rows;
    let len = rows.len();
    match &function.function {
        WindowFunction::RowNumber => {
            for (i, &row) in rows.iter().enumerate() {
                out[row as usize] = Value::Integer(i as i64 + 1);
            }
        }
        WindowFunction::Rank => {
            for (i, &row) in rows.iter().enumerate() {
                out[row as usize] = Value::Integer(partition.peers[i].0 as i64 + 1);
            }
        }
        WindowFunction::DenseRank => {
            let mut rank = 0i64;
            for (i, &row) in rows.iter().enumerate() {
                if partition.peers[i].0 == i {
                    rank += 1;
                }
                out[row as usize] = Value::Integer(rank);
            }
        }
        WindowFunction::Ntile(k) => {
            for (i, &row) in rows.iter().enumerate() {
                out[row as usize] = Value::Integer(ntile_bucket(i, len, *k));
            }
        }
        WindowFunction::Lag { offset, .. } => {
            for (i, &row) in rows.iter().enumerate() {
                out[row as usize] = match i.checked_sub(*offset) {
                    Some(source) => args[0].value(rows[source] as usize),
                    None => function.default.clone(),
                };
            }
        }
        WindowFunction::Lead { offset, .. } => {
            for (i, &row) in rows.iter().enumerate() {
                let source = i.saturating_add(*offset);
                out[row as usize] = if source < len {
                    args[0].value(rows[source] as usize)
                } else {
                    function.default.clone()
                };
            }
        }
        WindowFunction::FirstValue | WindowFunction::LastValue => {
            let first = matches!(function.function, WindowFunction::FirstValue);
            for (i, &row) in rows.iter().enumerate() {
                let (start, end) = frame_bounds(&function.frame, i, len, partition.peers[i]);
                out[row as usize] = match (start < end, first) {
                    (false, _) => Value::Null,
                    (true, true) => args[0].value(rows[start] as usize),
                    (true, false) => args[0].value(rows[end - 1] as usize),
                };
            }
        }
        WindowFunction::Aggregate(aggregate) => {
            let incremental = function.frame.start == FrameBound::UnboundedPreceding;
            let mut running = Accumulator::new(*aggregate, &function.arg_types);
            let mut consumed = 0;
            for (i, &row) in rows.iter().enumerate() {
                let (start, end) = frame_bounds(&function.frame, i, len, partition.peers[i]);
                out[row as usize] = if incremental && end >= consumed {
                    while consumed < end {
                        running.update(args, rows[consumed] as usize);
                        consumed += 1;
                    }
                    running.finalize()?
                } else {
                    let mut frame = Accumulator::new(*aggregate, &function.arg_types);
                    for &source in &rows[start..end] {
                        frame.update(args, source as usize);
                    }
                    frame.finalize()?
                };
            }
        }
    }
    Ok(())
}

impl BatchIterator for WindowOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        ctx.check_cancelled()?;
        if self.output.is_none() {
            self.output = Some(self.compute(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "Window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::batch::collect_batches;
    use crate::execution::operators::values::ValuesOperator;
    use crate::query::expression::col;
    use crate::query::plan::AggregateFunction;

    fn scores(data: &[(&str, i64)]) -> BoxedOperator {
        let schema = Arc::new(Schema::new(vec![
            Field::new("team", DataType::String, false),
            Field::new("score", DataType::Integer, true),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![
                Arc::new(Column::from_strings(data.iter().map(|d| Some(d.0)).collect())),
                Arc::new(Column::from_i64(data.iter().map(|d| Some(d.1)).collect())),
            ],
        )
        .unwrap();
        Box::new(ValuesOperator::new(None, schema, vec![batch]).unwrap())
    }

    fn last_column(op: &mut WindowOperator) -> Vec<Value> {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let width = op.schema().len();
        collect_batches(op, &ctx)
            .unwrap()
            .iter()
            .flat_map(|b| b.column(width - 1).values())
            .collect()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Integer(v)).collect()
    }

    #[test]
    fn test_rank_and_dense_rank_with_ties() {
        let data = [("a", 10), ("a", 20), ("a", 10), ("a", 30)];
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let order = vec![OrderByExpr::asc(col("score"))];
        let mut rank = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(WindowFunction::Rank, vec![]).order_by(order.clone())],
            &ctx,
        )
        .unwrap();
        assert_eq!(last_column(&mut rank), ints(&[1, 3, 1, 4]));

        let mut dense = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(WindowFunction::DenseRank, vec![]).order_by(order)],
            &ctx,
        )
        .unwrap();
        assert_eq!(last_column(&mut dense), ints(&[1, 2, 1, 3]));
    }

    #[test]
    fn test_running_sum_per_partition_in_input_order() {
        let data = [("a", 1), ("b", 10), ("a", 2), ("b", 20), ("a", 3)];
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let mut op = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Sum), vec![col("score")])
                .partition_by(vec![col("team")])
                .order_by(vec![OrderByExpr::asc(col("score"))])],
            &ctx,
        )
        .unwrap();
        assert_eq!(last_column(&mut op), ints(&[1, 10, 3, 30, 6]));
    }

    #[test]
    fn test_moving_average_over_rows_frame() {
        let data = [("a", 1), ("a", 2), ("a", 3), ("a", 4)];
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let mut op = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Avg), vec![col("score")])
                .order_by(vec![OrderByExpr::asc(col("score"))])
                .frame(WindowFrame::trailing_rows(1))],
            &ctx,
        )
        .unwrap();
        assert_eq!(
            last_column(&mut op),
            vec![Value::Double(1.0), Value::Double(1.5), Value::Double(2.5), Value::Double(3.5)]
        );
    }

    #[test]
    fn test_lead_with_default_and_last_value_peers() {
        let data = [("a", 1), ("a", 2), ("a", 2)];
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let order = vec![OrderByExpr::asc(col("score"))];
        let mut lead = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(
                WindowFunction::Lead {
                    offset: 1,
                    default: Some(Value::Integer(-1)),
                },
                vec![col("score")],
            )
            .order_by(order.clone())],
            &ctx,
        )
        .unwrap();
        assert_eq!(last_column(&mut lead), ints(&[2, 2, -1]));

        // default RANGE frame ends at the last peer
        let mut last = WindowOperator::new(
            scores(&data),
            &[WindowFunctionExpr::new(WindowFunction::LastValue, vec![col("score")]).order_by(order)],
            &ctx,
        )
        .unwrap();
        assert_eq!(last_column(&mut last), ints(&[1, 2, 2]));
    }

    #[test]
    fn test_same_partition_and_order_share_a_group() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let by_team = vec![col("team")];
        let by_score = vec![OrderByExpr::asc(col("score"))];
        let op = WindowOperator::new(
            scores(&[("a", 1), ("b", 2)]),
            &[
                WindowFunctionExpr::new(WindowFunction::Rank, vec![])
                    .partition_by(by_team.clone())
                    .order_by(by_score.clone())
                    .with_alias("r"),
                WindowFunctionExpr::new(WindowFunction::RowNumber, vec![])
                    .partition_by(by_team.clone())
                    .order_by(vec![OrderByExpr::desc(col("score"))])
                    .with_alias("rn"),
                WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Sum), vec![col("score")])
                    .partition_by(by_team)
                    .order_by(by_score)
                    .with_alias("running"),
            ],
            &ctx,
        )
        .unwrap();
        let members: Vec<Vec<usize>> = op.groups.iter().map(|g| g.members.clone()).collect();
        assert_eq!(members, vec![vec![0, 2], vec![1]]);
        assert_eq!(op.schema().len(), 5);
    }

    #[test]
    fn test_ntile_distribution() {
        let buckets: Vec<i64> = (0..10).map(|i| ntile_bucket(i, 10, 4)).collect();
        assert_eq!(buckets, vec![1, 1, 1, 2, 2, 2, 3, 3, 4, 4]);
        let small: Vec<i64> = (0..2).map(|i| ntile_bucket(i, 2, 5)).collect();
        assert_eq!(small, vec![1, 2]);
    }

    #[test]
    fn test_range_offset_frame_is_rejected() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let frame = WindowFrame::new(FrameType::Range, FrameBound::Preceding(2), FrameBound::CurrentRow);
        let result = WindowOperator::new(
            scores(&[("a", 1)]),
            &[WindowFunctionExpr::new(WindowFunction::Aggregate(AggregateFunction::Sum), vec![col("score")])
                .order_by(vec![OrderByExpr::asc(col("score"))])
                .frame(frame)],
            &ctx,
        );
        assert!(matches!(result, Err(EngineError::Planning { .. })));
    }
}
