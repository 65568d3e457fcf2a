/// ORDER BY: full sort and bounded top-k
///
/// The full sort drains its input, sorts row indices stably and emits the permuted rows in
/// `batch_size` chunks. When a LIMIT sits directly above, the executor builds the top-k
/// variant instead, which keeps only `offset + limit` rows in a binary heap.
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::evaluate;
use crate::execution::memory_pool::MemoryReservation;
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::query::plan::OrderByExpr;
use crate::storage::column::{Column, ColumnBuilder};
use crate::storage::columnar::{Batch, Schema, SchemaRef};
use crate::storage::value::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use tracing::info;

/// Direction and NULL placement of one sort key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct KeyOrder {
    pub ascending: bool,
    pub nulls_first: bool,
}

/// Type-check ORDER BY expressions and resolve NULL placement against the config
pub(crate) fn bind_order(
    order_by: &[OrderByExpr],
    schema: &Schema,
    config: &EngineConfig,
) -> EngineResult<Vec<(Expr, KeyOrder)>> {
    order_by
        .iter()
        .map(|o| {
            o.expr.data_type(schema)?;
            let nulls_first = o
                .nulls_first
                .unwrap_or_else(|| config.sort.default_null_ordering.nulls_first(o.ascending));
            Ok((
                o.expr.clone(),
                KeyOrder {
                    ascending: o.ascending,
                    nulls_first,
                },
            ))
        })
        .collect()
}

pub(crate) fn evaluate_keys(
    keys: &[(Expr, KeyOrder)],
    batch: &Batch,
) -> EngineResult<Vec<(Arc<Column>, KeyOrder)>> {
    keys.iter()
        .map(|(expr, order)| Ok((evaluate(expr, batch)?, *order)))
        .collect()
}

/// Compare rows `a` and `b` of the same key columns
pub(crate) fn compare_rows(keys: &[(Arc<Column>, KeyOrder)], a: usize, b: usize) -> Ordering {
    for (column, order) in keys {
        let ord = match (column.is_null(a), column.is_null(b)) {
            (true, true) => Ordering::Equal,
            (true, false) if order.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if order.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = column.cmp_rows(a, b);
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &[Value], b: &[Value], orders: &[KeyOrder]) -> Ordering {
    for ((x, y), order) in a.iter().zip(b).zip(orders) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if order.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if order.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if order.ascending => x.total_cmp(y),
            (false, false) => x.total_cmp(y).reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Heap entry of the top-k sort; `seq` keeps equal keys in input order
struct TopKRow {
    keys: Vec<Value>,
    seq: u64,
    row: Vec<Value>,
    orders: Arc<[KeyOrder]>,
}

impl TopKRow {
    fn size(&self) -> usize {
        self.keys.iter().chain(&self.row).map(value_size).sum::<usize>() + std::mem::size_of::<Self>()
    }
}

impl PartialEq for TopKRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopKRow {}

impl PartialOrd for TopKRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopKRow {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.keys, &other.keys, &self.orders).then(self.seq.cmp(&other.seq))
    }
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::String(s) => std::mem::size_of::<Value>() + s.capacity(),
        _ => std::mem::size_of::<Value>(),
    }
}

enum SortMode {
    Full,
    TopK { k: usize },
}

pub struct SortOperator {
    input: BoxedOperator,
    keys: Vec<(Expr, KeyOrder)>,
    mode: SortMode,
    schema: SchemaRef,
    output: Option<VecDeque<Batch>>,
    reservation: Option<MemoryReservation>,
}

impl SortOperator {
    pub fn new(input: BoxedOperator, order_by: &[OrderByExpr], ctx: &QueryContext) -> EngineResult<Self> {
        let schema = input.schema();
        let keys = bind_order(order_by, &schema, ctx.config())?;
        Ok(Self {
            input,
            keys,
            mode: SortMode::Full,
            schema,
            output: None,
            reservation: None,
        })
    }

    /// Keep only the first `k` rows of the ordering
    pub fn top_k(
        input: BoxedOperator,
        order_by: &[OrderByExpr],
        k: usize,
        ctx: &QueryContext,
    ) -> EngineResult<Self> {
        let mut op = Self::new(input, order_by, ctx)?;
        op.mode = SortMode::TopK { k };
        Ok(op)
    }

    fn sort_all(&mut self, ctx: &QueryContext) -> EngineResult<VecDeque<Batch>> {
        let mut reservation = ctx.reserve_memory(self.name());
        let mut batches = Vec::new();
        while let Some(batch) = self.input.next(ctx)? {
            ctx.check_cancelled()?;
            if batch.is_empty() {
                continue;
            }
            reservation.try_grow(batch.memory_size())?;
            batches.push(batch);
        }
        let all = Batch::concat(&self.schema, &batches)?;
        drop(batches);
        reservation.resize(all.memory_size())?;

        let keys = evaluate_keys(&self.keys, &all)?;
        let mut indices: Vec<u32> = (0..all.row_count() as u32).collect();
        // sort_by is stable, so rows with equal keys keep their input order
        indices.sort_by(|&a, &b| compare_rows(&keys, a as usize, b as usize));
        let sorted = all.take(&indices);
        info!(rows = sorted.row_count(), keys = self.keys.len(), "sort complete");
        self.reservation = Some(reservation);
        Ok(chunk(&sorted, ctx.batch_size()))
    }

    fn sort_top_k(&mut self, k: usize, ctx: &QueryContext) -> EngineResult<VecDeque<Batch>> {
        let mut reservation = ctx.reserve_memory(self.name());
        let orders: Arc<[KeyOrder]> = self.keys.iter().map(|(_, o)| *o).collect();
        let mut heap: BinaryHeap<TopKRow> = BinaryHeap::with_capacity(k.saturating_add(1).min(1 << 16));
        let mut seq = 0u64;
        let mut held = 0usize;
        if k > 0 {
            while let Some(batch) = self.input.next(ctx)? {
                ctx.check_cancelled()?;
                let keys = evaluate_keys(&self.keys, &batch)?;
                for row in 0..batch.row_count() {
                    let key_values: Vec<Value> = keys.iter().map(|(c, _)| c.value(row)).collect();
                    seq += 1;
                    if heap.len() >= k {
                        let Some(worst) = heap.peek() else { break };
                        // later rows lose ties, so only strictly smaller keys get in
                        if compare_values(&key_values, &worst.keys, &orders) != Ordering::Less {
                            continue;
                        }
                    }
                    let entry = TopKRow {
                        keys: key_values,
                        seq,
                        row: batch.row(row),
                        orders: orders.clone(),
                    };
                    held += entry.size();
                    heap.push(entry);
                    if heap.len() > k {
                        if let Some(evicted) = heap.pop() {
                            held -= evicted.size();
                        }
                    }
                }
                reservation.resize(held)?;
            }
        }

        let rows = heap.into_sorted_vec();
        let mut builders: Vec<ColumnBuilder> = self
            .schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::with_capacity(f.data_type, rows.len()))
            .collect();
        for entry in &rows {
            for (builder, value) in builders.iter_mut().zip(&entry.row) {
                builder.append_value(value)?;
            }
        }
        let columns = builders.into_iter().map(ColumnBuilder::finish_arc).collect();
        let sorted = Batch::try_new_with_row_count(self.schema.clone(), columns, rows.len())?;
        info!(rows = sorted.row_count(), k, "top-k sort complete");
        self.reservation = Some(reservation);
        Ok(chunk(&sorted, ctx.batch_size()))
    }
}

/// Split a batch into `batch_size` slices
pub(crate) fn chunk(batch: &Batch, batch_size: usize) -> VecDeque<Batch> {
    let batch_size = batch_size.max(1);
    (0..batch.row_count())
        .step_by(batch_size)
        .map(|offset| batch.slice(offset, batch_size.min(batch.row_count() - offset)))
        .collect()
}

impl BatchIterator for SortOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        ctx.check_cancelled()?;
        if self.output.is_none() {
            let sorted = match self.mode {
                SortMode::Full => self.sort_all(ctx)?,
                SortMode::TopK { k } => self.sort_top_k(k, ctx)?,
            };
            self.output = Some(sorted);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        match self.mode {
            SortMode::Full => "Sort",
            SortMode::TopK { .. } => "TopK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NullOrdering;
    use crate::execution::batch::collect_batches;
    use crate::execution::operators::values::ValuesOperator;
    use crate::query::expression::col;
    use crate::storage::columnar::Field;
    use crate::storage::value::DataType;

    fn input(values: Vec<Option<i64>>) -> BoxedOperator {
        let labels: Vec<Option<String>> = (0..values.len()).map(|i| Some(format!("r{}", i))).collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Integer, true),
            Field::new("label", DataType::String, true),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![Arc::new(Column::from_i64(values)), Arc::new(Column::from_strings(labels))],
        )
        .unwrap();
        Box::new(ValuesOperator::new(None, schema, vec![batch]).unwrap())
    }

    fn run(mut op: SortOperator, ctx: &QueryContext) -> Vec<Vec<Value>> {
        collect_batches(&mut op, ctx)
            .unwrap()
            .iter()
            .flat_map(|b| (0..b.row_count()).map(|i| b.row(i)).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_sort_is_stable_with_nulls_largest() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let op = SortOperator::new(
            input(vec![Some(2), None, Some(1), Some(2)]),
            &[OrderByExpr::asc(col("x"))],
            &ctx,
        )
        .unwrap();
        let labels: Vec<Value> = run(op, &ctx).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(
            labels,
            vec![Value::from("r2"), Value::from("r0"), Value::from("r3"), Value::from("r1")]
        );
    }

    #[test]
    fn test_descending_nulls_first_by_default() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        assert_eq!(ctx.config().sort.default_null_ordering, NullOrdering::NullsLargest);
        let op = SortOperator::new(input(vec![Some(1), None, Some(3)]), &[OrderByExpr::desc(col("x"))], &ctx)
            .unwrap();
        let xs: Vec<Value> = run(op, &ctx).into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(xs, vec![Value::Null, Value::Integer(3), Value::Integer(1)]);
    }

    #[test]
    fn test_top_k_matches_full_sort_prefix() {
        let ctx = QueryContext::for_config(EngineConfig::default().with_batch_size(3)).unwrap();
        let data: Vec<Option<i64>> = vec![5, 3, 9, 3, 1, 7, 3, 8].into_iter().map(Some).collect();
        let order = [OrderByExpr::asc(col("x"))];
        let full = run(SortOperator::new(input(data.clone()), &order, &ctx).unwrap(), &ctx);
        let top = run(SortOperator::top_k(input(data), &order, 4, &ctx).unwrap(), &ctx);
        assert_eq!(top, full[..4].to_vec());
    }

    #[test]
    fn test_top_zero_is_empty() {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        let op = SortOperator::top_k(input(vec![Some(1)]), &[OrderByExpr::asc(col("x"))], 0, &ctx).unwrap();
        assert!(run(op, &ctx).is_empty());
    }
}
