/// Hash aggregation with GROUPING SETS, CUBE and ROLLUP
///
/// Every input row is encoded once into a full-width `GroupKey`; each grouping set then
/// projects that key onto its own columns and looks the group up in its own hash table.
/// Output row order is unspecified; consumers that need an order sort on top. Key columns
/// absent from a set are NULL.
/// An empty grouping set always yields exactly one row, even over empty input.
use crate::error::{EngineError, EngineResult};
use crate::execution::aggregate_state::{output_type, Accumulator};
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::evaluate;
use crate::execution::group_key::{GroupKey, KeyEncoder};
use crate::execution::memory_pool::MemoryReservation;
use crate::execution::operators::project::projected_field;
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::query::plan::{AggregateExpr, AggregateFunction, GroupingSpec, ProjectionExpr};
use crate::storage::column::{Column, ColumnBuilder};
use crate::storage::columnar::{Batch, Field, Schema, SchemaRef};
use crate::storage::value::{DataType, Value};
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

/// Name of the grouping bitmask column
pub const GROUPING_ID_COLUMN: &str = "grouping_id";

struct GroupState {
    /// Values of the set's key columns, in set order
    key_values: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

/// Groups of one grouping set
struct GroupingSetTable {
    /// Indices into the GROUP BY list
    keys: Vec<usize>,
    index: FxHashMap<GroupKey, usize>,
    groups: Vec<GroupState>,
}

pub struct HashAggregateOperator {
    input: BoxedOperator,
    group_exprs: Vec<Expr>,
    key_types: Vec<DataType>,
    aggregates: Vec<AggregateExpr>,
    arg_types: Vec<Vec<DataType>>,
    sets: Vec<GroupingSetTable>,
    emit_grouping_id: bool,
    schema: SchemaRef,
    encoder: KeyEncoder,
    /// Some aggregate buffers values (DISTINCT, percentiles), so state grows per row
    buffering: bool,
    fixed_bytes: usize,
    output: Option<VecDeque<Batch>>,
    reservation: Option<MemoryReservation>,
}

impl HashAggregateOperator {
    pub fn new(
        input: BoxedOperator,
        group_by: &[ProjectionExpr],
        grouping: &GroupingSpec,
        aggregates: &[AggregateExpr],
        emit_grouping_id: bool,
    ) -> EngineResult<Self> {
        KeyEncoder::check_width(group_by.len())?;
        let input_schema = input.schema();

        let mut fields = Vec::with_capacity(group_by.len() + aggregates.len() + 1);
        let mut key_types = Vec::with_capacity(group_by.len());
        for key in group_by {
            let field = projected_field(key, &input_schema)?.with_nullable(true);
            key_types.push(field.data_type);
            fields.push(field);
        }

        let mut arg_types = Vec::with_capacity(aggregates.len());
        for aggregate in aggregates {
            let types = aggregate
                .args
                .iter()
                .map(|a| a.data_type(&input_schema))
                .collect::<EngineResult<Vec<_>>>()?;
            let data_type = output_type(aggregate.function, &types)?;
            fields.push(Field::new(aggregate.output_name(), data_type, true));
            arg_types.push(types);
        }
        if emit_grouping_id {
            fields.push(Field::new(GROUPING_ID_COLUMN, DataType::Integer, false));
        }

        let sets = grouping
            .expand(group_by.len())
            .into_iter()
            .map(|keys| {
                if let Some(bad) = keys.iter().find(|&&k| k >= group_by.len()) {
                    return Err(EngineError::planning(format!(
                        "grouping set refers to key {} of {}",
                        bad,
                        group_by.len()
                    )));
                }
                Ok(GroupingSetTable {
                    keys,
                    index: FxHashMap::default(),
                    groups: Vec::new(),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        if sets.is_empty() {
            return Err(EngineError::planning("GROUPING SETS needs at least one set"));
        }

        let buffering = aggregates.iter().any(|a| {
            matches!(
                a.function,
                AggregateFunction::CountDistinct
                    | AggregateFunction::PercentileCont(_)
                    | AggregateFunction::Min
                    | AggregateFunction::Max
            )
        });

        Ok(Self {
            input,
            group_exprs: group_by.iter().map(|g| g.expr.clone()).collect(),
            key_types,
            aggregates: aggregates.to_vec(),
            arg_types,
            sets,
            emit_grouping_id,
            schema: Arc::new(Schema::new(fields)),
            encoder: KeyEncoder::new(),
            buffering,
            fixed_bytes: 0,
            output: None,
            reservation: None,
        })
    }

    fn group_size(&self, key: &GroupKey, values: &[Value]) -> usize {
        key.memory_size()
            + values.len() * std::mem::size_of::<Value>()
            + self.aggregates.len() * std::mem::size_of::<Accumulator>()
            + std::mem::size_of::<GroupState>()
    }

    fn consume(&mut self, batch: &Batch, reservation: &mut MemoryReservation) -> EngineResult<()> {
        let rows = batch.row_count();
        let keys = self
            .group_exprs
            .iter()
            .zip(&self.key_types)
            .map(|(expr, &data_type)| {
                let column = evaluate(expr, batch)?;
                if column.data_type() == data_type {
                    Ok(column)
                } else {
                    Ok(Arc::new(column.cast(data_type)?))
                }
            })
            .collect::<EngineResult<Vec<Arc<Column>>>>()?;
        let args = self
            .aggregates
            .iter()
            .map(|a| a.args.iter().map(|e| evaluate(e, batch)).collect::<EngineResult<Vec<_>>>())
            .collect::<EngineResult<Vec<_>>>()?;
        let arg_refs: Vec<Vec<&Column>> = args
            .iter()
            .map(|cols| cols.iter().map(|c| c.as_ref()).collect())
            .collect();
        let key_refs: Vec<&Column> = keys.iter().map(|c| c.as_ref()).collect();
        let full_keys = self.encoder.encode_all(&key_refs, rows);

        let mut new_bytes = 0usize;
        for set_idx in 0..self.sets.len() {
            for (row, full_key) in full_keys.iter().enumerate() {
                let key = full_key.project(&self.sets[set_idx].keys);
                let group = match self.sets[set_idx].index.get(&key) {
                    Some(&group) => group,
                    None => {
                        let key_values: Vec<Value> =
                            self.sets[set_idx].keys.iter().map(|&k| keys[k].value(row)).collect();
                        new_bytes += self.group_size(&key, &key_values);
                        let accumulators = self
                            .aggregates
                            .iter()
                            .zip(&self.arg_types)
                            .map(|(a, types)| Accumulator::new(a.function, types))
                            .collect();
                        let table = &mut self.sets[set_idx];
                        table.groups.push(GroupState {
                            key_values,
                            accumulators,
                        });
                        table.index.insert(key, table.groups.len() - 1);
                        table.groups.len() - 1
                    }
                };
                let state = &mut self.sets[set_idx].groups[group];
                for (accumulator, args) in state.accumulators.iter_mut().zip(&arg_refs) {
                    accumulator.update(args, row);
                }
            }
        }

        self.fixed_bytes += new_bytes;
        let variable = if self.buffering {
            self.sets
                .iter()
                .flat_map(|s| s.groups.iter())
                .flat_map(|g| g.accumulators.iter())
                .map(Accumulator::heap_size)
                .sum()
        } else {
            0
        };
        reservation.resize(self.fixed_bytes + variable)
    }

    fn finalize(&mut self, batch_size: usize) -> EngineResult<VecDeque<Batch>> {
        // the empty set has one group even when no row arrived
        for table in &mut self.sets {
            if table.keys.is_empty() && table.groups.is_empty() {
                let accumulators = self
                    .aggregates
                    .iter()
                    .zip(&self.arg_types)
                    .map(|(a, types)| Accumulator::new(a.function, types))
                    .collect();
                table.groups.push(GroupState {
                    key_values: vec![],
                    accumulators,
                });
            }
        }

        let key_count = self.group_exprs.len();
        let rows: Vec<(usize, usize)> = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(s, table)| (0..table.groups.len()).map(move |g| (s, g)))
            .collect();
        let mut output = VecDeque::new();
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut builders: Vec<ColumnBuilder> = self
                .schema
                .fields()
                .iter()
                .map(|f| ColumnBuilder::with_capacity(f.data_type, chunk.len()))
                .collect();
            for &(s, g) in chunk {
                let table = &self.sets[s];
                let state = &table.groups[g];
                for key in 0..key_count {
                    match table.keys.iter().position(|&k| k == key) {
                        Some(pos) => builders[key].append_value(&state.key_values[pos])?,
                        None => builders[key].append_null(),
                    }
                }
                for (a, accumulator) in state.accumulators.iter().enumerate() {
                    builders[key_count + a].append_value(&accumulator.finalize()?)?;
                }
                if self.emit_grouping_id {
                    let id = grouping_id(&table.keys, key_count);
                    builders[key_count + self.aggregates.len()].append_value(&Value::Integer(id))?;
                }
            }
            let columns = builders.into_iter().map(ColumnBuilder::finish_arc).collect();
            output.push_back(Batch::try_new_with_row_count(self.schema.clone(), columns, chunk.len())?);
        }
        info!(
            grouping_sets = self.sets.len(),
            groups = rows.len(),
            aggregates = self.aggregates.len(),
            "aggregation complete"
        );
        Ok(output)
    }
}

/// Bitmask with bit set for every key absent from the set; the first key is the MSB
pub fn grouping_id(set: &[usize], key_count: usize) -> i64 {
    (0..key_count)
        .filter(|k| !set.contains(k))
        .map(|k| 1i64 << (key_count - 1 - k))
        .sum()
}

impl BatchIterator for HashAggregateOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        ctx.check_cancelled()?;
        if self.output.is_none() {
            let mut reservation = ctx.reserve_memory(self.name());
            while let Some(batch) = self.input.next(ctx)? {
                ctx.check_cancelled()?;
                self.consume(&batch, &mut reservation)?;
            }
            self.output = Some(self.finalize(ctx.batch_size())?);
            self.reservation = Some(reservation);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "HashAggregate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::batch::collect_batches;
    use crate::execution::operators::values::ValuesOperator;
    use crate::query::expression::col;

    fn sales(rows: &[(&str, &str, i64)]) -> BoxedOperator {
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::String, false),
            Field::new("product", DataType::String, false),
            Field::new("qty", DataType::Integer, false),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![
                Arc::new(Column::from_strings(rows.iter().map(|r| Some(r.0)).collect())),
                Arc::new(Column::from_strings(rows.iter().map(|r| Some(r.1)).collect())),
                Arc::new(Column::from_i64(rows.iter().map(|r| Some(r.2)).collect())),
            ],
        )
        .unwrap();
        Box::new(ValuesOperator::new(None, schema, vec![batch]).unwrap())
    }

    fn run(op: &mut HashAggregateOperator) -> Vec<Vec<Value>> {
        let ctx = QueryContext::for_config(EngineConfig::default()).unwrap();
        collect_batches(op, &ctx)
            .unwrap()
            .iter()
            .flat_map(|b| (0..b.row_count()).map(|i| b.row(i)).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_group_by_sum() {
        let mut op = HashAggregateOperator::new(
            sales(&[("EU", "a", 1), ("US", "a", 2), ("EU", "b", 3)]),
            &[ProjectionExpr::new(col("region"))],
            &GroupingSpec::Simple,
            &[AggregateExpr::new(AggregateFunction::Sum, vec![col("qty")])],
            false,
        )
        .unwrap();
        let mut rows = run(&mut op);
        rows.sort_by_key(|r| r[0].to_string());
        assert_eq!(
            rows,
            vec![
                vec![Value::from("EU"), Value::Integer(4)],
                vec![Value::from("US"), Value::Integer(2)],
            ]
        );
    }

    #[test]
    fn test_rollup_with_grouping_id() {
        let mut op = HashAggregateOperator::new(
            sales(&[("EU", "a", 1), ("EU", "b", 3)]),
            &[ProjectionExpr::new(col("region")), ProjectionExpr::new(col("product"))],
            &GroupingSpec::Rollup,
            &[AggregateExpr::count_star()],
            true,
        )
        .unwrap();
        let rows = run(&mut op);
        let mut ids: Vec<i64> = rows.iter().filter_map(|r| r[3].as_i64()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 0, 1, 3]);
        let by_id = |id: i64| rows.iter().find(|r| r[3] == Value::Integer(id)).unwrap().clone();
        assert_eq!(by_id(1), vec![Value::from("EU"), Value::Null, Value::Integer(2), Value::Integer(1)]);
        assert_eq!(by_id(3), vec![Value::Null, Value::Null, Value::Integer(2), Value::Integer(3)]);
    }

    #[test]
    fn test_global_aggregate_over_empty_input() {
        let mut op = HashAggregateOperator::new(
            sales(&[]),
            &[],
            &GroupingSpec::Simple,
            &[
                AggregateExpr::count_star(),
                AggregateExpr::new(AggregateFunction::Sum, vec![col("qty")]),
            ],
            false,
        )
        .unwrap();
        assert_eq!(run(&mut op), vec![vec![Value::Integer(0), Value::Null]]);
    }

    #[test]
    fn test_grouping_id_bits() {
        assert_eq!(grouping_id(&[0, 1], 2), 0);
        assert_eq!(grouping_id(&[1], 2), 2);
        assert_eq!(grouping_id(&[], 3), 7);
    }
}
