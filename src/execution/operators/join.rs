/// Hash equi-join (INNER and LEFT OUTER)
///
/// The right input is the build side. On the first pull the build input is drained on the
/// worker pool while the first probe batch is fetched, then hashed into a partitioned
/// `JoinHashTable`. Probe batches stream through afterwards. Key pairs are coerced to their
/// common type at bind time; a NULL key never matches.
use crate::error::{EngineError, EngineResult};
use crate::execution::batch::BatchIterator;
use crate::execution::context::QueryContext;
use crate::execution::evaluator::evaluate;
use crate::execution::group_key::KeyEncoder;
use crate::execution::hash_table::JoinHashTable;
use crate::execution::memory_pool::MemoryReservation;
use crate::execution::operators::BoxedOperator;
use crate::query::expression::Expr;
use crate::query::plan::JoinType;
use crate::storage::column::Column;
use crate::storage::columnar::{Batch, Schema, SchemaRef};
use crate::storage::value::DataType;
use std::sync::Arc;
use tracing::{debug, info};

struct BuildSide {
    batch: Batch,
    table: JoinHashTable,
}

pub struct HashJoinOperator {
    probe: BoxedOperator,
    build_input: Option<BoxedOperator>,
    join_type: JoinType,
    probe_keys: Vec<Expr>,
    build_keys: Vec<Expr>,
    key_types: Vec<DataType>,
    schema: SchemaRef,
    build_schema: SchemaRef,
    encoder: KeyEncoder,
    build: Option<BuildSide>,
    /// Probe batch fetched concurrently with the build
    pending: Option<Batch>,
    reservation: Option<MemoryReservation>,
}

/// Evaluate key expressions and cast them to the join key types
fn key_columns(exprs: &[Expr], types: &[DataType], batch: &Batch) -> EngineResult<Vec<Arc<Column>>> {
    exprs
        .iter()
        .zip(types)
        .map(|(expr, &data_type)| {
            let column = evaluate(expr, batch)?;
            if column.data_type() == data_type {
                Ok(column)
            } else {
                Ok(Arc::new(column.cast(data_type)?))
            }
        })
        .collect()
}

impl HashJoinOperator {
    pub fn new(
        probe: BoxedOperator,
        build: BoxedOperator,
        join_type: JoinType,
        on: &[(Expr, Expr)],
    ) -> EngineResult<Self> {
        if on.is_empty() {
            return Err(EngineError::planning("hash join needs at least one key pair"));
        }
        KeyEncoder::check_width(on.len())?;
        let probe_schema = probe.schema();
        let build_schema = build.schema();
        let mut key_types = Vec::with_capacity(on.len());
        for (probe_key, build_key) in on {
            let left = probe_key.data_type(&probe_schema)?;
            let right = build_key.data_type(&build_schema)?;
            let common = DataType::common_supertype(left, right).ok_or_else(|| {
                EngineError::type_mismatch(format!(
                    "cannot join {} ({}) with {} ({})",
                    probe_key, left, build_key, right
                ))
            })?;
            key_types.push(common);
        }

        let build_fields = match join_type {
            JoinType::Inner => build_schema.fields().to_vec(),
            JoinType::Left => build_schema
                .fields()
                .iter()
                .map(|f| f.clone().with_nullable(true))
                .collect(),
        };
        let schema = Arc::new(probe_schema.join(&Schema::new(build_fields)));
        Ok(Self {
            probe,
            build_input: Some(build),
            join_type,
            probe_keys: on.iter().map(|(p, _)| p.clone()).collect(),
            build_keys: on.iter().map(|(_, b)| b.clone()).collect(),
            key_types,
            schema,
            build_schema,
            encoder: KeyEncoder::new(),
            build: None,
            pending: None,
            reservation: None,
        })
    }

    fn build_phase(&mut self, ctx: &QueryContext) -> EngineResult<()> {
        let Some(mut build_input) = self.build_input.take() else {
            return Ok(());
        };
        let mut reservation = ctx.reserve_memory("HashJoin");
        let probe = &mut self.probe;
        let (drained, first_probe) = ctx.thread_pool().join(
            || -> EngineResult<(Vec<Batch>, MemoryReservation)> {
                let mut batches = Vec::new();
                while let Some(batch) = build_input.next(ctx)? {
                    ctx.check_cancelled()?;
                    if batch.is_empty() {
                        continue;
                    }
                    reservation.try_grow(batch.memory_size())?;
                    batches.push(batch);
                }
                Ok((batches, reservation))
            },
            || probe.next(ctx),
        );
        let (batches, mut reservation) = drained?;
        self.pending = first_probe?;

        let batch = Batch::concat(&self.build_schema, &batches)?;
        drop(batches);
        let keys = key_columns(&self.build_keys, &self.key_types, &batch)?;
        let key_refs: Vec<&Column> = keys.iter().map(|c| c.as_ref()).collect();
        let table = JoinHashTable::build(
            &self.encoder,
            &key_refs,
            batch.row_count(),
            ctx.config().memory.join_partitions,
            ctx.thread_pool(),
        )?;
        reservation.resize(batch.memory_size() + table.memory_size())?;
        info!(
            build_rows = batch.row_count(),
            distinct_keys = table.distinct_keys(),
            partitions = table.num_partitions(),
            join_type = ?self.join_type,
            "join build complete"
        );
        self.build = Some(BuildSide { batch, table });
        self.reservation = Some(reservation);
        Ok(())
    }

    fn probe_batch(&self, probe: &Batch) -> EngineResult<Batch> {
        let Some(build) = &self.build else {
            return Err(EngineError::internal("join probed before build"));
        };
        let keys = key_columns(&self.probe_keys, &self.key_types, probe)?;
        let key_refs: Vec<&Column> = keys.iter().map(|c| c.as_ref()).collect();

        let mut probe_rows: Vec<u32> = Vec::with_capacity(probe.row_count());
        let mut build_rows: Vec<Option<u32>> = Vec::with_capacity(probe.row_count());
        for row in 0..probe.row_count() {
            let matches = self
                .encoder
                .try_encode_row(&key_refs, row)
                .filter(|key| !key.has_null())
                .and_then(|key| build.table.get(&key));
            match matches {
                Some(rows) => {
                    for &b in rows {
                        probe_rows.push(row as u32);
                        build_rows.push(Some(b));
                    }
                }
                None if self.join_type == JoinType::Left => {
                    probe_rows.push(row as u32);
                    build_rows.push(None);
                }
                None => {}
            }
        }

        let mut columns: Vec<Arc<Column>> = probe
            .columns()
            .iter()
            .map(|c| Arc::new(c.take(&probe_rows)))
            .collect();
        columns.extend(
            build
                .batch
                .columns()
                .iter()
                .map(|c| Arc::new(c.take_opt(&build_rows))),
        );
        debug!(probe_rows = probe.row_count(), output_rows = probe_rows.len(), "join probe");
        Batch::try_new_with_row_count(self.schema.clone(), columns, probe_rows.len())
    }
}

impl BatchIterator for HashJoinOperator {
    fn next(&mut self, ctx: &QueryContext) -> EngineResult<Option<Batch>> {
        if self.build.is_none() {
            self.build_phase(ctx)?;
        }
        loop {
            ctx.check_cancelled()?;
            let next = match self.pending.take() {
                Some(batch) => Some(batch),
                None => self.probe.next(ctx)?,
            };
            let Some(batch) = next else {
                return Ok(None);
            };
            let joined = self.probe_batch(&batch)?;
            if !joined.is_empty() {
                return Ok(Some(joined));
            }
        }
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn name(&self) -> &'static str {
        "HashJoin"
    }
}
