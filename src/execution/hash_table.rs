/// Partitioned hash table for the join build side
///
/// Rows are bucketed by key hash into `num_partitions` partitions. The build runs on the
/// worker pool: each worker encodes a contiguous row range, groups it by partition locally,
/// then takes every partition lock at most once to merge its entries.
use crate::error::{EngineError, EngineResult};
use crate::execution::group_key::{GroupKey, KeyEncoder};
use crate::storage::column::Column;
use fxhash::FxHashMap;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Mutex;

/// Minimum rows per build task
const MIN_ROWS_PER_TASK: usize = 4096;

#[derive(Debug)]
pub struct JoinHashTable {
    /// Key -> build row indices, ascending
    partitions: Vec<FxHashMap<GroupKey, Vec<u32>>>,

    /// Rows inserted (rows with a NULL key are left out)
    inserted_rows: usize,
}

fn partition_of(key: &GroupKey, num_partitions: usize) -> usize {
    ((fxhash::hash64(key) >> 32) as usize) % num_partitions
}

fn row_ranges(rows: usize, tasks: usize) -> Vec<Range<usize>> {
    let chunk = rows.div_ceil(tasks.max(1)).max(MIN_ROWS_PER_TASK);
    (0..rows)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(rows))
        .collect()
}

impl JoinHashTable {
    /// Build over `rows` rows of the key columns
    pub fn build(
        encoder: &KeyEncoder,
        keys: &[&Column],
        rows: usize,
        num_partitions: usize,
        pool: &rayon::ThreadPool,
    ) -> EngineResult<Self> {
        let num_partitions = num_partitions.max(1);
        let shared: Vec<Mutex<FxHashMap<GroupKey, Vec<u32>>>> = (0..num_partitions)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        let ranges = row_ranges(rows, pool.current_num_threads());

        pool.install(|| {
            ranges.into_par_iter().try_for_each(|range| -> EngineResult<()> {
                let mut local: Vec<Vec<(GroupKey, u32)>> = vec![Vec::new(); num_partitions];
                for row in range {
                    let key = encoder.encode_row(keys, row);
                    if key.has_null() {
                        continue;
                    }
                    local[partition_of(&key, num_partitions)].push((key, row as u32));
                }
                for (partition, entries) in local.into_iter().enumerate() {
                    if entries.is_empty() {
                        continue;
                    }
                    let mut map = shared[partition]
                        .lock()
                        .map_err(|_| EngineError::internal("join partition lock poisoned"))?;
                    for (key, row) in entries {
                        map.entry(key).or_default().push(row);
                    }
                }
                Ok(())
            })
        })?;

        let mut partitions = shared
            .into_iter()
            .map(|m| {
                m.into_inner()
                    .map_err(|_| EngineError::internal("join partition lock poisoned"))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        // ranges finish in any order; sorting restores build order within a key
        pool.install(|| {
            partitions.par_iter_mut().for_each(|map| {
                map.values_mut().for_each(|rows| rows.sort_unstable());
            })
        });
        let inserted_rows = partitions
            .iter()
            .flat_map(|m| m.values())
            .map(Vec::len)
            .sum();

        Ok(Self {
            partitions,
            inserted_rows,
        })
    }

    /// Build rows whose key equals `key`
    pub fn get(&self, key: &GroupKey) -> Option<&[u32]> {
        let partition = partition_of(key, self.partitions.len());
        self.partitions[partition].get(key).map(Vec::as_slice)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn inserted_rows(&self) -> usize {
        self.inserted_rows
    }

    pub fn distinct_keys(&self) -> usize {
        self.partitions.iter().map(|m| m.len()).sum()
    }

    /// Approximate footprint for memory accounting
    pub fn memory_size(&self) -> usize {
        self.partitions
            .iter()
            .flat_map(|m| m.iter())
            .map(|(k, v)| k.memory_size() + v.capacity() * 4 + 16)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_build_and_probe() {
        let encoder = KeyEncoder::new();
        let keys = Column::from_i64(vec![Some(1), Some(2), Some(1), None, Some(3)]);
        let table = JoinHashTable::build(&encoder, &[&keys], 5, 4, &pool()).unwrap();
        assert_eq!(table.inserted_rows(), 4);
        assert_eq!(table.distinct_keys(), 3);

        let probe = Column::from_i64(vec![Some(1), Some(9)]);
        let k1 = encoder.try_encode_row(&[&probe], 0).unwrap();
        assert_eq!(table.get(&k1), Some(&[0u32, 2][..]));
        let k9 = encoder.try_encode_row(&[&probe], 1).unwrap();
        assert_eq!(table.get(&k9), None);
    }

    #[test]
    fn test_parallel_build_keeps_row_order() {
        let encoder = KeyEncoder::new();
        let n = 20_000;
        let keys = Column::from_i64((0..n).map(|i| Some((i % 7) as i64)).collect());
        let table = JoinHashTable::build(&encoder, &[&keys], n, 8, &pool()).unwrap();
        let probe = Column::from_i64(vec![Some(3)]);
        let key = encoder.try_encode_row(&[&probe], 0).unwrap();
        let rows = table.get(&key).unwrap();
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
        assert!(rows.iter().all(|r| r % 7 == 3));
        assert_eq!(table.inserted_rows(), n);
    }
}
