/// Fixed-width row keys for grouping and join hash tables
///
/// Each key column maps to one `u64` slot; strings go through a concurrent dictionary so
/// equal strings get equal slots. NULL slots are zero with the column's bit set in `null_mask`,
/// which makes two NULLs equal for grouping. Join probes use `try_encode_row`, which never
/// grows the dictionary: an unseen string cannot match any build row.
use crate::error::{EngineError, EngineResult};
use crate::storage::column::{Column, ColumnData};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of key columns (one null-mask bit each)
pub const MAX_KEY_COLUMNS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    slots: Box<[u64]>,
    null_mask: u64,
}

impl GroupKey {
    /// Key of zero columns; the single group of the `()` grouping set
    pub fn empty() -> Self {
        Self {
            slots: Box::new([]),
            null_mask: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn has_null(&self) -> bool {
        self.null_mask != 0
    }

    pub fn is_null(&self, position: usize) -> bool {
        self.null_mask & (1u64 << position) != 0
    }

    /// Sub-key over `positions` (indices into this key)
    pub fn project(&self, positions: &[usize]) -> GroupKey {
        let mut null_mask = 0;
        let slots = positions
            .iter()
            .enumerate()
            .map(|(out, &pos)| {
                if self.is_null(pos) {
                    null_mask |= 1u64 << out;
                }
                self.slots[pos]
            })
            .collect();
        GroupKey { slots, null_mask }
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<GroupKey>() + self.slots.len() * 8
    }
}

/// Canonical bits so that 0.0 == -0.0 and all NaNs are equal
fn double_bits(v: f64) -> u64 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Shared string dictionary of one operator
#[derive(Debug, Default)]
pub struct KeyEncoder {
    dictionary: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl KeyEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_width(columns: usize) -> EngineResult<()> {
        if columns > MAX_KEY_COLUMNS {
            return Err(EngineError::planning(format!(
                "{} key columns exceed the limit of {}",
                columns, MAX_KEY_COLUMNS
            )));
        }
        Ok(())
    }

    fn string_id(&self, s: &str) -> u64 {
        if let Some(id) = self.dictionary.get(s) {
            return *id;
        }
        *self
            .dictionary
            .entry(s.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn slot(&self, column: &Column, row: usize, insert: bool) -> Option<u64> {
        let slot = match column.data() {
            ColumnData::Integer(v) => v[row] as u64,
            ColumnData::Double(v) => double_bits(v[row]),
            ColumnData::Boolean(v) => v[row] as u64,
            ColumnData::Date(v) => v[row] as i64 as u64,
            ColumnData::Timestamp(v) => v[row] as u64,
            ColumnData::String(v) if insert => self.string_id(&v[row]),
            ColumnData::String(v) => *self.dictionary.get(v[row].as_str())?,
        };
        Some(slot)
    }

    fn build_key(&self, columns: &[&Column], row: usize, insert: bool) -> Option<GroupKey> {
        let mut null_mask = 0;
        let mut slots = Vec::with_capacity(columns.len());
        for (pos, column) in columns.iter().enumerate() {
            if column.is_null(row) {
                null_mask |= 1u64 << pos;
                slots.push(0);
            } else {
                slots.push(self.slot(column, row, insert)?);
            }
        }
        Some(GroupKey {
            slots: slots.into_boxed_slice(),
            null_mask,
        })
    }

    /// Key of `row`, adding unseen strings to the dictionary
    pub fn encode_row(&self, columns: &[&Column], row: usize) -> GroupKey {
        match self.build_key(columns, row, true) {
            Some(key) => key,
            // inserting lookups always produce a slot
            None => GroupKey::empty(),
        }
    }

    /// Key of `row` without growing the dictionary; None if a string was never encoded
    pub fn try_encode_row(&self, columns: &[&Column], row: usize) -> Option<GroupKey> {
        self.build_key(columns, row, false)
    }

    /// Keys of every row of equal-length columns
    pub fn encode_all(&self, columns: &[&Column], rows: usize) -> Vec<GroupKey> {
        (0..rows).map(|row| self.encode_row(columns, row)).collect()
    }

    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }
}
