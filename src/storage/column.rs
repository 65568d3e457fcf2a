/// Typed column storage
///
/// A column is a dense typed vector plus a validity bitmap (1 = non-null). Null slots hold
/// the type's default value so kernels can run over the dense data without branching.
use crate::error::{EngineError, EngineResult};
use crate::storage::value::{DataType, Value, MICROS_PER_DAY};
use bitvec::prelude::*;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::sync::Arc;

/// Dense values of one column
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Integer(Vec<i64>),
    Double(Vec<f64>),
    Boolean(BitVec),
    String(Vec<String>),
    Date(Vec<i32>),
    Timestamp(Vec<i64>),
}

impl ColumnData {
    pub fn empty(data_type: DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Integer => ColumnData::Integer(Vec::with_capacity(capacity)),
            DataType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            DataType::Boolean => ColumnData::Boolean(BitVec::with_capacity(capacity)),
            DataType::String => ColumnData::String(Vec::with_capacity(capacity)),
            DataType::Date => ColumnData::Date(Vec::with_capacity(capacity)),
            DataType::Timestamp => ColumnData::Timestamp(Vec::with_capacity(capacity)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Integer(_) => DataType::Integer,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::Boolean(_) => DataType::Boolean,
            ColumnData::String(_) => DataType::String,
            ColumnData::Date(_) => DataType::Date,
            ColumnData::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Date(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_default(&mut self) {
        match self {
            ColumnData::Integer(v) => v.push(0),
            ColumnData::Double(v) => v.push(0.0),
            ColumnData::Boolean(v) => v.push(false),
            ColumnData::String(v) => v.push(String::new()),
            ColumnData::Date(v) => v.push(0),
            ColumnData::Timestamp(v) => v.push(0),
        }
    }

    /// Copy slot `row` of `other` (same type) onto the end of `self`
    fn push_from(&mut self, other: &ColumnData, row: usize) {
        match (self, other) {
            (ColumnData::Integer(d), ColumnData::Integer(s)) => d.push(s[row]),
            (ColumnData::Double(d), ColumnData::Double(s)) => d.push(s[row]),
            (ColumnData::Boolean(d), ColumnData::Boolean(s)) => d.push(s[row]),
            (ColumnData::String(d), ColumnData::String(s)) => d.push(s[row].clone()),
            (ColumnData::Date(d), ColumnData::Date(s)) => d.push(s[row]),
            (ColumnData::Timestamp(d), ColumnData::Timestamp(s)) => d.push(s[row]),
            (d, _) => d.push_default(),
        }
    }
}

/// A typed column with validity bitmap
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub(crate) data: ColumnData,
    pub(crate) validity: BitVec,
}

impl Column {
    /// Build a column; the bitmap length must equal the value count
    pub fn try_new(data: ColumnData, validity: BitVec) -> EngineResult<Self> {
        if data.len() != validity.len() {
            return Err(EngineError::internal(format!(
                "column has {} values but a validity bitmap of {}",
                data.len(),
                validity.len()
            )));
        }
        Ok(Self { data, validity })
    }

    /// Column without nulls
    pub fn from_data(data: ColumnData) -> Self {
        let validity = bitvec![1; data.len()];
        Self { data, validity }
    }

    pub fn from_i64(values: Vec<Option<i64>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::Integer(values.into_iter().map(|v| v.unwrap_or(0)).collect()),
            validity,
        }
    }

    pub fn from_f64(values: Vec<Option<f64>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::Double(values.into_iter().map(|v| v.unwrap_or(0.0)).collect()),
            validity,
        }
    }

    pub fn from_bool(values: Vec<Option<bool>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::Boolean(values.into_iter().map(|v| v.unwrap_or(false)).collect()),
            validity,
        }
    }

    pub fn from_strings<S: Into<String>>(values: Vec<Option<S>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::String(
                values
                    .into_iter()
                    .map(|v| v.map(Into::into).unwrap_or_default())
                    .collect(),
            ),
            validity,
        }
    }

    pub fn from_dates(values: Vec<Option<i32>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::Date(values.into_iter().map(|v| v.unwrap_or(0)).collect()),
            validity,
        }
    }

    pub fn from_timestamps(values: Vec<Option<i64>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        Self {
            data: ColumnData::Timestamp(values.into_iter().map(|v| v.unwrap_or(0)).collect()),
            validity,
        }
    }

    /// Build from scalar values; every non-null value must convert to `data_type`
    pub fn from_values(data_type: DataType, values: &[Value]) -> EngineResult<Self> {
        let mut builder = ColumnBuilder::with_capacity(data_type, values.len());
        for value in values {
            builder.append_value(value)?;
        }
        Ok(builder.finish())
    }

    /// `len` copies of one scalar
    pub fn from_scalar(value: &Value, data_type: DataType, len: usize) -> EngineResult<Self> {
        if value.is_null() {
            return Ok(Self::new_null(data_type, len));
        }
        let mut builder = ColumnBuilder::with_capacity(data_type, len);
        for _ in 0..len {
            builder.append_value(value)?;
        }
        Ok(builder.finish())
    }

    pub fn new_null(data_type: DataType, len: usize) -> Self {
        let mut data = ColumnData::with_capacity(data_type, len);
        for _ in 0..len {
            data.push_default();
        }
        Self {
            data,
            validity: bitvec![0; len],
        }
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> &BitVec {
        &self.validity
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        !self.validity[row]
    }

    pub fn null_count(&self) -> usize {
        self.validity.count_zeros()
    }

    /// Scalar at `row`
    pub fn value(&self, row: usize) -> Value {
        if !self.validity[row] {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Integer(v) => Value::Integer(v[row]),
            ColumnData::Double(v) => Value::Double(v[row]),
            ColumnData::Boolean(v) => Value::Boolean(v[row]),
            ColumnData::String(v) => Value::String(v[row].clone()),
            ColumnData::Date(v) => Value::Date(v[row]),
            ColumnData::Timestamp(v) => Value::Timestamp(v[row]),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    /// Gather rows by index
    pub fn take(&self, indices: &[u32]) -> Column {
        let mut data = ColumnData::with_capacity(self.data_type(), indices.len());
        let mut validity = BitVec::with_capacity(indices.len());
        for &idx in indices {
            let idx = idx as usize;
            data.push_from(&self.data, idx);
            validity.push(self.validity[idx]);
        }
        Column { data, validity }
    }

    /// Gather rows by index; `None` produces a NULL slot (outer join padding)
    pub fn take_opt(&self, indices: &[Option<u32>]) -> Column {
        let mut data = ColumnData::with_capacity(self.data_type(), indices.len());
        let mut validity = BitVec::with_capacity(indices.len());
        for idx in indices {
            match idx {
                Some(idx) => {
                    let idx = *idx as usize;
                    data.push_from(&self.data, idx);
                    validity.push(self.validity[idx]);
                }
                None => {
                    data.push_default();
                    validity.push(false);
                }
            }
        }
        Column { data, validity }
    }

    /// Keep the rows whose selection bit is set
    pub fn filter(&self, selection: &BitSlice) -> Column {
        let indices: Vec<u32> = selection.iter_ones().map(|i| i as u32).collect();
        self.take(&indices)
    }

    pub fn slice(&self, offset: usize, len: usize) -> Column {
        let end = (offset + len).min(self.len());
        let indices: Vec<u32> = (offset..end).map(|i| i as u32).collect();
        self.take(&indices)
    }

    /// Append columns of the same type
    pub fn concat(columns: &[&Column]) -> EngineResult<Column> {
        let first = columns
            .first()
            .ok_or_else(|| EngineError::internal("concat of zero columns"))?;
        let data_type = first.data_type();
        let total = columns.iter().map(|c| c.len()).sum();
        let mut data = ColumnData::with_capacity(data_type, total);
        let mut validity = BitVec::with_capacity(total);
        for column in columns {
            if column.data_type() != data_type {
                return Err(EngineError::internal(format!(
                    "cannot concat {} column onto {}",
                    column.data_type(),
                    data_type
                )));
            }
            match (&mut data, &column.data) {
                (ColumnData::Integer(d), ColumnData::Integer(s)) => d.extend_from_slice(s),
                (ColumnData::Double(d), ColumnData::Double(s)) => d.extend_from_slice(s),
                (ColumnData::Boolean(d), ColumnData::Boolean(s)) => d.extend_from_bitslice(s),
                (ColumnData::String(d), ColumnData::String(s)) => d.extend(s.iter().cloned()),
                (ColumnData::Date(d), ColumnData::Date(s)) => d.extend_from_slice(s),
                (ColumnData::Timestamp(d), ColumnData::Timestamp(s)) => d.extend_from_slice(s),
                _ => unreachable!("types checked above"),
            }
            validity.extend_from_bitslice(&column.validity);
        }
        Ok(Column { data, validity })
    }

    /// Strict cast; text that does not parse as the target type is a type mismatch
    pub fn cast(&self, target: DataType) -> EngineResult<Column> {
        if self.data_type() == target {
            return Ok(self.clone());
        }
        let data = match (&self.data, target) {
            (ColumnData::Integer(v), DataType::Double) => {
                ColumnData::Double(v.iter().map(|x| *x as f64).collect())
            }
            (ColumnData::Date(v), DataType::Timestamp) => {
                ColumnData::Timestamp(v.iter().map(|d| *d as i64 * MICROS_PER_DAY).collect())
            }
            (ColumnData::Timestamp(v), DataType::Date) => ColumnData::Date(
                v.iter()
                    .map(|t| t.div_euclid(MICROS_PER_DAY) as i32)
                    .collect(),
            ),
            _ => {
                let mut builder = ColumnBuilder::with_capacity(target, self.len());
                for row in 0..self.len() {
                    builder.append_value(&self.value(row).cast_to(target)?)?;
                }
                return Ok(builder.finish());
            }
        };
        Ok(Column {
            data,
            validity: self.validity.clone(),
        })
    }

    /// Approximate heap footprint, used for memory accounting
    pub fn memory_size(&self) -> usize {
        let values = match &self.data {
            ColumnData::Integer(v) => v.len() * 8,
            ColumnData::Double(v) => v.len() * 8,
            ColumnData::Boolean(v) => v.len().div_ceil(8),
            ColumnData::String(v) => v
                .iter()
                .map(|s| s.len() + std::mem::size_of::<String>())
                .sum(),
            ColumnData::Date(v) => v.len() * 4,
            ColumnData::Timestamp(v) => v.len() * 8,
        };
        values + self.validity.len().div_ceil(8)
    }

    /// Compare two non-null slots of this column
    pub fn cmp_rows(&self, a: usize, b: usize) -> Ordering {
        match &self.data {
            ColumnData::Integer(v) => v[a].cmp(&v[b]),
            ColumnData::Double(v) => OrderedFloat(v[a]).cmp(&OrderedFloat(v[b])),
            ColumnData::Boolean(v) => v[a].cmp(&v[b]),
            ColumnData::String(v) => v[a].cmp(&v[b]),
            ColumnData::Date(v) => v[a].cmp(&v[b]),
            ColumnData::Timestamp(v) => v[a].cmp(&v[b]),
        }
    }

    /// Null-aware row equality (NULL equals NULL), used for peer detection
    pub fn rows_equal(&self, a: usize, b: usize) -> bool {
        match (self.validity[a], self.validity[b]) {
            (false, false) => true,
            (true, true) => self.cmp_rows(a, b) == Ordering::Equal,
            _ => false,
        }
    }
}

/// Row-at-a-time column builder
pub struct ColumnBuilder {
    data: ColumnData,
    validity: BitVec,
}

impl ColumnBuilder {
    pub fn new(data_type: DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        Self {
            data: ColumnData::with_capacity(data_type, capacity),
            validity: BitVec::with_capacity(capacity),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    pub fn append_null(&mut self) {
        self.data.push_default();
        self.validity.push(false);
    }

    /// Append a scalar; Integer widens into Double and Date into Timestamp columns
    pub fn append_value(&mut self, value: &Value) -> EngineResult<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }
        match (&mut self.data, value) {
            (ColumnData::Integer(v), Value::Integer(x)) => v.push(*x),
            (ColumnData::Double(v), Value::Double(x)) => v.push(*x),
            (ColumnData::Double(v), Value::Integer(x)) => v.push(*x as f64),
            (ColumnData::Boolean(v), Value::Boolean(x)) => v.push(*x),
            (ColumnData::String(v), Value::String(x)) => v.push(x.clone()),
            (ColumnData::Date(v), Value::Date(x)) => v.push(*x),
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v.push(*x),
            (ColumnData::Timestamp(v), Value::Date(x)) => v.push(*x as i64 * MICROS_PER_DAY),
            (data, other) => {
                return Err(EngineError::type_mismatch(format!(
                    "cannot store {} in a {} column",
                    other,
                    data.data_type()
                )))
            }
        }
        self.validity.push(true);
        Ok(())
    }

    pub fn finish(self) -> Column {
        Column {
            data: self.data,
            validity: self.validity,
        }
    }

    pub fn finish_arc(self) -> Arc<Column> {
        Arc::new(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_tracks_values() {
        let col = Column::from_f64(vec![None, Some(10.0), Some(20.0)]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.data().len(), col.validity().len());
        assert_eq!(col.null_count(), 1);
        assert_eq!(col.value(0), Value::Null);
        assert_eq!(col.value(2), Value::Double(20.0));
    }

    #[test]
    fn test_try_new_rejects_length_mismatch() {
        let err = Column::try_new(ColumnData::Integer(vec![1, 2]), bitvec![1; 3]);
        assert!(err.is_err());
    }

    #[test]
    fn test_take_opt_pads_nulls() {
        let col = Column::from_strings(vec![Some("a"), Some("b")]);
        let out = col.take_opt(&[Some(1), None, Some(0)]);
        assert_eq!(
            out.values(),
            vec![Value::from("b"), Value::Null, Value::from("a")]
        );
    }

    #[test]
    fn test_concat_and_slice() {
        let a = Column::from_i64(vec![Some(1), None]);
        let b = Column::from_i64(vec![Some(3)]);
        let c = Column::concat(&[&a, &b]).unwrap();
        assert_eq!(c.values(), vec![Value::Integer(1), Value::Null, Value::Integer(3)]);
        assert_eq!(c.slice(1, 5).len(), 2);
    }

    #[test]
    fn test_strict_cast() {
        let col = Column::from_strings(vec![Some("1"), None, Some("x")]);
        assert!(col.cast(DataType::Integer).is_err());
        let ok = Column::from_strings(vec![Some("1"), None]).cast(DataType::Integer).unwrap();
        assert_eq!(ok.values(), vec![Value::Integer(1), Value::Null]);
    }

    #[test]
    fn test_builder_widens_integer_into_double() {
        let mut builder = ColumnBuilder::new(DataType::Double);
        builder.append_value(&Value::Integer(2)).unwrap();
        builder.append_null();
        assert!(builder.append_value(&Value::from("x")).is_err());
        let col = builder.finish();
        assert_eq!(col.values(), vec![Value::Double(2.0), Value::Null]);
    }
}
