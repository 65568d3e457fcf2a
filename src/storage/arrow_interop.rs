/// Conversions between engine batches and Arrow record batches
///
/// Arrow is the interchange layer for the Parquet reader/writer and for callers that want
/// `RecordBatch` output. Integer widths collapse to Int64, floats to Float64, every
/// timestamp unit to microseconds.
use crate::error::{EngineError, EngineResult};
use crate::storage::column::{Column, ColumnData};
use crate::storage::columnar::{Batch, Field, Schema, SchemaRef};
use crate::storage::value::DataType;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, LargeStringArray,
    StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bitvec::prelude::*;
use std::sync::Arc;

/// Engine type an Arrow type is read as; None when the type is not supported
pub fn from_arrow_type(data_type: &ArrowDataType) -> Option<DataType> {
    use ArrowDataType as A;
    let mapped = match data_type {
        A::Int8 | A::Int16 | A::Int32 | A::Int64 => DataType::Integer,
        A::UInt8 | A::UInt16 | A::UInt32 | A::UInt64 => DataType::Integer,
        A::Float16 | A::Float32 | A::Float64 => DataType::Double,
        A::Decimal128(_, _) | A::Decimal256(_, _) => DataType::Double,
        A::Boolean => DataType::Boolean,
        A::Utf8 | A::LargeUtf8 | A::Utf8View | A::Null => DataType::String,
        A::Date32 | A::Date64 => DataType::Date,
        A::Timestamp(_, _) => DataType::Timestamp,
        A::Dictionary(_, value) => return from_arrow_type(value),
        _ => return None,
    };
    Some(mapped)
}

pub fn to_arrow_type(data_type: DataType) -> ArrowDataType {
    match data_type {
        DataType::Integer => ArrowDataType::Int64,
        DataType::Double => ArrowDataType::Float64,
        DataType::Boolean => ArrowDataType::Boolean,
        DataType::String => ArrowDataType::Utf8,
        DataType::Date => ArrowDataType::Date32,
        DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

pub fn to_arrow_schema(schema: &Schema) -> ArrowSchema {
    ArrowSchema::new(
        schema
            .fields()
            .iter()
            .map(|f| ArrowField::new(&f.name, to_arrow_type(f.data_type), f.nullable))
            .collect::<Vec<_>>(),
    )
}

pub fn from_arrow_schema(schema: &ArrowSchema) -> EngineResult<Schema> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            let data_type = from_arrow_type(f.data_type()).ok_or_else(|| {
                EngineError::format(format!(
                    "column '{}' has unsupported type {}",
                    f.name(),
                    f.data_type()
                ))
            })?;
            Ok(Field::new(f.name().clone(), data_type, f.is_nullable()))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(Schema::new(fields))
}

pub fn column_to_array(column: &Column) -> ArrayRef {
    let validity = column.validity();
    match column.data() {
        ColumnData::Integer(v) => Arc::new(Int64Array::from(with_nulls(v, validity))),
        ColumnData::Double(v) => Arc::new(Float64Array::from(with_nulls(v, validity))),
        ColumnData::Boolean(v) => Arc::new(BooleanArray::from(
            v.iter()
                .by_vals()
                .zip(validity.iter().by_vals())
                .map(|(x, valid)| valid.then_some(x))
                .collect::<Vec<_>>(),
        )),
        ColumnData::String(v) => Arc::new(StringArray::from(
            v.iter()
                .zip(validity.iter().by_vals())
                .map(|(s, valid)| valid.then_some(s.as_str()))
                .collect::<Vec<_>>(),
        )),
        ColumnData::Date(v) => Arc::new(Date32Array::from(with_nulls(v, validity))),
        ColumnData::Timestamp(v) => {
            Arc::new(TimestampMicrosecondArray::from(with_nulls(v, validity)))
        }
    }
}

fn with_nulls<T: Copy>(values: &[T], validity: &BitVec) -> Vec<Option<T>> {
    values
        .iter()
        .zip(validity.iter().by_vals())
        .map(|(x, valid)| valid.then_some(*x))
        .collect()
}

/// Convert one Arrow array into a column of `target` type
pub fn array_to_column(array: &dyn Array, target: DataType) -> EngineResult<Column> {
    let arrow_type = array.data_type();

    if matches!(arrow_type, ArrowDataType::Null) {
        return Ok(Column::new_null(target, array.len()));
    }

    // validity is taken after the cast: a value the cast cannot represent becomes NULL
    let (data, validity) = match target {
        DataType::Integer => {
            let casted = cast_if_needed(array, &ArrowDataType::Int64)?;
            let arr = downcast::<Int64Array>(casted.as_ref(), "Int64Array")?;
            (ColumnData::Integer(arr.values().to_vec()), validity_of(arr))
        }
        DataType::Double => {
            let casted = cast_if_needed(array, &ArrowDataType::Float64)?;
            let arr = downcast::<Float64Array>(casted.as_ref(), "Float64Array")?;
            (ColumnData::Double(arr.values().to_vec()), validity_of(arr))
        }
        DataType::Boolean => {
            let casted = cast_if_needed(array, &ArrowDataType::Boolean)?;
            let arr = downcast::<BooleanArray>(casted.as_ref(), "BooleanArray")?;
            (ColumnData::Boolean((0..arr.len()).map(|i| arr.value(i)).collect()), validity_of(arr))
        }
        DataType::String => match arrow_type {
            ArrowDataType::LargeUtf8 => {
                let arr = downcast::<LargeStringArray>(array, "LargeStringArray")?;
                let values = (0..arr.len())
                    .map(|i| if arr.is_valid(i) { arr.value(i).to_string() } else { String::new() })
                    .collect();
                (ColumnData::String(values), validity_of(arr))
            }
            _ => {
                let casted = cast_if_needed(array, &ArrowDataType::Utf8)?;
                let arr = downcast::<StringArray>(casted.as_ref(), "StringArray")?;
                let values = (0..arr.len())
                    .map(|i| if arr.is_valid(i) { arr.value(i).to_string() } else { String::new() })
                    .collect();
                (ColumnData::String(values), validity_of(arr))
            }
        },
        DataType::Date => {
            let casted = cast_if_needed(array, &ArrowDataType::Date32)?;
            let arr = downcast::<Date32Array>(casted.as_ref(), "Date32Array")?;
            (ColumnData::Date(arr.values().to_vec()), validity_of(arr))
        }
        DataType::Timestamp => {
            // keep the zone so the stored instant stays UTC micros
            let tz = match arrow_type {
                ArrowDataType::Timestamp(_, tz) => tz.clone(),
                _ => None,
            };
            let casted =
                cast_if_needed(array, &ArrowDataType::Timestamp(TimeUnit::Microsecond, tz))?;
            let arr = downcast::<TimestampMicrosecondArray>(casted.as_ref(), "TimestampMicrosecondArray")?;
            (ColumnData::Timestamp(arr.values().to_vec()), validity_of(arr))
        }
    };
    Column::try_new(data, validity)
}

fn validity_of(array: &dyn Array) -> BitVec {
    (0..array.len()).map(|i| array.is_valid(i)).collect()
}

fn cast_if_needed(array: &dyn Array, to: &ArrowDataType) -> EngineResult<ArrayRef> {
    if array.data_type() == to {
        return Ok(arrow::array::make_array(array.to_data()));
    }
    Ok(cast(array, to)?)
}

fn downcast<'a, T: 'static>(array: &'a dyn Array, name: &str) -> EngineResult<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| EngineError::internal(format!("failed to downcast {}", name)))
}

/// Engine batch to Arrow record batch
pub fn to_record_batch(batch: &Batch) -> EngineResult<RecordBatch> {
    let schema = Arc::new(to_arrow_schema(batch.schema()));
    let columns: Vec<ArrayRef> = batch.columns().iter().map(|c| column_to_array(c)).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(batch.row_count()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

/// Arrow record batch to engine batch with the given schema (types converted as needed)
pub fn from_record_batch(record_batch: &RecordBatch, schema: &SchemaRef) -> EngineResult<Batch> {
    if record_batch.num_columns() != schema.len() {
        return Err(EngineError::schema(format!(
            "record batch has {} columns, schema has {}",
            record_batch.num_columns(),
            schema.len()
        )));
    }
    let columns = record_batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(array, field)| array_to_column(array.as_ref(), field.data_type).map(Arc::new))
        .collect::<EngineResult<Vec<_>>>()?;
    Batch::try_new_with_row_count(schema.clone(), columns, record_batch.num_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::Value;

    #[test]
    fn test_record_batch_round_trip_keeps_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Integer, false),
            Field::new("amt", DataType::Double, true),
            Field::new("region", DataType::String, true),
            Field::new("day", DataType::Date, true),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![
                Arc::new(Column::from_i64(vec![Some(1), Some(2)])),
                Arc::new(Column::from_f64(vec![None, Some(10.0)])),
                Arc::new(Column::from_strings(vec![Some("North"), None])),
                Arc::new(Column::from_dates(vec![Some(19_000), None])),
            ],
        )
        .unwrap();
        let rb = to_record_batch(&batch).unwrap();
        assert_eq!(rb.num_rows(), 2);
        let back = from_record_batch(&rb, &schema).unwrap();
        assert_eq!(back.row(0), batch.row(0));
        assert_eq!(back.row(1), batch.row(1));
        assert_eq!(back.row(1)[2], Value::Null);
    }

    #[test]
    fn test_narrow_arrow_types_widen() {
        let arr = arrow::array::Int32Array::from(vec![Some(5), None]);
        let col = array_to_column(&arr, DataType::Integer).unwrap();
        assert_eq!(col.values(), vec![Value::Integer(5), Value::Null]);
        assert_eq!(
            from_arrow_type(&ArrowDataType::Timestamp(TimeUnit::Nanosecond, None)),
            Some(DataType::Timestamp)
        );
    }
}
