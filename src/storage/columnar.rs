use crate::error::{EngineError, EngineResult};
use crate::storage::column::Column;
use crate::storage::value::{DataType, Value};
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One column of a schema
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Table alias or source name the column came from
    pub qualifier: Option<String>,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Option<String>) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", q, self.name),
            None => self.name.clone(),
        }
    }

    fn matches(&self, qualifier: Option<&str>, name: &str) -> bool {
        if self.name != name {
            return false;
        }
        match qualifier {
            Some(q) => self.qualifier.as_deref() == Some(q),
            None => true,
        }
    }
}

/// Ordered list of fields
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

pub type SchemaRef = Arc<Schema>;

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self { fields: vec![] }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> &Field {
        &self.fields[idx]
    }

    /// Resolve `name` or `qualifier.name`.
    /// An unqualified name that matches more than one field is ambiguous.
    pub fn index_of(&self, name: &str) -> EngineResult<usize> {
        if let Some(idx) = self.lookup(None, name)? {
            return Ok(idx);
        }
        if let Some((qualifier, column)) = name.split_once('.') {
            if let Some(idx) = self.lookup(Some(qualifier), column)? {
                return Ok(idx);
            }
        }
        Err(EngineError::schema(format!("unknown column '{}'", name)).with_context(format!(
            "available columns: {}",
            self.fields
                .iter()
                .map(Field::qualified_name)
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    fn lookup(&self, qualifier: Option<&str>, name: &str) -> EngineResult<Option<usize>> {
        let mut found = None;
        for (idx, field) in self.fields.iter().enumerate() {
            if field.matches(qualifier, name) {
                if found.is_some() {
                    return Err(EngineError::schema(format!(
                        "column reference '{}' is ambiguous",
                        name
                    )));
                }
                found = Some(idx);
            }
        }
        Ok(found)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_ok()
    }

    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema::new(indices.iter().map(|&i| self.fields[i].clone()).collect())
    }

    /// Fields of `self` followed by the fields of `other`
    pub fn join(&self, other: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Schema::new(fields)
    }

    /// Replace every field's qualifier
    pub fn with_qualifier(&self, qualifier: Option<&str>) -> Schema {
        Schema::new(
            self.fields
                .iter()
                .map(|f| f.clone().with_qualifier(qualifier.map(str::to_string)))
                .collect(),
        )
    }
}

/// Immutable columnar batch: a schema plus one column per field, all of `row_count` rows
#[derive(Clone, Debug)]
pub struct Batch {
    schema: SchemaRef,
    columns: Vec<Arc<Column>>,
    row_count: usize,
}

impl Batch {
    /// Validate column count, lengths and types against the schema
    pub fn try_new(schema: SchemaRef, columns: Vec<Arc<Column>>) -> EngineResult<Self> {
        if schema.len() != columns.len() {
            return Err(EngineError::schema(format!(
                "schema has {} fields but {} columns were supplied",
                schema.len(),
                columns.len()
            )));
        }
        let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
        for (field, column) in schema.fields().iter().zip(&columns) {
            if column.len() != row_count {
                return Err(EngineError::schema(format!(
                    "column '{}' has {} rows, expected {}",
                    field.name,
                    column.len(),
                    row_count
                )));
            }
            if column.data_type() != field.data_type {
                return Err(EngineError::schema(format!(
                    "column '{}' is {}, schema declares {}",
                    field.name,
                    column.data_type(),
                    field.data_type
                )));
            }
        }
        Ok(Self {
            schema,
            columns,
            row_count,
        })
    }

    /// Batch with rows but no columns (e.g. a COUNT(*) input with everything projected away)
    pub fn try_new_with_row_count(
        schema: SchemaRef,
        columns: Vec<Arc<Column>>,
        row_count: usize,
    ) -> EngineResult<Self> {
        if columns.is_empty() && schema.is_empty() {
            return Ok(Self {
                schema,
                columns,
                row_count,
            });
        }
        let batch = Self::try_new(schema, columns)?;
        if batch.row_count != row_count {
            return Err(EngineError::schema(format!(
                "batch has {} rows, expected {}",
                batch.row_count, row_count
            )));
        }
        Ok(batch)
    }

    pub fn empty(schema: SchemaRef) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Arc::new(Column::new_null(f.data_type, 0)))
            .collect();
        Self {
            schema,
            columns,
            row_count: 0,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Arc<Column> {
        &self.columns[idx]
    }

    pub fn column_by_name(&self, name: &str) -> EngineResult<&Arc<Column>> {
        let idx = self.schema.index_of(name)?;
        Ok(&self.columns[idx])
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value(idx)).collect()
    }

    pub fn project(&self, indices: &[usize]) -> Batch {
        Batch {
            schema: Arc::new(self.schema.project(indices)),
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            row_count: self.row_count,
        }
    }

    pub fn take(&self, indices: &[u32]) -> Batch {
        Batch {
            schema: self.schema.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| Arc::new(c.take(indices)))
                .collect(),
            row_count: indices.len(),
        }
    }

    pub fn filter(&self, selection: &BitSlice) -> Batch {
        let indices: Vec<u32> = selection.iter_ones().map(|i| i as u32).collect();
        if indices.len() == self.row_count {
            return self.clone();
        }
        self.take(&indices)
    }

    pub fn slice(&self, offset: usize, len: usize) -> Batch {
        let offset = offset.min(self.row_count);
        let len = len.min(self.row_count - offset);
        Batch {
            schema: self.schema.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| Arc::new(c.slice(offset, len)))
                .collect(),
            row_count: len,
        }
    }

    /// Same columns under a different schema (names/qualifiers); types must agree
    pub fn with_schema(&self, schema: SchemaRef) -> EngineResult<Batch> {
        Batch::try_new_with_row_count(schema, self.columns.clone(), self.row_count)
    }

    /// Concatenate batches that share a schema
    pub fn concat(schema: &SchemaRef, batches: &[Batch]) -> EngineResult<Batch> {
        let row_count = batches.iter().map(|b| b.row_count).sum();
        if schema.is_empty() {
            return Batch::try_new_with_row_count(schema.clone(), vec![], row_count);
        }
        if batches.is_empty() {
            return Ok(Batch::empty(schema.clone()));
        }
        if batches.len() == 1 {
            return batches[0].with_schema(schema.clone());
        }
        let mut columns = Vec::with_capacity(schema.len());
        for idx in 0..schema.len() {
            let parts: Vec<&Column> = batches.iter().map(|b| b.columns[idx].as_ref()).collect();
            columns.push(Arc::new(Column::concat(&parts)?));
        }
        Batch::try_new(schema.clone(), columns)
    }

    pub fn memory_size(&self) -> usize {
        self.columns.iter().map(|c| c.memory_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Integer, false).with_qualifier(Some("o".into())),
            Field::new("id", DataType::Integer, false).with_qualifier(Some("c".into())),
            Field::new("name", DataType::String, true),
        ]))
    }

    #[test]
    fn test_index_of_qualified_and_ambiguous() {
        let schema = sample_schema();
        assert_eq!(schema.index_of("o.id").unwrap(), 0);
        assert_eq!(schema.index_of("c.id").unwrap(), 1);
        assert_eq!(schema.index_of("name").unwrap(), 2);
        assert!(matches!(schema.index_of("id"), Err(EngineError::Schema { .. })));
        assert!(matches!(schema.index_of("missing"), Err(EngineError::Schema { .. })));
    }

    #[test]
    fn test_try_new_validates_lengths_and_types() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Integer, true),
            Field::new("b", DataType::Double, true),
        ]));
        let a = Arc::new(Column::from_i64(vec![Some(1), Some(2)]));
        let short = Arc::new(Column::from_f64(vec![Some(1.0)]));
        assert!(Batch::try_new(schema.clone(), vec![a.clone(), short]).is_err());

        let wrong_type = Arc::new(Column::from_i64(vec![Some(1), Some(2)]));
        assert!(Batch::try_new(schema.clone(), vec![a.clone(), wrong_type]).is_err());

        let b = Arc::new(Column::from_f64(vec![None, Some(2.5)]));
        let batch = Batch::try_new(schema, vec![a, b]).unwrap();
        assert_eq!(batch.row_count(), 2);
    }

    #[test]
    fn test_filter_and_concat() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Integer, true)]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![Arc::new(Column::from_i64(vec![Some(1), None, Some(3)]))],
        )
        .unwrap();
        let filtered = batch.filter(bits![1, 0, 1]);
        assert_eq!(filtered.row_count(), 2);
        let all = Batch::concat(&schema, &[batch, filtered]).unwrap();
        assert_eq!(all.row_count(), 5);
        assert_eq!(all.row(4), vec![Value::Integer(3)]);
    }
}
