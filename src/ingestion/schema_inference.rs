/// Schema inference over sampled records
///
/// Columns keep the order in which they were first seen. Each observation widens the
/// column type (Integer -> Double, Date -> Timestamp, anything else -> String). A column
/// that only ever held NULL in the sample is String.
use crate::storage::columnar::{Field, Schema, SchemaRef};
use crate::storage::value::{infer_text_type, parse_date, parse_timestamp, DataType};
use fxhash::FxHashMap;

#[derive(Clone, Debug)]
struct InferredColumn {
    name: String,
    /// None until a non-null value is seen
    data_type: Option<DataType>,
}

#[derive(Clone, Debug, Default)]
pub struct SchemaInference {
    columns: Vec<InferredColumn>,
    index: FxHashMap<String, usize>,
}

impl SchemaInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with known column names (a CSV header) so all-NULL columns keep their slot
    pub fn with_columns<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let mut inference = Self::new();
        for name in names {
            inference.column_index(&name.into());
        }
        inference
    }

    fn column_index(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.columns.len();
        self.columns.push(InferredColumn {
            name: name.to_string(),
            data_type: None,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Record one value of `name`; None is a NULL
    pub fn observe(&mut self, name: &str, data_type: Option<DataType>) {
        let idx = self.column_index(name);
        if let Some(t) = data_type {
            let column = &mut self.columns[idx];
            column.data_type = Some(match column.data_type {
                None => t,
                Some(current) => DataType::widen(current, t),
            });
        }
    }

    /// Record a CSV field
    pub fn observe_text(&mut self, name: &str, text: &str) {
        self.observe(name, infer_text_type(text));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn finish(self) -> Schema {
        Schema::new(
            self.columns
                .into_iter()
                .map(|c| Field::new(c.name, c.data_type.unwrap_or(DataType::String), true))
                .collect(),
        )
    }
}

/// Type of a JSON string value: dates and timestamps are recognised, other text stays String
pub fn infer_json_string(text: &str) -> DataType {
    if parse_date(text).is_some() {
        DataType::Date
    } else if parse_timestamp(text).is_some() {
        DataType::Timestamp
    } else {
        DataType::String
    }
}

/// Unify schemas by column name: first-appearance order, types widened, all nullable
pub fn unify_by_name(schemas: &[SchemaRef]) -> Schema {
    let mut inference = SchemaInference::new();
    for schema in schemas {
        for field in schema.fields() {
            inference.observe(&field.name, Some(field.data_type));
        }
    }
    inference.finish()
}
