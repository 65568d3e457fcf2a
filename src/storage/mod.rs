pub mod arrow_interop;
pub mod column;
pub mod columnar;
pub mod statistics;
pub mod value;

pub use column::{Column, ColumnBuilder, ColumnData};
pub use columnar::{Batch, Field, Schema, SchemaRef};
pub use statistics::{ColumnStatistics, CompareOp, ScanPredicate};
pub use value::{DataType, Value};
