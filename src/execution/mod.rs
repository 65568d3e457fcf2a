pub mod aggregate_state;
pub mod batch;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod group_key;
pub mod hash_table;
pub mod kernels;
pub mod memory_pool;
pub mod operators;
pub mod result;

pub use batch::{collect_batches, BatchIterator};
pub use context::{CancellationToken, DiagnosticsSnapshot, QueryContext};
pub use engine::QueryExecutor;
pub use result::QueryResult;
