//! # filequery-engine
//!
//! An embedded columnar analytical query engine over CSV, Parquet and line-delimited JSON
//! files. Queries are logical plans built with the `PlanOperator` builders; the executor
//! pushes filters and projections into the scans, then runs the plan as a pull-based tree
//! of batch operators on a rayon worker pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filequery_engine::query::{col, lit, AggregateExpr, AggregateFunction, GroupingSpec, ProjectionExpr};
//! use filequery_engine::{EngineConfig, FileFormat, PlanOperator, QueryExecutor};
//!
//! let executor = QueryExecutor::new(EngineConfig::default()).unwrap();
//! let plan = PlanOperator::scan("data/orders_*.csv", FileFormat::Csv)
//!     .filter(col("amount").gt(lit(100i64)))
//!     .aggregate(
//!         vec![ProjectionExpr::new(col("region"))],
//!         GroupingSpec::Simple,
//!         vec![AggregateExpr::new(AggregateFunction::Sum, vec![col("amount")])],
//!     );
//! let result = executor.execute(&plan).unwrap();
//! println!("{} groups in {:.1} ms", result.row_count, result.execution_time_ms);
//! ```
//!
//! ## Features
//!
//! - **Scans**: glob expansion, schema inference, projection and predicate pushdown,
//!   Parquet row-group skipping from chunk statistics
//! - **Operators**: hash join, hash aggregation with GROUPING SETS / CUBE / ROLLUP,
//!   window functions with ROWS and RANGE frames, sort, top-k, limit
//! - **Execution**: per-query memory budget, cooperative cancellation, timeouts

pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod query;
pub mod result_format;
pub mod storage;

// Public API - Main types users need
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use execution::{CancellationToken, QueryExecutor, QueryResult};
pub use ingestion::{FileFormat, ReaderOptions};
pub use query::PlanOperator;
pub use storage::{Batch, DataType, Schema, Value};
