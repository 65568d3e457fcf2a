pub mod expression;
pub mod optimizer;
pub mod plan;

pub use expression::*;
pub use optimizer::{optimize, to_scan_predicate};
pub use plan::*;
