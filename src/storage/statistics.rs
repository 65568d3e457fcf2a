/// Per-block column statistics and block skipping
///
/// A block (a Parquet row group) may be skipped when its min/max/null-count prove that no
/// row in it can satisfy a pushed-down comparison.
use crate::query::expression::{BinaryOp, Expr, UnaryOp};
use crate::storage::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Statistics of one column within one block
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: Option<u64>,
    pub row_count: u64,
}

impl ColumnStatistics {
    fn all_null(&self) -> bool {
        self.null_count == Some(self.row_count) && self.row_count > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    IsNull,
    IsNotNull,
}

impl CompareOp {
    /// Operator with its operands swapped (`5 < x` is `x > 5`)
    pub fn flip(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }

    pub fn from_binary(op: BinaryOp) -> Option<CompareOp> {
        match op {
            BinaryOp::Eq => Some(CompareOp::Eq),
            BinaryOp::NotEq => Some(CompareOp::NotEq),
            BinaryOp::Lt => Some(CompareOp::Lt),
            BinaryOp::LtEq => Some(CompareOp::LtEq),
            BinaryOp::Gt => Some(CompareOp::Gt),
            BinaryOp::GtEq => Some(CompareOp::GtEq),
            _ => None,
        }
    }
}

/// Pushed-down `column op literal` or `column IS [NOT] NULL`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPredicate {
    pub column: String,
    pub op: CompareOp,
    /// Ignored for IS [NOT] NULL
    pub value: Value,
}

impl ScanPredicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, CompareOp::IsNull, Value::Null)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::new(column, CompareOp::IsNotNull, Value::Null)
    }

    /// True when the statistics prove no row of the block satisfies this predicate.
    /// Missing or incomparable statistics never skip.
    pub fn can_skip(&self, stats: &ColumnStatistics) -> bool {
        match self.op {
            CompareOp::IsNull => return stats.null_count == Some(0),
            CompareOp::IsNotNull => return stats.all_null(),
            _ => {}
        }
        if self.value.is_null() || stats.all_null() {
            // comparisons with NULL, or over an all-NULL block, are never true
            return true;
        }
        let (min, max) = match (&stats.min, &stats.max) {
            (Some(min), Some(max)) => (min, max),
            _ => return false,
        };
        let v = &self.value;
        let cmp_min = v.partial_cmp_coerced(min);
        let cmp_max = v.partial_cmp_coerced(max);
        let (cmp_min, cmp_max) = match (cmp_min, cmp_max) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        match self.op {
            CompareOp::Eq => cmp_min == Ordering::Less || cmp_max == Ordering::Greater,
            // min >= v
            CompareOp::Lt => cmp_min != Ordering::Greater,
            // min > v
            CompareOp::LtEq => cmp_min == Ordering::Less,
            // max <= v
            CompareOp::Gt => cmp_max != Ordering::Less,
            // max < v
            CompareOp::GtEq => cmp_max == Ordering::Greater,
            CompareOp::NotEq => {
                cmp_min == Ordering::Equal
                    && cmp_max == Ordering::Equal
                    && stats.null_count == Some(0)
            }
            CompareOp::IsNull | CompareOp::IsNotNull => false,
        }
    }

    /// Row-level form of this predicate, applied after decoding
    pub fn to_expr(&self) -> Expr {
        let column = Expr::Column(self.column.clone());
        let op = match self.op {
            CompareOp::IsNull => {
                return Expr::Unary {
                    op: UnaryOp::IsNull,
                    expr: Box::new(column),
                }
            }
            CompareOp::IsNotNull => {
                return Expr::Unary {
                    op: UnaryOp::IsNotNull,
                    expr: Box::new(column),
                }
            }
            CompareOp::Eq => BinaryOp::Eq,
            CompareOp::NotEq => BinaryOp::NotEq,
            CompareOp::Lt => BinaryOp::Lt,
            CompareOp::LtEq => BinaryOp::LtEq,
            CompareOp::Gt => BinaryOp::Gt,
            CompareOp::GtEq => BinaryOp::GtEq,
        };
        Expr::Binary {
            op,
            left: Box::new(column),
            right: Box::new(Expr::Literal(self.value.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(min: i64, max: i64, nulls: u64) -> ColumnStatistics {
        ColumnStatistics {
            min: Some(Value::Integer(min)),
            max: Some(Value::Integer(max)),
            null_count: Some(nulls),
            row_count: 100,
        }
    }

    #[test]
    fn test_range_skipping() {
        let s = stats(10, 20, 0);
        assert!(ScanPredicate::new("x", CompareOp::Eq, 25i64).can_skip(&s));
        assert!(!ScanPredicate::new("x", CompareOp::Eq, 15i64).can_skip(&s));
        assert!(ScanPredicate::new("x", CompareOp::Lt, 10i64).can_skip(&s));
        assert!(!ScanPredicate::new("x", CompareOp::LtEq, 10i64).can_skip(&s));
        assert!(ScanPredicate::new("x", CompareOp::Gt, 20i64).can_skip(&s));
        assert!(!ScanPredicate::new("x", CompareOp::GtEq, 20i64).can_skip(&s));
        assert!(ScanPredicate::new("x", CompareOp::GtEq, 20.5).can_skip(&s));
    }

    #[test]
    fn test_null_skipping() {
        assert!(ScanPredicate::is_null("x").can_skip(&stats(1, 2, 0)));
        assert!(!ScanPredicate::is_null("x").can_skip(&stats(1, 2, 3)));
        let all_null = ColumnStatistics {
            min: None,
            max: None,
            null_count: Some(100),
            row_count: 100,
        };
        assert!(ScanPredicate::is_not_null("x").can_skip(&all_null));
        assert!(ScanPredicate::new("x", CompareOp::Eq, 1i64).can_skip(&all_null));
    }

    #[test]
    fn test_missing_statistics_never_skip() {
        let unknown = ColumnStatistics {
            row_count: 10,
            ..Default::default()
        };
        assert!(!ScanPredicate::new("x", CompareOp::Eq, 1i64).can_skip(&unknown));
        assert!(!ScanPredicate::new("x", CompareOp::Eq, "a").can_skip(&stats(1, 2, 0)));
    }
}
