/// Vectorized kernels for expression evaluation
///
/// Each kernel works on whole columns and dispatches once per call on the column types;
/// the inner loops run over dense typed slices. Result validity is the AND of the input
/// validities unless a kernel says otherwise.
use crate::error::{EngineError, EngineResult};
use crate::storage::column::{Column, ColumnData};
use crate::storage::value::DataType;
use bitvec::prelude::*;

fn check_lengths(left: &Column, right: &Column) -> EngineResult<()> {
    if left.len() != right.len() {
        return Err(EngineError::execution(format!(
            "column length mismatch: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    Ok(())
}

fn combined_validity(left: &Column, right: &Column) -> BitVec {
    let mut validity = left.validity().clone();
    validity &= right.validity().as_bitslice();
    validity
}

/// Bring two columns to one comparable type.
/// Integer/Double meet at Double, Date/Timestamp at Timestamp, a String side is parsed
/// as the other side's temporal type.
pub fn coerce_pair(left: &Column, right: &Column) -> EngineResult<(Column, Column)> {
    let (lt, rt) = (left.data_type(), right.data_type());
    if lt == rt {
        return Ok((left.clone(), right.clone()));
    }
    if let Some(common) = DataType::common_supertype(lt, rt) {
        return Ok((left.cast(common)?, right.cast(common)?));
    }
    match (lt, rt) {
        (DataType::String, t) if t.is_temporal() => Ok((left.cast(t)?, right.clone())),
        (t, DataType::String) if t.is_temporal() => Ok((left.clone(), right.cast(t)?)),
        _ => Err(EngineError::type_mismatch(format!(
            "cannot compare {} with {}",
            lt, rt
        ))),
    }
}

/// Vectorized arithmetic
pub mod arithmetic {
    use super::*;
    use crate::query::expression::BinaryOp;

    /// `left op right` for + - * / %.
    /// Integer op Integer stays Integer (overflow is an error) except `/`, which is Double.
    /// Division and modulo by zero produce NULL.
    pub fn binary(op: BinaryOp, left: &Column, right: &Column) -> EngineResult<Column> {
        check_lengths(left, right)?;
        let (lt, rt) = (left.data_type(), right.data_type());
        match (lt, rt) {
            (DataType::Integer, DataType::Integer) if op != BinaryOp::Divide => {
                integer(op, left, right)
            }
            (l, r) if l.is_numeric() && r.is_numeric() => {
                double(op, &left.cast(DataType::Double)?, &right.cast(DataType::Double)?)
            }
            (DataType::Date, DataType::Integer) | (DataType::Integer, DataType::Date) => {
                date_plus_days(op, left, right)
            }
            (DataType::Date, DataType::Date) if op == BinaryOp::Subtract => {
                let (ColumnData::Date(a), ColumnData::Date(b)) = (left.data(), right.data()) else {
                    unreachable!("types checked above")
                };
                let data = a.iter().zip(b).map(|(x, y)| *x as i64 - *y as i64).collect();
                Column::try_new(ColumnData::Integer(data), combined_validity(left, right))
            }
            _ => Err(EngineError::type_mismatch(format!(
                "arithmetic {:?} not defined for {} and {}",
                op, lt, rt
            ))),
        }
    }

    fn integer(op: BinaryOp, left: &Column, right: &Column) -> EngineResult<Column> {
        let (ColumnData::Integer(a), ColumnData::Integer(b)) = (left.data(), right.data()) else {
            return Err(EngineError::internal("integer kernel on non-integer input"));
        };
        let mut validity = combined_validity(left, right);
        let mut out = Vec::with_capacity(a.len());
        for i in 0..a.len() {
            if !validity[i] {
                out.push(0);
                continue;
            }
            let (x, y) = (a[i], b[i]);
            let v = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Subtract => x.checked_sub(y),
                BinaryOp::Multiply => x.checked_mul(y),
                BinaryOp::Modulo => {
                    if y == 0 {
                        validity.set(i, false);
                        out.push(0);
                        continue;
                    }
                    x.checked_rem(y)
                }
                _ => return Err(EngineError::internal(format!("{:?} is not arithmetic", op))),
            };
            match v {
                Some(v) => out.push(v),
                None => {
                    return Err(EngineError::execution(format!(
                        "integer overflow in {} {:?} {}",
                        x, op, y
                    )))
                }
            }
        }
        Column::try_new(ColumnData::Integer(out), validity)
    }

    fn double(op: BinaryOp, left: &Column, right: &Column) -> EngineResult<Column> {
        let (ColumnData::Double(a), ColumnData::Double(b)) = (left.data(), right.data()) else {
            return Err(EngineError::internal("double kernel on non-double input"));
        };
        let mut validity = combined_validity(left, right);
        let mut out = Vec::with_capacity(a.len());
        for i in 0..a.len() {
            let (x, y) = (a[i], b[i]);
            let v = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide | BinaryOp::Modulo if y == 0.0 => {
                    validity.set(i, false);
                    0.0
                }
                BinaryOp::Divide => x / y,
                BinaryOp::Modulo => x % y,
                _ => return Err(EngineError::internal(format!("{:?} is not arithmetic", op))),
            };
            out.push(v);
        }
        Column::try_new(ColumnData::Double(out), validity)
    }

    fn date_plus_days(op: BinaryOp, left: &Column, right: &Column) -> EngineResult<Column> {
        let validity = combined_validity(left, right);
        let (days, offsets, sign) = match (left.data(), right.data(), op) {
            (ColumnData::Date(d), ColumnData::Integer(n), BinaryOp::Add) => (d, n, 1),
            (ColumnData::Date(d), ColumnData::Integer(n), BinaryOp::Subtract) => (d, n, -1),
            (ColumnData::Integer(n), ColumnData::Date(d), BinaryOp::Add) => (d, n, 1),
            _ => {
                return Err(EngineError::type_mismatch(format!(
                    "date arithmetic {:?} not supported",
                    op
                )))
            }
        };
        let mut out = Vec::with_capacity(days.len());
        for i in 0..days.len() {
            let shifted = offsets[i]
                .checked_mul(sign)
                .and_then(|delta| (days[i] as i64).checked_add(delta));
            match shifted.and_then(|v| i32::try_from(v).ok()) {
                Some(v) => out.push(v),
                None if !validity[i] => out.push(0),
                None => return Err(EngineError::execution("date arithmetic out of range")),
            }
        }
        Column::try_new(ColumnData::Date(out), validity)
    }

    /// Unary minus
    pub fn negate(column: &Column) -> EngineResult<Column> {
        let data = match column.data() {
            ColumnData::Integer(v) => {
                let mut out = Vec::with_capacity(v.len());
                for (i, x) in v.iter().enumerate() {
                    match x.checked_neg() {
                        Some(n) => out.push(n),
                        None if column.is_null(i) => out.push(0),
                        None => return Err(EngineError::execution("integer overflow in negation")),
                    }
                }
                ColumnData::Integer(out)
            }
            ColumnData::Double(v) => ColumnData::Double(v.iter().map(|x| -x).collect()),
            other => {
                return Err(EngineError::type_mismatch(format!(
                    "unary minus applied to {}",
                    other.data_type()
                )))
            }
        };
        Column::try_new(data, column.validity().clone())
    }
}

/// Vectorized comparisons producing Boolean columns
pub mod comparison {
    use super::*;
    use crate::query::expression::BinaryOp;
    use ordered_float::OrderedFloat;
    use std::cmp::Ordering;

    fn matches(op: BinaryOp, ord: Ordering) -> bool {
        match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::NotEq => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::LtEq => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::GtEq => ord != Ordering::Less,
            _ => false,
        }
    }

    fn compare_slices<T, F>(op: BinaryOp, a: &[T], b: &[T], cmp: F) -> BitVec
    where
        F: Fn(&T, &T) -> Ordering,
    {
        a.iter().zip(b).map(|(x, y)| matches(op, cmp(x, y))).collect()
    }

    /// `left op right`; any NULL operand gives NULL
    pub fn binary(op: BinaryOp, left: &Column, right: &Column) -> EngineResult<Column> {
        if !op.is_comparison() {
            return Err(EngineError::internal(format!("{:?} is not a comparison", op)));
        }
        check_lengths(left, right)?;
        let (left, right) = coerce_pair(left, right)?;
        let bits = match (left.data(), right.data()) {
            (ColumnData::Integer(a), ColumnData::Integer(b)) => compare_slices(op, a, b, Ord::cmp),
            (ColumnData::Double(a), ColumnData::Double(b)) => {
                compare_slices(op, a, b, |x, y| OrderedFloat(*x).cmp(&OrderedFloat(*y)))
            }
            (ColumnData::Boolean(a), ColumnData::Boolean(b)) => a
                .iter()
                .by_vals()
                .zip(b.iter().by_vals())
                .map(|(x, y)| matches(op, x.cmp(&y)))
                .collect(),
            (ColumnData::String(a), ColumnData::String(b)) => compare_slices(op, a, b, Ord::cmp),
            (ColumnData::Date(a), ColumnData::Date(b)) => compare_slices(op, a, b, Ord::cmp),
            (ColumnData::Timestamp(a), ColumnData::Timestamp(b)) => {
                compare_slices(op, a, b, Ord::cmp)
            }
            (a, b) => {
                return Err(EngineError::type_mismatch(format!(
                    "cannot compare {} with {}",
                    a.data_type(),
                    b.data_type()
                )))
            }
        };
        Column::try_new(ColumnData::Boolean(bits), combined_validity(&left, &right))
    }
}

/// Three-valued boolean logic
pub mod logical {
    use super::*;

    fn booleans(column: &Column) -> EngineResult<&BitVec> {
        match column.data() {
            ColumnData::Boolean(bits) => Ok(bits),
            other => Err(EngineError::type_mismatch(format!(
                "expected BOOLEAN, got {}",
                other.data_type()
            ))),
        }
    }

    /// Kleene AND: FALSE wins over NULL
    pub fn and(left: &Column, right: &Column) -> EngineResult<Column> {
        check_lengths(left, right)?;
        let (a, b) = (booleans(left)?, booleans(right)?);
        let (va, vb) = (left.validity(), right.validity());
        let mut values = BitVec::with_capacity(a.len());
        let mut validity = BitVec::with_capacity(a.len());
        for i in 0..a.len() {
            let known_false = (va[i] && !a[i]) || (vb[i] && !b[i]);
            if known_false {
                values.push(false);
                validity.push(true);
            } else if va[i] && vb[i] {
                values.push(true);
                validity.push(true);
            } else {
                values.push(false);
                validity.push(false);
            }
        }
        Column::try_new(ColumnData::Boolean(values), validity)
    }

    /// Kleene OR: TRUE wins over NULL
    pub fn or(left: &Column, right: &Column) -> EngineResult<Column> {
        check_lengths(left, right)?;
        let (a, b) = (booleans(left)?, booleans(right)?);
        let (va, vb) = (left.validity(), right.validity());
        let mut values = BitVec::with_capacity(a.len());
        let mut validity = BitVec::with_capacity(a.len());
        for i in 0..a.len() {
            let known_true = (va[i] && a[i]) || (vb[i] && b[i]);
            if known_true {
                values.push(true);
                validity.push(true);
            } else if va[i] && vb[i] {
                values.push(false);
                validity.push(true);
            } else {
                values.push(false);
                validity.push(false);
            }
        }
        Column::try_new(ColumnData::Boolean(values), validity)
    }

    /// NOT; NOT NULL is NULL
    pub fn not(column: &Column) -> EngineResult<Column> {
        let bits = booleans(column)?;
        let values = !bits.clone();
        Column::try_new(ColumnData::Boolean(values), column.validity().clone())
    }

    /// IS NULL / IS NOT NULL; never NULL itself
    pub fn is_null(column: &Column, negated: bool) -> Column {
        let values = if negated {
            column.validity().clone()
        } else {
            !column.validity().clone()
        };
        Column::from_data(ColumnData::Boolean(values))
    }

    /// Rows where the predicate is TRUE (NULL counts as not selected)
    pub fn selection(column: &Column) -> EngineResult<BitVec> {
        let mut bits = booleans(column)?.clone();
        bits &= column.validity().as_bitslice();
        Ok(bits)
    }
}

/// String kernels
pub mod string {
    use super::*;

    /// `left || right` over the text form of each side; NULL operand gives NULL
    pub fn concat(left: &Column, right: &Column) -> EngineResult<Column> {
        check_lengths(left, right)?;
        let validity = combined_validity(left, right);
        let data = (0..left.len())
            .map(|i| {
                if validity[i] {
                    format!("{}{}", left.value(i), right.value(i))
                } else {
                    String::new()
                }
            })
            .collect();
        Column::try_new(ColumnData::String(data), validity)
    }

    pub fn map_strings<F>(column: &Column, f: F) -> EngineResult<Column>
    where
        F: Fn(&str) -> String,
    {
        match column.data() {
            ColumnData::String(v) => Column::try_new(
                ColumnData::String(v.iter().map(|s| f(s)).collect()),
                column.validity().clone(),
            ),
            other => Err(EngineError::type_mismatch(format!(
                "expected STRING, got {}",
                other.data_type()
            ))),
        }
    }

    pub fn length(column: &Column) -> EngineResult<Column> {
        match column.data() {
            ColumnData::String(v) => Column::try_new(
                ColumnData::Integer(v.iter().map(|s| s.chars().count() as i64).collect()),
                column.validity().clone(),
            ),
            other => Err(EngineError::type_mismatch(format!(
                "length of {}",
                other.data_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::BinaryOp;
    use crate::storage::value::Value;

    #[test]
    fn test_integer_division_by_zero_is_null() {
        let a = Column::from_i64(vec![Some(10), Some(7), None]);
        let b = Column::from_i64(vec![Some(0), Some(2), Some(1)]);
        let div = arithmetic::binary(BinaryOp::Divide, &a, &b).unwrap();
        assert_eq!(div.values(), vec![Value::Null, Value::Double(3.5), Value::Null]);
        let rem = arithmetic::binary(BinaryOp::Modulo, &a, &b).unwrap();
        assert_eq!(rem.values(), vec![Value::Null, Value::Integer(1), Value::Null]);
    }

    #[test]
    fn test_integer_overflow_is_error() {
        let a = Column::from_i64(vec![Some(i64::MAX)]);
        let b = Column::from_i64(vec![Some(1)]);
        assert!(matches!(
            arithmetic::binary(BinaryOp::Add, &a, &b),
            Err(EngineError::Execution { .. })
        ));
    }

    #[test]
    fn test_mixed_numeric_comparison() {
        let a = Column::from_i64(vec![Some(1), Some(3), None]);
        let b = Column::from_f64(vec![Some(1.5), Some(2.5), Some(0.0)]);
        let out = comparison::binary(BinaryOp::Gt, &a, &b).unwrap();
        assert_eq!(
            out.values(),
            vec![Value::Boolean(false), Value::Boolean(true), Value::Null]
        );
    }

    #[test]
    fn test_kleene_logic() {
        let t = Column::from_bool(vec![Some(false), Some(true), None, None]);
        let n = Column::from_bool(vec![None, None, None, Some(true)]);
        assert_eq!(
            logical::and(&t, &n).unwrap().values(),
            vec![Value::Boolean(false), Value::Null, Value::Null, Value::Null]
        );
        assert_eq!(
            logical::or(&t, &n).unwrap().values(),
            vec![Value::Null, Value::Boolean(true), Value::Null, Value::Boolean(true)]
        );
        assert_eq!(logical::not(&n).unwrap().value(0), Value::Null);
    }

    #[test]
    fn test_concat_null() {
        let a = Column::from_strings(vec![Some("a"), None]);
        let b = Column::from_i64(vec![Some(1), Some(2)]);
        let out = string::concat(&a, &b).unwrap();
        assert_eq!(out.values(), vec![Value::from("a1"), Value::Null]);
    }
}
