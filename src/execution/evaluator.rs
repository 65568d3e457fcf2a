/// Expression evaluation over batches
///
/// `evaluate` produces one output column for a whole batch. Operators bind their
/// expressions first (`Expr::data_type` against the input schema) so that schema and type
/// errors surface before the first row is read; evaluation then only fails on data
/// (overflow, unparsable text in a cast).
use crate::error::{EngineError, EngineResult};
use crate::execution::kernels::{arithmetic, comparison, logical, string};
use crate::query::expression::{BinaryOp, DatePart, DateTruncUnit, Expr, ScalarFunction, UnaryOp};
use crate::storage::column::{Column, ColumnBuilder, ColumnData};
use crate::storage::columnar::{Batch, Schema};
use crate::storage::value::{date_to_days, days_to_date, micros_to_datetime, DataType, Value};
use bitvec::prelude::*;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use fxhash::FxHashMap;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;

/// Evaluate `expr` over every row of `batch`
pub fn evaluate(expr: &Expr, batch: &Batch) -> EngineResult<Arc<Column>> {
    let rows = batch.row_count();
    match expr {
        Expr::Column(name) => Ok(batch.column_by_name(name)?.clone()),
        Expr::Literal(value) => {
            let data_type = value.data_type().ok_or_else(|| {
                EngineError::type_mismatch("untyped NULL literal; use a typed NULL")
            })?;
            Ok(Arc::new(Column::from_scalar(value, data_type, rows)?))
        }
        Expr::Null(data_type) => Ok(Arc::new(Column::new_null(*data_type, rows))),
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, batch)?;
            let r = evaluate(right, batch)?;
            let out = match op {
                BinaryOp::And => logical::and(&l, &r)?,
                BinaryOp::Or => logical::or(&l, &r)?,
                BinaryOp::Concat => string::concat(&l, &r)?,
                op if op.is_comparison() => comparison::binary(*op, &l, &r)?,
                op => arithmetic::binary(*op, &l, &r)?,
            };
            Ok(Arc::new(out))
        }
        Expr::Unary { op, expr } => {
            let input = evaluate(expr, batch)?;
            let out = match op {
                UnaryOp::Not => logical::not(&input)?,
                UnaryOp::Negate => arithmetic::negate(&input)?,
                UnaryOp::IsNull => logical::is_null(&input, false),
                UnaryOp::IsNotNull => logical::is_null(&input, true),
            };
            Ok(Arc::new(out))
        }
        Expr::Function { func, args } => {
            let inputs = args
                .iter()
                .map(|a| evaluate(a, batch))
                .collect::<EngineResult<Vec<_>>>()?;
            let out_type = expr.data_type(batch.schema())?;
            Ok(Arc::new(evaluate_function(*func, &inputs, out_type, rows)?))
        }
        Expr::Case {
            operand,
            when_then,
            else_expr,
        } => evaluate_case(expr, operand.as_deref(), when_then, else_expr.as_deref(), batch),
        Expr::Cast { expr, data_type } => Ok(Arc::new(evaluate(expr, batch)?.cast(*data_type)?)),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let input = evaluate(expr, batch)?;
            let mut matched: Option<Column> = None;
            for item in list {
                let candidate = evaluate(item, batch)?;
                let eq = comparison::binary(BinaryOp::Eq, &input, &candidate)?;
                matched = Some(match matched {
                    None => eq,
                    Some(acc) => logical::or(&acc, &eq)?,
                });
            }
            let matched = match matched {
                Some(m) => m,
                // empty list: IN is false, NOT IN is true, except for NULL input
                None => Column::try_new(
                    ColumnData::Boolean(bitvec![0; rows]),
                    input.validity().clone(),
                )?,
            };
            let out = if *negated { logical::not(&matched)? } else { matched };
            Ok(Arc::new(out))
        }
        Expr::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let input = evaluate(expr, batch)?;
            let patterns = evaluate(pattern, batch)?;
            Ok(Arc::new(evaluate_like(&input, &patterns, *negated, *case_insensitive)?))
        }
    }
}

/// Evaluate a predicate into a selection bitmap; NULL is not selected
pub fn evaluate_predicate(expr: &Expr, batch: &Batch) -> EngineResult<BitVec> {
    let column = evaluate(expr, batch)?;
    logical::selection(&column)
}

/// Bind a predicate against `schema`, requiring a BOOLEAN result
pub fn bind_predicate(expr: &Expr, schema: &Schema) -> EngineResult<()> {
    let data_type = expr.data_type(schema)?;
    if data_type != DataType::Boolean {
        return Err(EngineError::type_mismatch(format!(
            "predicate {} is {}, expected BOOLEAN",
            expr, data_type
        )));
    }
    Ok(())
}

fn evaluate_case(
    case: &Expr,
    operand: Option<&Expr>,
    when_then: &[(Expr, Expr)],
    else_expr: Option<&Expr>,
    batch: &Batch,
) -> EngineResult<Arc<Column>> {
    let rows = batch.row_count();
    let result_type = case.data_type(batch.schema())?;
    let operand = operand.map(|o| evaluate(o, batch)).transpose()?;

    // branch chosen per row; None = ELSE
    let mut chosen: Vec<Option<usize>> = vec![None; rows];
    let mut decided = bitvec![0; rows];
    let mut results = Vec::with_capacity(when_then.len());
    for (branch, (when, then)) in when_then.iter().enumerate() {
        let condition = evaluate(when, batch)?;
        let hit = match &operand {
            Some(op) => comparison::binary(BinaryOp::Eq, op, &condition)?,
            None => (*condition).clone(),
        };
        let hit = logical::selection(&hit)?;
        for row in hit.iter_ones() {
            if !decided[row] {
                decided.set(row, true);
                chosen[row] = Some(branch);
            }
        }
        results.push(evaluate(then, batch)?.cast(result_type)?);
    }
    let else_column = match else_expr {
        Some(e) => evaluate(e, batch)?.cast(result_type)?,
        None => Column::new_null(result_type, rows),
    };

    let mut builder = ColumnBuilder::with_capacity(result_type, rows);
    for (row, choice) in chosen.iter().enumerate() {
        let source = match choice {
            Some(branch) => &results[*branch],
            None => &else_column,
        };
        builder.append_value(&source.value(row))?;
    }
    Ok(builder.finish_arc())
}

fn evaluate_function(
    function: ScalarFunction,
    inputs: &[Arc<Column>],
    out_type: DataType,
    rows: usize,
) -> EngineResult<Column> {
    match function {
        ScalarFunction::Coalesce => {
            let casted = inputs
                .iter()
                .map(|c| c.cast(out_type))
                .collect::<EngineResult<Vec<_>>>()?;
            let mut builder = ColumnBuilder::with_capacity(out_type, rows);
            for row in 0..rows {
                match casted.iter().find(|c| !c.is_null(row)) {
                    Some(c) => builder.append_value(&c.value(row))?,
                    None => builder.append_null(),
                }
            }
            Ok(builder.finish())
        }
        ScalarFunction::Round => round(&inputs[0], inputs.get(1).map(|c| c.as_ref())),
        ScalarFunction::Abs => match inputs[0].data() {
            ColumnData::Integer(v) => {
                let mut out = Vec::with_capacity(v.len());
                for (i, x) in v.iter().enumerate() {
                    match x.checked_abs() {
                        Some(a) => out.push(a),
                        None if inputs[0].is_null(i) => out.push(0),
                        None => return Err(EngineError::execution("integer overflow in abs")),
                    }
                }
                Column::try_new(ColumnData::Integer(out), inputs[0].validity().clone())
            }
            ColumnData::Double(v) => Column::try_new(
                ColumnData::Double(v.iter().map(|x| x.abs()).collect()),
                inputs[0].validity().clone(),
            ),
            other => Err(EngineError::type_mismatch(format!("abs of {}", other.data_type()))),
        },
        ScalarFunction::Upper => string::map_strings(&inputs[0], |s| s.to_uppercase()),
        ScalarFunction::Lower => string::map_strings(&inputs[0], |s| s.to_lowercase()),
        ScalarFunction::Length => string::length(&inputs[0]),
        ScalarFunction::Strftime => strftime(&inputs[0], &inputs[1]),
        ScalarFunction::DatePart(part) => date_part(&inputs[0], part),
        ScalarFunction::DateTrunc(unit) => date_trunc(&inputs[0], unit, out_type),
    }
}

fn round(values: &Column, digits: Option<&Column>) -> EngineResult<Column> {
    let digits_at = |row: usize| -> Option<i64> {
        match digits {
            None => Some(0),
            Some(d) if d.is_null(row) => None,
            Some(d) => d.value(row).as_i64(),
        }
    };
    let mut validity = values.validity().clone();
    match values.data() {
        ColumnData::Double(v) => {
            let mut out = Vec::with_capacity(v.len());
            for (row, x) in v.iter().enumerate() {
                match digits_at(row) {
                    Some(d) => {
                        let factor = 10f64.powi(d.clamp(-308, 308) as i32);
                        out.push((x * factor).round() / factor);
                    }
                    None => {
                        validity.set(row, false);
                        out.push(0.0);
                    }
                }
            }
            Column::try_new(ColumnData::Double(out), validity)
        }
        ColumnData::Integer(v) => {
            let mut out = Vec::with_capacity(v.len());
            for (row, x) in v.iter().enumerate() {
                match digits_at(row) {
                    Some(d) if d >= 0 => out.push(*x),
                    Some(d) => {
                        // round half away from zero to a multiple of 10^-d
                        let p = 10i64.checked_pow((-d) as u32).unwrap_or(i64::MAX);
                        let half = p / 2;
                        let adjusted = if *x >= 0 { x.saturating_add(half) } else { x.saturating_sub(half) };
                        out.push(adjusted / p * p);
                    }
                    None => {
                        validity.set(row, false);
                        out.push(0);
                    }
                }
            }
            Column::try_new(ColumnData::Integer(out), validity)
        }
        other => Err(EngineError::type_mismatch(format!("round of {}", other.data_type()))),
    }
}

/// Temporal slot as a datetime (dates at midnight)
fn datetime_at(column: &Column, row: usize) -> EngineResult<Option<NaiveDateTime>> {
    if column.is_null(row) {
        return Ok(None);
    }
    let dt = match column.data() {
        ColumnData::Date(v) => days_to_date(v[row]).and_then(|d| d.and_hms_opt(0, 0, 0)),
        ColumnData::Timestamp(v) => micros_to_datetime(v[row]),
        other => {
            return Err(EngineError::type_mismatch(format!(
                "expected DATE or TIMESTAMP, got {}",
                other.data_type()
            )))
        }
    };
    dt.map(Some)
        .ok_or_else(|| EngineError::execution("temporal value out of range"))
}

fn strftime(values: &Column, formats: &Column) -> EngineResult<Column> {
    let mut builder = ColumnBuilder::with_capacity(DataType::String, values.len());
    for row in 0..values.len() {
        let (Some(dt), false) = (datetime_at(values, row)?, formats.is_null(row)) else {
            builder.append_null();
            continue;
        };
        let format = formats.value(row);
        let format = format.as_str().unwrap_or_default();
        let mut text = String::new();
        write!(text, "{}", dt.format(format))
            .map_err(|_| EngineError::execution(format!("invalid strftime format '{}'", format)))?;
        builder.append_value(&Value::String(text))?;
    }
    Ok(builder.finish())
}

fn date_part(values: &Column, part: DatePart) -> EngineResult<Column> {
    let mut out = Vec::with_capacity(values.len());
    for row in 0..values.len() {
        let Some(dt) = datetime_at(values, row)? else {
            out.push(None);
            continue;
        };
        let v = match part {
            DatePart::Year => dt.year() as i64,
            DatePart::Quarter => (dt.month0() / 3 + 1) as i64,
            DatePart::Month => dt.month() as i64,
            DatePart::Day => dt.day() as i64,
            DatePart::Hour => dt.hour() as i64,
            DatePart::Minute => dt.minute() as i64,
            DatePart::Second => dt.second() as i64,
            DatePart::DayOfWeek => dt.weekday().num_days_from_sunday() as i64,
            DatePart::IsoDayOfWeek => dt.weekday().number_from_monday() as i64,
            DatePart::DayOfYear => dt.ordinal() as i64,
            DatePart::Week => dt.iso_week().week() as i64,
        };
        out.push(Some(v));
    }
    Ok(Column::from_i64(out))
}

fn truncate(dt: NaiveDateTime, unit: DateTruncUnit) -> Option<NaiveDateTime> {
    let date = dt.date();
    let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0);
    match unit {
        DateTruncUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(midnight),
        DateTruncUnit::Quarter => {
            NaiveDate::from_ymd_opt(date.year(), date.month0() / 3 * 3 + 1, 1).and_then(midnight)
        }
        DateTruncUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).and_then(midnight),
        DateTruncUnit::Week => date
            .checked_sub_days(chrono::Days::new(date.weekday().num_days_from_monday() as u64))
            .and_then(midnight),
        DateTruncUnit::Day => midnight(date),
        DateTruncUnit::Hour => date.and_hms_opt(dt.hour(), 0, 0),
        DateTruncUnit::Minute => date.and_hms_opt(dt.hour(), dt.minute(), 0),
    }
}

fn date_trunc(values: &Column, unit: DateTruncUnit, out_type: DataType) -> EngineResult<Column> {
    let mut builder = ColumnBuilder::with_capacity(out_type, values.len());
    for row in 0..values.len() {
        let Some(dt) = datetime_at(values, row)? else {
            builder.append_null();
            continue;
        };
        let truncated = truncate(dt, unit)
            .ok_or_else(|| EngineError::execution("date_trunc out of range"))?;
        let value = match out_type {
            DataType::Date => Value::Date(date_to_days(truncated.date())),
            _ => Value::Timestamp(truncated.and_utc().timestamp_micros()),
        };
        builder.append_value(&value)?;
    }
    Ok(builder.finish())
}

/// Translate a LIKE pattern into an anchored regex
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> EngineResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| EngineError::execution(format!("invalid LIKE pattern: {}", e)))
}

fn evaluate_like(
    input: &Column,
    patterns: &Column,
    negated: bool,
    case_insensitive: bool,
) -> EngineResult<Column> {
    let (ColumnData::String(values), ColumnData::String(pats)) = (input.data(), patterns.data())
    else {
        return Err(EngineError::type_mismatch("LIKE needs STRING operands"));
    };
    let mut validity = input.validity().clone();
    validity &= patterns.validity().as_bitslice();
    let mut compiled: FxHashMap<&str, Regex> = FxHashMap::default();
    let mut bits = BitVec::with_capacity(values.len());
    for row in 0..values.len() {
        if !validity[row] {
            bits.push(false);
            continue;
        }
        let pattern = pats[row].as_str();
        if !compiled.contains_key(pattern) {
            compiled.insert(pattern, like_to_regex(pattern, case_insensitive)?);
        }
        let matched = compiled
            .get(pattern)
            .map(|re| re.is_match(&values[row]))
            .unwrap_or(false);
        bits.push(matched != negated);
    }
    Column::try_new(ColumnData::Boolean(bits), validity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::{col, func, lit};
    use crate::storage::columnar::Field;
    use crate::storage::value::parse_date;

    fn batch() -> Batch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Integer, false),
            Field::new("amt", DataType::Double, true),
            Field::new("region", DataType::String, true),
            Field::new("d", DataType::Date, true),
            Field::new("flag", DataType::Boolean, true),
        ]));
        Batch::try_new(
            schema,
            vec![
                Arc::new(Column::from_i64(vec![Some(1), Some(2), Some(3)])),
                Arc::new(Column::from_f64(vec![None, Some(10.0), Some(20.0)])),
                Arc::new(Column::from_strings(vec![Some("North"), Some("south"), None])),
                Arc::new(Column::from_dates(vec![
                    parse_date("2024-01-15"),
                    parse_date("2024-05-31"),
                    None,
                ])),
                Arc::new(Column::from_bool(vec![Some(true), None, Some(false)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_null_propagation_in_arithmetic() {
        let out = evaluate(&col("amt").add(lit(1i64)), &batch()).unwrap();
        assert_eq!(out.values(), vec![Value::Null, Value::Double(11.0), Value::Double(21.0)]);
    }

    #[test]
    fn test_kleene_and_with_comparison() {
        let pred = col("flag").and(col("id").gt(lit(1i64)));
        let out = evaluate(&pred, &batch()).unwrap();
        assert_eq!(
            out.values(),
            vec![Value::Boolean(false), Value::Null, Value::Boolean(false)]
        );
        assert_eq!(evaluate_predicate(&pred, &batch()).unwrap().count_ones(), 0);
    }

    #[test]
    fn test_in_list_with_null() {
        let e = col("id").in_list(vec![lit(2i64), Expr::Null(DataType::Integer)], false);
        let out = evaluate(&e, &batch()).unwrap();
        assert_eq!(out.values(), vec![Value::Null, Value::Boolean(true), Value::Null]);
    }

    #[test]
    fn test_like_and_ilike() {
        let out = evaluate(&col("region").like("N%"), &batch()).unwrap();
        assert_eq!(
            out.values(),
            vec![Value::Boolean(true), Value::Boolean(false), Value::Null]
        );
        let out = evaluate(&col("region").ilike("S_UTH"), &batch()).unwrap();
        assert_eq!(out.value(1), Value::Boolean(true));
    }

    #[test]
    fn test_case_without_operand() {
        let e = Expr::Case {
            operand: None,
            when_then: vec![(col("amt").gt_eq(lit(15.0)), lit("high"))],
            else_expr: Some(Box::new(lit("low"))),
        };
        let out = evaluate(&e, &batch()).unwrap();
        assert_eq!(
            out.values(),
            vec![Value::from("low"), Value::from("low"), Value::from("high")]
        );
    }

    #[test]
    fn test_temporal_functions() {
        let b = batch();
        let year = evaluate(&func(ScalarFunction::DatePart(DatePart::Year), vec![col("d")]), &b).unwrap();
        assert_eq!(year.value(0), Value::Integer(2024));
        assert_eq!(year.value(2), Value::Null);

        // 2024-05-31 is a Friday
        let dow = evaluate(&func(ScalarFunction::DatePart(DatePart::IsoDayOfWeek), vec![col("d")]), &b).unwrap();
        assert_eq!(dow.value(1), Value::Integer(5));

        let month = evaluate(&func(ScalarFunction::Strftime, vec![col("d"), lit("%Y-%m")]), &b).unwrap();
        assert_eq!(month.value(1), Value::from("2024-05"));

        let trunc = evaluate(&func(ScalarFunction::DateTrunc(DateTruncUnit::Quarter), vec![col("d")]), &b).unwrap();
        assert_eq!(trunc.value(1), Value::Date(parse_date("2024-04-01").unwrap()));
    }

    #[test]
    fn test_round_and_coalesce() {
        let b = batch();
        let r = evaluate(&func(ScalarFunction::Round, vec![col("amt").div(lit(3i64)), lit(2i64)]), &b).unwrap();
        assert_eq!(r.value(1), Value::Double(3.33));
        let c = evaluate(&func(ScalarFunction::Coalesce, vec![col("amt"), lit(0i64)]), &b).unwrap();
        assert_eq!(c.value(0), Value::Double(0.0));
    }

    #[test]
    fn test_string_date_comparison() {
        let out = evaluate(&col("d").gt_eq(lit("2024-03-01")), &batch()).unwrap();
        assert_eq!(
            out.values(),
            vec![Value::Boolean(false), Value::Boolean(true), Value::Null]
        );
    }
}
