/// Incremental aggregate state
///
/// One `Accumulator` per (group, aggregate). NULL inputs are ignored by every function
/// except COUNT(*). Functions with no non-null input finalize to NULL, counts to 0.
use crate::error::{EngineError, EngineResult};
use crate::query::plan::AggregateFunction;
use crate::storage::column::{Column, ColumnData};
use crate::storage::value::{DataType, Value};
use fxhash::FxHashSet;
use std::cmp::Ordering;

/// Result type of `function` applied to arguments of `arg_types`
pub fn output_type(function: AggregateFunction, arg_types: &[DataType]) -> EngineResult<DataType> {
    if arg_types.len() != function.arity() {
        return Err(EngineError::planning(format!(
            "{} takes {} argument(s), got {}",
            function.name(),
            function.arity(),
            arg_types.len()
        )));
    }
    let numeric = |t: DataType| -> EngineResult<()> {
        if t.is_numeric() {
            Ok(())
        } else {
            Err(EngineError::type_mismatch(format!(
                "{} needs a numeric argument, got {}",
                function.name(),
                t
            )))
        }
    };
    match function {
        AggregateFunction::CountStar | AggregateFunction::Count | AggregateFunction::CountDistinct => {
            Ok(DataType::Integer)
        }
        AggregateFunction::Sum => {
            numeric(arg_types[0])?;
            Ok(arg_types[0])
        }
        AggregateFunction::Min | AggregateFunction::Max => Ok(arg_types[0]),
        AggregateFunction::Avg | AggregateFunction::Stddev | AggregateFunction::StddevPop => {
            numeric(arg_types[0])?;
            Ok(DataType::Double)
        }
        AggregateFunction::Corr => {
            numeric(arg_types[0])?;
            numeric(arg_types[1])?;
            Ok(DataType::Double)
        }
        AggregateFunction::PercentileCont(p) => {
            if !(0.0..=1.0).contains(&p) {
                return Err(EngineError::planning(format!(
                    "percentile_cont fraction {} is outside [0, 1]",
                    p
                )));
            }
            numeric(arg_types[0])?;
            Ok(DataType::Double)
        }
    }
}

/// Welford running mean/variance
#[derive(Clone, Debug, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn stddev(&self, population: bool) -> Option<f64> {
        let denom = if population {
            self.count
        } else {
            self.count.checked_sub(1)?
        };
        if denom == 0 {
            return None;
        }
        Some((self.m2 / denom as f64).max(0.0).sqrt())
    }
}

/// Online co-moments for Pearson correlation
#[derive(Clone, Debug, Default)]
pub struct CoMoments {
    count: u64,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    c_xy: f64,
}

impl CoMoments {
    fn push(&mut self, y: f64, x: f64) {
        self.count += 1;
        let n = self.count as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / n;
        self.mean_y += dy / n;
        self.c_xy += dx * (y - self.mean_y);
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
    }

    fn corr(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let denom = (self.m2_x * self.m2_y).sqrt();
        if denom == 0.0 || !denom.is_finite() {
            return None;
        }
        Some(self.c_xy / denom)
    }
}

/// Aggregation state for one group
#[derive(Clone, Debug)]
pub enum Accumulator {
    CountStar(i64),
    Count(i64),
    CountDistinct(FxHashSet<Value>),
    SumInteger { sum: i128, seen: bool },
    SumDouble { sum: f64, seen: bool },
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Stddev { state: Welford, population: bool },
    Corr(CoMoments),
    /// Buffers the group's values: memory grows with the group size
    PercentileCont { fraction: f64, values: Vec<f64> },
}

fn numeric_at(column: &Column, row: usize) -> Option<f64> {
    if column.is_null(row) {
        return None;
    }
    match column.data() {
        ColumnData::Integer(v) => Some(v[row] as f64),
        ColumnData::Double(v) => Some(v[row]),
        _ => None,
    }
}

impl Accumulator {
    pub fn new(function: AggregateFunction, arg_types: &[DataType]) -> Self {
        match function {
            AggregateFunction::CountStar => Accumulator::CountStar(0),
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::CountDistinct => Accumulator::CountDistinct(FxHashSet::default()),
            AggregateFunction::Sum if arg_types.first() == Some(&DataType::Integer) => {
                Accumulator::SumInteger { sum: 0, seen: false }
            }
            AggregateFunction::Sum => Accumulator::SumDouble { sum: 0.0, seen: false },
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
            AggregateFunction::Stddev => Accumulator::Stddev {
                state: Welford::default(),
                population: false,
            },
            AggregateFunction::StddevPop => Accumulator::Stddev {
                state: Welford::default(),
                population: true,
            },
            AggregateFunction::Corr => Accumulator::Corr(CoMoments::default()),
            AggregateFunction::PercentileCont(fraction) => Accumulator::PercentileCont {
                fraction,
                values: Vec::new(),
            },
        }
    }

    /// Fold row `row` of the argument columns into the state
    pub fn update(&mut self, args: &[&Column], row: usize) {
        match self {
            Accumulator::CountStar(n) => *n += 1,
            Accumulator::Count(n) => {
                if !args[0].is_null(row) {
                    *n += 1;
                }
            }
            Accumulator::CountDistinct(set) => {
                if !args[0].is_null(row) {
                    set.insert(args[0].value(row));
                }
            }
            Accumulator::SumInteger { sum, seen } => {
                if let (false, ColumnData::Integer(v)) = (args[0].is_null(row), args[0].data()) {
                    *sum += v[row] as i128;
                    *seen = true;
                }
            }
            Accumulator::SumDouble { sum, seen } => {
                if let Some(x) = numeric_at(args[0], row) {
                    *sum += x;
                    *seen = true;
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(x) = numeric_at(args[0], row) {
                    *sum += x;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !args[0].is_null(row) {
                    let v = args[0].value(row);
                    let replace = match current {
                        Some(c) => v.total_cmp(c) == Ordering::Less,
                        None => true,
                    };
                    if replace {
                        *current = Some(v);
                    }
                }
            }
            Accumulator::Max(current) => {
                if !args[0].is_null(row) {
                    let v = args[0].value(row);
                    let replace = match current {
                        Some(c) => v.total_cmp(c) == Ordering::Greater,
                        None => true,
                    };
                    if replace {
                        *current = Some(v);
                    }
                }
            }
            Accumulator::Stddev { state, .. } => {
                if let Some(x) = numeric_at(args[0], row) {
                    state.push(x);
                }
            }
            Accumulator::Corr(state) => {
                if let (Some(y), Some(x)) = (numeric_at(args[0], row), numeric_at(args[1], row)) {
                    state.push(y, x);
                }
            }
            Accumulator::PercentileCont { values, .. } => {
                if let Some(x) = numeric_at(args[0], row) {
                    values.push(x);
                }
            }
        }
    }

    pub fn finalize(&self) -> EngineResult<Value> {
        let value = match self {
            Accumulator::CountStar(n) | Accumulator::Count(n) => Value::Integer(*n),
            Accumulator::CountDistinct(set) => Value::Integer(set.len() as i64),
            Accumulator::SumInteger { seen: false, .. } => Value::Null,
            Accumulator::SumInteger { sum, .. } => Value::Integer(
                i64::try_from(*sum)
                    .map_err(|_| EngineError::execution("integer overflow in SUM"))?,
            ),
            Accumulator::SumDouble { sum, seen } => {
                if *seen {
                    Value::Double(*sum)
                } else {
                    Value::Null
                }
            }
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Double(sum / *count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone().unwrap_or(Value::Null),
            Accumulator::Stddev { state, population } => {
                state.stddev(*population).map(Value::Double).unwrap_or(Value::Null)
            }
            Accumulator::Corr(state) => state.corr().map(Value::Double).unwrap_or(Value::Null),
            Accumulator::PercentileCont { fraction, values } => {
                percentile_cont(values, *fraction).map(Value::Double).unwrap_or(Value::Null)
            }
        };
        Ok(value)
    }

    /// Bytes held beyond the fixed-size state
    pub fn heap_size(&self) -> usize {
        match self {
            Accumulator::CountDistinct(set) => set.len() * (std::mem::size_of::<Value>() + 8),
            Accumulator::PercentileCont { values, .. } => values.len() * 8,
            Accumulator::Min(Some(Value::String(s))) | Accumulator::Max(Some(Value::String(s))) => {
                s.len()
            }
            _ => 0,
        }
    }
}

/// Linear interpolation between the two closest ranks of `fraction * (n - 1)`
pub fn percentile_cont(values: &[f64], fraction: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = fraction * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let weight = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: AggregateFunction, column: &Column) -> Value {
        let mut acc = Accumulator::new(function, &[column.data_type()]);
        for row in 0..column.len() {
            acc.update(&[column], row);
        }
        acc.finalize().unwrap()
    }

    #[test]
    fn test_sum_ignores_nulls() {
        let col = Column::from_f64(vec![None, Some(10.0), Some(20.0)]);
        assert_eq!(run(AggregateFunction::Sum, &col), Value::Double(30.0));
        assert_eq!(run(AggregateFunction::Count, &col), Value::Integer(2));
        assert_eq!(run(AggregateFunction::CountStar, &col), Value::Integer(3));
        assert_eq!(run(AggregateFunction::Avg, &col), Value::Double(15.0));
    }

    #[test]
    fn test_empty_input() {
        let col = Column::from_i64(vec![None, None]);
        assert_eq!(run(AggregateFunction::Sum, &col), Value::Null);
        assert_eq!(run(AggregateFunction::Max, &col), Value::Null);
        assert_eq!(run(AggregateFunction::Count, &col), Value::Integer(0));
        assert_eq!(run(AggregateFunction::Stddev, &col), Value::Null);
    }

    #[test]
    fn test_stddev_and_percentile() {
        let col = Column::from_f64(vec![Some(2.0), Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)]);
        let pop = run(AggregateFunction::StddevPop, &col).as_f64().unwrap();
        assert!((pop - 2.0).abs() < 1e-12);
        let samp = run(AggregateFunction::Stddev, &col).as_f64().unwrap();
        assert!((samp - 2.138089935299395).abs() < 1e-12);
        let median = run(AggregateFunction::PercentileCont(0.5), &col).as_f64().unwrap();
        assert!((median - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_corr_perfect_line() {
        let y = Column::from_f64(vec![Some(2.0), Some(4.0), Some(6.0), None]);
        let x = Column::from_i64(vec![Some(1), Some(2), Some(3), Some(4)]);
        let mut acc = Accumulator::new(AggregateFunction::Corr, &[DataType::Double, DataType::Integer]);
        for row in 0..4 {
            acc.update(&[&y, &x], row);
        }
        let r = acc.finalize().unwrap().as_f64().unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_count_distinct_and_integer_sum() {
        let col = Column::from_i64(vec![Some(1), Some(1), Some(2), None]);
        assert_eq!(run(AggregateFunction::CountDistinct, &col), Value::Integer(2));
        assert_eq!(run(AggregateFunction::Sum, &col), Value::Integer(4));
    }

    #[test]
    fn test_output_type_checks() {
        assert!(output_type(AggregateFunction::Sum, &[DataType::String]).is_err());
        assert_eq!(output_type(AggregateFunction::Min, &[DataType::Date]).unwrap(), DataType::Date);
        assert!(output_type(AggregateFunction::PercentileCont(1.5), &[DataType::Double]).is_err());
    }
}
