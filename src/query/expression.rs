/// Scalar expression trees
///
/// Expressions arrive already resolved by an external planner: column references are
/// names (optionally `qualifier.name`) and literals are typed. Binding (`data_type`) checks
/// every reference and operand type against an input schema before any row is read.
use crate::error::{EngineError, EngineResult};
use crate::storage::columnar::Schema;
use crate::storage::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// SQL expression representation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference (`name` or `qualifier.name`)
    Column(String),
    /// Typed literal; `Value::Null` here is rejected when binding, use `Expr::Null`
    Literal(Value),
    /// NULL of a known type
    Null(DataType),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Function {
        func: ScalarFunction,
        args: Vec<Expr>,
    },
    /// `CASE [operand] WHEN .. THEN .. [ELSE ..] END`
    Case {
        operand: Option<Box<Expr>>,
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// LIKE / ILIKE with `%` and `_` wildcards
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
    /// String concatenation `||`
    Concat,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

/// Closed set of scalar functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarFunction {
    /// First non-NULL argument
    Coalesce,
    /// `ROUND(x)` or `ROUND(x, digits)`
    Round,
    Abs,
    Upper,
    Lower,
    Length,
    /// `STRFTIME(temporal, format)` with chrono format specifiers
    Strftime,
    /// `DATE_PART(part, temporal)` / `EXTRACT(part FROM temporal)`
    DatePart(DatePart),
    /// `DATE_TRUNC(unit, temporal)`
    DateTrunc(DateTruncUnit),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// Sunday = 0 .. Saturday = 6
    DayOfWeek,
    /// Monday = 1 .. Sunday = 7
    IsoDayOfWeek,
    DayOfYear,
    /// ISO week number
    Week,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateTruncUnit {
    Year,
    Quarter,
    Month,
    /// ISO week, starting Monday
    Week,
    Day,
    Hour,
    Minute,
}

impl ScalarFunction {
    pub fn name(&self) -> String {
        match self {
            ScalarFunction::Coalesce => "coalesce".into(),
            ScalarFunction::Round => "round".into(),
            ScalarFunction::Abs => "abs".into(),
            ScalarFunction::Upper => "upper".into(),
            ScalarFunction::Lower => "lower".into(),
            ScalarFunction::Length => "length".into(),
            ScalarFunction::Strftime => "strftime".into(),
            ScalarFunction::DatePart(part) => format!("date_part_{:?}", part).to_lowercase(),
            ScalarFunction::DateTrunc(unit) => format!("date_trunc_{:?}", unit).to_lowercase(),
        }
    }
}

/// Column reference
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Literal
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

pub fn func(func: ScalarFunction, args: Vec<Expr>) -> Expr {
    Expr::Function { func, args }
}

impl Expr {
    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn mul(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn div(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn modulo(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Modulo, other)
    }

    pub fn concat(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Concat, other)
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn negate(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Negate,
            expr: Box::new(self),
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(self),
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNotNull,
            expr: Box::new(self),
        }
    }

    pub fn cast(self, data_type: DataType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn in_list(self, list: Vec<Expr>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(lit(pattern.into())),
            negated: false,
            case_insensitive: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(lit(pattern.into())),
            negated: false,
            case_insensitive: true,
        }
    }

    /// Output type of this expression over `schema`.
    /// Unknown columns are schema errors; incompatible operands are type mismatches.
    pub fn data_type(&self, schema: &Schema) -> EngineResult<DataType> {
        match self {
            Expr::Column(name) => Ok(schema.field(schema.index_of(name)?).data_type),
            Expr::Literal(value) => value.data_type().ok_or_else(|| {
                EngineError::type_mismatch("untyped NULL literal; use a typed NULL")
            }),
            Expr::Null(data_type) => Ok(*data_type),
            Expr::Binary { op, left, right } => {
                let lt = left.data_type(schema)?;
                let rt = right.data_type(schema)?;
                binary_result_type(*op, lt, rt, left, right)
            }
            Expr::Unary { op, expr } => {
                let t = expr.data_type(schema)?;
                match op {
                    UnaryOp::Not if t == DataType::Boolean => Ok(DataType::Boolean),
                    UnaryOp::Not => Err(EngineError::type_mismatch(format!("NOT applied to {}", t))),
                    UnaryOp::Negate if t.is_numeric() => Ok(t),
                    UnaryOp::Negate => {
                        Err(EngineError::type_mismatch(format!("unary minus applied to {}", t)))
                    }
                    UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(DataType::Boolean),
                }
            }
            Expr::Function { func, args } => function_result_type(*func, args, schema),
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                if when_then.is_empty() {
                    return Err(EngineError::planning("CASE without WHEN branches"));
                }
                let operand_type = operand.as_ref().map(|o| o.data_type(schema)).transpose()?;
                let mut result: Option<DataType> = None;
                for (when, then) in when_then {
                    let wt = when.data_type(schema)?;
                    match operand_type {
                        Some(ot) => {
                            comparable(ot, wt, operand.as_deref(), Some(when))?;
                        }
                        None if wt != DataType::Boolean => {
                            return Err(EngineError::type_mismatch(format!(
                                "CASE WHEN condition is {}, expected BOOLEAN",
                                wt
                            )))
                        }
                        None => {}
                    }
                    result = Some(unify(result, then.data_type(schema)?, "CASE")?);
                }
                if let Some(else_expr) = else_expr {
                    result = Some(unify(result, else_expr.data_type(schema)?, "CASE")?);
                }
                result.ok_or_else(|| EngineError::internal("CASE result type"))
            }
            Expr::Cast { expr, data_type } => {
                let from = expr.data_type(schema)?;
                if from == DataType::Boolean && data_type.is_temporal()
                    || from.is_temporal() && matches!(data_type, DataType::Boolean | DataType::Integer | DataType::Double)
                {
                    return Err(EngineError::type_mismatch(format!(
                        "cannot cast {} to {}",
                        from, data_type
                    )));
                }
                // constant casts are checked now so bad literals fail before any row is read
                if let Expr::Literal(value) = expr.as_ref() {
                    value.cast_to(*data_type)?;
                }
                Ok(*data_type)
            }
            Expr::InList { expr, list, .. } => {
                let t = expr.data_type(schema)?;
                for item in list {
                    let it = item.data_type(schema)?;
                    comparable(t, it, Some(expr.as_ref()), Some(item))?;
                }
                Ok(DataType::Boolean)
            }
            Expr::Like { expr, pattern, .. } => {
                let t = expr.data_type(schema)?;
                let pt = pattern.data_type(schema)?;
                if t != DataType::String || pt != DataType::String {
                    return Err(EngineError::type_mismatch(format!(
                        "LIKE needs STRING operands, got {} and {}",
                        t, pt
                    )));
                }
                Ok(DataType::Boolean)
            }
        }
    }

    /// Every column name this expression reads
    pub fn referenced_columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::Literal(_) | Expr::Null(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.collect_columns(out),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                if let Some(o) = operand {
                    o.collect_columns(out);
                }
                for (w, t) in when_then {
                    w.collect_columns(out);
                    t.collect_columns(out);
                }
                if let Some(e) = else_expr {
                    e.collect_columns(out);
                }
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                list.iter().for_each(|a| a.collect_columns(out));
            }
            Expr::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
        }
    }

    /// Default output column name: the bare column name for references, the SQL text otherwise
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
            other => other.to_string(),
        }
    }

    /// Split a conjunction into its AND-ed terms
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// AND together a list of terms; None when the list is empty
    pub fn conjunction(terms: Vec<Expr>) -> Option<Expr> {
        terms.into_iter().reduce(|acc, e| acc.and(e))
    }
}

fn binary_result_type(
    op: BinaryOp,
    lt: DataType,
    rt: DataType,
    left: &Expr,
    right: &Expr,
) -> EngineResult<DataType> {
    use DataType::*;
    if op.is_arithmetic() {
        return match (op, lt, rt) {
            (BinaryOp::Divide, l, r) if l.is_numeric() && r.is_numeric() => Ok(Double),
            (_, Integer, Integer) => Ok(Integer),
            (_, l, r) if l.is_numeric() && r.is_numeric() => Ok(Double),
            // date arithmetic in whole days
            (BinaryOp::Add | BinaryOp::Subtract, Date, Integer) => Ok(Date),
            (BinaryOp::Add, Integer, Date) => Ok(Date),
            (BinaryOp::Subtract, Date, Date) => Ok(Integer),
            _ => Err(EngineError::type_mismatch(format!(
                "operator {} not defined for {} and {}",
                op.symbol(),
                lt,
                rt
            ))),
        };
    }
    if op.is_comparison() {
        comparable(lt, rt, Some(left), Some(right))?;
        return Ok(Boolean);
    }
    match op {
        BinaryOp::And | BinaryOp::Or => {
            if lt == Boolean && rt == Boolean {
                Ok(Boolean)
            } else {
                Err(EngineError::type_mismatch(format!(
                    "{} needs BOOLEAN operands, got {} and {}",
                    op.symbol(),
                    lt,
                    rt
                )))
            }
        }
        BinaryOp::Concat => Ok(String),
        _ => Err(EngineError::internal(format!("unhandled operator {:?}", op))),
    }
}

/// Check that two operand types can be compared.
/// String against Date/Timestamp is allowed; a string literal on that side must parse.
pub(crate) fn comparable(
    lt: DataType,
    rt: DataType,
    left: Option<&Expr>,
    right: Option<&Expr>,
) -> EngineResult<()> {
    if DataType::common_supertype(lt, rt).is_some() {
        return Ok(());
    }
    let check_literal = |expr: Option<&Expr>, target: DataType| -> EngineResult<()> {
        if let Some(Expr::Literal(v)) = expr {
            v.cast_to(target).map_err(|_| {
                EngineError::type_mismatch(format!("'{}' cannot be compared with {}", v, target))
            })?;
        }
        Ok(())
    };
    match (lt, rt) {
        (DataType::String, t) if t.is_temporal() => check_literal(left, t),
        (t, DataType::String) if t.is_temporal() => check_literal(right, t),
        _ => Err(EngineError::type_mismatch(format!(
            "cannot compare {} with {}",
            lt, rt
        ))),
    }
}

fn unify(current: Option<DataType>, next: DataType, what: &str) -> EngineResult<DataType> {
    match current {
        None => Ok(next),
        Some(t) => DataType::common_supertype(t, next).ok_or_else(|| {
            EngineError::type_mismatch(format!("{} branches have types {} and {}", what, t, next))
        }),
    }
}

fn function_result_type(
    function: ScalarFunction,
    args: &[Expr],
    schema: &Schema,
) -> EngineResult<DataType> {
    let types = args
        .iter()
        .map(|a| a.data_type(schema))
        .collect::<EngineResult<Vec<_>>>()?;
    let arity = |expected: &[usize]| -> EngineResult<()> {
        if expected.contains(&types.len()) {
            Ok(())
        } else {
            Err(EngineError::planning(format!(
                "{} takes {:?} arguments, got {}",
                function.name(),
                expected,
                types.len()
            )))
        }
    };
    let expect = |idx: usize, ok: bool, wanted: &str| -> EngineResult<()> {
        if ok {
            Ok(())
        } else {
            Err(EngineError::type_mismatch(format!(
                "argument {} of {} must be {}, got {}",
                idx + 1,
                function.name(),
                wanted,
                types[idx]
            )))
        }
    };
    match function {
        ScalarFunction::Coalesce => {
            if types.is_empty() {
                return Err(EngineError::planning("coalesce needs at least one argument"));
            }
            types
                .iter()
                .try_fold(None, |acc, t| unify(acc, *t, "COALESCE").map(Some))?
                .ok_or_else(|| EngineError::internal("coalesce type"))
        }
        ScalarFunction::Round => {
            arity(&[1, 2])?;
            expect(0, types[0].is_numeric(), "numeric")?;
            if types.len() == 2 {
                expect(1, types[1] == DataType::Integer, "INTEGER")?;
            }
            Ok(types[0])
        }
        ScalarFunction::Abs => {
            arity(&[1])?;
            expect(0, types[0].is_numeric(), "numeric")?;
            Ok(types[0])
        }
        ScalarFunction::Upper | ScalarFunction::Lower => {
            arity(&[1])?;
            expect(0, types[0] == DataType::String, "STRING")?;
            Ok(DataType::String)
        }
        ScalarFunction::Length => {
            arity(&[1])?;
            expect(0, types[0] == DataType::String, "STRING")?;
            Ok(DataType::Integer)
        }
        ScalarFunction::Strftime => {
            arity(&[2])?;
            expect(0, types[0].is_temporal(), "DATE or TIMESTAMP")?;
            expect(1, types[1] == DataType::String, "STRING")?;
            Ok(DataType::String)
        }
        ScalarFunction::DatePart(_) => {
            arity(&[1])?;
            expect(0, types[0].is_temporal(), "DATE or TIMESTAMP")?;
            Ok(DataType::Integer)
        }
        ScalarFunction::DateTrunc(unit) => {
            arity(&[1])?;
            expect(0, types[0].is_temporal(), "DATE or TIMESTAMP")?;
            if types[0] == DataType::Date && matches!(unit, DateTruncUnit::Hour | DateTruncUnit::Minute)
            {
                return Ok(DataType::Timestamp);
            }
            Ok(types[0])
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(Value::String(s)) => write!(f, "'{}'", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Null(_) => write!(f, "NULL"),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {}", expr),
                UnaryOp::Negate => write!(f, "-{}", expr),
                UnaryOp::IsNull => write!(f, "{} IS NULL", expr),
                UnaryOp::IsNotNull => write!(f, "{} IS NOT NULL", expr),
            },
            Expr::Function { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), args.join(", "))
            }
            Expr::Case { .. } => write!(f, "CASE"),
            Expr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            Expr::InList { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|a| a.to_string()).collect();
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{}{} IN ({})", expr, not, items.join(", "))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let kw = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{} {}{} {}", expr, not, kw, pattern)
            }
        }
    }
}
