use crate::ingestion::{FileFormat, ReaderOptions};
use crate::query::expression::Expr;
use crate::storage::columnar::{Batch, SchemaRef};
use crate::storage::statistics::ScanPredicate;
use crate::storage::value::Value;
use serde::{Deserialize, Serialize};

/// Logical query tree handed to the executor.
/// Column names are already resolved and literals typed by the planner that built it.
#[derive(Clone, Debug)]
pub enum PlanOperator {
    /// Read files matching `path` (a path or glob)
    Scan {
        path: String,
        format: FileFormat,
        /// Qualifier given to the output fields
        alias: Option<String>,
        options: ReaderOptions,
        /// Columns to decode; None = all. Filled in by projection pushdown.
        projection: Option<Vec<String>>,
        /// Conjunction pushed into the reader. Filled in by predicate pushdown.
        predicates: Vec<ScanPredicate>,
    },
    /// In-memory table
    Values {
        alias: Option<String>,
        schema: SchemaRef,
        batches: Vec<Batch>,
    },
    /// WHERE / HAVING / QUALIFY
    Filter {
        input: Box<PlanOperator>,
        predicate: Expr,
    },
    Project {
        input: Box<PlanOperator>,
        exprs: Vec<ProjectionExpr>,
    },
    /// Hash equi-join; the right input is the build side
    Join {
        left: Box<PlanOperator>,
        right: Box<PlanOperator>,
        join_type: JoinType,
        /// (probe key, build key) pairs
        on: Vec<(Expr, Expr)>,
    },
    Aggregate {
        input: Box<PlanOperator>,
        group_by: Vec<ProjectionExpr>,
        grouping: GroupingSpec,
        aggregates: Vec<AggregateExpr>,
        /// Append a `grouping_id` bitmask column
        emit_grouping_id: bool,
    },
    Window {
        input: Box<PlanOperator>,
        functions: Vec<WindowFunctionExpr>,
    },
    Sort {
        input: Box<PlanOperator>,
        order_by: Vec<OrderByExpr>,
    },
    Limit {
        input: Box<PlanOperator>,
        limit: Option<usize>,
        offset: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    /// LEFT OUTER: every probe row appears at least once
    Left,
}

/// Output expression with optional alias
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectionExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn output_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.expr.output_name())
    }
}

impl From<Expr> for ProjectionExpr {
    fn from(expr: Expr) -> Self {
        ProjectionExpr::new(expr)
    }
}

/// Which combinations of the GROUP BY keys produce groups
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingSpec {
    /// Plain GROUP BY over all keys
    Simple,
    /// GROUPING SETS; each set lists indices into `group_by`
    Sets(Vec<Vec<usize>>),
    Cube,
    Rollup,
}

impl GroupingSpec {
    /// Expand into explicit sets of key indices.
    /// CUBE(a,b) = (a,b),(a),(b),() and ROLLUP(a,b) = (a,b),(a),().
    pub fn expand(&self, key_count: usize) -> Vec<Vec<usize>> {
        match self {
            GroupingSpec::Simple => vec![(0..key_count).collect()],
            GroupingSpec::Sets(sets) => sets.clone(),
            GroupingSpec::Cube => {
                let full = (1u64 << key_count) - 1;
                (0..=full)
                    .rev()
                    .map(|mask| {
                        (0..key_count)
                            .filter(|i| mask & (1u64 << (key_count - 1 - i)) != 0)
                            .collect()
                    })
                    .collect()
            }
            GroupingSpec::Rollup => (0..=key_count).rev().map(|n| (0..n).collect()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    /// Arguments; empty for COUNT(*), (y, x) for CORR
    pub args: Vec<Expr>,
    pub alias: Option<String>,
}

impl AggregateExpr {
    pub fn new(function: AggregateFunction, args: Vec<Expr>) -> Self {
        Self {
            function,
            args,
            alias: None,
        }
    }

    pub fn count_star() -> Self {
        Self::new(AggregateFunction::CountStar, vec![])
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        match self.function {
            AggregateFunction::CountStar => "count_star()".to_string(),
            AggregateFunction::CountDistinct => format!("count(DISTINCT {})", args.join(", ")),
            f => format!("{}({})", f.name(), args.join(", ")),
        }
    }
}

/// Closed set of aggregate functions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AggregateFunction {
    CountStar,
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    /// Sample standard deviation (STDDEV / STDDEV_SAMP)
    Stddev,
    StddevPop,
    /// Pearson correlation CORR(y, x)
    Corr,
    /// PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY x)
    PercentileCont(f64),
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::CountStar | AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "count_distinct",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Stddev => "stddev",
            AggregateFunction::StddevPop => "stddev_pop",
            AggregateFunction::Corr => "corr",
            AggregateFunction::PercentileCont(_) => "percentile_cont",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            AggregateFunction::CountStar => 0,
            AggregateFunction::Corr => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub ascending: bool,
    /// Explicit NULLS FIRST (true) / NULLS LAST (false); None uses the configured default
    pub nulls_first: Option<bool>,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: true,
            nulls_first: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: false,
            nulls_first: None,
        }
    }

    pub fn nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = Some(nulls_first);
        self
    }
}

/// Window function expression
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowFunctionExpr {
    pub function: WindowFunction,
    /// Value arguments (LAG/LEAD/FIRST_VALUE/LAST_VALUE/aggregates)
    pub args: Vec<Expr>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    /// None = the default frame
    pub frame: Option<WindowFrame>,
    pub alias: Option<String>,
}

impl WindowFunctionExpr {
    pub fn new(function: WindowFunction, args: Vec<Expr>) -> Self {
        Self {
            function,
            args,
            partition_by: vec![],
            order_by: vec![],
            frame: None,
            alias: None,
        }
    }

    pub fn partition_by(mut self, exprs: Vec<Expr>) -> Self {
        self.partition_by = exprs;
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderByExpr>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn frame(mut self, frame: WindowFrame) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        format!("{}({}) OVER ()", self.function.name(), args.join(", "))
    }

    /// Frame in effect: explicit, else RANGE UNBOUNDED PRECEDING..CURRENT ROW with ORDER BY,
    /// else the whole partition
    pub fn effective_frame(&self) -> WindowFrame {
        match &self.frame {
            Some(frame) => frame.clone(),
            None if self.order_by.is_empty() => WindowFrame::whole_partition(),
            None => WindowFrame::new(
                FrameType::Range,
                FrameBound::UnboundedPreceding,
                FrameBound::CurrentRow,
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    /// NTILE(k), k > 0
    Ntile(usize),
    Lag {
        offset: usize,
        default: Option<Value>,
    },
    Lead {
        offset: usize,
        default: Option<Value>,
    },
    FirstValue,
    LastValue,
    /// Aggregate over the frame
    Aggregate(AggregateFunction),
}

impl WindowFunction {
    pub fn name(&self) -> &'static str {
        match self {
            WindowFunction::RowNumber => "row_number",
            WindowFunction::Rank => "rank",
            WindowFunction::DenseRank => "dense_rank",
            WindowFunction::Ntile(_) => "ntile",
            WindowFunction::Lag { .. } => "lag",
            WindowFunction::Lead { .. } => "lead",
            WindowFunction::FirstValue => "first_value",
            WindowFunction::LastValue => "last_value",
            WindowFunction::Aggregate(f) => f.name(),
        }
    }

    /// Functions that ignore the frame
    pub fn is_ranking(&self) -> bool {
        matches!(
            self,
            WindowFunction::RowNumber
                | WindowFunction::Rank
                | WindowFunction::DenseRank
                | WindowFunction::Ntile(_)
                | WindowFunction::Lag { .. }
                | WindowFunction::Lead { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame {
    pub frame_type: FrameType,
    pub start: FrameBound,
    pub end: FrameBound,
}

impl WindowFrame {
    pub fn new(frame_type: FrameType, start: FrameBound, end: FrameBound) -> Self {
        Self {
            frame_type,
            start,
            end,
        }
    }

    /// ROWS BETWEEN n PRECEDING AND CURRENT ROW
    pub fn trailing_rows(n: usize) -> Self {
        Self::new(FrameType::Rows, FrameBound::Preceding(n), FrameBound::CurrentRow)
    }

    pub fn whole_partition() -> Self {
        Self::new(
            FrameType::Rows,
            FrameBound::UnboundedPreceding,
            FrameBound::UnboundedFollowing,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Rows,
    /// Peer-based; only unbounded and CURRENT ROW bounds
    Range,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(usize),
    CurrentRow,
    Following(usize),
    UnboundedFollowing,
}

impl PlanOperator {
    pub fn scan(path: impl Into<String>, format: FileFormat) -> Self {
        PlanOperator::Scan {
            path: path.into(),
            format,
            alias: None,
            options: ReaderOptions::default(),
            projection: None,
            predicates: vec![],
        }
    }

    pub fn scan_with(
        path: impl Into<String>,
        format: FileFormat,
        alias: Option<&str>,
        options: ReaderOptions,
    ) -> Self {
        PlanOperator::Scan {
            path: path.into(),
            format,
            alias: alias.map(str::to_string),
            options,
            projection: None,
            predicates: vec![],
        }
    }

    pub fn values(alias: Option<&str>, schema: SchemaRef, batches: Vec<Batch>) -> Self {
        PlanOperator::Values {
            alias: alias.map(str::to_string),
            schema,
            batches,
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        PlanOperator::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn project(self, exprs: Vec<ProjectionExpr>) -> Self {
        PlanOperator::Project {
            input: Box::new(self),
            exprs,
        }
    }

    pub fn join(self, right: PlanOperator, join_type: JoinType, on: Vec<(Expr, Expr)>) -> Self {
        PlanOperator::Join {
            left: Box::new(self),
            right: Box::new(right),
            join_type,
            on,
        }
    }

    pub fn aggregate(
        self,
        group_by: Vec<ProjectionExpr>,
        grouping: GroupingSpec,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        PlanOperator::Aggregate {
            input: Box::new(self),
            group_by,
            grouping,
            aggregates,
            emit_grouping_id: false,
        }
    }

    /// Append a `grouping_id` column to an Aggregate; no-op on other operators
    pub fn with_grouping_id(mut self) -> Self {
        if let PlanOperator::Aggregate { emit_grouping_id, .. } = &mut self {
            *emit_grouping_id = true;
        }
        self
    }

    pub fn window(self, functions: Vec<WindowFunctionExpr>) -> Self {
        PlanOperator::Window {
            input: Box::new(self),
            functions,
        }
    }

    pub fn sort(self, order_by: Vec<OrderByExpr>) -> Self {
        PlanOperator::Sort {
            input: Box::new(self),
            order_by,
        }
    }

    pub fn limit(self, limit: usize) -> Self {
        PlanOperator::Limit {
            input: Box::new(self),
            limit: Some(limit),
            offset: 0,
        }
    }

    pub fn limit_offset(self, limit: Option<usize>, offset: usize) -> Self {
        PlanOperator::Limit {
            input: Box::new(self),
            limit,
            offset,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanOperator::Scan { .. } => "Scan",
            PlanOperator::Values { .. } => "Values",
            PlanOperator::Filter { .. } => "Filter",
            PlanOperator::Project { .. } => "Project",
            PlanOperator::Join { .. } => "HashJoin",
            PlanOperator::Aggregate { .. } => "Aggregate",
            PlanOperator::Window { .. } => "Window",
            PlanOperator::Sort { .. } => "Sort",
            PlanOperator::Limit { .. } => "Limit",
        }
    }

    pub fn children(&self) -> Vec<&PlanOperator> {
        match self {
            PlanOperator::Scan { .. } | PlanOperator::Values { .. } => vec![],
            PlanOperator::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PlanOperator::Filter { input, .. }
            | PlanOperator::Project { input, .. }
            | PlanOperator::Aggregate { input, .. }
            | PlanOperator::Window { input, .. }
            | PlanOperator::Sort { input, .. }
            | PlanOperator::Limit { input, .. } => vec![input.as_ref()],
        }
    }
}
