/// Pushdown rewrites applied to a plan before it is bound
///
/// Two passes, both semantics-preserving:
/// - predicate pushdown moves `column op literal` and `column IS [NOT] NULL` conjuncts of a
///   Filter sitting directly on a Scan into the scan, which uses them to skip blocks and
///   filters the surviving rows itself. Anything else stays in the Filter.
/// - projection pruning flows the set of referenced columns down the tree and narrows each
///   Scan to the columns something above it reads.
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::ingestion;
use crate::query::expression::{Expr, UnaryOp};
use crate::query::plan::PlanOperator;
use crate::storage::statistics::{CompareOp, ScanPredicate};
use std::collections::BTreeSet;
use tracing::debug;

/// Apply predicate pushdown, then projection pruning
pub fn optimize(plan: PlanOperator, config: &EngineConfig) -> EngineResult<PlanOperator> {
    let mut plan = push_predicates(plan);
    prune_projections(&mut plan, None, config)?;
    Ok(plan)
}

/// Name of `column` inside a scan aliased `alias`; None when it is qualified for another input
fn scan_column(column: &str, alias: Option<&str>) -> Option<String> {
    match column.split_once('.') {
        Some((qualifier, name)) if Some(qualifier) == alias => Some(name.to_string()),
        Some(_) => None,
        None => Some(column.to_string()),
    }
}

/// Scan predicate equivalent to `term`, if it has a pushable shape
pub fn to_scan_predicate(term: &Expr, alias: Option<&str>) -> Option<ScanPredicate> {
    match term {
        Expr::Binary { op, left, right } => {
            let op = CompareOp::from_binary(*op)?;
            match (left.as_ref(), right.as_ref()) {
                (Expr::Column(c), Expr::Literal(v)) if !v.is_null() => {
                    Some(ScanPredicate::new(scan_column(c, alias)?, op, v.clone()))
                }
                (Expr::Literal(v), Expr::Column(c)) if !v.is_null() => {
                    Some(ScanPredicate::new(scan_column(c, alias)?, op.flip(), v.clone()))
                }
                _ => None,
            }
        }
        Expr::Unary { op, expr } => match (op, expr.as_ref()) {
            (UnaryOp::IsNull, Expr::Column(c)) => Some(ScanPredicate::is_null(scan_column(c, alias)?)),
            (UnaryOp::IsNotNull, Expr::Column(c)) => {
                Some(ScanPredicate::is_not_null(scan_column(c, alias)?))
            }
            _ => None,
        },
        _ => None,
    }
}

fn map_children(plan: PlanOperator, f: fn(PlanOperator) -> PlanOperator) -> PlanOperator {
    match plan {
        leaf @ (PlanOperator::Scan { .. } | PlanOperator::Values { .. }) => leaf,
        PlanOperator::Filter { input, predicate } => PlanOperator::Filter {
            input: Box::new(f(*input)),
            predicate,
        },
        PlanOperator::Project { input, exprs } => PlanOperator::Project {
            input: Box::new(f(*input)),
            exprs,
        },
        PlanOperator::Join {
            left,
            right,
            join_type,
            on,
        } => PlanOperator::Join {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            join_type,
            on,
        },
        PlanOperator::Aggregate {
            input,
            group_by,
            grouping,
            aggregates,
            emit_grouping_id,
        } => PlanOperator::Aggregate {
            input: Box::new(f(*input)),
            group_by,
            grouping,
            aggregates,
            emit_grouping_id,
        },
        PlanOperator::Window { input, functions } => PlanOperator::Window {
            input: Box::new(f(*input)),
            functions,
        },
        PlanOperator::Sort { input, order_by } => PlanOperator::Sort {
            input: Box::new(f(*input)),
            order_by,
        },
        PlanOperator::Limit { input, limit, offset } => PlanOperator::Limit {
            input: Box::new(f(*input)),
            limit,
            offset,
        },
    }
}

fn push_predicates(plan: PlanOperator) -> PlanOperator {
    let PlanOperator::Filter { input, predicate } = plan else {
        return map_children(plan, push_predicates);
    };
    match push_predicates(*input) {
        PlanOperator::Scan {
            path,
            format,
            alias,
            options,
            projection,
            mut predicates,
        } => {
            let mut residual = Vec::new();
            for term in predicate.conjuncts() {
                match to_scan_predicate(term, alias.as_deref()) {
                    Some(pushed) => predicates.push(pushed),
                    None => residual.push(term.clone()),
                }
            }
            debug!(path = %path, pushed = predicates.len(), residual = residual.len(), "predicate pushdown");
            let scan = PlanOperator::Scan {
                path,
                format,
                alias,
                options,
                projection,
                predicates,
            };
            match Expr::conjunction(residual) {
                Some(rest) => scan.filter(rest),
                None => scan,
            }
        }
        other => other.filter(predicate),
    }
}

fn add_columns<'a>(required: &mut BTreeSet<String>, exprs: impl IntoIterator<Item = &'a Expr>) {
    for expr in exprs {
        required.extend(expr.referenced_columns());
    }
}

/// `required` = columns the parent reads from this node's output; None = all of them
fn prune_projections(
    plan: &mut PlanOperator,
    required: Option<&BTreeSet<String>>,
    config: &EngineConfig,
) -> EngineResult<()> {
    // parent requirement extended with what this node reads itself
    let extend = |own: &mut dyn FnMut(&mut BTreeSet<String>)| -> Option<BTreeSet<String>> {
        required.map(|r| {
            let mut set = r.clone();
            own(&mut set);
            set
        })
    };
    match plan {
        PlanOperator::Scan {
            path,
            format,
            alias,
            options,
            projection,
            ..
        } => {
            let Some(required) = required else {
                return Ok(());
            };
            let schema = ingestion::table_schema(path, *format, &options.resolved(config))?;
            let wanted = |name: &str| {
                required.contains(name)
                    || alias
                        .as_deref()
                        .is_some_and(|a| required.contains(&format!("{}.{}", a, name)))
            };
            let mut columns: Vec<String> = schema
                .fields()
                .iter()
                .map(|f| f.name.clone())
                .filter(|name| wanted(name))
                .filter(|name| projection.as_ref().map_or(true, |p| p.contains(name)))
                .collect();
            // a scan feeding only COUNT(*) still needs one column to carry row counts
            if columns.is_empty() {
                if let Some(first) = schema.fields().first() {
                    columns.push(first.name.clone());
                }
            }
            debug!(path = %path, columns = columns.len(), of = schema.len(), "projection pruning");
            *projection = Some(columns);
            Ok(())
        }
        PlanOperator::Values { .. } => Ok(()),
        PlanOperator::Filter { input, predicate } => {
            let child = extend(&mut |set| add_columns(set, [&*predicate]));
            prune_projections(input, child.as_ref(), config)
        }
        PlanOperator::Project { input, exprs } => {
            let mut child = BTreeSet::new();
            add_columns(&mut child, exprs.iter().map(|e| &e.expr));
            prune_projections(input, Some(&child), config)
        }
        PlanOperator::Join { left, right, on, .. } => {
            let child = extend(&mut |set| add_columns(set, on.iter().flat_map(|(l, r)| [l, r])));
            prune_projections(left, child.as_ref(), config)?;
            prune_projections(right, child.as_ref(), config)
        }
        PlanOperator::Aggregate {
            input,
            group_by,
            aggregates,
            ..
        } => {
            let mut child = BTreeSet::new();
            add_columns(&mut child, group_by.iter().map(|g| &g.expr));
            add_columns(&mut child, aggregates.iter().flat_map(|a| a.args.iter()));
            prune_projections(input, Some(&child), config)
        }
        PlanOperator::Window { input, functions } => {
            let child = extend(&mut |set| {
                for f in functions.iter() {
                    add_columns(set, f.args.iter());
                    add_columns(set, f.partition_by.iter());
                    add_columns(set, f.order_by.iter().map(|o| &o.expr));
                }
            });
            prune_projections(input, child.as_ref(), config)
        }
        PlanOperator::Sort { input, order_by } => {
            let child = extend(&mut |set| add_columns(set, order_by.iter().map(|o| &o.expr)));
            prune_projections(input, child.as_ref(), config)
        }
        PlanOperator::Limit { input, .. } => prune_projections(input, required, config),
    }
}
