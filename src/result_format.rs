/// Result formatting for display
/// Supports full results, summaries, samples and representative rows
use crate::execution::result::QueryResult;
use crate::storage::columnar::Schema;
use crate::storage::value::{format_double, Value};
use serde::Serialize;
use std::fmt::Write;

/// How much of a result to hand back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultFormat {
    /// Every row
    Full,
    /// Per-column statistics only
    Summary,
    /// First N rows
    Sample(usize),
    /// N rows spread over the result (first, evenly spaced, last)
    Representative(usize),
    /// Column names, types and row count
    Metadata,
}

#[derive(Clone, Debug, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub data_type: String,
    pub null_count: usize,
    pub distinct_estimate: usize,
    pub min: Option<String>,
    pub max: Option<String>,
    /// Only for numeric columns
    pub avg: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FormattedResult {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub summary: Option<Vec<ColumnSummary>>,
    pub sample_rows: Option<Vec<Vec<String>>>,
    pub full_rows: Option<Vec<Vec<String>>>,
    pub is_summary: bool,
}

pub fn format_results(result: &QueryResult, format: ResultFormat) -> FormattedResult {
    let columns = result.column_names();
    let rows = || -> Vec<Vec<String>> { result.rows().iter().map(|r| render_row(r)).collect() };
    let mut formatted = FormattedResult {
        columns,
        row_count: result.row_count,
        summary: None,
        sample_rows: None,
        full_rows: None,
        is_summary: false,
    };
    match format {
        ResultFormat::Full => formatted.full_rows = Some(rows()),
        ResultFormat::Summary => {
            formatted.summary = Some(generate_summary(result));
            formatted.is_summary = true;
        }
        ResultFormat::Sample(n) => {
            formatted.sample_rows = Some(rows().into_iter().take(n).collect());
        }
        ResultFormat::Representative(n) => {
            formatted.sample_rows = Some(select_representative_rows(rows(), n));
        }
        ResultFormat::Metadata => {
            formatted.summary = Some(
                result
                    .schema
                    .fields()
                    .iter()
                    .map(|f| ColumnSummary {
                        name: f.qualified_name(),
                        data_type: f.data_type.to_string(),
                        null_count: 0,
                        distinct_estimate: 0,
                        min: None,
                        max: None,
                        avg: None,
                    })
                    .collect(),
            );
            formatted.is_summary = true;
        }
    }
    formatted
}

fn render_row(row: &[Value]) -> Vec<String> {
    row.iter().map(Value::to_string).collect()
}

/// Null count, distinct count, min/max and (numeric) average per column
pub fn generate_summary(result: &QueryResult) -> Vec<ColumnSummary> {
    result
        .schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let values: Vec<Value> = result
                .batches
                .iter()
                .flat_map(|b| b.column(idx).values())
                .collect();
            let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
            let distinct: std::collections::HashSet<&Value> = non_null.iter().copied().collect();
            let min = non_null.iter().copied().min_by(|a, b| a.total_cmp(b));
            let max = non_null.iter().copied().max_by(|a, b| a.total_cmp(b));
            let avg = if field.data_type.is_numeric() && !non_null.is_empty() {
                let sum: f64 = non_null.iter().filter_map(|v| v.as_f64()).sum();
                Some(sum / non_null.len() as f64)
            } else {
                None
            };
            ColumnSummary {
                name: field.qualified_name(),
                data_type: field.data_type.to_string(),
                null_count: values.len() - non_null.len(),
                distinct_estimate: distinct.len(),
                min: min.map(Value::to_string),
                max: max.map(Value::to_string),
                avg,
            }
        })
        .collect()
}

/// First, last and evenly spaced rows in between
pub fn select_representative_rows(rows: Vec<Vec<String>>, n: usize) -> Vec<Vec<String>> {
    if rows.len() <= n {
        return rows;
    }
    match n {
        0 => vec![],
        1 => rows.into_iter().take(1).collect(),
        _ => {
            let last = rows.len() - 1;
            let mut picked: Vec<usize> = (0..n).map(|i| i * last / (n - 1)).collect();
            picked.dedup();
            picked.into_iter().map(|i| rows[i].clone()).collect()
        }
    }
}

/// Plain-text table with a header rule, columns padded to their widest cell
pub fn format_table(schema: &Schema, rows: &[Vec<Value>]) -> String {
    let header: Vec<String> = schema.fields().iter().map(|f| f.name.clone()).collect();
    let cells: Vec<Vec<String>> = rows.iter().map(|r| render_row(r)).collect();
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, row: &[String]| {
        let padded: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
            .collect();
        let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
    };
    line(&mut out, &header);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("-+-"));
    for row in &cells {
        line(&mut out, row);
    }
    out
}

/// Compact one-line rendering of a numeric average
pub fn format_avg(avg: Option<f64>) -> String {
    avg.map(format_double).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::DiagnosticsSnapshot;
    use crate::storage::column::Column;
    use crate::storage::columnar::{Batch, Field};
    use crate::storage::value::DataType;
    use std::sync::Arc;
    use std::time::Duration;

    fn result() -> QueryResult {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Integer, false),
            Field::new("name", DataType::String, true),
        ]));
        let batch = Batch::try_new(
            schema.clone(),
            vec![
                Arc::new(Column::from_i64((1..=10).map(Some).collect())),
                Arc::new(Column::from_strings(
                    (1..=10).map(|i| if i % 5 == 0 { None } else { Some("x") }).collect(),
                )),
            ],
        )
        .unwrap();
        QueryResult::new(schema, vec![batch], Duration::ZERO, DiagnosticsSnapshot::default())
    }

    #[test]
    fn test_summary_statistics() {
        let summary = generate_summary(&result());
        assert_eq!(summary[0].min.as_deref(), Some("1"));
        assert_eq!(summary[0].max.as_deref(), Some("10"));
        assert_eq!(summary[0].avg, Some(5.5));
        assert_eq!(summary[1].null_count, 2);
        assert_eq!(summary[1].distinct_estimate, 1);
        assert_eq!(summary[1].avg, None);
    }

    #[test]
    fn test_representative_rows_include_ends() {
        let formatted = format_results(&result(), ResultFormat::Representative(3));
        let rows = formatted.sample_rows.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["1", "5", "10"]);
    }

    #[test]
    fn test_table_rendering() {
        let r = result();
        let table = format_table(&r.schema, &r.rows()[..2]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "id | name");
        assert_eq!(lines[1], "---+-----");
        assert_eq!(lines[2], "1  | x");
    }
}
