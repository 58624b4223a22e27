//! Plain-text tables for terminal output.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    data::Row,
    describe::ColumnInsight,
    matcher::MatchReport,
    validate::ValidationReport,
};

/// Cells wider than this are cut and end in `…`.
const MAX_CELL_WIDTH: usize = 40;
/// Every column is at least as wide as its `---` rule.
const MIN_COLUMN_WIDTH: usize = 3;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let cells = rows
        .iter()
        .map(|row| row.iter().map(|cell| clean_cell(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let headers = headers.iter().map(|h| clean_cell(h)).collect::<Vec<_>>();

    let mut widths = headers
        .iter()
        .map(|h| display_width(h).max(MIN_COLUMN_WIDTH))
        .collect::<Vec<_>>();
    for row in &cells {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in &cells {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// Renders up to `limit` rows (0 renders all) in `headers` order.
pub fn render_rows(headers: &[String], rows: &[Row], limit: usize) -> String {
    let take = if limit == 0 { rows.len() } else { limit };
    let cells = rows
        .iter()
        .take(take)
        .map(|row| {
            headers
                .iter()
                .map(|header| row.value(header).as_display())
                .collect()
        })
        .collect::<Vec<_>>();
    render_table(headers, &cells)
}

pub fn render_insights(insights: &[ColumnInsight]) -> String {
    let headers = ["column", "type", "filled", "description", "sample"]
        .map(str::to_string)
        .to_vec();
    let rows = insights
        .iter()
        .map(|insight| {
            vec![
                insight.header.clone(),
                insight.data_type.to_string(),
                insight.non_empty.to_string(),
                insight.description.clone(),
                insight.sample.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_match_report(report: &MatchReport) -> String {
    let headers = ["target", "source", "confidence", "note"]
        .map(str::to_string)
        .to_vec();
    let rows = report
        .mappings
        .iter()
        .map(|mapping| {
            let note = report
                .gaps
                .iter()
                .find(|gap| gap.target == mapping.target)
                .map(|gap| match &gap.best_candidate {
                    Some(candidate) => format!("gap; closest '{candidate}' ({})", gap.best_score),
                    None => "gap".to_string(),
                })
                .unwrap_or_default();
            vec![
                mapping.target.clone(),
                mapping.source.clone().unwrap_or_else(|| "-".to_string()),
                mapping.confidence.to_string(),
                note,
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

/// One line per diagnostic, rows numbered from 1.
pub fn render_diagnostics(report: &ValidationReport, limit: usize) -> String {
    let headers = ["row", "field", "rule", "message"].map(str::to_string).to_vec();
    let rows = report
        .results
        .iter()
        .flat_map(|result| {
            result.diagnostics.iter().map(move |diagnostic| {
                vec![
                    (result.row_index + 1).to_string(),
                    diagnostic.field.clone(),
                    diagnostic.rule.to_string(),
                    diagnostic.message.clone(),
                ]
            })
        })
        .take(if limit == 0 { usize::MAX } else { limit })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn format_row<S: AsRef<str>>(values: &[S], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let value = value.as_ref();
            let padding = width.saturating_sub(display_width(value));
            format!("{value}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    let trimmed = line.trim_end().len();
    line.truncate(trimmed);
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn clean_cell(value: &str) -> Cow<'_, str> {
    let needs_flatten = value.contains(['\n', '\r', '\t']);
    let too_wide = display_width(value) > MAX_CELL_WIDTH;
    if !needs_flatten && !too_wide {
        return Cow::Borrowed(value);
    }
    let mut cleaned = value
        .chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .collect::<String>();
    if too_wide {
        cleaned = cleaned.chars().take(MAX_CELL_WIDTH - 1).collect();
        cleaned.push('…');
    }
    Cow::Owned(cleaned)
}
