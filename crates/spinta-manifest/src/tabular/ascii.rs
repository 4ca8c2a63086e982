//! Pipe-delimited ASCII form
//!
//! ```text
//! d | r | b | m | property | type    | ref  | source
//! datasets/gov/example     |         |      |
//!   | data                 | sql     |      | sqlite://
//!   |   |   | Country      |         | code | salis
//!   |   |   |   | code     | string  |      | kodas
//! ```
//!
//! A value in the hierarchical columns spans all hierarchical columns to
//! its right, so such lines have fewer cells than the header.

use super::{parse_header, row_from_cells, Column, TabularRow};
use crate::error::ManifestError;

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains(['-', '='])
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '+' | '|' | '=' | ' '))
}

fn split_cells(line: &str) -> Vec<String> {
    line.split('|').map(|c| c.trim().to_string()).collect()
}

pub fn read_ascii(text: &str) -> Result<Vec<TabularRow>, ManifestError> {
    let mut lines = text
        .lines()
        .filter(|l| !is_separator(l))
        .skip_while(|l| l.trim().is_empty());

    let header = match lines.next() {
        Some(line) => parse_header(&split_cells(line))?,
        None => return Ok(Vec::new()),
    };

    // Hierarchical columns have to be contiguous for spanning to work
    let start = header.iter().position(|c| c.is_hierarchical());
    let span = start.map(|start| {
        let len = header[start..]
            .iter()
            .take_while(|c| c.is_hierarchical())
            .count();
        (start, len)
    });

    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            rows.push(TabularRow::new());
            continue;
        }
        let cells = split_cells(line);
        let row = match span {
            Some((start, len)) if cells.len() < header.len() => {
                expand_spans(&header, &cells, start, len)
            }
            _ => row_from_cells(&header, &cells),
        };
        rows.push(row);
    }
    Ok(rows)
}

fn expand_spans(header: &[Column], cells: &[String], start: usize, len: usize) -> TabularRow {
    let mut row = TabularRow::new();
    for (column, cell) in header.iter().zip(cells.iter().take(start)) {
        row.set(*column, cell.as_str());
    }

    let rest = cells.get(start..).unwrap_or(&[]);
    let leading_empty = rest
        .iter()
        .take(len)
        .take_while(|c| c.is_empty())
        .count();

    let tail = if leading_empty < len && leading_empty < rest.len() {
        row.set(header[start + leading_empty], rest[leading_empty].as_str());
        &rest[leading_empty + 1..]
    } else {
        rest.get(len..).unwrap_or(&[])
    };

    for (column, cell) in header[start + len..].iter().zip(tail) {
        row.set(*column, cell.as_str());
    }
    row
}

/// Render rows in the ASCII form, using the given columns
pub fn write_ascii(rows: &[TabularRow], columns: &[Column]) -> String {
    let hierarchy: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_hierarchical())
        .map(|(i, _)| i)
        .collect();
    let last_hierarchical = hierarchy.last().copied();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.short_name().len()).collect();

    let spanned_start = |row: &TabularRow| -> Option<usize> {
        hierarchy
            .iter()
            .copied()
            .find(|&i| !row.get(columns[i]).is_empty())
    };

    for row in rows {
        let start = spanned_start(row);
        for (i, column) in columns.iter().enumerate() {
            if column.is_hierarchical() {
                continue;
            }
            widths[i] = widths[i].max(row.get(*column).chars().count());
        }
        if let (Some(start), Some(last)) = (start, last_hierarchical) {
            let value = row.get(columns[start]).chars().count();
            let covered: usize = (start..last).map(|i| widths[i] + 3).sum();
            widths[last] = widths[last].max(value.saturating_sub(covered));
        }
    }

    let mut output = String::new();
    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| pad(c.short_name(), widths[i]))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        let start = spanned_start(row);
        let mut i = 0;
        while i < columns.len() {
            match (start, last_hierarchical) {
                (Some(start), Some(last)) if i == start => {
                    let width: usize = (start..=last).map(|j| widths[j]).sum::<usize>()
                        + 3 * (last - start);
                    cells.push(pad(row.get(columns[i]), width));
                    i = last + 1;
                }
                _ => {
                    cells.push(pad(row.get(columns[i]), widths[i]));
                    i += 1;
                }
            }
        }
        output.push_str(cells.join(" | ").trim_end());
        output.push('\n');
    }
    output
}

fn pad(value: &str, width: usize) -> String {
    format!("{:<width$}", value, width = width)
}
