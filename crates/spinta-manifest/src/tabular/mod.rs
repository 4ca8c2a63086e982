//! Tabular manifest format
//!
//! A manifest is a table with a fixed column vocabulary. It is read from
//! CSV or from the pipe-delimited ASCII form that `show` prints; both are
//! normalized into [`TabularRow`]s before the row reader sees them.

mod ascii;
mod reader;

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::ManifestError;
use crate::schema::Schema;

pub use ascii::{read_ascii, write_ascii};
pub use reader::{read_rows, RESOURCE_TYPES};
pub(crate) use reader::format_ref;

/// Columns of the tabular format, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Id,
    Dataset,
    Resource,
    Base,
    Model,
    Property,
    Type,
    Ref,
    Source,
    SourceType,
    Prepare,
    Origin,
    Count,
    Level,
    Status,
    Visibility,
    Access,
    Uri,
    Eli,
    Title,
    Description,
}

pub const COLUMN_COUNT: usize = 21;

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Id,
        Column::Dataset,
        Column::Resource,
        Column::Base,
        Column::Model,
        Column::Property,
        Column::Type,
        Column::Ref,
        Column::Source,
        Column::SourceType,
        Column::Prepare,
        Column::Origin,
        Column::Count,
        Column::Level,
        Column::Status,
        Column::Visibility,
        Column::Access,
        Column::Uri,
        Column::Eli,
        Column::Title,
        Column::Description,
    ];

    /// `dataset` through `property`, outermost first
    pub const HIERARCHY: [Column; 5] = [
        Column::Dataset,
        Column::Resource,
        Column::Base,
        Column::Model,
        Column::Property,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Dataset => "dataset",
            Column::Resource => "resource",
            Column::Base => "base",
            Column::Model => "model",
            Column::Property => "property",
            Column::Type => "type",
            Column::Ref => "ref",
            Column::Source => "source",
            Column::SourceType => "source.type",
            Column::Prepare => "prepare",
            Column::Origin => "origin",
            Column::Count => "count",
            Column::Level => "level",
            Column::Status => "status",
            Column::Visibility => "visibility",
            Column::Access => "access",
            Column::Uri => "uri",
            Column::Eli => "eli",
            Column::Title => "title",
            Column::Description => "description",
        }
    }

    /// One-letter header used by the ASCII form
    pub fn short_name(&self) -> &'static str {
        match self {
            Column::Dataset => "d",
            Column::Resource => "r",
            Column::Base => "b",
            Column::Model => "m",
            other => other.name(),
        }
    }

    /// Header lookup: case-insensitive, accepts `d, r, b, m`
    pub fn from_header(name: &str) -> Option<Column> {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "d" => return Some(Column::Dataset),
            "r" => return Some(Column::Resource),
            "b" => return Some(Column::Base),
            "m" => return Some(Column::Model),
            _ => {}
        }
        Column::ALL.iter().copied().find(|c| c.name() == name)
    }

    pub fn is_hierarchical(&self) -> bool {
        Column::HIERARCHY.contains(self)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the table, every column present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularRow {
    cells: [String; COLUMN_COUNT],
}

impl TabularRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: Column) -> &str {
        &self.cells[column.index()]
    }

    pub fn set(&mut self, column: Column, value: impl Into<String>) {
        self.cells[column.index()] = value.into();
    }

    pub fn with(mut self, column: Column, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }

    /// Leftmost populated hierarchical column
    pub fn leftmost(&self) -> Option<Column> {
        Column::HIERARCHY
            .iter()
            .copied()
            .find(|c| !self.get(*c).is_empty())
    }
}

/// Map header cells to columns; unknown names are an error on row 1
pub(crate) fn parse_header<S: AsRef<str>>(cells: &[S]) -> Result<Vec<Column>, ManifestError> {
    cells
        .iter()
        .map(|cell| {
            let cell = cell.as_ref();
            Column::from_header(cell)
                .ok_or_else(|| ManifestError::tabular(1, format!("unknown column '{}'", cell.trim())))
        })
        .collect()
}

pub(crate) fn row_from_cells<S: AsRef<str>>(header: &[Column], cells: &[S]) -> TabularRow {
    let mut row = TabularRow::new();
    for (column, cell) in header.iter().zip(cells) {
        row.set(*column, cell.as_ref().trim());
    }
    row
}

/// Read CSV rows. The first record is the header; empty input is an
/// empty manifest.
pub fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<TabularRow>, ManifestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = csv_reader.records();
    let header = match records.next() {
        Some(record) => {
            let record = record?;
            if record.iter().all(|c| c.trim().is_empty()) {
                return Ok(Vec::new());
            }
            parse_header(&record.iter().collect::<Vec<_>>())?
        }
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        let record = record?;
        if record.len() > header.len() && record.iter().skip(header.len()).any(|c| !c.trim().is_empty()) {
            return Err(ManifestError::tabular(
                i + 2,
                format!("row has {} cells, header has {}", record.len(), header.len()),
            ));
        }
        rows.push(row_from_cells(&header, &record.iter().collect::<Vec<_>>()));
    }
    Ok(rows)
}

/// `read_tabular(reader)`: CSV input to `(row, schema)` pairs
pub fn read_tabular<R: Read>(reader: R) -> Result<Vec<(usize, Schema)>, ManifestError> {
    read_rows(read_csv_rows(reader)?)
}

pub fn read_tabular_str(csv: &str) -> Result<Vec<(usize, Schema)>, ManifestError> {
    read_tabular(csv.as_bytes())
}

/// Read a manifest file; `.txt` files are taken to be in ASCII form
pub fn read_manifest_file(path: &Path) -> Result<Vec<(usize, Schema)>, ManifestError> {
    let content = std::fs::read_to_string(path)?;
    let is_ascii = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if is_ascii {
        read_rows(read_ascii(&content)?)
    } else {
        read_tabular(content.as_bytes())
    }
}

/// Columns that are populated in at least one row, in canonical order.
/// The hierarchical columns are always included.
pub fn used_columns(rows: &[TabularRow]) -> Vec<Column> {
    Column::ALL
        .iter()
        .copied()
        .filter(|c| c.is_hierarchical() || rows.iter().any(|r| !r.get(*c).is_empty()))
        .collect()
}

/// `write_tabular(writer, rows)`: CSV with a header of `columns`
pub fn write_tabular<W: Write>(
    writer: W,
    rows: &[TabularRow],
    columns: &[Column],
) -> Result<(), ManifestError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    csv_writer.write_record(columns.iter().map(|c| c.name()))?;
    for row in rows {
        csv_writer.write_record(columns.iter().map(|c| row.get(*c)))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_tabular_string(rows: &[TabularRow], columns: &[Column]) -> Result<String, ManifestError> {
    let mut buffer = Vec::new();
    write_tabular(&mut buffer, rows, columns)?;
    String::from_utf8(buffer).map_err(|e| ManifestError::tabular(0, e.to_string()))
}
