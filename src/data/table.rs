//! Tab-separated numeric tables
//!
//! Rows are examples labelled by the first column; the remaining columns are
//! named by the header line.

use std::path::Path;

use crate::{CdnError, Result};

/// A labelled numeric table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Header of the label column (may be empty)
    pub index_name: String,
    /// Row labels, one per row
    pub index: Vec<String>,
    /// Column names, one per value column
    pub columns: Vec<String>,
    /// Row-major values [rows][columns]
    pub rows: Vec<Vec<f32>>,
}

/// A table together with the text column that was split out of it
#[derive(Debug, Clone)]
pub struct LabelledTable {
    pub table: Table,
    pub labels: Option<Vec<String>>,
}

impl Table {
    /// Create a table, checking that every row has one value per column
    pub fn new(
        index_name: impl Into<String>,
        index: Vec<String>,
        columns: Vec<String>,
        rows: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if index.len() != rows.len() {
            return Err(CdnError::ShapeMismatch(format!(
                "{} row labels for {} rows",
                index.len(),
                rows.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(CdnError::ShapeMismatch(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                columns.len()
            )));
        }

        Ok(Table {
            index_name: index_name.into(),
            index,
            columns,
            rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of the named columns for every row, in the requested order
    pub fn select(&self, names: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut positions = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column_index(name) {
                Some(p) => positions.push(p),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CdnError::MissingFeatures { missing });
        }

        Ok(self
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p]).collect())
            .collect())
    }

    /// Keep only the rows whose positions are listed
    pub fn take_rows(&self, positions: &[usize]) -> Table {
        Table {
            index_name: self.index_name.clone(),
            index: positions.iter().map(|&p| self.index[p].clone()).collect(),
            columns: self.columns.clone(),
            rows: positions.iter().map(|&p| self.rows[p].clone()).collect(),
        }
    }

    /// Read a tab-separated file where every value column is numeric
    pub fn read_tsv(path: impl AsRef<Path>) -> Result<Table> {
        Ok(Self::read_tsv_with_label(path, None)?.table)
    }

    /// Read a tab-separated file, splitting out an optional text column
    ///
    /// The text column (e.g. a dataset name) is returned separately; if it is
    /// requested but absent, `labels` is `None`.
    pub fn read_tsv_with_label(
        path: impl AsRef<Path>,
        label_column: Option<&str>,
    ) -> Result<LabelledTable> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let mut header_iter = headers.iter();
        let index_name = header_iter
            .next()
            .ok_or_else(|| CdnError::Parse(format!("{}: missing header line", path.display())))?
            .to_string();
        let header_names: Vec<String> = header_iter.map(str::to_string).collect();

        let label_pos = label_column.and_then(|name| header_names.iter().position(|h| h == name));
        let columns: Vec<String> = header_names
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != label_pos)
            .map(|(_, h)| h.clone())
            .collect();

        let mut index = Vec::new();
        let mut rows = Vec::new();
        let mut labels = label_pos.map(|_| Vec::new());

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            index.push(fields.next().unwrap_or("").to_string());

            let mut row = Vec::with_capacity(columns.len());
            for (i, field) in fields.enumerate() {
                if Some(i) == label_pos {
                    if let Some(labels) = labels.as_mut() {
                        labels.push(field.to_string());
                    }
                    continue;
                }
                let value = parse_cell(field).ok_or_else(|| {
                    CdnError::Parse(format!(
                        "{}: line {}, column '{}': '{}' is not a finite number",
                        path.display(),
                        line + 2,
                        header_names.get(i).map(String::as_str).unwrap_or("?"),
                        field
                    ))
                })?;
                row.push(value);
            }
            rows.push(row);
        }

        log::debug!(
            "Read {} rows x {} columns from {}",
            rows.len(),
            columns.len(),
            path.display()
        );

        Ok(LabelledTable {
            table: Table::new(index_name, index, columns, rows)?,
            labels,
        })
    }

    /// Write as tab-separated text: header line, then one line per row
    pub fn write_tsv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(self.index_name.clone());
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for (label, row) in self.index.iter().zip(&self.rows) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(label.clone());
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Parse a numeric cell; empty cells and NA markers read as NaN
///
/// Infinities, and values too large for `f32`, are rejected.
fn parse_cell(field: &str) -> Option<f32> {
    let field = field.trim();
    match field {
        "" | "NA" | "NaN" | "nan" => Some(f32::NAN),
        _ => field.parse::<f32>().ok().filter(|v| v.is_finite()),
    }
}
