//! Column-oriented record table: the unit flowing through a pipeline.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::error::{Result, TextsiftError};
use crate::types::Value;

/// One named column of a [`Table`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// An ordered table of records with named columns.
///
/// All columns always have the same length. Column order is significant and
/// preserved by every operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    /// An empty table with no columns and no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns, validating that lengths agree and names
    /// are unique.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.values.len());
        let mut seen = Vec::with_capacity(columns.len());
        for col in &columns {
            if col.values.len() != rows {
                return Err(TextsiftError::validation(format!(
                    "column '{}' has {} rows, expected {rows}",
                    col.name,
                    col.values.len()
                )));
            }
            if seen.contains(&col.name.as_str()) {
                return Err(TextsiftError::validation(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
            seen.push(col.name.as_str());
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from JSON objects. Columns appear in the order their
    /// keys are first seen; keys absent from a record become `Null`.
    pub fn from_records(records: &[serde_json::Value]) -> Result<Self> {
        let mut order: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut columns: Vec<Vec<Value>> = Vec::new();

        for (row, record) in records.iter().enumerate() {
            let obj = record.as_object().ok_or_else(|| {
                TextsiftError::validation(format!("record {row} is not a JSON object"))
            })?;
            for (key, value) in obj {
                let idx = match index.get(key) {
                    Some(&i) => i,
                    None => {
                        let i = order.len();
                        index.insert(key.clone(), i);
                        order.push(key.clone());
                        columns.push(vec![Value::Null; row]);
                        i
                    }
                };
                columns[idx].push(Value::from(value.clone()));
            }
            for col in &mut columns {
                if col.len() == row {
                    col.push(Value::Null);
                }
            }
        }

        let columns = order
            .into_iter()
            .zip(columns)
            .map(|(name, values)| Column::new(name, values))
            .collect();
        let mut table = Self::from_columns(columns)?;
        table.rows = records.len();
        Ok(table)
    }

    /// Convert every row to a JSON object, in column order.
    pub fn to_records(&self) -> Vec<serde_json::Value> {
        (0..self.rows)
            .map(|i| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[i].to_json()))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Values of the named column, if present.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Values of the named column, or a validation error naming it.
    pub fn require_column(&self, name: &str) -> Result<&[Value]> {
        self.column(name)
            .ok_or_else(|| TextsiftError::validation(format!("column '{name}' not found")))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// The cells of row `i` as `(column, value)` pairs.
    pub fn row(&self, i: usize) -> Option<Vec<(&str, &Value)>> {
        if i >= self.rows {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.as_str(), &c.values[i]))
                .collect(),
        )
    }

    /// Rows `start..end` as a new table. Bounds are clamped to the table.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.rows);
        let start = start.min(end);
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values[start..end].to_vec()))
                .collect(),
            rows: end - start,
        }
    }

    /// A copy of this table with `name` set to `values`: replaced in place if
    /// the column exists, appended otherwise.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Result<Self> {
        let mut out = self.clone();
        out.set_column(name, values)?;
        Ok(out)
    }

    /// Set `name` to `values` in place, with the same semantics as
    /// [`Table::with_column`].
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if self.columns.is_empty() && self.rows == 0 {
            self.rows = values.len();
        }
        if values.len() != self.rows {
            return Err(TextsiftError::validation(format!(
                "column '{name}' has {} rows, expected {}",
                values.len(),
                self.rows
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.values = values,
            None => self.columns.push(Column::new(name, values)),
        }
        Ok(())
    }

    /// A copy without the named columns. Unknown names are ignored.
    pub fn without_columns<S: AsRef<str>>(&self, names: &[S]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
                .cloned()
                .collect(),
            rows: self.rows,
        }
    }

    /// A copy keeping only the named columns that exist, in table order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|c| names.iter().any(|n| n.as_ref() == c.name))
                .cloned()
                .collect(),
            rows: self.rows,
        }
    }

    /// Stack tables vertically.
    ///
    /// Rows keep their order; nothing is sorted or deduplicated. The result
    /// has the union of all columns in first-appearance order, with `Null`
    /// where a table lacks a column.
    pub fn concat(tables: &[Self]) -> Self {
        let mut names: Vec<&str> = Vec::new();
        for t in tables {
            for c in &t.columns {
                if !names.contains(&c.name.as_str()) {
                    names.push(&c.name);
                }
            }
        }
        let rows: usize = tables.iter().map(|t| t.rows).sum();
        let columns = names
            .iter()
            .map(|&name| {
                let mut values = Vec::with_capacity(rows);
                for t in tables {
                    match t.column(name) {
                        Some(v) => values.extend_from_slice(v),
                        None => values.extend(std::iter::repeat_n(Value::Null, t.rows)),
                    }
                }
                Column::new(name, values)
            })
            .collect();
        Self { columns, rows }
    }
}

/// Read one JSON object per line. Blank lines are skipped.
pub fn read_json_lines(reader: impl BufRead) -> Result<Table> {
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| TextsiftError::io("<input>", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
            TextsiftError::validation(format!("line {}: invalid JSON: {e}", n + 1))
        })?;
        records.push(record);
    }
    Table::from_records(&records)
}

/// Write one JSON object per row.
pub fn write_json_lines(table: &Table, mut writer: impl Write) -> Result<()> {
    for record in table.to_records() {
        serde_json::to_writer(&mut writer, &record)?;
        writer
            .write_all(b"\n")
            .map_err(|e| TextsiftError::io("<output>", e))?;
    }
    Ok(())
}
