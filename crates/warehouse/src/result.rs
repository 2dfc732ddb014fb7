use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Column definition returned by a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as declared in the result set.
    pub name: String,
    /// Warehouse type name (e.g. "STRING", "BIGINT", "DOUBLE", "STRUCT").
    pub type_name: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Structured result set from a warehouse statement.
///
/// Rows are stored as `Vec<Option<String>>` where `None` represents SQL NULL.
/// Column ordering in each row matches the `columns` vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Statement id assigned by the warehouse, when known.
    pub statement_id: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finds the zero-based index of a column by name (case-sensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value at the given row and column; `None` for out-of-range or NULL.
    pub fn get_value(&self, row: usize, col: &str) -> Option<&str> {
        let col_idx = self.column_index(col)?;
        let row_data = self.rows.get(row)?;
        row_data.get(col_idx)?.as_deref()
    }

    /// Consume the result into ordered column → value mappings.
    ///
    /// Short rows are padded with NULLs; cells beyond the declared columns
    /// are dropped.
    pub fn into_rows(self) -> Vec<RawRow> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|mut cells| {
                cells.resize(columns.len(), None);
                let values = columns
                    .iter()
                    .zip(cells)
                    .map(|(col, text)| {
                        (
                            col.name.clone(),
                            RawValue {
                                type_name: col.type_name.clone(),
                                text,
                            },
                        )
                    })
                    .collect();
                RawRow { values }
            })
            .collect()
    }
}

// ── Raw rows ─────────────────────────────────────────────────────

/// A single cell: the warehouse's textual rendering plus its column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
    pub type_name: String,
    pub text: Option<String>,
}

impl RawValue {
    pub fn new(type_name: impl Into<String>, text: Option<&str>) -> Self {
        Self {
            type_name: type_name.into(),
            text: text.map(str::to_string),
        }
    }

    pub fn is_null(&self) -> bool {
        self.text.is_none()
    }
}

/// One row of a result set, keyed by column name in result-set order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub values: IndexMap<String, RawValue>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used mostly by tests and fixtures.
    pub fn with(mut self, column: &str, type_name: &str, text: Option<&str>) -> Self {
        self.values
            .insert(column.to_string(), RawValue::new(type_name, text));
        self
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.values.get(column)
    }

    /// Non-NULL text of `column`.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.values.get(column)?.text.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RawValue)> {
        self.values.iter()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return write!(f, "(empty result set)");
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    let cell_len = cell.as_deref().unwrap_or("NULL").len();
                    widths[i] = widths[i].max(cell_len);
                }
            }
        }

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:<width$}", col.name, width = widths[i])?;
        }
        writeln!(f)?;

        for (i, w) in widths.iter().enumerate() {
            if i > 0 {
                write!(f, "-+-")?;
            }
            write!(f, "{}", "-".repeat(*w))?;
        }
        writeln!(f)?;

        for row in &self.rows {
            for (i, width) in widths.iter().enumerate() {
                if i > 0 {
                    write!(f, " | ")?;
                }
                let value = row.get(i).and_then(|c| c.as_deref()).unwrap_or("NULL");
                write!(f, "{:<width$}", value, width = *width)?;
            }
            writeln!(f)?;
        }

        write!(
            f,
            "\nStatement {} | {} rows",
            self.statement_id.as_deref().unwrap_or("-"),
            self.rows.len()
        )
    }
}
