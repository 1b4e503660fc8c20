use super::value::Value;

/// Rows produced by a statement, plus the number of rows it changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows written by the statement that produced this set (INSERT ... RETURNING)
    pub affected_rows: u64,
}

impl ResultSet {
    #[must_use]
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            affected_rows: 0,
        }
    }

    /// One row, one column
    #[must_use]
    pub fn scalar(column: &str, value: Value) -> Self {
        Self {
            columns: vec![column.to_string()],
            rows: vec![vec![value]],
            affected_rows: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column by name, in row order
    #[must_use]
    pub fn column_values(&self, name: &str) -> Vec<&Value> {
        let Some(idx) = self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)) else {
            return Vec::new();
        };
        self.rows.iter().filter_map(|row| row.get(idx)).collect()
    }
}
