use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("value {value:?} cannot be cast to {kind:?} column '{column}'")]
    Cast {
        column: String,
        kind: ColumnKind,
        value: Value,
    },
    #[error("row index {0} does not exist")]
    IndexOutOfRange(usize),
    #[error("column '{0}' does not exist")]
    UnknownColumn(String),
    #[error("column '{0}' is already defined")]
    DuplicateColumn(String),
    #[error("shape mismatch: expected {expected} values, got {got}")]
    Shape { expected: usize, got: usize },
}

/// Declared type of a column, used for casting on append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Float,
    Int,
    Category,
    Constant,
}

impl ColumnKind {
    /// whether the column participates in numeric matrix conversion
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Float | ColumnKind::Int)
    }
}

/// A single cell. `Missing` is the unset sentinel and is distinct from
/// every valid numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Cast into the declared kind of a column. Widening (int to float) is
    /// always allowed, narrowing (float to int) only for integral values.
    /// `Missing` passes through untouched and constant columns are opaque.
    fn cast(&self, kind: ColumnKind) -> Option<Value> {
        match (kind, self) {
            (_, Value::Missing) => Some(Value::Missing),
            (ColumnKind::Constant, value) => Some(value.clone()),
            (ColumnKind::Float, Value::Float(_)) => Some(self.clone()),
            (ColumnKind::Float, Value::Int(value)) => Some(Value::Float(*value as f64)),
            (ColumnKind::Int, Value::Int(_)) => Some(self.clone()),
            (ColumnKind::Int, Value::Float(value)) if value.fract() == 0.0 && value.is_finite() => {
                Some(Value::Int(*value as i64))
            }
            (ColumnKind::Category, Value::Text(_)) => Some(self.clone()),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

/// One row keyed by column name
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Column {
    name: String,
    kind: ColumnKind,
    values: Vec<Value>,
}

/// Index-addressable table of typed values in declared column order.
/// Two instances back an experiment, one for inputs and one for outputs,
/// and both stay row-aligned through the `ExperimentData` wrappers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<Column>,
    rows: usize,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<I, S>(declarations: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = (S, ColumnKind)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, kind) in declarations {
            table.add_column(name.into(), kind)?;
        }

        Ok(table)
    }

    /// number of rows
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect_vec()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }

    /// Add a column at the end of the declared order. Existing rows get the
    /// unset sentinel backfilled.
    pub fn add_column(&mut self, name: impl Into<String>, kind: ColumnKind) -> Result<(), DataError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(DataError::DuplicateColumn(name));
        }

        self.columns.push(Column {
            name,
            kind,
            values: vec![Value::Missing; self.rows],
        });

        Ok(())
    }

    /// Append rows, casting every value to its column's declared kind.
    /// The whole batch is validated before anything is written, so a cast
    /// failure leaves the table untouched.
    pub fn add_rows(&mut self, rows: &[Row]) -> Result<(), DataError> {
        let mut casted: Vec<Vec<Value>> = Vec::with_capacity(rows.len());

        for row in rows {
            for key in row.keys() {
                if !self.has_column(key) {
                    return Err(DataError::UnknownColumn(key.clone()));
                }
            }

            let mut values = Vec::with_capacity(self.columns.len());
            for column in self.columns.iter() {
                let value = row.get(&column.name).unwrap_or(&Value::Missing);
                match value.cast(column.kind) {
                    Some(value) => values.push(value),
                    None => {
                        return Err(DataError::Cast {
                            column: column.name.clone(),
                            kind: column.kind,
                            value: value.clone(),
                        })
                    }
                }
            }

            casted.push(values);
        }

        for values in casted {
            for (column, value) in self.columns.iter_mut().zip(values) {
                column.values.push(value);
            }
        }
        self.rows += rows.len();

        Ok(())
    }

    /// Append rows consisting entirely of the unset sentinel
    pub fn add_empty_rows(&mut self, number_of_rows: usize) {
        for column in self.columns.iter_mut() {
            column
                .values
                .extend(std::iter::repeat(Value::Missing).take(number_of_rows));
        }
        self.rows += number_of_rows;
    }

    /// Append numeric rows mapped onto the numeric columns in declared order.
    /// Non-numeric columns receive the unset sentinel. Validates the whole
    /// batch before writing anything.
    pub fn add_matrix(&mut self, matrix: &[Vec<f64>]) -> Result<(), DataError> {
        let casted = self.cast_numeric_batch(matrix)?;

        for row in casted {
            let mut numeric = row.into_iter();
            for column in self.columns.iter_mut() {
                let value = if column.kind.is_numeric() {
                    numeric.next().unwrap_or(Value::Missing)
                } else {
                    Value::Missing
                };
                column.values.push(value);
            }
        }
        self.rows += matrix.len();

        Ok(())
    }

    pub fn set(&mut self, index: usize, column: &str, value: Value) -> Result<(), DataError> {
        if index >= self.rows {
            return Err(DataError::IndexOutOfRange(index));
        }

        let column = self
            .columns
            .iter_mut()
            .find(|candidate| candidate.name == column)
            .ok_or_else(|| DataError::UnknownColumn(column.to_owned()))?;

        match value.cast(column.kind) {
            Some(value) => {
                column.values[index] = value;
                Ok(())
            }
            None => Err(DataError::Cast {
                column: column.name.clone(),
                kind: column.kind,
                value,
            }),
        }
    }

    /// Overwrite every cell of a row with the same value, bypassing casts.
    /// Used for the error marker, which must be storable in numeric columns.
    pub(crate) fn set_row(&mut self, index: usize, value: &Value) -> Result<(), DataError> {
        if index >= self.rows {
            return Err(DataError::IndexOutOfRange(index));
        }

        for column in self.columns.iter_mut() {
            column.values[index] = value.clone();
        }

        Ok(())
    }

    pub fn get(&self, index: usize, column: &str) -> Result<&Value, DataError> {
        if index >= self.rows {
            return Err(DataError::IndexOutOfRange(index));
        }

        self.columns
            .iter()
            .find(|candidate| candidate.name == column)
            .map(|column| &column.values[index])
            .ok_or_else(|| DataError::UnknownColumn(column.to_owned()))
    }

    pub fn row(&self, index: usize) -> Result<Row, DataError> {
        if index >= self.rows {
            return Err(DataError::IndexOutOfRange(index));
        }

        Ok(self
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.values[index].clone()))
            .collect())
    }

    /// Write a batch of numeric rows into the currently-unfilled rows in row
    /// order. A row counts as unfilled when any of its cells is unset.
    pub fn fill_rows(&mut self, matrix: &[Vec<f64>]) -> Result<(), DataError> {
        let unfilled = (0..self.rows)
            .filter(|index| self.is_row_unfilled(*index))
            .collect_vec();

        if unfilled.len() != matrix.len() {
            return Err(DataError::Shape {
                expected: unfilled.len(),
                got: matrix.len(),
            });
        }

        let casted = self.cast_numeric_batch(matrix)?;
        for (index, row) in unfilled.into_iter().zip(casted) {
            let mut numeric = row.into_iter();
            for column in self.columns.iter_mut() {
                if column.kind.is_numeric() {
                    if let Some(value) = numeric.next() {
                        column.values[index] = value;
                    }
                }
            }
        }

        Ok(())
    }

    /// Cast a batch of numeric rows against the numeric columns, declared
    /// order, without touching the table
    fn cast_numeric_batch(&self, matrix: &[Vec<f64>]) -> Result<Vec<Vec<Value>>, DataError> {
        let numeric = self
            .columns
            .iter()
            .filter(|column| column.kind.is_numeric())
            .collect_vec();

        let mut casted = Vec::with_capacity(matrix.len());
        for row in matrix {
            if row.len() != numeric.len() {
                return Err(DataError::Shape {
                    expected: numeric.len(),
                    got: row.len(),
                });
            }

            let mut values = Vec::with_capacity(row.len());
            for (value, column) in row.iter().zip(numeric.iter()) {
                match Value::Float(*value).cast(column.kind) {
                    Some(value) => values.push(value),
                    None => {
                        return Err(DataError::Cast {
                            column: column.name.clone(),
                            kind: column.kind,
                            value: Value::Float(*value),
                        })
                    }
                }
            }
            casted.push(values);
        }

        Ok(casted)
    }

    /// Remove rows by position; the rows after them shift down
    pub fn remove(&mut self, indices: &[usize]) -> Result<(), DataError> {
        for index in indices {
            if *index >= self.rows {
                return Err(DataError::IndexOutOfRange(*index));
            }
        }

        let ordered = indices.iter().copied().sorted().rev().dedup().collect_vec();
        for index in ordered {
            for column in self.columns.iter_mut() {
                column.values.remove(index);
            }
            self.rows -= 1;
        }

        Ok(())
    }

    /// New table holding only the given rows, in the given order
    pub fn select(&self, indices: &[usize]) -> Result<Self, DataError> {
        for index in indices {
            if *index >= self.rows {
                return Err(DataError::IndexOutOfRange(*index));
            }
        }

        let columns = self
            .columns
            .iter()
            .map(|column| Column {
                name: column.name.clone(),
                kind: column.kind,
                values: indices.iter().map(|index| column.values[*index].clone()).collect(),
            })
            .collect();

        Ok(Self {
            columns,
            rows: indices.len(),
        })
    }

    /// Numeric columns only, declared order. Unset or non-numeric cells in a
    /// numeric column come out as NaN.
    pub fn to_matrix(&self) -> Vec<Vec<f64>> {
        let numeric = self
            .columns
            .iter()
            .filter(|column| column.kind.is_numeric())
            .collect_vec();

        (0..self.rows)
            .map(|index| {
                numeric
                    .iter()
                    .map(|column| column.values[index].as_f64().unwrap_or(f64::NAN))
                    .collect()
            })
            .collect()
    }

    fn is_row_unfilled(&self, index: usize) -> bool {
        self.columns.iter().any(|column| column.values[index].is_missing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataTable {
        DataTable::with_columns([
            ("x0", ColumnKind::Float),
            ("count", ColumnKind::Int),
            ("label", ColumnKind::Category),
        ])
        .unwrap()
    }

    fn row(x0: f64, count: i64, label: &str) -> Row {
        Row::from([
            ("x0".to_owned(), Value::Float(x0)),
            ("count".to_owned(), Value::Int(count)),
            ("label".to_owned(), Value::Text(label.to_owned())),
        ])
    }

    #[test]
    fn add_rows_casts_widening() {
        let mut table = table();
        let mut casted = row(0.0, 2, "a");
        casted.insert("x0".to_owned(), Value::Int(3));

        table.add_rows(&[casted]).unwrap();
        assert_eq!(table.get(0, "x0").unwrap(), &Value::Float(3.0));
    }

    #[test]
    fn add_rows_rejects_bad_cast() {
        let mut table = table();
        let mut bad = row(0.0, 2, "a");
        bad.insert("count".to_owned(), Value::Float(1.5));

        assert!(matches!(
            table.add_rows(&[row(1.0, 1, "a"), bad]),
            Err(DataError::Cast { .. })
        ));
        // batch validation failed, nothing was written
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let mut table = table();
        let mut bad = row(0.0, 0, "a");
        bad.insert("bogus".to_owned(), Value::Int(1));

        assert!(matches!(
            table.add_rows(&[bad]),
            Err(DataError::UnknownColumn(name)) if name == "bogus"
        ));
    }

    #[test]
    fn fill_rows_targets_unset_rows_in_order() {
        let mut table = DataTable::with_columns([("y", ColumnKind::Float)]).unwrap();
        table.add_empty_rows(2);
        table.set(0, "y", Value::Float(1.0)).unwrap();
        table.add_empty_rows(1);

        table.fill_rows(&[vec![2.0], vec![3.0]]).unwrap();
        assert_eq!(table.get(1, "y").unwrap(), &Value::Float(2.0));
        assert_eq!(table.get(2, "y").unwrap(), &Value::Float(3.0));
    }

    #[test]
    fn fill_rows_checks_batch_length() {
        let mut table = DataTable::with_columns([("y", ColumnKind::Float)]).unwrap();
        table.add_empty_rows(2);

        assert!(matches!(
            table.fill_rows(&[vec![1.0]]),
            Err(DataError::Shape { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn matrix_excludes_non_numeric_columns() {
        let mut table = table();
        table.add_rows(&[row(1.5, 7, "a")]).unwrap();

        assert_eq!(table.to_matrix(), vec![vec![1.5, 7.0]]);
    }

    #[test]
    fn remove_reindexes_positionally() {
        let mut table = DataTable::with_columns([("x0", ColumnKind::Float)]).unwrap();
        table
            .add_matrix(&[vec![0.0], vec![1.0], vec![2.0]])
            .unwrap();

        table.remove(&[1]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "x0").unwrap(), &Value::Float(2.0));
    }

    #[test]
    fn select_keeps_requested_order() {
        let mut table = DataTable::with_columns([("x0", ColumnKind::Float)]).unwrap();
        table
            .add_matrix(&[vec![0.0], vec![1.0], vec![2.0]])
            .unwrap();

        let selected = table.select(&[2, 0]).unwrap();
        assert_eq!(selected.to_matrix(), vec![vec![2.0], vec![0.0]]);
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let table = table();
        assert!(matches!(table.row(0), Err(DataError::IndexOutOfRange(0))));
    }
}
