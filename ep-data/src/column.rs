use bytecheck::CheckBytes;
use rkyv::{Archive, Deserialize, Serialize};

use crate::{Comparison, DataError, DataType};

/// Rebuilds a column of the same kind from its values and null mask.
///
/// The body is expanded once per column kind, so it may be written
/// generically over the value type.
macro_rules! rebuild {
    ($column:expr, |$n:ident| $null:expr, |$values:ident, $nulls:ident| $body:expr) => {
        match $column {
            Column::Null($n) => Column::Null($null),
            Column::Boolean {
                values: $values,
                nulls: $nulls,
            } => {
                let (values, nulls) = $body;
                Column::Boolean { values, nulls }
            },
            Column::Integer {
                values: $values,
                nulls: $nulls,
            } => {
                let (values, nulls) = $body;
                Column::Integer { values, nulls }
            },
            Column::Float {
                values: $values,
                nulls: $nulls,
            } => {
                let (values, nulls) = $body;
                Column::Float { values, nulls }
            },
            Column::Text {
                values: $values,
                nulls: $nulls,
            } => {
                let (values, nulls) = $body;
                Column::Text { values, nulls }
            },
        }
    };
}

#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq)]
#[archive_attr(derive(CheckBytes, Debug))]
/// A single column of typed values, the unit a [crate::Dataset] is built from.
///
/// Every non-null variant carries a null mask of the same length as its values.
pub enum Column {
    /// `n` null values.
    Null(u64),
    Boolean { values: Vec<bool>, nulls: Vec<bool> },
    Integer { values: Vec<i64>, nulls: Vec<bool> },
    Float { values: Vec<f64>, nulls: Vec<bool> },
    Text { values: Vec<String>, nulls: Vec<bool> },
}

impl Column {
    /// A column of `n` nulls.
    pub fn nulls(n: usize) -> Self {
        Self::Null(n as u64)
    }

    pub fn booleans(values: Vec<bool>) -> Self {
        let nulls = vec![false; values.len()];
        Self::Boolean { values, nulls }
    }

    pub fn integers(values: Vec<i64>) -> Self {
        let nulls = vec![false; values.len()];
        Self::Integer { values, nulls }
    }

    pub fn floats(values: Vec<f64>) -> Self {
        let nulls = vec![false; values.len()];
        Self::Float { values, nulls }
    }

    pub fn texts<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let nulls = vec![false; values.len()];
        Self::Text { values, nulls }
    }

    /// The kind of values held by the column.
    pub fn data_type(&self) -> DataType {
        match self {
            Column::Null(_) => DataType::Null,
            Column::Boolean { .. } => DataType::Boolean,
            Column::Integer { .. } => DataType::Integer,
            Column::Float { .. } => DataType::Float,
            Column::Text { .. } => DataType::Text,
        }
    }

    #[inline]
    /// The number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Null(n) => *n as usize,
            Column::Boolean { values, .. } => values.len(),
            Column::Integer { values, .. } => values.len(),
            Column::Float { values, .. } => values.len(),
            Column::Text { values, .. } => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the given row is null.
    ///
    /// Rows past the end of the column are never null.
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Column::Null(n) => (row as u64) < *n,
            _ => self.null_mask().get(row).copied().unwrap_or(false),
        }
    }

    /// Marks the given row as null, rows past the end are ignored.
    pub fn mark_null(&mut self, row: usize) {
        let nulls = match self {
            Column::Null(_) => return,
            Column::Boolean { nulls, .. } => nulls,
            Column::Integer { nulls, .. } => nulls,
            Column::Float { nulls, .. } => nulls,
            Column::Text { nulls, .. } => nulls,
        };

        if let Some(is_null) = nulls.get_mut(row) {
            *is_null = true;
        }
    }

    /// The number of null rows in the column.
    pub fn null_count(&self) -> usize {
        match self {
            Column::Null(n) => *n as usize,
            _ => self.null_mask().iter().filter(|is_null| **is_null).count(),
        }
    }

    /// Checks the null mask covers exactly the values of the column.
    pub fn validate(&self) -> Result<(), DataError> {
        match self {
            Column::Null(_) => Ok(()),
            _ if self.null_mask().len() == self.len() => Ok(()),
            _ => Err(DataError::LengthMismatch {
                expected: self.len(),
                actual: self.null_mask().len(),
            }),
        }
    }

    fn null_mask(&self) -> &[bool] {
        match self {
            Column::Null(_) => &[],
            Column::Boolean { nulls, .. } => nulls,
            Column::Integer { nulls, .. } => nulls,
            Column::Float { nulls, .. } => nulls,
            Column::Text { nulls, .. } => nulls,
        }
    }

    /// Compares `row` of this column with `other_row` of another column of
    /// the same kind.
    pub fn compare(
        &self,
        row: usize,
        other: &Column,
        other_row: usize,
    ) -> Result<Comparison, DataError> {
        check_row(row, self.len())?;
        check_row(other_row, other.len())?;

        let comparison = match (self, other) {
            (Column::Null(_), _) | (_, Column::Null(_)) => {
                if self.is_null(row) && other.is_null(other_row) {
                    Comparison::BothNulls
                } else {
                    Comparison::Null
                }
            },
            (
                Column::Boolean { values, nulls },
                Column::Boolean {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Comparison::of(
                cell(values, nulls, row),
                cell(other_values, other_nulls, other_row),
                Ord::cmp,
            ),
            (
                Column::Integer { values, nulls },
                Column::Integer {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Comparison::of(
                cell(values, nulls, row),
                cell(other_values, other_nulls, other_row),
                Ord::cmp,
            ),
            (
                Column::Float { values, nulls },
                Column::Float {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Comparison::of(
                cell(values, nulls, row),
                cell(other_values, other_nulls, other_row),
                |lhs: &&f64, rhs: &&f64| (*lhs).total_cmp(*rhs),
            ),
            (
                Column::Text { values, nulls },
                Column::Text {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Comparison::of(
                cell(values, nulls, row),
                cell(other_values, other_nulls, other_row),
                Ord::cmp,
            ),
            _ => {
                return Err(DataError::TypeMismatch {
                    expected: self.data_type(),
                    actual: other.data_type(),
                })
            },
        };

        Ok(comparison)
    }

    /// Returns `true` if row `i` sorts before row `j`, nulls sort first.
    pub fn less(&self, i: usize, j: usize) -> bool {
        match self.compare(i, self, j) {
            Ok(Comparison::Less) => true,
            Ok(Comparison::Null) => self.is_null(i),
            _ => false,
        }
    }

    /// Swaps two rows, out of range rows are ignored.
    pub fn swap(&mut self, i: usize, j: usize) {
        let len = self.len();
        if i >= len || j >= len {
            return;
        }

        match self {
            Column::Null(_) => {},
            Column::Boolean { values, nulls } => swap_rows(values, nulls, i, j),
            Column::Integer { values, nulls } => swap_rows(values, nulls, i, j),
            Column::Float { values, nulls } => swap_rows(values, nulls, i, j),
            Column::Text { values, nulls } => swap_rows(values, nulls, i, j),
        }
    }

    /// Copies the rows `start..end` into a new column.
    pub fn slice(&self, start: usize, end: usize) -> Result<Column, DataError> {
        if start > end {
            return Err(DataError::OutOfRange {
                index: start,
                len: end,
            });
        }
        check_bound(end, self.len())?;

        let column = rebuild!(self, |_n| (end - start) as u64, |values, nulls| (
            values[start..end].to_vec(),
            nulls[start..end].to_vec()
        ));
        Ok(column)
    }

    /// Produces a new column with the rows of `other` after the rows of this column.
    pub fn append(&self, other: &Column) -> Result<Column, DataError> {
        let column = match (self, other) {
            (Column::Null(n), Column::Null(other_n)) => Column::Null(n + other_n),
            (
                Column::Boolean { values, nulls },
                Column::Boolean {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Column::Boolean {
                values: concat(values, other_values),
                nulls: concat(nulls, other_nulls),
            },
            (
                Column::Integer { values, nulls },
                Column::Integer {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Column::Integer {
                values: concat(values, other_values),
                nulls: concat(nulls, other_nulls),
            },
            (
                Column::Float { values, nulls },
                Column::Float {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Column::Float {
                values: concat(values, other_values),
                nulls: concat(nulls, other_nulls),
            },
            (
                Column::Text { values, nulls },
                Column::Text {
                    values: other_values,
                    nulls: other_nulls,
                },
            ) => Column::Text {
                values: concat(values, other_values),
                nulls: concat(nulls, other_nulls),
            },
            _ => {
                return Err(DataError::TypeMismatch {
                    expected: self.data_type(),
                    actual: other.data_type(),
                })
            },
        };

        Ok(column)
    }

    /// Repeats the whole column `times` times.
    pub fn duplicate(&self, times: usize) -> Column {
        rebuild!(self, |n| n * times as u64, |values, nulls| (
            repeat(values, times),
            repeat(nulls, times)
        ))
    }

    /// Overwrites `to_row` of this column with `from_row` of another column.
    pub fn copy_row(
        &mut self,
        from: &Column,
        from_row: usize,
        to_row: usize,
    ) -> Result<(), DataError> {
        check_row(from_row, from.len())?;
        check_row(to_row, self.len())?;

        match (self, from) {
            (Column::Null(_), Column::Null(_)) => {},
            (
                Column::Boolean { values, nulls },
                Column::Boolean {
                    values: src,
                    nulls: src_nulls,
                },
            ) => {
                values[to_row] = src[from_row];
                nulls[to_row] = src_nulls[from_row];
            },
            (
                Column::Integer { values, nulls },
                Column::Integer {
                    values: src,
                    nulls: src_nulls,
                },
            ) => {
                values[to_row] = src[from_row];
                nulls[to_row] = src_nulls[from_row];
            },
            (
                Column::Float { values, nulls },
                Column::Float {
                    values: src,
                    nulls: src_nulls,
                },
            ) => {
                values[to_row] = src[from_row];
                nulls[to_row] = src_nulls[from_row];
            },
            (
                Column::Text { values, nulls },
                Column::Text {
                    values: src,
                    nulls: src_nulls,
                },
            ) => {
                values[to_row] = src[from_row].clone();
                nulls[to_row] = src_nulls[from_row];
            },
            (this, from) => {
                return Err(DataError::TypeMismatch {
                    expected: this.data_type(),
                    actual: from.data_type(),
                })
            },
        }

        Ok(())
    }

    /// Gathers the given rows, in the given order, into a new column.
    pub fn take(&self, rows: &[usize]) -> Result<Column, DataError> {
        let len = self.len();
        if let Some(&row) = rows.iter().find(|&&row| row >= len) {
            return Err(DataError::OutOfRange { index: row, len });
        }

        let column = rebuild!(self, |_n| rows.len() as u64, |values, nulls| (
            rows.iter().map(|&row| values[row].clone()).collect(),
            rows.iter().map(|&row| nulls[row]).collect()
        ));
        Ok(column)
    }

    /// The display form of every row, nulls are rendered as `NULL`.
    pub fn strings(&self) -> Vec<String> {
        (0..self.len())
            .map(|row| {
                if self.is_null(row) {
                    return "NULL".to_string();
                }

                match self {
                    Column::Null(_) => "NULL".to_string(),
                    Column::Boolean { values, .. } => values[row].to_string(),
                    Column::Integer { values, .. } => values[row].to_string(),
                    Column::Float { values, .. } => values[row].to_string(),
                    Column::Text { values, .. } => values[row].clone(),
                }
            })
            .collect()
    }

    /// A stable textual key for the given row used for hashing rows.
    pub fn key_at(&self, row: usize) -> Result<String, DataError> {
        check_row(row, self.len())?;

        if self.is_null(row) {
            return Ok("\0".to_string());
        }

        let key = match self {
            Column::Null(_) => "\0".to_string(),
            Column::Boolean { values, .. } => values[row].to_string(),
            Column::Integer { values, .. } => values[row].to_string(),
            Column::Float { values, .. } => values[row].to_bits().to_string(),
            Column::Text { values, .. } => values[row].clone(),
        };

        Ok(key)
    }
}

fn check_row(row: usize, len: usize) -> Result<(), DataError> {
    if row >= len {
        return Err(DataError::OutOfRange { index: row, len });
    }
    Ok(())
}

fn check_bound(end: usize, len: usize) -> Result<(), DataError> {
    if end > len {
        return Err(DataError::OutOfRange { index: end, len });
    }
    Ok(())
}

fn cell<'a, T>(values: &'a [T], nulls: &[bool], row: usize) -> Option<&'a T> {
    if nulls.get(row).copied().unwrap_or(false) {
        return None;
    }
    values.get(row)
}

fn swap_rows<T>(values: &mut [T], nulls: &mut [bool], i: usize, j: usize) {
    values.swap(i, j);
    nulls.swap(i, j);
}

fn concat<T: Clone>(lhs: &[T], rhs: &[T]) -> Vec<T> {
    let mut joined = Vec::with_capacity(lhs.len() + rhs.len());
    joined.extend_from_slice(lhs);
    joined.extend_from_slice(rhs);
    joined
}

fn repeat<T: Clone>(values: &[T], times: usize) -> Vec<T> {
    let mut repeated = Vec::with_capacity(values.len() * times);
    for _ in 0..times {
        repeated.extend_from_slice(values);
    }
    repeated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort(column: &mut Column) {
        // Simple insertion sort only relying on `less` and `swap`.
        for i in 1..column.len() {
            let mut j = i;
            while j > 0 && column.less(j, j - 1) {
                column.swap(j, j - 1);
                j -= 1;
            }
        }
    }

    #[test]
    fn test_sort_and_slice() {
        let mut strs = Column::texts(["hello", "world", "foo", "bar"]);
        sort(&mut strs);
        let strs = strs.slice(0, 2).expect("Slice in range");
        assert_eq!(strs.strings(), vec!["bar", "foo"]);

        let mut ints = Column::integers(vec![4, 2, 3, 1]);
        sort(&mut ints);
        let ints = ints.slice(0, 2).expect("Slice in range");
        assert_eq!(ints.strings(), vec!["1", "2"]);
    }

    #[test]
    fn test_nulls_sort_first() {
        let mut ints = Column::integers(vec![3, 1, 2]);
        ints.mark_null(2);
        assert_eq!(ints.null_count(), 1);

        sort(&mut ints);
        assert!(ints.is_null(0));
        assert_eq!(ints.strings(), vec!["NULL", "1", "3"]);
    }

    #[test]
    fn test_compare() {
        let lhs = Column::floats(vec![1.0, 2.5]);
        let mut rhs = Column::floats(vec![2.5, 0.0]);
        rhs.mark_null(1);

        assert_eq!(lhs.compare(0, &rhs, 0), Ok(Comparison::Less));
        assert_eq!(lhs.compare(1, &rhs, 0), Ok(Comparison::Equal));
        assert_eq!(lhs.compare(1, &rhs, 1), Ok(Comparison::Null));
        assert_eq!(
            Column::nulls(1).compare(0, &rhs, 1),
            Ok(Comparison::BothNulls)
        );
        assert_eq!(
            lhs.compare(0, &Column::integers(vec![1]), 0),
            Err(DataError::TypeMismatch {
                expected: DataType::Float,
                actual: DataType::Integer,
            })
        );
        assert!(lhs.compare(5, &rhs, 0).is_err());
    }

    #[test]
    fn test_append_and_duplicate() {
        let words = Column::texts(["a", "b"]);
        let joined = words
            .append(&Column::texts(["c"]))
            .expect("Append same kind");
        assert_eq!(joined.strings(), vec!["a", "b", "c"]);

        let err = words.append(&Column::booleans(vec![true])).unwrap_err();
        assert!(matches!(err, DataError::TypeMismatch { .. }));

        assert_eq!(words.duplicate(3).len(), 6);
        assert_eq!(words.duplicate(2).strings(), vec!["a", "b", "a", "b"]);
        assert_eq!(Column::nulls(2).duplicate(2).len(), 4);
        assert_eq!(
            Column::nulls(2).append(&Column::nulls(3)),
            Ok(Column::nulls(5))
        );
    }

    #[test]
    fn test_copy_row_and_take() {
        let mut target = Column::integers(vec![0, 0, 0]);
        let mut source = Column::integers(vec![7, 8]);
        source.mark_null(1);

        target.copy_row(&source, 0, 2).expect("Copy in range");
        target.copy_row(&source, 1, 0).expect("Copy in range");
        assert_eq!(target.strings(), vec!["NULL", "0", "7"]);
        assert!(target.copy_row(&source, 2, 0).is_err());

        let taken = target.take(&[2, 2, 0]).expect("Rows in range");
        assert_eq!(taken.strings(), vec!["7", "7", "NULL"]);
        assert!(target.take(&[3]).is_err());
    }

    #[test]
    fn test_validate_null_mask() {
        assert!(Column::integers(vec![1, 2]).validate().is_ok());
        assert!(Column::nulls(4).validate().is_ok());

        let short = Column::Text {
            values: vec!["a".to_string(), "b".to_string()],
            nulls: vec![false],
        };
        assert_eq!(
            short.validate(),
            Err(DataError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_key_at() {
        let mut column = Column::texts(["x", "y"]);
        column.mark_null(1);
        assert_eq!(column.key_at(0).unwrap(), "x");
        assert_eq!(column.key_at(1).unwrap(), "\0");
        assert!(column.key_at(2).is_err());
    }

    #[test]
    fn test_sort_random_integers() {
        let mut values = (0..200)
            .map(|_| rand::random::<i32>() as i64)
            .collect::<Vec<_>>();
        let mut column = Column::integers(values.clone());
        sort(&mut column);

        values.sort_unstable();
        assert_eq!(column, Column::integers(values));
    }
}
