use bytecheck::CheckBytes;
use rkyv::{Archive, Deserialize, Serialize};

use crate::{Column, DataError, DataType};

/// Separates the per-column parts of a row key.
const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Default)]
#[archive_attr(derive(CheckBytes, Debug))]
/// A batch of rows stored as a set of equally long columns.
///
/// A dataset with no columns still has a row count, which is how a batch of
/// `n` rows made only of nulls is represented.
pub struct Dataset {
    columns: Vec<Column>,
    rows: u64,
}

impl Dataset {
    /// Creates a new dataset, all columns must have the same length and
    /// every null mask must be as long as the values it covers.
    pub fn new(columns: Vec<Column>) -> Result<Self, DataError> {
        let rows = columns.first().map(Column::len).unwrap_or_default();
        let dataset = Self {
            columns,
            rows: rows as u64,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Checks every column is as long as the dataset and carries a null mask
    /// matching its values.
    ///
    /// Datasets read off the wire must be checked before use, the archive
    /// only guarantees a well formed layout.
    pub fn validate(&self) -> Result<(), DataError> {
        for column in self.columns.iter() {
            if column.len() != self.len() {
                return Err(DataError::LengthMismatch {
                    expected: self.len(),
                    actual: column.len(),
                });
            }
            column.validate()?;
        }

        Ok(())
    }

    /// A dataset of `rows` rows without any columns.
    pub fn nulls(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows: rows as u64,
        }
    }

    #[inline]
    /// The number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    /// The number of rows.
    pub fn len(&self) -> usize {
        self.rows as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// The column at the given index.
    pub fn at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    /// The type of each column, in column order.
    pub fn types(&self) -> Vec<DataType> {
        self.columns.iter().map(Column::data_type).collect()
    }

    /// Splits the dataset into the columns before `at` and the columns from
    /// `at` onwards.
    pub fn split(&self, at: usize) -> Result<(Dataset, Dataset), DataError> {
        if at > self.width() {
            return Err(DataError::OutOfRange {
                index: at,
                len: self.width(),
            });
        }

        let (left, right) = self.columns.split_at(at);
        Ok((
            Self::with_rows(left.to_vec(), self.rows),
            Self::with_rows(right.to_vec(), self.rows),
        ))
    }

    /// Places the columns of `other` to the right of this dataset's columns.
    ///
    /// A dataset without columns expands into the other dataset unchanged.
    pub fn expand(&self, other: &Dataset) -> Result<Dataset, DataError> {
        if self.width() == 0 {
            return Ok(other.clone());
        }

        if other.rows != self.rows && other.width() != 0 {
            return Err(DataError::LengthMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }

        let mut columns = self.columns.clone();
        columns.extend_from_slice(&other.columns);
        Ok(Self::with_rows(columns, self.rows))
    }

    /// Places the rows of `other` after this dataset's rows.
    pub fn append(&self, other: &Dataset) -> Result<Dataset, DataError> {
        if self.width() != other.width() {
            return Err(DataError::LengthMismatch {
                expected: self.width(),
                actual: other.width(),
            });
        }

        let columns = self
            .columns
            .iter()
            .zip(other.columns.iter())
            .map(|(lhs, rhs)| lhs.append(rhs))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_rows(columns, self.rows + other.rows))
    }

    /// Copies the rows `start..end` into a new dataset.
    pub fn slice(&self, start: usize, end: usize) -> Result<Dataset, DataError> {
        if start > end || end > self.len() {
            return Err(DataError::OutOfRange {
                index: end,
                len: self.len(),
            });
        }

        let columns = self
            .columns
            .iter()
            .map(|column| column.slice(start, end))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_rows(columns, (end - start) as u64))
    }

    /// Gathers the given rows, in the given order, into a new dataset.
    pub fn take(&self, rows: &[usize]) -> Result<Dataset, DataError> {
        if let Some(&row) = rows.iter().find(|&&row| row >= self.len()) {
            return Err(DataError::OutOfRange {
                index: row,
                len: self.len(),
            });
        }

        let columns = self
            .columns
            .iter()
            .map(|column| column.take(rows))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_rows(columns, rows.len() as u64))
    }

    /// Builds the key of a row out of the given columns.
    ///
    /// Rows with equal values in those columns always produce the same key.
    pub fn row_key(&self, key_columns: &[usize], row: usize) -> Result<String, DataError> {
        let mut key = String::new();
        for (i, &index) in key_columns.iter().enumerate() {
            let column = self.at(index).ok_or(DataError::OutOfRange {
                index,
                len: self.width(),
            })?;

            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&column.key_at(row)?);
        }

        Ok(key)
    }

    fn with_rows(columns: Vec<Column>, rows: u64) -> Self {
        Self { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Dataset {
        Dataset::new(vec![
            Column::texts(["alice", "bob", "carol"]),
            Column::integers(vec![31, 27, 45]),
            Column::booleans(vec![true, false, true]),
        ])
        .expect("Columns of equal length")
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let err = Dataset::new(vec![
            Column::integers(vec![1, 2]),
            Column::integers(vec![1]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            DataError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_new_rejects_short_null_masks() {
        let err = Dataset::new(vec![Column::Integer {
            values: vec![1, 2, 3],
            nulls: vec![],
        }])
        .unwrap_err();
        assert_eq!(
            err,
            DataError::LengthMismatch {
                expected: 3,
                actual: 0
            }
        );

        assert!(Dataset::new(vec![
            Column::texts(["a", "b"]),
            Column::Boolean {
                values: vec![true, false],
                nulls: vec![false, false, true],
            },
        ])
        .is_err());
    }

    #[test]
    fn test_validate_archived_dataset() {
        let forged = Dataset {
            columns: vec![Column::integers(vec![1, 2])],
            rows: 5,
        };
        let bytes = rkyv::to_bytes::<_, 1024>(&forged).expect("Serialize OK");
        let copy: Dataset = rkyv::from_bytes(&bytes).expect("Layout is valid");
        assert!(matches!(
            copy.validate(),
            Err(DataError::LengthMismatch {
                expected: 5,
                actual: 2
            })
        ));

        assert!(people().validate().is_ok());
        assert!(Dataset::nulls(3).validate().is_ok());
    }

    #[test]
    fn test_split_and_expand() {
        let data = people();
        let (left, right) = data.split(1).expect("Split in range");
        assert_eq!(left.width(), 1);
        assert_eq!(right.width(), 2);
        assert_eq!(right.len(), 3);

        let joined = left.expand(&right).expect("Same length");
        assert_eq!(joined, data);

        assert!(data.split(4).is_err());
        assert!(data.expand(&Dataset::new(vec![Column::nulls(1)]).unwrap()).is_err());
    }

    #[test]
    fn test_nulls_dataset() {
        let nulls = Dataset::nulls(5);
        assert_eq!(nulls.width(), 0);
        assert_eq!(nulls.len(), 5);
        assert!(nulls.at(0).is_none());

        let data = people();
        assert_eq!(nulls.expand(&data).unwrap(), data);
    }

    #[test]
    fn test_append_slice_take() {
        let data = people();
        let twice = data.append(&data).expect("Same shape");
        assert_eq!(twice.len(), 6);
        assert_eq!(twice.types(), data.types());

        let tail = twice.slice(4, 6).expect("Slice in range");
        assert_eq!(tail.at(0).unwrap().strings(), vec!["bob", "carol"]);

        let picked = data.take(&[2, 0]).expect("Rows in range");
        assert_eq!(picked.at(1).unwrap().strings(), vec!["45", "31"]);
        assert!(data.take(&[3]).is_err());

        let narrow = Dataset::new(vec![Column::integers(vec![1])]).unwrap();
        assert!(data.append(&narrow).is_err());
    }

    #[test]
    fn test_row_key() {
        let data = people();
        let key = data.row_key(&[0, 1], 1).expect("Valid key columns");
        assert_eq!(key, "bob\u{1f}27");
        assert_ne!(key, data.row_key(&[0, 1], 0).unwrap());
        assert!(data.row_key(&[3], 0).is_err());
    }

    #[test]
    fn test_archive() {
        let mut data = people();
        data.columns[1].mark_null(0);

        let bytes = rkyv::to_bytes::<_, 1024>(&data).expect("Serialize OK");
        let copy: Dataset = rkyv::from_bytes(&bytes).expect("Deserialize OK");
        assert_eq!(copy, data, "Deserialized value and original value should match");
    }
}
