use thiserror::Error;

use crate::DataType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("Mismatched column types, expected {expected} but got {actual}")]
    /// Two columns of different kinds were combined.
    TypeMismatch { expected: DataType, actual: DataType },

    #[error("Mismatched lengths, expected {expected} rows but got {actual}")]
    /// Columns of a dataset or two datasets being merged have different lengths.
    LengthMismatch { expected: usize, actual: usize },

    #[error("Index {index} is out of range for length {len}")]
    /// A row or column index was past the end of the data.
    OutOfRange { index: usize, len: usize },
}
