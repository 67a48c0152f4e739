use std::fmt::{Display, Formatter};

use crate::Column;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The kind of values a [Column] holds.
pub enum DataType {
    /// A column made up entirely of `NULL`s.
    Null,
    Boolean,
    Integer,
    Float,
    Text,
}

impl DataType {
    /// All supported column kinds.
    pub const ALL: [DataType; 5] = [
        DataType::Null,
        DataType::Boolean,
        DataType::Integer,
        DataType::Float,
        DataType::Text,
    ];

    /// The registered name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Null => "NULL",
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "string",
        }
    }

    /// Looks up a type by its registered name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// Creates a column of `n` default (non-null) values.
    ///
    /// For [DataType::Null] this is a column of `n` nulls.
    pub fn data(&self, n: usize) -> Column {
        match self {
            DataType::Null => Column::Null(n as u64),
            DataType::Boolean => Column::Boolean {
                values: vec![false; n],
                nulls: vec![false; n],
            },
            DataType::Integer => Column::Integer {
                values: vec![0; n],
                nulls: vec![false; n],
            },
            DataType::Float => Column::Float {
                values: vec![0.0; n],
                nulls: vec![false; n],
            },
            DataType::Text => Column::Text {
                values: vec![String::new(); n],
                nulls: vec![false; n],
            },
        }
    }

    /// Creates an empty column with room for `capacity` rows.
    pub fn empty(&self, capacity: usize) -> Column {
        match self {
            DataType::Null => Column::Null(0),
            DataType::Boolean => Column::Boolean {
                values: Vec::with_capacity(capacity),
                nulls: Vec::with_capacity(capacity),
            },
            DataType::Integer => Column::Integer {
                values: Vec::with_capacity(capacity),
                nulls: Vec::with_capacity(capacity),
            },
            DataType::Float => Column::Float {
                values: Vec::with_capacity(capacity),
                nulls: Vec::with_capacity(capacity),
            },
            DataType::Text => Column::Text {
                values: Vec::with_capacity(capacity),
                nulls: Vec::with_capacity(capacity),
            },
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        for ty in DataType::ALL {
            assert_eq!(DataType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(DataType::from_name("varchar"), None);
    }

    #[test]
    fn test_constructors() {
        let data = DataType::Integer.data(3);
        assert_eq!(data.len(), 3);
        assert_eq!(data.data_type(), DataType::Integer);
        assert!(!data.is_null(0));

        let nulls = DataType::Null.data(4);
        assert_eq!(nulls.len(), 4);
        assert!(nulls.is_null(3));

        let empty = DataType::Text.empty(16);
        assert!(empty.is_empty());
        assert_eq!(empty.data_type(), DataType::Text);
    }
}
