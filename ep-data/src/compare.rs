use std::cmp::Ordering;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The outcome of comparing two rows of data.
///
/// Unlike [Ordering] this keeps track of null values so ordering sensitive
/// operators can decide where nulls belong.
pub enum Comparison {
    /// Equal to the other value, e.g. `1 == 1`
    Equal = 1,
    /// Both the current and the other value are null.
    BothNulls,
    /// Exactly one of the two values is null.
    Null,
    /// Greater than the other value, e.g. `2 > 1`
    Greater,
    /// Less than the other value, e.g. `1 < 2`
    Less,
}

impl Comparison {
    /// Builds the comparison result of two values which may be null.
    pub fn of<T, F>(lhs: Option<T>, rhs: Option<T>, cmp: F) -> Self
    where
        F: FnOnce(&T, &T) -> Ordering,
    {
        match (lhs, rhs) {
            (None, None) => Comparison::BothNulls,
            (None, Some(_)) | (Some(_), None) => Comparison::Null,
            (Some(lhs), Some(rhs)) => Comparison::from(cmp(&lhs, &rhs)),
        }
    }

    /// Returns `true` if either side of the comparison was null.
    pub fn involves_null(self) -> bool {
        matches!(self, Comparison::BothNulls | Comparison::Null)
    }
}

impl From<Ordering> for Comparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Comparison::Less,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_of() {
        assert_eq!(Comparison::of(Some(1), Some(1), Ord::cmp), Comparison::Equal);
        assert_eq!(Comparison::of(Some(2), Some(1), Ord::cmp), Comparison::Greater);
        assert_eq!(Comparison::of(Some(1), Some(2), Ord::cmp), Comparison::Less);
        assert_eq!(Comparison::of(None, Some(2), Ord::cmp), Comparison::Null);
        assert_eq!(Comparison::of::<i32, _>(None, None, Ord::cmp), Comparison::BothNulls);
        assert!(Comparison::Null.involves_null());
        assert!(!Comparison::Less.involves_null());
    }
}
