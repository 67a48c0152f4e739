//! # ep data
//!
//! The columnar building blocks batches are made of.
//!
//! A [Dataset] is a set of equally long [Column]s, each column holding values of
//! a single [DataType] along with a null mask. Datasets are what exchanges move
//! between the nodes of a cluster, so every type here can be archived with `rkyv`.
//!
//! ```rust
//! use ep_data::{Column, Dataset, DataType};
//!
//! let data = Dataset::new(vec![
//!     Column::texts(["hello", "world"]),
//!     Column::integers(vec![1, 2]),
//! ])
//! .unwrap();
//!
//! assert_eq!(data.width(), 2);
//! assert_eq!(data.types(), vec![DataType::Text, DataType::Integer]);
//! ```

mod column;
pub mod compare;
mod dataset;
mod error;
mod types;

pub use column::{ArchivedColumn, Column};
pub use compare::Comparison;
pub use dataset::{ArchivedDataset, Dataset};
pub use error::DataError;
pub use types::DataType;
