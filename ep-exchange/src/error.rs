use std::io;

use ep_data::{DataError, DataType};
use thiserror::Error;

use crate::{ExchangeUid, NodeAddr};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("dial {addr}: {source}")]
    /// Connecting to a peer's distributer failed.
    ///
    /// The original IO error is kept so callers can tell a refused connection
    /// apart from other transport failures.
    Dial {
        addr: NodeAddr,
        #[source]
        source: io::Error,
    },

    #[error("dial {addr}: timed out")]
    /// Connecting to a peer did not complete within the dial timeout.
    DialTimeout { addr: NodeAddr },

    #[error("Invalid exchange configuration: {0}")]
    InvalidConfig(String),

    #[error("An exchange with UID {0} is already registered with the distributer")]
    DuplicateUid(ExchangeUid),

    #[error("The distributer has been closed")]
    DistributerClosed,

    #[error("Cannot partition a batch with no columns, no schema has been established")]
    /// The batch carries no columns to derive a shape or key from.
    Unprimed,

    #[error("Batch schema {actual:?} does not match the exchange schema {expected:?}")]
    SchemaMismatch {
        expected: Vec<DataType>,
        actual: Vec<DataType>,
    },

    #[error("Partition key column {index} is out of range for a batch of width {width}")]
    KeyColumnOutOfRange { index: usize, width: usize },

    #[error("No node owns partition key {key:?}")]
    /// The hash ring has no member with an encoder for the key.
    NoPartitionOwner { key: String },

    #[error("{0}")]
    Data(#[from] DataError),

    #[error("{0}")]
    /// An IO error occurred on an established connection.
    Transport(#[from] io::Error),

    #[error("Failed to serialize batch: {0}")]
    Serialize(String),

    #[error("Peer {from} disconnected before the end of the stream: {reason}")]
    PeerDisconnected { from: NodeAddr, reason: String },

    #[error("{operation} is not supported by a {kind} exchange")]
    Unsupported {
        kind: &'static str,
        operation: &'static str,
    },

    #[error("The exchange has not been initialised")]
    NotInitialized,

    #[error("The exchange has already been initialised")]
    AlreadyInitialized,

    #[error("The exchange has already finished sending")]
    Finished,

    #[error("The exchange has been closed")]
    Closed,
}

impl ExchangeError {
    /// The kind of the underlying IO error, if the error was caused by one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ExchangeError::Dial { source, .. } => Some(source.kind()),
            ExchangeError::DialTimeout { .. } => Some(io::ErrorKind::TimedOut),
            ExchangeError::Transport(e) => Some(e.kind()),
            _ => None,
        }
    }
}
