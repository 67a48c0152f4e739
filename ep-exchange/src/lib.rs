//! Moves batches of columnar rows between the nodes of a cluster.
//!
//! Every node runs a single [Distributer] which owns the node's listening
//! socket. An [Exchange] connects to the distributer of every node of its
//! topology when initialised and routes batches according to its kind:
//!
//! - *Scatter* spreads batches over all nodes.
//! - *Gather* collects all batches on the master node.
//! - *Partition* sends each row to the node owning its key on a consistent
//!   [HashRing].
//!
//! Data sent by a node to itself never touches the network, it is passed
//! straight into the exchange's own mailbox.

#[macro_use]
extern crate tracing;

mod config;
mod connection;
mod distributer;
mod encoder;
mod error;
mod exchange;
mod frame;
mod hashring;
mod statistics;
mod uid;

pub const SCRATCH_SPACE: usize = 4096;

/// The `host:port` address of a node.
pub type NodeAddr = String;

pub use config::{ExchangeConfig, DEFAULT_DIAL_TIMEOUT};
pub use connection::{Connection, RemoteConnection, ShortCircuit};
pub use distributer::{
    Distributer,
    DistributerInner,
    HANDSHAKE_TIMEOUT,
    PENDING_MAILBOX_TTL,
    RELEASED_UID_TTL,
};
pub use encoder::Encoder;
pub use error::ExchangeError;
pub use exchange::{
    ArchivedExchangeDescriptor,
    ArchivedExchangeKind,
    ArchivedScatterPolicy,
    Exchange,
    ExchangeDescriptor,
    ExchangeKind,
    ScatterPolicy,
    ENCODER_CACHE_CAPACITY,
};
pub use frame::MAX_FRAME_SIZE;
pub use hashring::{HashRing, DEFAULT_VIRTUAL_NODES};
pub use statistics::{ExchangeStatistics, ExchangeStatisticsInner};
pub use uid::{ArchivedExchangeUid, ExchangeUid};
