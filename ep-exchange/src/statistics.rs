use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live counters of a single exchange.
pub struct ExchangeStatistics(Arc<ExchangeStatisticsInner>);

impl Deref for ExchangeStatistics {
    type Target = ExchangeStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ExchangeStatisticsInner {
    /// The number of connections the exchange has opened, short circuits included.
    pub(crate) num_connections_opened: Counter,
    /// The number of connections the exchange has closed.
    pub(crate) num_connections_closed: Counter,
    /// The number of batches written to connections.
    pub(crate) num_batches_sent: Counter,
    /// The number of rows written to connections.
    pub(crate) num_rows_sent: Counter,
    /// The number of batches received from all nodes.
    pub(crate) num_batches_received: Counter,
    /// The number of rows received from all nodes.
    pub(crate) num_rows_received: Counter,
}

impl ExchangeStatisticsInner {
    /// The number of connections the exchange has opened, short circuits included.
    pub fn num_connections_opened(&self) -> u64 {
        self.num_connections_opened.load(Ordering::Relaxed)
    }

    /// The number of connections the exchange has closed.
    pub fn num_connections_closed(&self) -> u64 {
        self.num_connections_closed.load(Ordering::Relaxed)
    }

    /// The number of connections currently open.
    pub fn num_open_connections(&self) -> u64 {
        self.num_connections_opened()
            .saturating_sub(self.num_connections_closed())
    }

    /// The number of batches written to connections.
    pub fn num_batches_sent(&self) -> u64 {
        self.num_batches_sent.load(Ordering::Relaxed)
    }

    /// The number of rows written to connections.
    pub fn num_rows_sent(&self) -> u64 {
        self.num_rows_sent.load(Ordering::Relaxed)
    }

    /// The number of batches received from all nodes.
    pub fn num_batches_received(&self) -> u64 {
        self.num_batches_received.load(Ordering::Relaxed)
    }

    /// The number of rows received from all nodes.
    pub fn num_rows_received(&self) -> u64 {
        self.num_rows_received.load(Ordering::Relaxed)
    }
}
