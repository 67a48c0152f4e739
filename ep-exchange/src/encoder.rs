use std::sync::atomic::Ordering;

use ep_data::Dataset;

use crate::{Connection, ExchangeError, ExchangeStatistics};

/// Writes batches to a single node of an exchange's topology.
///
/// An exchange creates one encoder per node when it is initialised, they are
/// shared as `Arc<Encoder>` so a partition key always resolves to the same
/// encoder instance.
pub struct Encoder {
    index: usize,
    connection: Connection,
    statistics: ExchangeStatistics,
}

impl Encoder {
    pub(crate) fn new(index: usize, connection: Connection, statistics: ExchangeStatistics) -> Self {
        Self {
            index,
            connection,
            statistics,
        }
    }

    /// The position of this encoder's node in the exchange's node list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The address of the node this encoder writes to.
    pub fn route(&self) -> &str {
        self.connection.route()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Writes a batch to the node.
    pub async fn encode(&self, batch: Dataset) -> Result<(), ExchangeError> {
        let num_rows = batch.len() as u64;
        self.connection.send_batch(batch).await?;

        self.statistics
            .num_batches_sent
            .fetch_add(1, Ordering::Relaxed);
        self.statistics
            .num_rows_sent
            .fetch_add(num_rows, Ordering::Relaxed);

        Ok(())
    }

    pub(crate) async fn encode_eof(&self) -> Result<(), ExchangeError> {
        self.connection.send_eof().await
    }

    pub(crate) async fn close(&self) {
        if self.connection.close().await {
            self.statistics
                .num_connections_closed
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}
