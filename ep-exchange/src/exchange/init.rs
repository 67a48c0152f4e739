use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::connection::RemoteConnection;
use crate::distributer::Registration;
use crate::{
    Connection,
    Encoder,
    ExchangeConfig,
    ExchangeError,
    ExchangeStatistics,
    ExchangeUid,
};

/// Opens a connection to every node of the topology, in order.
///
/// The node matching `this_node` gets a short circuit into the exchange's own
/// mailbox. If a peer cannot be reached every connection opened so far is
/// closed before the error is returned.
pub(super) async fn connect(
    uid: ExchangeUid,
    config: &ExchangeConfig,
    registration: &Registration,
    statistics: &ExchangeStatistics,
) -> Result<Vec<Arc<Encoder>>, ExchangeError> {
    let mut opened = OpenedConnections::new(statistics.clone());

    for node in config.all_nodes.iter() {
        if node == &config.this_node {
            opened.push(Connection::short_circuit(node.clone(), registration.sender()));
            continue;
        }

        match RemoteConnection::dial(uid, node, &config.this_node, config.dial_timeout).await {
            Ok(conn) => opened.push(Connection::Remote(conn)),
            Err(e) => {
                warn!(
                    uid = %uid,
                    addr = %node,
                    error = %e,
                    num_opened = opened.len(),
                    "Failed to connect to node, rolling back exchange."
                );
                opened.rollback().await;
                return Err(e);
            },
        }
    }

    let encoders = opened
        .into_connections()
        .into_iter()
        .enumerate()
        .map(|(index, conn)| Arc::new(Encoder::new(index, conn, statistics.clone())))
        .collect();

    Ok(encoders)
}

/// The connections opened so far by an init which has not completed yet.
///
/// If the guard is dropped before the connections are taken out of it, as
/// happens when the init future is cancelled, every connection is aborted.
struct OpenedConnections {
    connections: Vec<Connection>,
    statistics: ExchangeStatistics,
}

impl OpenedConnections {
    fn new(statistics: ExchangeStatistics) -> Self {
        Self {
            connections: Vec::new(),
            statistics,
        }
    }

    fn len(&self) -> usize {
        self.connections.len()
    }

    fn push(&mut self, conn: Connection) {
        self.statistics
            .num_connections_opened
            .fetch_add(1, Ordering::Relaxed);
        self.connections.push(conn);
    }

    /// Closes every connection in the order it was opened in.
    async fn rollback(mut self) {
        for conn in mem::take(&mut self.connections) {
            if conn.close().await {
                self.statistics
                    .num_connections_closed
                    .fetch_add(1, Ordering::Relaxed);
            }
            trace!(route = %conn.route(), "Rolled back connection.");
        }
    }

    fn into_connections(mut self) -> Vec<Connection> {
        mem::take(&mut self.connections)
    }
}

impl Drop for OpenedConnections {
    fn drop(&mut self) {
        for conn in self.connections.iter_mut() {
            if conn.abort() {
                self.statistics
                    .num_connections_closed
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
