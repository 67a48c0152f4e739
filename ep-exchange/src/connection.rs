use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ep_data::Dataset;
use flume::Sender;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::distributer::Inbound;
use crate::frame::{batch_frame, eof_frame, handshake_frame};
use crate::{ExchangeError, ExchangeUid, NodeAddr};

/// A route from an exchange to one node of its topology.
pub enum Connection {
    /// A TCP connection to a peer's distributer.
    Remote(RemoteConnection),
    /// A local pass-through into this exchange's own mailbox.
    ShortCircuit(ShortCircuit),
}

impl Connection {
    pub(crate) fn short_circuit(route: NodeAddr, tx: Sender<Inbound>) -> Self {
        Self::ShortCircuit(ShortCircuit {
            route,
            tx,
            closed: AtomicBool::new(false),
        })
    }

    /// The address of the node this connection leads to.
    pub fn route(&self) -> &str {
        match self {
            Self::Remote(conn) => &conn.route,
            Self::ShortCircuit(conn) => &conn.route,
        }
    }

    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::ShortCircuit(_))
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Remote(conn) => conn.closed.load(Ordering::Acquire),
            Self::ShortCircuit(conn) => conn.closed.load(Ordering::Acquire),
        }
    }

    pub(crate) async fn send_batch(&self, batch: Dataset) -> Result<(), ExchangeError> {
        match self {
            Self::Remote(conn) => {
                let frame = batch_frame(conn.uid, &batch)?;
                conn.write_frame(&frame).await
            },
            Self::ShortCircuit(conn) => conn.deliver(Inbound::Batch {
                from: conn.route.clone(),
                batch,
            }),
        }
    }

    pub(crate) async fn send_eof(&self) -> Result<(), ExchangeError> {
        match self {
            Self::Remote(conn) => conn.write_frame(&eof_frame(conn.uid)).await,
            Self::ShortCircuit(conn) => conn.deliver(Inbound::Eof {
                from: conn.route.clone(),
            }),
        }
    }

    /// Closes the connection.
    ///
    /// Returns `true` if this call closed it, `false` if it was already closed.
    pub(crate) async fn close(&self) -> bool {
        match self {
            Self::Remote(conn) => conn.close().await,
            Self::ShortCircuit(conn) => !conn.closed.swap(true, Ordering::AcqRel),
        }
    }

    /// Closes the connection without waiting on the stream.
    pub(crate) fn abort(&mut self) -> bool {
        match self {
            Self::Remote(conn) => conn.abort(),
            Self::ShortCircuit(conn) => !conn.closed.swap(true, Ordering::AcqRel),
        }
    }
}

pub struct RemoteConnection {
    route: NodeAddr,
    uid: ExchangeUid,
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

impl RemoteConnection {
    /// Connects to a peer's distributer and identifies the exchange the
    /// connection belongs to.
    pub(crate) async fn dial(
        uid: ExchangeUid,
        route: &str,
        this_node: &str,
        dial_timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let dial_error = |source| ExchangeError::Dial {
            addr: route.to_string(),
            source,
        };

        let mut stream = tokio::time::timeout(dial_timeout, TcpStream::connect(route))
            .await
            .map_err(|_| ExchangeError::DialTimeout {
                addr: route.to_string(),
            })?
            .map_err(dial_error)?;

        stream.set_nodelay(true).map_err(dial_error)?;
        stream
            .write_all(&handshake_frame(uid, this_node)?)
            .await
            .map_err(dial_error)?;

        trace!(uid = %uid, addr = %route, "Connected to peer.");

        Ok(Self {
            route: route.to_string(),
            uid,
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        })
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), ExchangeError> {
        let mut lock = self.stream.lock().await;
        let stream = lock.as_mut().ok_or(ExchangeError::Closed)?;
        stream.write_all(frame).await?;
        Ok(())
    }

    async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.shutdown().await {
                debug!(uid = %self.uid, addr = %self.route, error = ?e, "Failed to shut down connection.");
            }
        }

        true
    }

    fn abort(&mut self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.stream.get_mut().take();
        true
    }
}

pub struct ShortCircuit {
    route: NodeAddr,
    tx: Sender<Inbound>,
    closed: AtomicBool,
}

impl ShortCircuit {
    fn deliver(&self, event: Inbound) -> Result<(), ExchangeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExchangeError::Closed);
        }

        self.tx.send(event).map_err(|_| ExchangeError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use ep_data::Column;
    use tokio::net::TcpListener;

    use super::*;
    use crate::frame::{Frame, FrameReader};

    #[tokio::test]
    async fn test_short_circuit_passes_batches_through() {
        let (tx, rx) = flume::unbounded();
        let conn = Connection::short_circuit("127.0.0.1:5551".to_string(), tx);
        assert!(conn.is_short_circuit());

        let batch = Dataset::new(vec![Column::integers(vec![1, 2])]).unwrap();
        conn.send_batch(batch.clone()).await.unwrap();
        conn.send_eof().await.unwrap();

        match rx.recv_async().await.unwrap() {
            Inbound::Batch { from, batch: received } => {
                assert_eq!(from, "127.0.0.1:5551");
                assert_eq!(received, batch);
            },
            other => panic!("Expected a batch, got {:?}", other),
        }
        assert!(matches!(rx.recv_async().await.unwrap(), Inbound::Eof { .. }));

        assert!(conn.close().await);
        assert!(!conn.close().await, "Second close is a no-op");
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_batch(batch).await,
            Err(ExchangeError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_remote_connection_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let uid = ExchangeUid::generate();

        let dial = RemoteConnection::dial(uid, &addr, "node-a", Duration::from_secs(1));
        let (conn, accepted) = tokio::join!(dial, listener.accept());
        let conn = Connection::Remote(conn.unwrap());
        let (stream, _) = accepted.unwrap();
        assert_eq!(conn.route(), addr);

        conn.send_eof().await.unwrap();
        assert!(conn.close().await);
        assert!(matches!(conn.send_eof().await, Err(ExchangeError::Closed)));

        let mut reader = FrameReader::new(stream);
        match reader.next_frame().await.unwrap() {
            Some((received_uid, Frame::Handshake(handshake))) => {
                assert_eq!(received_uid, uid);
                assert_eq!(handshake.from, "node-a");
            },
            other => panic!("Expected a handshake, got {:?}", other),
        }
        assert!(matches!(reader.next_frame().await.unwrap(), Some((_, Frame::Eof))));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let addr = test_helper::get_unused_addr().to_string();
        let err = RemoteConnection::dial(
            ExchangeUid::generate(),
            &addr,
            "node-a",
            Duration::from_secs(1),
        )
        .await
        .err()
        .expect("Nothing is listening");

        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
        assert!(err.to_string().starts_with(&format!("dial {addr}: ")));
    }
    #[tokio::test]
    async fn test_dial_timeout() {
        let listener = test_helper::full_listener().await;
        let addr = listener.local_addr().to_string();

        let err = RemoteConnection::dial(
            ExchangeUid::generate(),
            &addr,
            "node-a",
            Duration::from_millis(100),
        )
        .await
        .err()
        .expect("Connection attempt never completes");

        assert!(matches!(err, ExchangeError::DialTimeout { addr: ref timed_out } if timed_out == &addr));
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::TimedOut));
        assert_eq!(err.to_string(), format!("dial {addr}: timed out"));
    }
}
