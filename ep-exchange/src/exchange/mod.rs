mod init;
mod partition;

use std::fmt::{Debug, Formatter};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytecheck::CheckBytes;
use ep_data::Dataset;
use futures::future;
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

pub use self::partition::ENCODER_CACHE_CAPACITY;
use self::partition::Partitioner;
use crate::distributer::{Inbound, Registration};
use crate::{
    Encoder,
    ExchangeConfig,
    ExchangeError,
    ExchangeStatistics,
    ExchangeUid,
    HashRing,
    SCRATCH_SPACE,
};

#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
/// How a scatter exchange spreads batches over the nodes.
pub enum ScatterPolicy {
    #[default]
    /// Each batch goes to the next node in turn.
    ///
    /// The rotation covers every node of the exchange in topology order, so
    /// this node's own short-circuit takes its turn alongside the remote
    /// connections.
    RoundRobin,
    /// Every node receives a copy of every batch.
    Broadcast,
}

#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
/// The distribution strategy of an exchange.
pub enum ExchangeKind {
    /// Fans batches out to every node.
    Scatter(ScatterPolicy),
    /// Collects every batch on the master node.
    Gather,
    /// Sends every row to the node owning its key.
    Partition {
        /// The columns making up the key, all columns when empty.
        key_columns: Vec<u64>,
    },
}

impl ExchangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeKind::Scatter(_) => "scatter",
            ExchangeKind::Gather => "gather",
            ExchangeKind::Partition { .. } => "partition",
        }
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
/// Everything a peer needs to build its side of an exchange.
///
/// Every node of an exchange must run it with the same UID, the node planning
/// the exchange ships the descriptor to the others which rebuild it with
/// [Exchange::from_descriptor].
pub struct ExchangeDescriptor {
    pub uid: ExchangeUid,
    pub kind: ExchangeKind,
}

impl ExchangeDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExchangeError> {
        let bytes = rkyv::to_bytes::<_, SCRATCH_SPACE>(self)
            .map_err(|e| ExchangeError::Serialize(e.to_string()))?;
        Ok(bytes.into_vec())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ExchangeError> {
        let mut aligned = AlignedVec::with_capacity(buf.len());
        aligned.extend_from_slice(buf);
        rkyv::from_bytes::<Self>(&aligned)
            .map_err(|_| ExchangeError::Serialize("Invalid exchange descriptor".to_string()))
    }
}

enum State {
    Idle,
    Running(Box<Running>),
    Closed,
}

struct Running {
    encoders: Vec<Arc<Encoder>>,
    registration: Registration,
    router: Router,
    pending_eofs: AtomicUsize,
    finished: AtomicBool,
}

enum Router {
    Scatter {
        policy: ScatterPolicy,
        next: AtomicUsize,
    },
    Gather {
        master: usize,
    },
    Partition(Partitioner),
}

/// A stage moving batches between the nodes of a cluster.
///
/// An exchange is created on one node, shipped to the others as an
/// [ExchangeDescriptor] and then initialised on every node with the same
/// topology. Once running, batches given to [Exchange::send] are routed to
/// nodes according to the exchange's [ExchangeKind] and every node reads what
/// was routed to it with [Exchange::recv].
///
/// ```no_run
/// # use ep_data::{Column, Dataset};
/// # use ep_exchange::{Distributer, Exchange, ExchangeConfig};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let distributer = Distributer::bind("127.0.0.1:5551").await?;
/// let nodes = ["127.0.0.1:5551", "127.0.0.1:5552"];
/// let config = ExchangeConfig::new(distributer, nodes, nodes[0], nodes[0]);
///
/// let mut exchange = Exchange::partition([0]);
/// exchange.init(&config).await?;
///
/// let batch = Dataset::new(vec![Column::texts(["a", "b", "c"])])?;
/// exchange.encode_partition(&batch).await?;
/// exchange.finish().await?;
///
/// while let Some(batch) = exchange.recv().await? {
///     println!("Received {} rows", batch.len());
/// }
/// exchange.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Exchange {
    uid: ExchangeUid,
    kind: ExchangeKind,
    statistics: ExchangeStatistics,
    state: State,
}

impl Exchange {
    /// Creates a scatter exchange distributing batches round robin.
    pub fn scatter() -> Self {
        Self::scatter_with(ScatterPolicy::default())
    }

    /// Creates a scatter exchange with the given policy.
    pub fn scatter_with(policy: ScatterPolicy) -> Self {
        Self::with_kind(ExchangeKind::Scatter(policy))
    }

    /// Creates a gather exchange.
    pub fn gather() -> Self {
        Self::with_kind(ExchangeKind::Gather)
    }

    /// Creates a partition exchange keyed by the given columns.
    ///
    /// When no columns are given rows are keyed by all of their columns.
    pub fn partition(key_columns: impl IntoIterator<Item = usize>) -> Self {
        Self::with_kind(ExchangeKind::Partition {
            key_columns: key_columns.into_iter().map(|c| c as u64).collect(),
        })
    }

    /// Rebuilds an exchange shipped from another node.
    pub fn from_descriptor(descriptor: ExchangeDescriptor) -> Self {
        Self {
            uid: descriptor.uid,
            kind: descriptor.kind,
            statistics: ExchangeStatistics::default(),
            state: State::Idle,
        }
    }

    fn with_kind(kind: ExchangeKind) -> Self {
        Self::from_descriptor(ExchangeDescriptor {
            uid: ExchangeUid::generate(),
            kind,
        })
    }

    #[inline]
    pub fn uid(&self) -> ExchangeUid {
        self.uid
    }

    #[inline]
    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn descriptor(&self) -> ExchangeDescriptor {
        ExchangeDescriptor {
            uid: self.uid,
            kind: self.kind.clone(),
        }
    }

    /// Live statistics of the exchange.
    pub fn statistics(&self) -> ExchangeStatistics {
        self.statistics.clone()
    }

    /// The encoders of every node, in topology order.
    ///
    /// Empty unless the exchange is running.
    pub fn connections(&self) -> &[Arc<Encoder>] {
        match &self.state {
            State::Running(running) => &running.encoders,
            _ => &[],
        }
    }

    /// The hash ring of a running partition exchange.
    pub fn hash_ring(&self) -> Option<&HashRing> {
        match &self.state {
            State::Running(running) => match &running.router {
                Router::Partition(partitioner) => Some(partitioner.ring()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Connects the exchange to every node of the topology.
    ///
    /// If any peer cannot be reached every connection opened so far is closed
    /// again and the dial error is returned.
    pub async fn init(&mut self, config: &ExchangeConfig) -> Result<(), ExchangeError> {
        match self.state {
            State::Idle => {},
            State::Running(_) => return Err(ExchangeError::AlreadyInitialized),
            State::Closed => return Err(ExchangeError::Closed),
        }

        config.validate()?;
        let master = config.master_index().ok_or_else(|| {
            ExchangeError::InvalidConfig("Master node is not one of the exchange's nodes".into())
        })?;

        let registration = config.distributer.register(self.uid)?;
        let encoders = init::connect(self.uid, config, &registration, &self.statistics).await?;

        let router = match &self.kind {
            ExchangeKind::Scatter(policy) => Router::Scatter {
                policy: *policy,
                next: AtomicUsize::new(0),
            },
            ExchangeKind::Gather => Router::Gather { master },
            ExchangeKind::Partition { key_columns } => Router::Partition(Partitioner::new(
                key_columns.iter().map(|&c| c as usize).collect(),
                &config.all_nodes,
            )),
        };

        info!(
            uid = %self.uid,
            kind = self.kind.name(),
            this_node = %config.this_node,
            num_nodes = encoders.len(),
            "Exchange initialised."
        );

        self.state = State::Running(Box::new(Running {
            pending_eofs: AtomicUsize::new(encoders.len()),
            encoders,
            registration,
            router,
            finished: AtomicBool::new(false),
        }));

        Ok(())
    }

    /// Routes a batch according to the kind of the exchange.
    pub async fn send(&self, batch: Dataset) -> Result<(), ExchangeError> {
        let running = self.sending()?;
        match &running.router {
            Router::Scatter { .. } => self.encode_scatter(batch).await,
            Router::Gather { .. } => self.encode_gather(batch).await,
            Router::Partition(_) => self.encode_partition(&batch).await,
        }
    }

    /// Sends a batch to the next node, or to every node when broadcasting.
    pub async fn encode_scatter(&self, batch: Dataset) -> Result<(), ExchangeError> {
        let running = self.sending()?;
        let (policy, next) = match &running.router {
            Router::Scatter { policy, next } => (policy, next),
            _ => return Err(self.unsupported("encode_scatter")),
        };

        match policy {
            ScatterPolicy::RoundRobin => {
                let index = next.fetch_add(1, Ordering::Relaxed) % running.encoders.len();
                running.encoders[index].encode(batch).await
            },
            ScatterPolicy::Broadcast => {
                let sends = running
                    .encoders
                    .iter()
                    .map(|encoder| encoder.encode(batch.clone()));
                future::try_join_all(sends).await?;
                Ok(())
            },
        }
    }

    /// Sends a batch to the master node.
    pub async fn encode_gather(&self, batch: Dataset) -> Result<(), ExchangeError> {
        let running = self.sending()?;
        match &running.router {
            Router::Gather { master } => running.encoders[*master].encode(batch).await,
            _ => Err(self.unsupported("encode_gather")),
        }
    }

    /// Splits a batch by the key of each row and sends every part to the node
    /// owning its keys.
    pub async fn encode_partition(&self, batch: &Dataset) -> Result<(), ExchangeError> {
        let running = self.sending()?;
        let partitioner = match &running.router {
            Router::Partition(partitioner) => partitioner,
            _ => return Err(self.unsupported("encode_partition")),
        };

        partitioner.check_schema(batch)?;

        for (encoder, rows) in partitioner.group_rows(batch, &running.encoders)? {
            let part = if rows.len() == batch.len() {
                batch.clone()
            } else {
                batch.take(&rows)?
            };

            trace!(uid = %self.uid, route = %encoder.route(), num_rows = rows.len(), "Sending partition.");
            encoder.encode(part).await?;
        }

        Ok(())
    }

    /// The encoder of the node owning the given partition key.
    ///
    /// A key always resolves to the same encoder instance.
    pub fn partition_encoder(&self, key: &str) -> Result<Arc<Encoder>, ExchangeError> {
        let running = self.running()?;
        match &running.router {
            Router::Partition(partitioner) => {
                partitioner.encoder_for(key, &running.encoders)
            },
            _ => Err(self.unsupported("partition_encoder")),
        }
    }

    /// Tells every node this node will not send any more batches.
    ///
    /// Calling finish more than once does nothing.
    pub async fn finish(&self) -> Result<(), ExchangeError> {
        let running = self.running()?;
        if running.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let eofs = running.encoders.iter().map(|encoder| encoder.encode_eof());
        future::try_join_all(eofs).await?;

        debug!(uid = %self.uid, "Exchange finished sending.");
        Ok(())
    }

    /// Waits for the next batch sent to this node.
    ///
    /// Returns `None` once every node has finished sending. Batches are
    /// expected to be read by a single consumer.
    pub async fn recv(&self) -> Result<Option<Dataset>, ExchangeError> {
        let running = self.running()?;

        loop {
            if running.pending_eofs.load(Ordering::Acquire) == 0 {
                return Ok(None);
            }

            match running.registration.recv().await {
                Some(Inbound::Batch { batch, .. }) => {
                    self.statistics
                        .num_batches_received
                        .fetch_add(1, Ordering::Relaxed);
                    self.statistics
                        .num_rows_received
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    return Ok(Some(batch));
                },
                Some(Inbound::Eof { from }) => {
                    let remaining = running
                        .pending_eofs
                        .fetch_sub(1, Ordering::AcqRel)
                        .saturating_sub(1);
                    trace!(uid = %self.uid, from = %from, remaining = remaining, "Node finished sending.");
                },
                Some(Inbound::Disconnected { from, reason }) => {
                    return Err(ExchangeError::PeerDisconnected { from, reason });
                },
                None => return Err(ExchangeError::Closed),
            }
        }
    }

    /// Sends every batch of the input to the exchange and forwards every batch
    /// the exchange receives to the output.
    ///
    /// Finishes the exchange once the input is drained and returns once every
    /// node has finished sending.
    pub async fn run(
        &self,
        input: flume::Receiver<Dataset>,
        output: flume::Sender<Dataset>,
    ) -> Result<(), ExchangeError> {
        let send_all = async {
            while let Ok(batch) = input.recv_async().await {
                self.send(batch).await?;
            }
            self.finish().await
        };

        let receive_all = async {
            let mut forwarding = true;
            while let Some(batch) = self.recv().await? {
                if forwarding && output.send_async(batch).await.is_err() {
                    debug!(uid = %self.uid, "Exchange output was dropped, no longer forwarding batches.");
                    forwarding = false;
                }
            }
            Ok::<_, ExchangeError>(())
        };

        tokio::try_join!(send_all, receive_all)?;
        Ok(())
    }

    /// Closes every connection and releases the exchange's mailbox.
    ///
    /// Every later operation fails with [ExchangeError::Closed].
    pub async fn close(&mut self) -> Result<(), ExchangeError> {
        if let State::Running(running) = mem::replace(&mut self.state, State::Closed) {
            future::join_all(running.encoders.iter().map(|encoder| encoder.close())).await;
            info!(
                uid = %self.uid,
                num_batches_sent = self.statistics.num_batches_sent(),
                num_batches_received = self.statistics.num_batches_received(),
                "Exchange closed."
            );
        }

        Ok(())
    }

    fn running(&self) -> Result<&Running, ExchangeError> {
        match &self.state {
            State::Running(running) => Ok(running),
            State::Idle => Err(ExchangeError::NotInitialized),
            State::Closed => Err(ExchangeError::Closed),
        }
    }

    fn sending(&self) -> Result<&Running, ExchangeError> {
        let running = self.running()?;
        if running.finished.load(Ordering::Acquire) {
            return Err(ExchangeError::Finished);
        }
        Ok(running)
    }

    fn unsupported(&self, operation: &'static str) -> ExchangeError {
        ExchangeError::Unsupported {
            kind: self.kind.name(),
            operation,
        }
    }
}

impl Debug for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Idle => "idle",
            State::Running(_) => "running",
            State::Closed => "closed",
        };

        f.debug_struct("Exchange")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ep_data::Column;

    use super::*;

    #[test]
    fn test_descriptor_bytes() {
        let exchange = Exchange::partition([0, 2]);
        let descriptor = exchange.descriptor();

        let bytes = descriptor.to_bytes().unwrap();
        let decoded = ExchangeDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, descriptor);

        let rebuilt = Exchange::from_descriptor(decoded);
        assert_eq!(rebuilt.uid(), exchange.uid());
        assert_eq!(rebuilt.kind(), exchange.kind());

        assert!(ExchangeDescriptor::from_bytes(b"nonsense").is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let batch = Dataset::new(vec![Column::integers(vec![1])]).unwrap();

        let mut exchange = Exchange::gather();
        assert!(!exchange.is_running());
        assert!(exchange.connections().is_empty());
        assert!(matches!(exchange.recv().await, Err(ExchangeError::NotInitialized)));
        assert!(matches!(
            exchange.send(batch.clone()).await,
            Err(ExchangeError::NotInitialized)
        ));

        exchange.close().await.unwrap();
        assert!(matches!(exchange.finish().await, Err(ExchangeError::Closed)));

        let distributer = crate::Distributer::bind(test_helper::get_unused_addr().to_string())
            .await
            .unwrap();
        let this_node = distributer.address().to_string();
        let config = ExchangeConfig::new(distributer.clone(), [&this_node], &this_node, &this_node);
        assert!(matches!(exchange.init(&config).await, Err(ExchangeError::Closed)));

        let mut exchange = Exchange::gather();
        exchange.init(&config).await.unwrap();
        assert!(matches!(
            exchange.init(&config).await,
            Err(ExchangeError::AlreadyInitialized)
        ));
        assert!(matches!(
            exchange.encode_scatter(batch.clone()).await,
            Err(ExchangeError::Unsupported { kind: "gather", .. })
        ));
        assert!(matches!(
            exchange.partition_encoder("key"),
            Err(ExchangeError::Unsupported { .. })
        ));

        exchange.finish().await.unwrap();
        exchange.finish().await.expect("Finishing twice is a no-op");
        assert!(matches!(
            exchange.send(batch).await,
            Err(ExchangeError::Finished)
        ));

        exchange.close().await.unwrap();
        distributer.close().await.unwrap();
    }
}
