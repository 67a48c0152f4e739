use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::io;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use ep_data::Dataset;
use flume::{Receiver, Sender};
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::frame::{Frame, FrameReader};
use crate::{ExchangeError, ExchangeUid, NodeAddr};

/// How long a new connection has to identify itself.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a mailbox for an exchange which has not registered is kept
/// after the last connection attached to it.
pub const PENDING_MAILBOX_TTL: Duration = Duration::from_secs(60);
/// How long handshakes for a released exchange are refused.
pub const RELEASED_UID_TTL: Duration = Duration::from_secs(10 * 60);
const RELEASED_UID_CAPACITY: u64 = 100_000;
const EXPIRY_INTERVAL: Duration = Duration::from_millis(500);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// An event delivered to the exchange owning a mailbox.
#[derive(Debug)]
pub(crate) enum Inbound {
    Batch { from: NodeAddr, batch: Dataset },
    Eof { from: NodeAddr },
    Disconnected { from: NodeAddr, reason: String },
}

#[derive(Clone)]
/// The per-node network endpoint exchanges receive their data through.
///
/// The distributer owns the node's listening socket. Every connection a peer
/// opens starts with a handshake naming the [ExchangeUid] it belongs to, the
/// distributer then forwards everything read from that connection into the
/// mailbox of the matching exchange. Connections for exchanges which have not
/// registered yet are held in their mailbox until the exchange registers, the
/// mailbox expires or the distributer is closed. Handshakes for an exchange
/// which has already been released are refused.
///
/// This handle is cheap to clone.
pub struct Distributer(Arc<DistributerInner>);

impl Distributer {
    /// Binds a listener to the given address and starts the distributer.
    pub async fn bind(address: impl Into<NodeAddr>) -> io::Result<Self> {
        let address = address.into();
        let listener = TcpListener::bind(address.as_str()).await?;
        Self::new(address, listener)
    }

    /// Starts a distributer accepting connections from an already bound listener.
    ///
    /// The accept loop is spawned immediately and runs until [Distributer::close]
    /// is called or the last handle is dropped.
    pub fn new(address: impl Into<NodeAddr>, listener: TcpListener) -> io::Result<Self> {
        Self::with_pending_ttl(address, listener, PENDING_MAILBOX_TTL)
    }

    /// Starts a distributer which drops the mailbox of an exchange that has
    /// not registered once no connection has attached to it for `pending_ttl`.
    pub fn with_pending_ttl(
        address: impl Into<NodeAddr>,
        listener: TcpListener,
        pending_ttl: Duration,
    ) -> io::Result<Self> {
        let address = address.into();
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(Mutex::new(Registry::new(pending_ttl)));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(accept_connections(
            listener,
            registry.clone(),
            shutdown_rx,
        ));

        info!(address = %address, local_addr = %local_addr, "Distributer is listening.");

        Ok(Self(Arc::new(DistributerInner {
            address,
            local_addr,
            registry,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })))
    }
}

impl Deref for Distributer {
    type Target = DistributerInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Debug for Distributer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributer")
            .field("address", &self.address)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct DistributerInner {
    address: NodeAddr,
    local_addr: SocketAddr,
    registry: Arc<Mutex<Registry>>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DistributerInner {
    /// The address the distributer was created with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The number of exchanges currently registered.
    pub fn num_registered(&self) -> usize {
        self.registry.lock().num_claimed()
    }

    /// The number of exchanges peers have sent data for which have not
    /// registered yet.
    pub fn num_pending(&self) -> usize {
        let registry = self.registry.lock();
        registry.mailboxes.len() - registry.num_claimed()
    }

    /// Stops accepting connections and releases the listening socket.
    ///
    /// Any held connections and registered mailboxes are dropped.
    /// Closing an already closed distributer does nothing.
    pub async fn close(&self) -> io::Result<()> {
        self.shutdown.send_replace(true);
        self.registry.lock().close();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(address = %self.address, error = ?e, "Distributer accept loop failed.");
                return Err(io::Error::new(io::ErrorKind::Other, e.to_string()));
            }
            info!(address = %self.address, "Distributer closed.");
        }

        Ok(())
    }

    /// Registers an exchange, returning the mailbox its inbound data is
    /// delivered to.
    ///
    /// The exchange is deregistered once the returned [Registration] is dropped.
    pub(crate) fn register(&self, uid: ExchangeUid) -> Result<Registration, ExchangeError> {
        let (tx, rx) = self.registry.lock().claim(uid)?;
        debug!(uid = %uid, address = %self.address, "Registered exchange.");
        Ok(Registration {
            uid,
            tx,
            rx,
            registry: self.registry.clone(),
        })
    }
}

impl Drop for DistributerInner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// A live registration of an exchange with a distributer.
pub(crate) struct Registration {
    uid: ExchangeUid,
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
    registry: Arc<Mutex<Registry>>,
}

impl Registration {
    /// A sender delivering straight into this exchange's own mailbox.
    pub(crate) fn sender(&self) -> Sender<Inbound> {
        self.tx.clone()
    }

    /// Waits for the next inbound event.
    pub(crate) async fn recv(&self) -> Option<Inbound> {
        self.rx.recv_async().await.ok()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().release(self.uid);
        trace!(uid = %self.uid, "Released exchange mailbox.");
    }
}

struct Mailbox {
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
    claimed: bool,
    last_attached: Instant,
}

impl Mailbox {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            claimed: false,
            last_attached: Instant::now(),
        }
    }
}

/// Why an inbound connection could not be attached to a mailbox.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Refused {
    Closed,
    Released,
}

/// The UID to mailbox mapping shared between the accept loop and exchanges.
struct Registry {
    closed: bool,
    pending_ttl: Duration,
    mailboxes: HashMap<ExchangeUid, Mailbox>,
    released: Cache<ExchangeUid, ()>,
}

impl Registry {
    fn new(pending_ttl: Duration) -> Self {
        let released = Cache::builder()
            .max_capacity(RELEASED_UID_CAPACITY)
            .time_to_live(RELEASED_UID_TTL)
            .build();

        Self {
            closed: false,
            pending_ttl,
            mailboxes: HashMap::new(),
            released,
        }
    }

    /// Gets the sender for the given exchange's mailbox, creating the mailbox
    /// if the exchange has not registered yet.
    fn sender(&mut self, uid: ExchangeUid) -> Result<Sender<Inbound>, Refused> {
        if self.closed {
            return Err(Refused::Closed);
        }

        if !self.mailboxes.contains_key(&uid) && self.released.contains_key(&uid) {
            return Err(Refused::Released);
        }

        let mailbox = self.mailboxes.entry(uid).or_insert_with(Mailbox::new);
        mailbox.last_attached = Instant::now();
        Ok(mailbox.tx.clone())
    }

    fn claim(
        &mut self,
        uid: ExchangeUid,
    ) -> Result<(Sender<Inbound>, Receiver<Inbound>), ExchangeError> {
        if self.closed {
            return Err(ExchangeError::DistributerClosed);
        }

        let mailbox = self.mailboxes.entry(uid).or_insert_with(Mailbox::new);
        if mailbox.claimed {
            return Err(ExchangeError::DuplicateUid(uid));
        }

        mailbox.claimed = true;
        self.released.invalidate(&uid);
        Ok((mailbox.tx.clone(), mailbox.rx.clone()))
    }

    fn release(&mut self, uid: ExchangeUid) {
        self.mailboxes.remove(&uid);
        self.released.insert(uid, ());
    }

    /// Drops the mailbox of an exchange which has not registered if nothing
    /// has been delivered to it yet.
    ///
    /// Returns `true` if the mailbox was dropped.
    fn discard_pending(&mut self, uid: ExchangeUid) -> bool {
        match self.mailboxes.get(&uid) {
            Some(mailbox) if !mailbox.claimed && mailbox.rx.is_empty() => {
                self.release(uid);
                true
            },
            _ => false,
        }
    }

    /// Drops every mailbox of an exchange which has not registered and
    /// which no connection has attached to for longer than the pending TTL.
    fn expire_pending(&mut self, now: Instant) -> usize {
        let pending_ttl = self.pending_ttl;
        let expired = self
            .mailboxes
            .iter()
            .filter(|(_, mailbox)| {
                !mailbox.claimed
                    && now.saturating_duration_since(mailbox.last_attached) >= pending_ttl
            })
            .map(|(uid, _)| *uid)
            .collect::<Vec<_>>();

        for uid in expired.iter() {
            self.release(*uid);
        }

        expired.len()
    }

    fn close(&mut self) {
        self.closed = true;
        self.mailboxes.clear();
        self.released.invalidate_all();
    }

    fn num_claimed(&self) -> usize {
        self.mailboxes
            .values()
            .filter(|mailbox| mailbox.claimed)
            .count()
    }
}

async fn accept_connections(
    listener: TcpListener,
    registry: Arc<Mutex<Registry>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut expiry = tokio::time::interval(EXPIRY_INTERVAL);
    expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            now = expiry.tick() => {
                let expired = registry.lock().expire_pending(now);
                if expired > 0 {
                    debug!(num_expired = expired, "Dropped expired pending mailboxes.");
                }
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    trace!(remote_addr = %remote_addr, "Accepted inbound connection.");
                    tokio::spawn(handle_connection(
                        stream,
                        remote_addr,
                        registry.clone(),
                        shutdown.clone(),
                    ));
                },
                Err(e) => {
                    warn!(error = ?e, "Failed to accept inbound connection.");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                },
            },
        }
    }

    debug!("Distributer stopped accepting connections.");
}

/// Reads the handshake of a new connection and forwards the rest of its
/// frames to the mailbox of the exchange it belongs to.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    registry: Arc<Mutex<Registry>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = FrameReader::new(stream);

    let handshake = tokio::select! {
        _ = shutdown.changed() => return,
        handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next_frame()) => handshake,
    };

    let (uid, from) = match handshake {
        Ok(Ok(Some((uid, Frame::Handshake(handshake))))) => (uid, handshake.from),
        Ok(Ok(Some((uid, frame)))) => {
            warn!(
                remote_addr = %remote_addr,
                uid = %uid,
                frame = ?frame,
                "Connection did not start with a handshake, dropping it."
            );
            return;
        },
        Ok(Ok(None)) => {
            debug!(remote_addr = %remote_addr, "Connection closed before the handshake.");
            return;
        },
        Ok(Err(e)) => {
            warn!(remote_addr = %remote_addr, error = ?e, "Failed to read handshake.");
            return;
        },
        Err(_) => {
            warn!(remote_addr = %remote_addr, "Timed out waiting for handshake.");
            return;
        },
    };

    let sender = registry.lock().sender(uid);
    let tx = match sender {
        Ok(tx) => tx,
        Err(Refused::Closed) => {
            warn!(
                remote_addr = %remote_addr,
                uid = %uid,
                "Distributer is closed, dropping connection."
            );
            return;
        },
        Err(Refused::Released) => {
            debug!(
                remote_addr = %remote_addr,
                uid = %uid,
                from = %from,
                "Exchange has already been released, dropping connection."
            );
            return;
        },
    };

    debug!(remote_addr = %remote_addr, uid = %uid, from = %from, "Connection attached to exchange.");

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return,
            frame = reader.next_frame() => frame,
        };

        let (event, done) = match frame {
            Ok(Some((frame_uid, _))) if frame_uid != uid => {
                let reason = format!("Received frame for exchange {frame_uid} on a connection for {uid}");
                (Inbound::Disconnected { from: from.clone(), reason }, true)
            },
            Ok(Some((_, Frame::Batch(batch)))) => (
                Inbound::Batch {
                    from: from.clone(),
                    batch,
                },
                false,
            ),
            Ok(Some((_, Frame::Eof))) => (Inbound::Eof { from: from.clone() }, true),
            Ok(Some((_, Frame::Handshake(_)))) => {
                let reason = "Received a second handshake".to_string();
                (Inbound::Disconnected { from: from.clone(), reason }, true)
            },
            Ok(None) => {
                let reason = "Connection closed before the end of the stream".to_string();
                (Inbound::Disconnected { from: from.clone(), reason }, true)
            },
            Err(e) => (
                Inbound::Disconnected {
                    from: from.clone(),
                    reason: e.to_string(),
                },
                true,
            ),
        };

        if let Inbound::Disconnected { reason, .. } = &event {
            warn!(uid = %uid, from = %from, reason = %reason, "Inbound connection failed.");

            if registry.lock().discard_pending(uid) {
                debug!(uid = %uid, from = %from, "Dropped pending mailbox of a failed exchange.");
                return;
            }
        }

        if tx.send(event).is_err() {
            debug!(uid = %uid, from = %from, "Exchange is gone, dropping connection.");
            return;
        }

        if done {
            return;
        }
    }
}
