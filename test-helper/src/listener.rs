use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

const FILL_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_FILL_CONNECTIONS: usize = 64;

/// A listener which never accepts, with its accept queue filled up.
///
/// New connection attempts to its address stay pending until they time out.
pub struct FullListener {
    listener: TcpListener,
    _queued: Vec<TcpStream>,
}

impl FullListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }
}

/// Binds a listener with the smallest possible backlog and connects to it
/// until a connection attempt stalls.
pub async fn full_listener() -> FullListener {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..MAX_FILL_CONNECTIONS {
        match tokio::time::timeout(FILL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => {
                return FullListener {
                    listener,
                    _queued: queued,
                }
            },
        }
    }

    panic!("Accept queue of {} never filled up", addr);
}
