use std::net::{SocketAddr, TcpListener};

/// Gets a new socket address allocated by the OS.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Gets `n` distinct socket addresses allocated by the OS.
///
/// All listeners are held until every address is allocated so the OS cannot
/// hand out the same port twice.
pub fn get_unused_addrs(n: usize) -> Vec<String> {
    let listeners = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect::<Vec<_>>();

    listeners
        .iter()
        .map(|listener| listener.local_addr().unwrap().to_string())
        .collect()
}
