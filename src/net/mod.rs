//! Thin abstractions over `TcpListener`/`TcpStream` so the connection
//! pipeline can run against either `mio`'s non-blocking sockets or, in tests,
//! `std`'s blocking ones. `bind_reuseport` is the one piece of concrete
//! platform logic: binding one socket per NUMA node on the same address with
//! `SO_REUSEPORT` so the kernel load-balances accepts across listener
//! threads.

pub mod tcp_listener;
pub mod tcp_stream;

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

/// Binds a non-blocking TCP listening socket with `SO_REUSEADDR` and, on
/// platforms that support it, `SO_REUSEPORT`, so multiple listener threads
/// can each own an independent socket bound to the same address.
pub fn bind_reuseport(addr: SocketAddr, backlog: i32) -> io::Result<mio::net::TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(target_os = "solaris")))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    mio::net::TcpListener::from_std(socket.into())
}
