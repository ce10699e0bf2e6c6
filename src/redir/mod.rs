//! Transparent proxy servers for firewall-redirected traffic

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket};

pub mod tcprelay;
pub mod udprelay;

/// Extension trait for binding listeners that accept redirected connections
#[async_trait]
pub trait TcpListenerRedirExt {
    async fn bind_redir(addr: SocketAddr) -> io::Result<TcpListener>;
}

#[async_trait]
impl TcpListenerRedirExt for TcpListener {
    async fn bind_redir(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = match addr {
            SocketAddr::V4(..) => TcpSocket::new_v4()?,
            SocketAddr::V6(..) => TcpSocket::new_v6()?,
        };

        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;

        // listen backlogs = 1024 as mio's default
        socket.listen(1024)
    }
}

/// Extension trait for recovering the pre-redirect destination of an
/// accepted connection
pub trait TcpStreamRedirExt {
    fn destination_addr(&self) -> io::Result<SocketAddr>;
}

/// Helper function for converting IPv4 mapped IPv6 address
pub(crate) fn to_ipv4_mapped(ipv6: &Ipv6Addr) -> Option<Ipv4Addr> {
    match ipv6.octets() {
        [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, a, b, c, d] => Some(Ipv4Addr::new(a, b, c, d)),
        _ => None,
    }
}

pub use self::tcprelay::RedirTcpServer;
pub use self::udprelay::UdpRedirServer;
