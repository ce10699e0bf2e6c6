use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
};

fn not_supported() -> Error {
    Error::new(
        ErrorKind::Unsupported,
        "udp transparent proxying is not supported on this platform",
    )
}

/// UDP socket for accepting TPROXY-redirected datagrams
///
/// Not available on this platform.
pub struct UdpRedirSocket;

impl UdpRedirSocket {
    pub fn listen(_addr: SocketAddr) -> io::Result<UdpRedirSocket> {
        Err(not_supported())
    }

    pub fn bind_nonlocal(_addr: SocketAddr) -> io::Result<UdpRedirSocket> {
        Err(not_supported())
    }

    pub async fn send_to(&self, _buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        Err(not_supported())
    }

    pub async fn recv_dest_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr, SocketAddr)> {
        Err(not_supported())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(not_supported())
    }
}
