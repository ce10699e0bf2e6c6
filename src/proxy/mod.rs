//! Upstream proxy handshake engines
//!
//! Each engine speaks the bytes needed to instruct the configured upstream
//! proxy about the intended target before any application payload flows.
//! [`connect`] dispatches on the configured protocol and returns a stream
//! ready for payload.

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    time::Duration,
};

use log::trace;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::{ProxyProtocol, ProxySettings, ServerAddr};

pub mod http;
pub mod socks4;
pub mod socks5;

/// Time budget for connecting to the proxy and completing its handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream proxy refused the session or violated its protocol
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Socks4(#[from] socks4::Error),
    #[error("{0}")]
    Socks5(#[from] socks5::Error),
    #[error("proxy rejected CONNECT, status line {0:?}")]
    HttpRejected(String),
    #[error("proxy accepted none of the offered authentication methods")]
    NoAcceptableMethod,
    #[error("proxy rejected username/password authentication, status {0:#x}")]
    AuthFailed(u8),
    #[error("target {0} cannot be reached through a socks4 proxy")]
    UnsupportedTarget(SocketAddr),
}

impl From<HandshakeError> for io::Error {
    fn from(err: HandshakeError) -> io::Error {
        match err {
            HandshakeError::Io(err) => err,
            e => io::Error::new(ErrorKind::Other, e),
        }
    }
}

/// Open a TCP session to `target` through the configured proxy
///
/// On success the returned stream tunnels application payload verbatim.
pub async fn connect(settings: &ProxySettings, target: SocketAddr) -> Result<TcpStream, HandshakeError> {
    match settings.proxy_protocol {
        ProxyProtocol::Direct => {
            let stream = TcpStream::connect(target).await?;
            trace!("connected directly to {}", target);
            Ok(stream)
        }
        ProxyProtocol::Http => {
            let mut stream = connect_proxy(settings).await?;
            http::handshake(&mut stream, target, settings).await?;
            trace!("established CONNECT tunnel to {} via {}", target, settings.proxy_addr);
            Ok(stream)
        }
        ProxyProtocol::Socks4 => {
            let mut stream = connect_proxy(settings).await?;
            socks4::handshake(&mut stream, target, settings).await?;
            trace!("established socks4 tunnel to {} via {}", target, settings.proxy_addr);
            Ok(stream)
        }
        ProxyProtocol::Socks5 => {
            let mut stream = connect_proxy(settings).await?;
            socks5::handshake(&mut stream, target, settings).await?;
            trace!("established socks5 tunnel to {} via {}", target, settings.proxy_addr);
            Ok(stream)
        }
    }
}

/// Establish a SOCKS5 UDP association
///
/// Returns the control stream, which has to stay open for the lifetime of
/// the association, and the relay endpoint framed datagrams are exchanged
/// with.
pub async fn udp_associate(settings: &ProxySettings) -> Result<(TcpStream, socks5::Address), HandshakeError> {
    let mut stream = connect_proxy(settings).await?;
    let relay_addr = socks5::handshake_udp_associate(&mut stream, settings).await?;
    trace!("established udp association via {}, relay {}", settings.proxy_addr, relay_addr);
    Ok((stream, relay_addr))
}

async fn connect_proxy(settings: &ProxySettings) -> io::Result<TcpStream> {
    match settings.proxy_addr {
        ServerAddr::SocketAddr(saddr) => TcpStream::connect(saddr).await,
        ServerAddr::DomainName(ref dname, port) => TcpStream::connect((dname.as_str(), port)).await,
    }
}
