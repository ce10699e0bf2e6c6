//! Transproxify - transparent TCP/UDP proxy bridge
//!
//! Accepts traffic a host firewall has redirected to a local port, recovers
//! each client's original destination address and relays the session through
//! an upstream HTTP CONNECT, SOCKS4 or SOCKS5 proxy (or directly), all
//! transparent to the client.
//!
//! The operating system has to be configured to deliver redirected packets,
//! for example with `iptables -t nat ... -j REDIRECT` for TCP or a TPROXY
//! mangle rule for UDP. Transproxify never installs firewall rules itself.

use std::{io, sync::Arc, time::Duration};

use crate::{
    config::{ProxiedProtocol, ProxySettings},
    redir::{tcprelay::RedirTcpServer, udprelay::UdpRedirServer},
};

pub mod config;
pub mod proxy;
pub mod redir;
mod sys;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default time before an idle UDP session is evicted
pub const DEFAULT_UDP_EXPIRY_DURATION: Duration = Duration::from_secs(60);

/// Run the transparent proxy server until it fails or is aborted
///
/// `udp_expiry` overrides [`DEFAULT_UDP_EXPIRY_DURATION`] and is ignored for
/// TCP.
pub async fn run(settings: Arc<ProxySettings>, listen_port: u16, udp_expiry: Option<Duration>) -> io::Result<()> {
    match settings.proxied_protocol {
        ProxiedProtocol::Tcp => {
            let server = RedirTcpServer::new(settings, listen_port).await?;
            server.run().await
        }
        ProxiedProtocol::Udp => {
            let server = UdpRedirServer::new(settings, udp_expiry);
            server.run(listen_port).await
        }
    }
}
