//! TCP transparent proxy

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, trace};
use tokio::{
    io::copy_bidirectional,
    net::{TcpListener, TcpStream},
    time,
};

use crate::{
    config::ProxySettings,
    proxy,
    redir::{to_ipv4_mapped, TcpListenerRedirExt, TcpStreamRedirExt},
};

pub(crate) mod sys;

/// Redirected TCP server instance
pub struct RedirTcpServer {
    settings: Arc<ProxySettings>,
    listener: TcpListener,
}

impl RedirTcpServer {
    pub async fn new(settings: Arc<ProxySettings>, listen_port: u16) -> io::Result<RedirTcpServer> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listen_port);
        let listener = TcpListener::bind_redir(bind_addr).await?;
        Ok(RedirTcpServer { settings, listener })
    }

    /// Get server local address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start serving
    pub async fn run(self) -> io::Result<()> {
        let actual_local_addr = self.listener.local_addr()?;

        info!(
            "transproxify TCP redirect ({}) listening on {}",
            self.settings.proxy_protocol, actual_local_addr
        );

        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(s) => s,
                Err(err) => {
                    error!("accept failed with error: {}", err);
                    time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            trace!("got connection {}", peer_addr);

            let settings = self.settings.clone();
            tokio::spawn(async move {
                let dst_addr = match socket.destination_addr() {
                    Ok(d) => d,
                    Err(err) => {
                        error!(
                            "TCP redirect couldn't get destination, peer: {}, error: {}",
                            peer_addr, err
                        );
                        return;
                    }
                };

                if let Err(err) = handle_redir_client(settings, socket, peer_addr, dst_addr).await {
                    debug!("TCP redirect client, error: {:?}", err);
                }
            });
        }
    }
}

async fn handle_redir_client(
    settings: Arc<ProxySettings>,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    mut daddr: SocketAddr,
) -> io::Result<()> {
    // Try to convert IPv4 mapped IPv6 address for dual-stack mode.
    if let SocketAddr::V6(ref a) = daddr {
        if let Some(v4) = to_ipv4_mapped(a.ip()) {
            daddr = SocketAddr::new(IpAddr::from(v4), a.port());
        }
    }

    let mut remote = match time::timeout(proxy::DEFAULT_HANDSHAKE_TIMEOUT, proxy::connect(&settings, daddr)).await {
        Ok(Ok(remote)) => remote,
        Ok(Err(err)) => {
            error!(
                "TCP redirect {} -> {} handshake failed, error: {}",
                peer_addr, daddr, err
            );
            return Ok(());
        }
        Err(..) => {
            error!("TCP redirect {} -> {} handshake timed out", peer_addr, daddr);
            return Ok(());
        }
    };

    establish_tcp_tunnel(&mut stream, &mut remote, peer_addr, daddr).await
}

async fn establish_tcp_tunnel(
    plain: &mut TcpStream,
    remote: &mut TcpStream,
    peer_addr: SocketAddr,
    target_addr: SocketAddr,
) -> io::Result<()> {
    debug!("established tcp tunnel {} <-> {}", peer_addr, target_addr);

    match copy_bidirectional(plain, remote).await {
        Ok((rn, wn)) => {
            trace!(
                "tcp tunnel {} <-> {} closed, L2R {} bytes, R2L {} bytes",
                peer_addr,
                target_addr,
                rn,
                wn
            );
        }
        Err(err) => {
            trace!(
                "tcp tunnel {} <-> {} closed with error: {}",
                peer_addr,
                target_addr,
                err
            );
        }
    }

    Ok(())
}
