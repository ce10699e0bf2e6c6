//! UDP transparent proxy
//!
//! Datagrams arrive on a TPROXY listener carrying their original destination
//! in ancillary data. Each client endpoint gets its own association with an
//! upstream socket; replies are sent back from a socket bound to the original
//! destination so the client never notices the relay.

use std::{
    io::{self, Cursor, ErrorKind},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut, BufMut};
use log::{debug, error, info, trace, warn};
use lru_time_cache::LruCache;
use tokio::{
    io::AsyncReadExt,
    net::UdpSocket,
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    config::{ProxyProtocol, ProxySettings},
    proxy::{self, socks5::{Address, UdpAssociateHeader}},
    redir::to_ipv4_mapped,
    DEFAULT_UDP_EXPIRY_DURATION,
};

use self::sys::UdpRedirSocket;

pub(crate) mod sys;

/// Maximum UDP datagram payload this relay will carry
pub const MAXIMUM_UDP_PAYLOAD_SIZE: usize = 65536;

/// Redirected UDP server instance
pub struct UdpRedirServer {
    settings: Arc<ProxySettings>,
    time_to_live: Option<Duration>,
}

impl UdpRedirServer {
    pub fn new(settings: Arc<ProxySettings>, time_to_live: Option<Duration>) -> UdpRedirServer {
        UdpRedirServer { settings, time_to_live }
    }

    /// Start serving
    pub async fn run(&self, listen_port: u16) -> io::Result<()> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listen_port);
        let listener = UdpRedirSocket::listen(bind_addr)?;

        let local_addr = listener.local_addr()?;
        info!(
            "transproxify UDP redirect ({}) listening on {}",
            self.settings.proxy_protocol, local_addr
        );

        let manager = UdpAssociationManager::new(self.settings.clone(), self.time_to_live);

        let mut pkt_buf = [0u8; MAXIMUM_UDP_PAYLOAD_SIZE];
        loop {
            let (recv_len, peer_addr, mut dst) = match listener.recv_dest_from(&mut pkt_buf).await {
                Ok(o) => o,
                Err(err) => {
                    error!("recv_dest_from failed with error: {}", err);
                    continue;
                }
            };

            if recv_len == 0 {
                continue;
            }

            // Try to convert IPv4 mapped IPv6 address for dual-stack mode.
            if let SocketAddr::V6(ref a) = dst {
                if let Some(v4) = to_ipv4_mapped(a.ip()) {
                    dst = SocketAddr::new(IpAddr::from(v4), a.port());
                }
            }

            let pkt = &pkt_buf[..recv_len];

            trace!(
                "received UDP packet from {}, destination {}, length {} bytes",
                peer_addr,
                dst,
                recv_len
            );

            if let Err(err) = manager.send_to(peer_addr, dst, pkt).await {
                error!(
                    "udp packet relay {} -> {} with {} bytes failed, error: {}",
                    peer_addr,
                    dst,
                    pkt.len(),
                    err
                );
            }
        }
    }
}

type AssociationMap = LruCache<SocketAddr, UdpAssociation>;

/// UDP association manager
///
/// Keeps at most one association per client endpoint, evicting those idle
/// for longer than the configured expiry.
pub struct UdpAssociationManager {
    settings: Arc<ProxySettings>,
    assoc_map: Arc<Mutex<AssociationMap>>,
    cleanup_abortable: JoinHandle<()>,
    keepalive_abortable: JoinHandle<()>,
    keepalive_tx: mpsc::Sender<SocketAddr>,
}

impl Drop for UdpAssociationManager {
    fn drop(&mut self) {
        self.cleanup_abortable.abort();
        self.keepalive_abortable.abort();
    }
}

impl UdpAssociationManager {
    pub fn new(settings: Arc<ProxySettings>, time_to_live: Option<Duration>) -> UdpAssociationManager {
        let time_to_live = time_to_live.unwrap_or(DEFAULT_UDP_EXPIRY_DURATION);
        let assoc_map = Arc::new(Mutex::new(LruCache::with_expiry_duration(time_to_live)));

        let cleanup_abortable = {
            let assoc_map = assoc_map.clone();
            tokio::spawn(async move {
                loop {
                    time::sleep(time_to_live / 4).await;

                    // cleanup expired associations. iter() will remove expired elements
                    let _ = assoc_map.lock().await.iter();
                }
            })
        };

        let (keepalive_tx, mut keepalive_rx) = mpsc::channel(256);

        let keepalive_abortable = {
            let assoc_map = assoc_map.clone();
            tokio::spawn(async move {
                while let Some(peer_addr) = keepalive_rx.recv().await {
                    assoc_map.lock().await.get(&peer_addr);
                }
            })
        };

        UdpAssociationManager {
            settings,
            assoc_map,
            cleanup_abortable,
            keepalive_abortable,
            keepalive_tx,
        }
    }

    /// Sends `data` from `peer_addr` to `target_addr`
    pub async fn send_to(&self, peer_addr: SocketAddr, target_addr: SocketAddr, data: &[u8]) -> io::Result<()> {
        let mut assoc_map = self.assoc_map.lock().await;

        if let Some(assoc) = assoc_map.get(&peer_addr) {
            if assoc.original_destination == target_addr {
                match assoc.try_send(Bytes::copy_from_slice(data)) {
                    Ok(()) => return Ok(()),
                    Err(mpsc::error::TrySendError::Full(..)) => {
                        let err = io::Error::new(ErrorKind::Other, "udp relay channel full");
                        return Err(err);
                    }
                    Err(mpsc::error::TrySendError::Closed(..)) => {
                        trace!("udp association for {} is defunct, recreating", peer_addr);
                    }
                }
            } else {
                trace!(
                    "udp association for {} destination changed {} -> {}",
                    peer_addr,
                    assoc.original_destination,
                    target_addr
                );
            }

            assoc_map.remove(&peer_addr);
        }

        let assoc = UdpAssociation::new(
            self.settings.clone(),
            peer_addr,
            target_addr,
            self.keepalive_tx.clone(),
        );

        trace!("created udp association for {} -> {}", peer_addr, target_addr);

        assoc
            .try_send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(ErrorKind::Other, "udp relay channel full"))?;
        assoc_map.insert(peer_addr, assoc);

        Ok(())
    }
}

struct UdpAssociation {
    original_destination: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    abortable: JoinHandle<()>,
}

impl Drop for UdpAssociation {
    fn drop(&mut self) {
        self.abortable.abort();
    }
}

impl UdpAssociation {
    fn new(
        settings: Arc<ProxySettings>,
        peer_addr: SocketAddr,
        original_destination: SocketAddr,
        keepalive_tx: mpsc::Sender<SocketAddr>,
    ) -> UdpAssociation {
        // Pending packets 1024 should be good enough.
        // If there are plenty of packets stuck in the channel, dropping excessive packets is a good way to protect the server from
        // being OOM.
        let (sender, receiver) = mpsc::channel(1024);

        let context = UdpAssociationContext {
            settings,
            peer_addr,
            original_destination,
            keepalive_tx,
        };
        let abortable = tokio::spawn(context.dispatch(receiver));

        UdpAssociation {
            original_destination,
            sender,
            abortable,
        }
    }

    fn try_send(&self, data: Bytes) -> Result<(), mpsc::error::TrySendError<Bytes>> {
        self.sender.try_send(data)
    }
}

struct UdpAssociationContext {
    settings: Arc<ProxySettings>,
    peer_addr: SocketAddr,
    original_destination: SocketAddr,
    keepalive_tx: mpsc::Sender<SocketAddr>,
}

impl UdpAssociationContext {
    async fn dispatch(self, receiver: mpsc::Receiver<Bytes>) {
        let result = match self.settings.proxy_protocol {
            ProxyProtocol::Direct => self.dispatch_direct(receiver).await,
            ProxyProtocol::Socks5 => self.dispatch_socks5(receiver).await,
            protocol => {
                error!("udp association cannot relay through a {} proxy", protocol);
                return;
            }
        };

        match result {
            Ok(()) => trace!("udp association for {} closed", self.peer_addr),
            Err(err) => debug!("udp association for {} closed, error: {}", self.peer_addr, err),
        }
    }

    async fn dispatch_direct(&self, mut receiver: mpsc::Receiver<Bytes>) -> io::Result<()> {
        let socket = match self.original_destination {
            SocketAddr::V4(..) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
            SocketAddr::V6(..) => UdpSocket::bind((std::net::Ipv6Addr::UNSPECIFIED, 0)).await?,
        };

        let mut buf = [0u8; MAXIMUM_UDP_PAYLOAD_SIZE];
        loop {
            tokio::select! {
                data = receiver.recv() => {
                    let Some(data) = data else { break };
                    let n = socket.send_to(&data, self.original_destination).await?;
                    if n != data.len() {
                        warn!(
                            "udp relay {} -> {} sent {} bytes of {}",
                            self.peer_addr,
                            self.original_destination,
                            n,
                            data.len()
                        );
                    }
                }
                recv_result = socket.recv_from(&mut buf) => {
                    let (n, src) = recv_result?;
                    self.respond(src, &buf[..n]).await;
                }
            }
        }

        Ok(())
    }

    async fn dispatch_socks5(&self, mut receiver: mpsc::Receiver<Bytes>) -> io::Result<()> {
        let associate = time::timeout(proxy::DEFAULT_HANDSHAKE_TIMEOUT, proxy::udp_associate(&self.settings)).await;
        let (mut control, relay_addr) = match associate {
            Ok(Ok(a)) => a,
            Ok(Err(err)) => return Err(err.into()),
            Err(..) => {
                let err = io::Error::new(ErrorKind::TimedOut, "udp associate handshake timed out");
                return Err(err);
            }
        };

        let socket = match relay_addr {
            Address::SocketAddress(SocketAddr::V6(..)) => UdpSocket::bind((std::net::Ipv6Addr::UNSPECIFIED, 0)).await?,
            _ => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
        };
        match relay_addr {
            Address::SocketAddress(sa) => socket.connect(sa).await?,
            Address::DomainNameAddress(ref dname, port) => socket.connect((dname.as_str(), port)).await?,
        }

        let mut buf = [0u8; MAXIMUM_UDP_PAYLOAD_SIZE];
        let mut control_buf = [0u8; 64];
        loop {
            tokio::select! {
                data = receiver.recv() => {
                    let Some(data) = data else { break };

                    let header = UdpAssociateHeader::new(0, Address::from(self.original_destination));
                    let mut send_buf = BytesMut::with_capacity(header.serialized_len() + data.len());
                    header.write_to_buf(&mut send_buf);
                    send_buf.put_slice(&data);

                    socket.send(&send_buf).await?;
                }
                recv_result = socket.recv(&mut buf) => {
                    let n = recv_result?;
                    self.relay_framed_response(&buf[..n]).await;
                }
                read_result = control.read(&mut control_buf) => {
                    match read_result {
                        Ok(0) => {
                            trace!("udp association for {} terminated by proxy", self.peer_addr);
                            break;
                        }
                        Ok(..) => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Ok(())
    }

    /// Strip the SOCKS5 datagram header and forward the payload to the client
    async fn relay_framed_response(&self, pkt: &[u8]) {
        let mut cur = Cursor::new(pkt);

        let header = match UdpAssociateHeader::read_from(&mut cur).await {
            Ok(h) => h,
            Err(err) => {
                warn!("udp relay for {} received malformed datagram, error: {}", self.peer_addr, err);
                return;
            }
        };

        if header.frag != 0 {
            trace!("dropped fragmented udp datagram, frag {}", header.frag);
            return;
        }

        let payload = &pkt[cur.position() as usize..];

        let src = match header.address {
            Address::SocketAddress(sa) => sa,
            Address::DomainNameAddress(..) => {
                warn!(
                    "udp relay for {} received datagram from domain name source {}, dropped",
                    self.peer_addr, header.address
                );
                return;
            }
        };

        self.respond(src, payload).await;
    }

    /// Send a reply datagram back to the client, spoofing `src` as source
    async fn respond(&self, mut src: SocketAddr, data: &[u8]) {
        if let SocketAddr::V6(ref a) = src {
            if let Some(v4) = to_ipv4_mapped(a.ip()) {
                src = SocketAddr::new(IpAddr::from(v4), a.port());
            }
        }

        // Create a socket binds to the original destination addr
        // This only works for systems that supports binding to non-local addresses
        let inbound = match UdpRedirSocket::bind_nonlocal(src) {
            Ok(s) => s,
            Err(err) => {
                error!(
                    "udp relay {} <- {} failed to bind respond socket, error: {}",
                    self.peer_addr, src, err
                );
                return;
            }
        };

        match inbound.send_to(data, self.peer_addr).await {
            Ok(n) => {
                if n < data.len() {
                    warn!(
                        "udp relay {} <- {} sent {} bytes of {}",
                        self.peer_addr,
                        src,
                        n,
                        data.len()
                    );
                }

                trace!(
                    "udp relay {} <- {} sent back {} bytes",
                    self.peer_addr,
                    src,
                    n
                );
            }
            Err(err) => {
                warn!("udp relay {} <- {} send failed, error: {}", self.peer_addr, src, err);
            }
        }

        let _ = self.keepalive_tx.try_send(self.peer_addr);
    }
}
