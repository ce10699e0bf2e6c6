//! Proxy server settings
//!
//! Everything here is parsed and validated once at startup. The resulting
//! [`ProxySettings`] is shared read-only by every relay session.

use std::{
    fmt::{self, Display, Formatter},
    net::{IpAddr, Ipv6Addr, SocketAddr},
    str::FromStr,
};

use thiserror::Error;

/// Protocol spoken to the upstream proxy server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyProtocol {
    /// No proxy, connect straight to the target
    Direct,
    /// HTTP CONNECT tunnel
    Http,
    /// SOCKS Protocol Version 4
    Socks4,
    /// SOCKS Protocol Version 5 (RFC 1928)
    Socks5,
}

impl ProxyProtocol {
    pub fn available_protocols() -> &'static [&'static str] {
        &["direct", "http", "socks4", "socks5"]
    }
}

impl Display for ProxyProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            ProxyProtocol::Direct => f.write_str("direct"),
            ProxyProtocol::Http => f.write_str("http"),
            ProxyProtocol::Socks4 => f.write_str("socks4"),
            ProxyProtocol::Socks5 => f.write_str("socks5"),
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<ProxyProtocol, ConfigError> {
        match s {
            "direct" => Ok(ProxyProtocol::Direct),
            "http" => Ok(ProxyProtocol::Http),
            "socks4" => Ok(ProxyProtocol::Socks4),
            "socks5" => Ok(ProxyProtocol::Socks5),
            _ => Err(ConfigError::UnknownProxyProtocol(s.to_owned())),
        }
    }
}

/// Transport protocol being redirected through the proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxiedProtocol {
    Tcp,
    Udp,
}

impl ProxiedProtocol {
    pub fn available_protocols() -> &'static [&'static str] {
        &["tcp", "udp"]
    }
}

impl Display for ProxiedProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            ProxiedProtocol::Tcp => f.write_str("tcp"),
            ProxiedProtocol::Udp => f.write_str("udp"),
        }
    }
}

impl FromStr for ProxiedProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<ProxiedProtocol, ConfigError> {
        match s {
            "tcp" => Ok(ProxiedProtocol::Tcp),
            "udp" => Ok(ProxiedProtocol::Udp),
            _ => Err(ConfigError::UnknownProxiedProtocol(s.to_owned())),
        }
    }
}

/// Address of the upstream proxy, either a socket address or a host name to
/// be resolved when connecting
#[derive(Clone, Debug)]
pub enum ServerAddr {
    SocketAddr(SocketAddr),
    DomainName(String, u16),
}

impl ServerAddr {
    /// Build from the host and port given on the command line
    ///
    /// `host` may be a dotted-quad, a colon-hex IPv6 literal (optionally
    /// bracketed) or a host name.
    pub fn new(host: &str, port: u16) -> Result<ServerAddr, ConfigError> {
        if host.is_empty() {
            return Err(ConfigError::InvalidAddress(host.to_owned()));
        }

        if let Some(stripped) = host.strip_prefix('[') {
            let addr = stripped
                .strip_suffix(']')
                .and_then(|inner| inner.parse::<Ipv6Addr>().ok())
                .ok_or_else(|| ConfigError::InvalidAddress(host.to_owned()))?;
            return Ok(ServerAddr::SocketAddr(SocketAddr::new(IpAddr::V6(addr), port)));
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(ServerAddr::SocketAddr(SocketAddr::new(ip, port))),
            Err(..) => Ok(ServerAddr::DomainName(host.to_owned(), port)),
        }
    }

    pub fn port(&self) -> u16 {
        match *self {
            ServerAddr::SocketAddr(ref addr) => addr.port(),
            ServerAddr::DomainName(.., port) => port,
        }
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            ServerAddr::SocketAddr(ref addr) => write!(f, "{addr}"),
            ServerAddr::DomainName(ref dname, port) => write!(f, "{dname}:{port}"),
        }
    }
}

/// Immutable proxying configuration shared by all sessions
#[derive(Clone, Debug)]
pub struct ProxySettings {
    pub proxy_protocol: ProxyProtocol,
    pub proxied_protocol: ProxiedProtocol,
    pub proxy_addr: ServerAddr,
    pub username: String,
    pub password: String,
}

impl ProxySettings {
    pub fn new(
        proxy_protocol: ProxyProtocol,
        proxied_protocol: ProxiedProtocol,
        proxy_host: &str,
        proxy_port: u16,
        username: String,
        password: String,
    ) -> Result<ProxySettings, ConfigError> {
        if proxied_protocol == ProxiedProtocol::Udp
            && !matches!(proxy_protocol, ProxyProtocol::Direct | ProxyProtocol::Socks5)
        {
            return Err(ConfigError::UdpProxyUnsupported(proxy_protocol));
        }

        match proxy_protocol {
            ProxyProtocol::Direct if proxy_port != 0 => {
                return Err(ConfigError::DirectNonzeroPort(proxy_port));
            }
            ProxyProtocol::Direct => {}
            _ if proxy_port == 0 => {
                return Err(ConfigError::MissingProxyPort);
            }
            _ => {}
        }

        if proxy_protocol == ProxyProtocol::Socks5
            && (username.len() > u8::MAX as usize || password.len() > u8::MAX as usize)
        {
            return Err(ConfigError::CredentialTooLong);
        }

        Ok(ProxySettings {
            proxy_protocol,
            proxied_protocol,
            proxy_addr: ServerAddr::new(proxy_host, proxy_port)?,
            username,
            password,
        })
    }

    /// Whether proxy authentication credentials were supplied
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

/// Invalid command line or address configuration, fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown proxy protocol {0:?}")]
    UnknownProxyProtocol(String),
    #[error("unknown proxied protocol {0:?}")]
    UnknownProxiedProtocol(String),
    #[error("invalid proxy address {0:?}")]
    InvalidAddress(String),
    #[error("udp cannot be relayed through a {0} proxy")]
    UdpProxyUnsupported(ProxyProtocol),
    #[error("direct connections take proxy port 0, not {0}")]
    DirectNonzeroPort(u16),
    #[error("proxy port must not be 0")]
    MissingProxyPort,
    #[error("socks5 usernames and passwords are limited to 255 bytes")]
    CredentialTooLong,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_addr_literals() {
        assert!(matches!(
            ServerAddr::new("192.0.2.7", 8080),
            Ok(ServerAddr::SocketAddr(..))
        ));
        assert!(matches!(
            ServerAddr::new("2001:db8::1", 1080),
            Ok(ServerAddr::SocketAddr(SocketAddr::V6(..)))
        ));
        assert!(matches!(
            ServerAddr::new("[2001:db8::1]", 1080),
            Ok(ServerAddr::SocketAddr(SocketAddr::V6(..)))
        ));
        assert!(matches!(
            ServerAddr::new("proxy.example.com", 3128),
            Ok(ServerAddr::DomainName(..))
        ));
        assert!(ServerAddr::new("[not-an-address]", 1080).is_err());
        assert!(ServerAddr::new("", 1080).is_err());
    }

    #[test]
    fn settings_invariants() {
        assert!(ProxySettings::new(
            ProxyProtocol::Http,
            ProxiedProtocol::Udp,
            "proxy",
            8080,
            String::new(),
            String::new()
        )
        .is_err());

        assert!(ProxySettings::new(
            ProxyProtocol::Direct,
            ProxiedProtocol::Tcp,
            "localhost",
            8080,
            String::new(),
            String::new()
        )
        .is_err());

        assert!(ProxySettings::new(
            ProxyProtocol::Socks5,
            ProxiedProtocol::Udp,
            "proxy",
            1080,
            String::new(),
            String::new()
        )
        .is_ok());
    }

    #[test]
    fn socks5_credentials_limited_to_255_bytes() {
        assert!(matches!(
            ProxySettings::new(
                ProxyProtocol::Socks5,
                ProxiedProtocol::Tcp,
                "proxy",
                1080,
                "a".repeat(256),
                String::new()
            ),
            Err(ConfigError::CredentialTooLong)
        ));

        assert!(matches!(
            ProxySettings::new(
                ProxyProtocol::Socks5,
                ProxiedProtocol::Tcp,
                "proxy",
                1080,
                String::new(),
                "b".repeat(256)
            ),
            Err(ConfigError::CredentialTooLong)
        ));

        assert!(ProxySettings::new(
            ProxyProtocol::Socks5,
            ProxiedProtocol::Tcp,
            "proxy",
            1080,
            "a".repeat(255),
            "b".repeat(255)
        )
        .is_ok());
    }
}
