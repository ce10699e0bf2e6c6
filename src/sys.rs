//! Platform socket address conversions

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(unix)] {
        use std::{
            io::{self, Error, ErrorKind},
            net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
        };

        /// Convert `sockaddr_storage` to `SocketAddr`
        #[allow(dead_code)]
        pub fn sockaddr_to_std(saddr: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
            match saddr.ss_family as libc::c_int {
                libc::AF_INET => {
                    let addr = unsafe { &*(saddr as *const _ as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
                    let port = u16::from_be(addr.sin_port);
                    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
                }
                libc::AF_INET6 => {
                    let addr = unsafe { &*(saddr as *const _ as *const libc::sockaddr_in6) };
                    let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
                    let port = u16::from_be(addr.sin6_port);
                    Ok(SocketAddr::V6(SocketAddrV6::new(
                        ip,
                        port,
                        addr.sin6_flowinfo,
                        addr.sin6_scope_id,
                    )))
                }
                _ => {
                    let err = Error::new(ErrorKind::InvalidData, "family must be either AF_INET or AF_INET6");
                    Err(err)
                }
            }
        }
    }
}
