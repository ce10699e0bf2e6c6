use std::{io, mem, net::SocketAddr, os::unix::io::AsRawFd};

use tokio::net::TcpStream;

use crate::{redir::TcpStreamRedirExt, sys::sockaddr_to_std};

impl TcpStreamRedirExt for TcpStream {
    fn destination_addr(&self) -> io::Result<SocketAddr> {
        get_original_destination_addr(self)
    }
}

fn get_original_destination_addr(s: &TcpStream) -> io::Result<SocketAddr> {
    let fd = s.as_raw_fd();

    unsafe {
        let mut target_addr: libc::sockaddr_storage = mem::zeroed();
        let mut target_addr_len = mem::size_of_val(&target_addr) as libc::socklen_t;

        match s.local_addr()? {
            SocketAddr::V4(..) => {
                let ret = libc::getsockopt(
                    fd,
                    libc::SOL_IP,
                    libc::SO_ORIGINAL_DST,
                    &mut target_addr as *mut _ as *mut _,
                    &mut target_addr_len,
                );
                if ret != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            SocketAddr::V6(..) => {
                let ret = libc::getsockopt(
                    fd,
                    libc::SOL_IPV6,
                    libc::IP6T_SO_ORIGINAL_DST,
                    &mut target_addr as *mut _ as *mut _,
                    &mut target_addr_len,
                );
                if ret != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }

        // Convert sockaddr_storage to SocketAddr
        sockaddr_to_std(&target_addr)
    }
}
