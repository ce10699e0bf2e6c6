use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
};

use tokio::net::TcpStream;

use crate::redir::TcpStreamRedirExt;

impl TcpStreamRedirExt for TcpStream {
    fn destination_addr(&self) -> io::Result<SocketAddr> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "tcp transparent proxying is not supported on this platform",
        ))
    }
}
