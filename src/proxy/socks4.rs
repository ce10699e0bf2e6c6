//! Socks4 protocol definition
//!
//! Client side of <http://ftp.icm.edu.pl/packages/socks/socks4/SOCKS4.protocol>.
//! SOCKS4 carries IPv4 addresses only.

use std::{
    fmt,
    io::{self, ErrorKind},
    net::{SocketAddr, SocketAddrV4},
};

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use crate::config::ProxySettings;

use super::HandshakeError;

#[rustfmt::skip]
mod consts {
    pub const SOCKS4_VERSION:                                   u8 = 4;

    pub const SOCKS4_COMMAND_CONNECT:                           u8 = 1;

    pub const SOCKS4_RESULT_REQUEST_GRANTED:                    u8 = 90;
    pub const SOCKS4_RESULT_REQUEST_REJECTED_OR_FAILED:         u8 = 91;
    pub const SOCKS4_RESULT_REQUEST_REJECTED_CANNOT_CONNECT:    u8 = 92;
    pub const SOCKS4_RESULT_REQUEST_REJECTED_DIFFERENT_USER_ID: u8 = 93;
}

/// SOCKS4 Result Code
#[derive(Clone, Debug, Copy, Eq, PartialEq)]
pub enum ResultCode {
    /// 90: request granted
    RequestGranted,
    /// 91: request rejected or failed
    RequestRejectedOrFailed,
    /// 92: request rejected because SOCKS server cannot connect to identd on the client
    RequestRejectedCannotConnect,
    /// 93: request rejected because the client program and identd report different user-ids
    RequestRejectedDifferentUserId,
    /// Other replies
    Other(u8),
}

impl ResultCode {
    #[inline]
    fn from_u8(code: u8) -> ResultCode {
        match code {
            consts::SOCKS4_RESULT_REQUEST_GRANTED => ResultCode::RequestGranted,
            consts::SOCKS4_RESULT_REQUEST_REJECTED_OR_FAILED => ResultCode::RequestRejectedOrFailed,
            consts::SOCKS4_RESULT_REQUEST_REJECTED_CANNOT_CONNECT => ResultCode::RequestRejectedCannotConnect,
            consts::SOCKS4_RESULT_REQUEST_REJECTED_DIFFERENT_USER_ID => ResultCode::RequestRejectedDifferentUserId,
            code => ResultCode::Other(code),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ResultCode::RequestGranted => f.write_str("request granted"),
            ResultCode::RequestRejectedOrFailed => f.write_str("request rejected or failed"),
            ResultCode::RequestRejectedCannotConnect => {
                f.write_str("request rejected because SOCKS server cannot connect to identd on the client")
            }
            ResultCode::RequestRejectedDifferentUserId => {
                f.write_str("request rejected because the client program and identd report different user-ids")
            }
            ResultCode::Other(code) => write!(f, "other result code {code}"),
        }
    }
}

/// Handshake Request
///
/// ```plain
///                 +----+----+----+----+----+----+----+----+----+----+....+----+
///                 | VN | CD | DSTPORT |      DSTIP        | USERID       |NULL|
///                 +----+----+----+----+----+----+----+----+----+----+....+----+
///  # of bytes:      1    1      2              4           variable       1
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub dst: SocketAddrV4,
    pub user_id: Vec<u8>,
}

impl HandshakeRequest {
    /// Creates a CONNECT request
    pub fn new(dst: SocketAddrV4, user_id: Vec<u8>) -> HandshakeRequest {
        debug_assert!(
            !user_id.contains(&b'\0'),
            "USERID shouldn't contain any NULL characters"
        );
        HandshakeRequest { dst, user_id }
    }

    /// Writes to writer
    pub async fn write_to<W>(&self, w: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_to_buf(&mut buf);
        w.write_all(&buf).await
    }

    /// Writes to buffer
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(consts::SOCKS4_VERSION);
        buf.put_u8(consts::SOCKS4_COMMAND_CONNECT);
        buf.put_u16(self.dst.port());
        buf.put_slice(&self.dst.ip().octets());
        buf.put_slice(&self.user_id);
        buf.put_u8(b'\0');
    }

    /// Length in bytes
    #[inline]
    pub fn serialized_len(&self) -> usize {
        1 + 1 + 2 + 4 + self.user_id.len() + 1
    }
}

/// Handshake Response
///
/// ```plain
///             +----+----+----+----+----+----+----+----+
///             | VN | CD | DSTPORT |      DSTIP        |
///             +----+----+----+----+----+----+----+----+
/// # of bytes:   1    1      2              4
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub cd: ResultCode,
}

impl HandshakeResponse {
    /// Read from a reader
    pub async fn read_from<R>(r: &mut R) -> Result<HandshakeResponse, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 8];
        let _ = r.read_exact(&mut buf).await?;

        // VN: Result Code's version, must be 0
        let vn = buf[0];
        if vn != 0 {
            return Err(Error::UnsupportedSocksVersion(vn));
        }

        // DSTPORT, DSTIP are ignored

        Ok(HandshakeResponse {
            cd: ResultCode::from_u8(buf[1]),
        })
    }
}

/// SOCKS4 Error
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("unsupported socks version {0:#x}")]
    UnsupportedSocksVersion(u8),
    #[error("proxy replied: {0}")]
    Result(ResultCode),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::IoError(err) => err,
            e => io::Error::new(ErrorKind::Other, e),
        }
    }
}

/// Establish a CONNECT tunnel to `target` on an already connected proxy stream
///
/// The USERID field is the username if one was given, otherwise the password,
/// otherwise empty.
pub async fn handshake(stream: &mut TcpStream, target: SocketAddr, settings: &ProxySettings) -> Result<(), HandshakeError> {
    let dst = match target {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(..) => return Err(HandshakeError::UnsupportedTarget(target)),
    };

    let user_id = if !settings.username.is_empty() {
        settings.username.as_bytes()
    } else {
        settings.password.as_bytes()
    };

    let req = HandshakeRequest::new(dst, user_id.to_vec());
    req.write_to(stream).await?;

    let rsp = HandshakeResponse::read_from(stream).await?;
    match rsp.cd {
        ResultCode::RequestGranted => Ok(()),
        code => Err(Error::Result(code).into()),
    }
}
