//! HTTP CONNECT tunnel handshake
//!
//! Sends a `CONNECT host:port HTTP/1.1` request and waits for a 2xx status.
//! IPv6 target literals are bracketed in both the request line and the `Host`
//! header. A `Proxy-Authorization: Basic` header is attached when credentials
//! were configured.

use std::{io, net::SocketAddr};

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::config::ProxySettings;

use super::HandshakeError;

// Responses with header sections beyond this are broken or hostile
const MAX_RESPONSE_HEADER_SIZE: usize = 8 * 1024;

/// Establish a CONNECT tunnel to `target` on an already connected proxy stream
pub async fn handshake(stream: &mut TcpStream, target: SocketAddr, settings: &ProxySettings) -> Result<(), HandshakeError> {
    let mut req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if settings.auth_enabled() {
        let credentials = STANDARD.encode(format!("{}:{}", settings.username, settings.password));
        req.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    req.push_str("\r\n");

    stream.write_all(req.as_bytes()).await?;

    let status_line = read_response_header(stream).await?;
    if !is_success_status(&status_line) {
        return Err(HandshakeError::HttpRejected(status_line));
    }

    Ok(())
}

/// Read the response header section and return the status line
///
/// Reads one byte at a time so that no tunneled bytes following the blank
/// line are consumed.
async fn read_response_header(stream: &mut TcpStream) -> Result<String, HandshakeError> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];

    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_RESPONSE_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "proxy response header too long").into());
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        header.push(byte[0]);
    }

    let line_end = header
        .windows(2)
        .position(|w| w == b"\r\n")
        .expect("header section ends with CRLF");
    Ok(String::from_utf8_lossy(&header[..line_end]).into_owned())
}

fn is_success_status(line: &str) -> bool {
    let mut parts = line.split(' ');

    let version_ok = matches!(
        parts.next().and_then(|v| v.strip_prefix("HTTP/1.")),
        Some(minor) if minor.len() == 1 && minor.as_bytes()[0].is_ascii_digit()
    );
    let status_ok = matches!(
        parts.next(),
        Some(code) if code.len() == 3 && code.as_bytes()[0] == b'2' && code.bytes().all(|b| b.is_ascii_digit())
    );

    version_ok && status_ok
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn success_status_lines() {
        assert!(is_success_status("HTTP/1.1 200 OK"));
        assert!(is_success_status("HTTP/1.0 200 Connection established"));
        assert!(is_success_status("HTTP/1.1 204 No Content"));

        assert!(!is_success_status("HTTP/1.1 407 Proxy Authentication Required"));
        assert!(!is_success_status("HTTP/1.1 502 Bad Gateway"));
        assert!(!is_success_status("HTTP/2 200 OK"));
        assert!(!is_success_status("HTTP/1.1 20 OK"));
        assert!(!is_success_status("garbage"));
        assert!(!is_success_status(""));
    }
}
