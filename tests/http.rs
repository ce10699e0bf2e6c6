use std::net::SocketAddr;

use byte_string::ByteStr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use transproxify::{
    config::{ProxiedProtocol, ProxyProtocol, ProxySettings},
    proxy::{self, HandshakeError},
};

fn http_settings(proxy_addr: SocketAddr, username: &str, password: &str) -> ProxySettings {
    ProxySettings::new(
        ProxyProtocol::Http,
        ProxiedProtocol::Tcp,
        &proxy_addr.ip().to_string(),
        proxy_addr.port(),
        username.to_owned(),
        password.to_owned(),
    )
    .unwrap()
}

async fn read_request_header(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        header.push(byte[0]);
    }
    header
}

async fn echo_remaining(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await.unwrap();
    }
}

#[tokio::test]
async fn http_connect_with_basic_auth() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_request_header(&mut stream).await;

        let expected = b"CONNECT 192.0.2.80:443 HTTP/1.1\r\n\
                         Host: 192.0.2.80:443\r\n\
                         Proxy-Authorization: Basic YWxpY2U6czNjcmV0\r\n\
                         \r\n";
        assert_eq!(req, expected, "request was {:?}", ByteStr::new(&req));

        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        echo_remaining(&mut stream).await;
    });

    let settings = http_settings(proxy_addr, "alice", "s3cret");
    let target: SocketAddr = "192.0.2.80:443".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    stream.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn http_connect_without_credentials() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_request_header(&mut stream).await;

        let expected = b"CONNECT 192.0.2.80:80 HTTP/1.1\r\nHost: 192.0.2.80:80\r\n\r\n";
        assert_eq!(req, expected, "request was {:?}", ByteStr::new(&req));

        stream.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await.unwrap();
        echo_remaining(&mut stream).await;
    });

    let settings = http_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.80:80".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn http_connect_brackets_ipv6_targets() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_request_header(&mut stream).await;

        let expected = b"CONNECT [2001:db8::1]:443 HTTP/1.1\r\nHost: [2001:db8::1]:443\r\n\r\n";
        assert_eq!(req, expected, "request was {:?}", ByteStr::new(&req));

        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
    });

    let settings = http_settings(proxy_addr, "", "");
    let target: SocketAddr = "[2001:db8::1]:443".parse().unwrap();

    proxy::connect(&settings, target).await.unwrap();
}

#[tokio::test]
async fn http_connect_rejected() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request_header(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .await
            .unwrap();
    });

    let settings = http_settings(proxy_addr, "alice", "s3cret");
    let target: SocketAddr = "192.0.2.80:443".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::HttpRejected(status_line)) => {
            assert!(status_line.contains("407"), "status line was {status_line:?}");
        }
        other => panic!("expected HttpRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn http_connect_tunnel_does_not_eat_payload() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    // Reply status and first tunneled bytes in a single segment; the
    // handshake must leave the payload on the stream.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request_header(&mut stream).await;
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nEARLY").await.unwrap();
    });

    let settings = http_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.80:443".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"EARLY");
}
