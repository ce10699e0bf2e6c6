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

fn socks5_settings(proxy_addr: SocketAddr, username: &str, password: &str) -> ProxySettings {
    ProxySettings::new(
        ProxyProtocol::Socks5,
        ProxiedProtocol::Tcp,
        &proxy_addr.ip().to_string(),
        proxy_addr.port(),
        username.to_owned(),
        password.to_owned(),
    )
    .unwrap()
}

async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, expected, "received {:?}", ByteStr::new(&buf));
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
async fn socks5_no_auth_ipv6_target() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // method negotiation
        expect_bytes(&mut stream, &[0x05, 0x01, 0x00]).await;
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        // CONNECT [2001:db8::1]:443
        let mut expected = vec![0x05, 0x01, 0x00, 0x04];
        expected.extend_from_slice(&"2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets());
        expected.extend_from_slice(&[0x01, 0xbb]);
        expect_bytes(&mut stream, &expected).await;

        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();

        echo_remaining(&mut stream).await;
    });

    let settings = socks5_settings(proxy_addr, "", "");
    let target: SocketAddr = "[2001:db8::1]:443".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    stream.write_all(b"tls hello").await.unwrap();
    let mut buf = [0u8; 9];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"tls hello");
}

#[tokio::test]
async fn socks5_password_auth() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // credentials configured, both methods offered
        expect_bytes(&mut stream, &[0x05, 0x02, 0x00, 0x02]).await;
        stream.write_all(&[0x05, 0x02]).await.unwrap();

        // RFC1929 sub-negotiation
        expect_bytes(&mut stream, b"\x01\x05alice\x06s3cret").await;
        stream.write_all(&[0x01, 0x00]).await.unwrap();

        // CONNECT 192.0.2.7:443
        expect_bytes(
            &mut stream,
            &[0x05, 0x01, 0x00, 0x01, 0xc0, 0x00, 0x02, 0x07, 0x01, 0xbb],
        )
        .await;
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();

        echo_remaining(&mut stream).await;
    });

    let settings = socks5_settings(proxy_addr, "alice", "s3cret");
    let target: SocketAddr = "192.0.2.7:443".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    stream.write_all(b"payload").await.unwrap();
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"payload");
}

#[tokio::test]
async fn socks5_auth_rejected() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        expect_bytes(&mut stream, &[0x05, 0x02, 0x00, 0x02]).await;
        stream.write_all(&[0x05, 0x02]).await.unwrap();

        let mut subneg = vec![0u8; 1 + 1 + 5 + 1 + 5];
        stream.read_exact(&mut subneg).await.unwrap();
        stream.write_all(&[0x01, 0x01]).await.unwrap();
    });

    let settings = socks5_settings(proxy_addr, "alice", "wrong");
    let target: SocketAddr = "192.0.2.7:443".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::AuthFailed(status)) => assert_eq!(status, 0x01),
        other => panic!("expected AuthFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn socks5_no_acceptable_method() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        expect_bytes(&mut stream, &[0x05, 0x01, 0x00]).await;
        stream.write_all(&[0x05, 0xff]).await.unwrap();
    });

    let settings = socks5_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.7:443".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::NoAcceptableMethod) => {}
        other => panic!("expected NoAcceptableMethod, got {other:?}"),
    }
}

#[tokio::test]
async fn socks5_unoffered_method_chosen() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        expect_bytes(&mut stream, &[0x05, 0x01, 0x00]).await;
        // picks username/password although it was never offered
        stream.write_all(&[0x05, 0x02]).await.unwrap();
    });

    let settings = socks5_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.7:443".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::NoAcceptableMethod) => {}
        other => panic!("expected NoAcceptableMethod, got {other:?}"),
    }
}

#[tokio::test]
async fn socks5_connect_rejected() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        expect_bytes(&mut stream, &[0x05, 0x01, 0x00]).await;
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        let mut req = vec![0u8; 10];
        stream.read_exact(&mut req).await.unwrap();

        // connection refused by the target
        stream
            .write_all(&[0x05, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
    });

    let settings = socks5_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.7:443".parse().unwrap();

    let err = proxy::connect(&settings, target).await.unwrap_err();
    assert!(
        err.to_string().contains("Connection refused"),
        "error was {err:?}"
    );
}
