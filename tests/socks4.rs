use std::net::SocketAddr;

use byte_string::ByteStr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use transproxify::{
    config::{ProxiedProtocol, ProxyProtocol, ProxySettings},
    proxy::{self, socks4, HandshakeError},
};

fn socks4_settings(proxy_addr: SocketAddr, username: &str, password: &str) -> ProxySettings {
    ProxySettings::new(
        ProxyProtocol::Socks4,
        ProxiedProtocol::Tcp,
        &proxy_addr.ip().to_string(),
        proxy_addr.port(),
        username.to_owned(),
        password.to_owned(),
    )
    .unwrap()
}

#[tokio::test]
async fn socks4_connect() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let expected = [
            0x04, 0x01, // VN, CD
            0x00, 0x16, // DSTPORT 22
            0x0a, 0x00, 0x00, 0x05, // DSTIP 10.0.0.5
            0x62, 0x6f, 0x62, // USERID "bob"
            0x00, // NULL
        ];
        let mut req = vec![0u8; expected.len()];
        stream.read_exact(&mut req).await.unwrap();
        assert_eq!(req, expected, "request was {:?}", ByteStr::new(&req));

        stream
            .write_all(&[0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();

        // tunnel established, echo everything
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    let settings = socks4_settings(proxy_addr, "bob", "");
    let target: SocketAddr = "10.0.0.5:22".parse().unwrap();

    let mut stream = proxy::connect(&settings, target).await.unwrap();

    stream.write_all(b"ssh?").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ssh?");
}

#[tokio::test]
async fn socks4_user_id_falls_back_to_password() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let expected = [
            0x04, 0x01, 0x00, 0x50, // CONNECT to port 80
            0xc0, 0x00, 0x02, 0x01, // 192.0.2.1
            0x73, 0x33, 0x63, 0x72, 0x33, 0x74, // USERID "s3cr3t"
            0x00,
        ];
        let mut req = vec![0u8; expected.len()];
        stream.read_exact(&mut req).await.unwrap();
        assert_eq!(req, expected, "request was {:?}", ByteStr::new(&req));

        stream
            .write_all(&[0x00, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
    });

    let settings = socks4_settings(proxy_addr, "", "s3cr3t");
    let target: SocketAddr = "192.0.2.1:80".parse().unwrap();

    proxy::connect(&settings, target).await.unwrap();
}

#[tokio::test]
async fn socks4_rejected() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut req = vec![0u8; 9]; // empty USERID
        stream.read_exact(&mut req).await.unwrap();

        stream
            .write_all(&[0x00, 0x5b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
    });

    let settings = socks4_settings(proxy_addr, "", "");
    let target: SocketAddr = "192.0.2.1:80".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::Socks4(socks4::Error::Result(code))) => {
            assert_eq!(code, socks4::ResultCode::RequestRejectedOrFailed);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn socks4_refuses_ipv6_targets() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // The engine must fail before sending any request bytes
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "no request bytes expected for an IPv6 target");
    });

    let settings = socks4_settings(proxy_addr, "bob", "");
    let target: SocketAddr = "[2001:db8::1]:443".parse().unwrap();

    match proxy::connect(&settings, target).await {
        Err(HandshakeError::UnsupportedTarget(addr)) => assert_eq!(addr, target),
        other => panic!("expected UnsupportedTarget, got {other:?}"),
    }
}
