use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use transproxify::{
    config::{ProxiedProtocol, ProxyProtocol, ProxySettings},
    proxy,
};

#[tokio::test]
async fn direct_tcp_is_byte_transparent() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    let settings = ProxySettings::new(
        ProxyProtocol::Direct,
        ProxiedProtocol::Tcp,
        "localhost",
        0,
        String::new(),
        String::new(),
    )
    .unwrap();

    let mut stream = proxy::connect(&settings, target_addr).await.unwrap();

    stream.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // half-close from the client is observed as EOF by the echo server,
    // which closes in turn
    stream.shutdown().await.unwrap();
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}
