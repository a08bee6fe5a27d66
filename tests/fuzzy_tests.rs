/// Fuzzy tests for proxy reliability
///
/// These tests feed malformed, truncated or random input to the inbound
/// listener and the tunnel codec and check that nothing panics and the
/// listener keeps serving.
mod common;

use rand::Rng;
use std::time::Duration;
use surfer::protocol::TunnelFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONFIG: &str = r#"
[runtime]
idle_timeout_secs = 1

[[inbounds]]
tag = "http-in"
port = 18080

[[outbounds]]
tag = "direct"
protocol = "direct"

[[routes]]
inbound = "http-in"
outbound = "direct"
"#;

/// The listener still answers a valid CONNECT after abuse
async fn assert_still_serving(proxy_port: u16) {
    let echo_port = common::get_available_port();
    let _echo = common::start_echo_server(echo_port).await;

    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo_port);
    let mut stream = common::connect_and_send(proxy_port, request.as_bytes()).await;
    assert_eq!(
        common::read_response_head(&mut stream).await,
        "HTTP/1.1 200 Connection established\r\n\r\n"
    );
}

/// 读取直到连接关闭，返回收到的全部数据
async fn drain(stream: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    let _ = timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    response
}

#[tokio::test]
async fn test_random_garbage_requests() {
    let proxy = common::start_proxy(CONFIG).await;
    let mut rng = rand::rng();

    for _ in 0..20 {
        let len = rng.random_range(1..2048);
        let mut garbage = vec![0u8; len];
        rng.fill(&mut garbage[..]);
        garbage.extend_from_slice(b"\r\n\r\n");

        let mut stream = common::connect_and_send(proxy.port, &garbage).await;
        let response = drain(&mut stream).await;
        assert!(
            response.is_empty() || response.starts_with(b"HTTP/1.1 400"),
            "unexpected response to garbage: {:?}",
            String::from_utf8_lossy(&response)
        );
    }

    assert_still_serving(proxy.port).await;
}

#[tokio::test]
async fn test_oversized_request_head() {
    let proxy = common::start_proxy(CONFIG).await;

    let mut request = b"GET http://example.com/ HTTP/1.1\r\n".to_vec();
    for i in 0..2000 {
        request.extend_from_slice(format!("X-Padding-{}: {}\r\n", i, "a".repeat(32)).as_bytes());
    }

    let mut stream = TcpStream::connect(("127.0.0.1", proxy.port)).await.unwrap();
    // 代理可能在读完之前就关闭连接
    let _ = stream.write_all(&request).await;
    let response = drain(&mut stream).await;
    assert!(response.is_empty() || response.starts_with(b"HTTP/1.1 400"));

    assert_still_serving(proxy.port).await;
}

#[tokio::test]
async fn test_truncated_requests() {
    let proxy = common::start_proxy(CONFIG).await;

    let partials: Vec<&[u8]> = vec![
        b"",
        b"CONNECT",
        b"CONNECT example.com:443",
        b"CONNECT example.com:443 HTTP/1.1\r\n",
        b"GET http://example.com/ HTTP/1.1\r\nHost: exa",
    ];

    for partial in partials {
        let mut stream = common::connect_and_send(proxy.port, partial).await;
        stream.shutdown().await.unwrap();
        let response = drain(&mut stream).await;
        assert!(response.is_empty() || response.starts_with(b"HTTP/1.1 400"));
    }

    assert_still_serving(proxy.port).await;
}

#[tokio::test]
async fn test_invalid_targets() {
    let proxy = common::start_proxy(CONFIG).await;

    let requests: Vec<&[u8]> = vec![
        b"CONNECT :443 HTTP/1.1\r\n\r\n",
        b"GET /no-host-header HTTP/1.1\r\n\r\n",
        b"GET http:// HTTP/1.1\r\n\r\n",
        b"G\x01T / HTTP/1.1\r\n\r\n",
    ];

    for request in requests {
        let mut stream = common::connect_and_send(proxy.port, request).await;
        let response = drain(&mut stream).await;
        assert!(
            response.starts_with(b"HTTP/1.1 400"),
            "expected 400 for {:?}, got {:?}",
            String::from_utf8_lossy(request),
            String::from_utf8_lossy(&response)
        );
    }

    assert_still_serving(proxy.port).await;
}

#[test]
fn test_frame_decode_random_input() {
    let mut rng = rand::rng();

    for _ in 0..1000 {
        let len = rng.random_range(0..256);
        let mut input = vec![0u8; len];
        rng.fill(&mut input[..]);
        // 只要求不 panic
        let _ = TunnelFrame::decode(&input);
    }
}
