//! Common utilities for integration tests
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use surfer::config::AppConfig;
use surfer::inbound::{self, InboundContext};
use surfer::protocol::{credential_digest, TunnelFrame, TunnelRequest};
use surfer::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Create a simple echo server for testing
pub async fn start_echo_server(port: u16) -> tokio::task::JoinHandle<()> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind echo server");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    })
}

/// An origin server that records the first request head and answers `200 OK`
pub async fn start_origin_server(port: u16) -> oneshot::Receiver<String> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind origin server");
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("origin accept");
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.ends_with(b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("origin read");
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await;
        let _ = socket.shutdown().await;
    });

    rx
}

/// A server that accepts TCP connections and never answers
pub async fn start_silent_server(port: u16) -> tokio::task::JoinHandle<()> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind silent server");

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    })
}

/// What a fake tunnel server saw at the start of a session
#[derive(Debug)]
pub struct TunnelSession {
    pub digest: String,
    pub request: TunnelRequest,
}

/// Reads until a full tunnel frame has arrived
fn take_frame(buf: &[u8]) -> Option<TunnelFrame> {
    TunnelFrame::decode(buf).expect("malformed tunnel frame")
}

/// A tunnel server over raw TCP: checks the credential, then echoes the payload
/// and everything that follows
pub async fn start_tunnel_server(port: u16, password: &str) -> mpsc::Receiver<TunnelSession> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind tunnel server");
    let expected = credential_digest(password);
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let expected = expected.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut buf = vec![0u8; 8192];
                let frame = loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    pending.extend_from_slice(&buf[..n]);
                    if let Some(frame) = take_frame(&pending) {
                        break frame;
                    }
                };

                if frame.digest() != expected {
                    return;
                }
                let _ = tx
                    .send(TunnelSession {
                        digest: frame.digest().to_string(),
                        request: frame.request().clone(),
                    })
                    .await;

                if socket.write_all(frame.payload()).await.is_err() {
                    return;
                }
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    rx
}

/// The same tunnel server behind a WebSocket upgrade
pub async fn start_ws_tunnel_server(port: u16, password: &str) -> mpsc::Receiver<TunnelSession> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind ws tunnel server");
    let expected = credential_digest(password);
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let expected = expected.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };

                let mut pending = Vec::new();
                let frame = loop {
                    match ws.next().await {
                        Some(Ok(Message::Binary(data))) => pending.extend_from_slice(&data),
                        Some(Ok(_)) => continue,
                        _ => return,
                    }
                    if let Some(frame) = take_frame(&pending) {
                        break frame;
                    }
                };

                if frame.digest() != expected {
                    return;
                }
                let _ = tx
                    .send(TunnelSession {
                        digest: frame.digest().to_string(),
                        request: frame.request().clone(),
                    })
                    .await;

                if ws.send(Message::binary(frame.payload().clone())).await.is_err() {
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Binary(data) => {
                            if ws.send(Message::binary(data)).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    rx
}

/// Running proxy for one inbound; dropping it stops the listener
pub struct TestProxy {
    pub port: u16,
    _shutdown: broadcast::Sender<()>,
}

/// Build the proxy from TOML and serve its first inbound on a random port
pub async fn start_proxy(config_toml: &str) -> TestProxy {
    let config = AppConfig::from_toml(config_toml).expect("invalid test config");
    let server = Server::new(&config).expect("failed to build server");
    let context: Arc<InboundContext> = server.contexts()[0].clone();

    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy");
    let port = listener.local_addr().expect("proxy addr").port();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let _ = inbound::serve(listener, context, shutdown_rx).await;
    });

    TestProxy {
        port,
        _shutdown: shutdown_tx,
    }
}

/// Connect to the proxy and send raw bytes
pub async fn connect_and_send(port: u16, data: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to connect to proxy");
    stream.write_all(data).await.expect("Failed to write");
    stream
}

/// Read until `\r\n\r\n`, returning the head only
pub async fn read_response_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("Timeout waiting for response head")
            .expect("Failed to read response head");
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Read exactly `len` bytes with a timeout
pub async fn read_exact_timeout(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("Timeout waiting for data")
        .expect("Failed to read data");
    buf
}
