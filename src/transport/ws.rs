/// WebSocket 传输
///
/// 先建立 TCP（可选 TLS），再做 RFC 6455 (version 13) 升级握手。
/// 握手完成后通过 [`WsStream`] 把消息流适配成 AsyncRead/AsyncWrite。
use super::{BoxedTransport, TransportClient, TransportType, WsSetting};
use crate::address::Destination;
use crate::error::{Result, SurferError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async_with_config, WebSocketStream};
use tracing::{debug, trace, warn};

/// WebSocket 传输客户端
pub struct WsTransportClient {
    destination: Destination,
    url: url::Url,
    server_name: String,
    connector: Option<TlsConnector>,
}

impl WsTransportClient {
    /// `connector` 在 `setting.tls` 为 true 时必须提供
    pub fn new(setting: &WsSetting, connector: Option<TlsConnector>) -> Result<Self> {
        if setting.tls && connector.is_none() {
            return Err(SurferError::config_error(format!(
                "wss transport to {} requires a TLS connector",
                setting.host
            )));
        }

        Ok(Self {
            destination: Destination::new(&setting.host, setting.effective_port()),
            url: setting.url()?,
            server_name: setting
                .server_name
                .clone()
                .unwrap_or_else(|| Destination::new(&setting.host, 0).host().to_string()),
            connector: if setting.tls { connector } else { None },
        })
    }
}

#[async_trait]
impl TransportClient for WsTransportClient {
    async fn connect(&self) -> Result<BoxedTransport> {
        let addr = self.destination.to_string();
        debug!("Connecting to {} via {}", self.url, self.transport_type());

        let tcp_stream = TcpStream::connect((self.destination.host(), self.destination.port()))
            .await
            .map_err(|e| SurferError::connection_failed(&addr, e))?;

        if let Err(e) = tcp_stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        match &self.connector {
            Some(connector) => {
                let server_name = ServerName::try_from(self.server_name.clone()).map_err(|e| {
                    SurferError::tls_error(format!("Invalid server name {}: {}", self.server_name, e))
                })?;

                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| {
                        SurferError::tls_error(format!("TLS handshake with {} failed: {}", addr, e))
                    })?;

                let ws_stream = handshake(&self.url, tls_stream).await?;
                Ok(Box::pin(ws_stream))
            }
            None => {
                let ws_stream = handshake(&self.url, tcp_stream).await?;
                Ok(Box::pin(ws_stream))
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        if self.connector.is_some() {
            TransportType::Wss
        } else {
            TransportType::Ws
        }
    }

    fn remote(&self) -> String {
        self.url.to_string()
    }
}

/// 在已建立的流上完成升级握手
///
/// 握手未完成前收到的任何非 101 响应都视为致命错误，本次拨号失败
async fn handshake<S>(url: &url::Url, stream: S) -> Result<WsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = url
        .as_str()
        .into_client_request()
        .map_err(|e| SurferError::handshake_failed(format!("Invalid upgrade request: {}", e)))?;

    let (ws_stream, response) = client_async_with_config(request, stream, None)
        .await
        .map_err(handshake_error)?;

    debug!(
        "WebSocket handshake with {} completed ({})",
        url,
        response.status()
    );
    Ok(WsStream::new(ws_stream))
}

fn handshake_error(err: WsError) -> SurferError {
    match err {
        WsError::Http(response) => SurferError::handshake_failed(format!(
            "server rejected upgrade with status {}",
            response.status()
        )),
        WsError::Io(e) => SurferError::Io(e),
        other => SurferError::handshake_failed(other.to_string()),
    }
}

/// 把 WebSocketStream 适配为字节流
///
/// - Binary / Text 帧的内容作为转发数据向上交付
/// - Pong 帧静默丢弃，Ping 由 tungstenite 自动回复
/// - 收到 Close 帧后先刷出 tungstenite 排队的 Close 回复，等对端关闭连接，再返回 EOF
/// - 每次写入封装为一个 Binary 帧
pub struct WsStream<S> {
    inner: WebSocketStream<S>,
    pending: Bytes,
    read_state: ReadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    /// 已收到 Close，正在完成关闭握手
    Closing,
    Closed,
}

impl<S> WsStream<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            read_state: ReadState::Open,
        }
    }
}

impl<S> WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// 驱动关闭握手直到底层连接结束；此阶段的任何错误都按 EOF 处理
    fn poll_closing(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        loop {
            if let Err(e) = ready!(self.inner.poll_flush_unpin(cx)) {
                debug!("WebSocket closing handshake ended: {}", e);
                return Poll::Ready(());
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(msg)) => trace!("WebSocket ignoring {:?} after close", msg),
                Some(Err(e)) => {
                    debug!("WebSocket closing handshake ended: {}", e);
                    return Poll::Ready(());
                }
                None => return Poll::Ready(()),
            }
        }
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match self.read_state {
                ReadState::Open => {}
                ReadState::Closing => {
                    ready!(self.poll_closing(cx));
                    self.read_state = ReadState::Closed;
                    continue;
                }
                ReadState::Closed => return Poll::Ready(Ok(())),
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => self.pending = data,
                Some(Ok(Message::Text(text))) => {
                    self.pending = Bytes::copy_from_slice(text.as_bytes());
                }
                Some(Ok(Message::Pong(_))) => trace!("WebSocket received pong"),
                Some(Ok(Message::Ping(_))) => trace!("WebSocket received ping"),
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket received close: {:?}", frame);
                    self.read_state = ReadState::Closing;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    self.read_state = ReadState::Closed;
                }
                Some(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(self.inner.poll_ready_unpin(cx)).map_err(io::Error::other)?;
        self.inner
            .start_send_unpin(Message::binary(Bytes::copy_from_slice(buf)))
            .map_err(io::Error::other)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.poll_flush_unpin(cx).map_err(io::Error::other)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match ready!(self.inner.poll_close_unpin(cx)) {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(io::Error::other(e))),
        }
    }
}
