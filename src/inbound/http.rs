/// HTTP 代理入站
///
/// 每个连接只解析一次请求头：
/// - CONNECT：拨号成功后回复 `200 Connection established`，之后连接只承载透明字节
/// - 其他方法：把绝对 URI 改写为 origin-form 后作为第一个数据块转发
///
/// 请求头解析完成后连接从 `HttpAware` 切换到 `OpaqueRelay`，不再做任何 HTTP 处理。
use super::InboundContext;
use crate::address::Destination;
use crate::outbound::OutboundProtocol;
use crate::relay::RelayPair;
use anyhow::{bail, Context, Result};
use bytes::{Bytes, BytesMut};
use http::{Method, Uri};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// HTTP 请求头最大大小
const MAX_HEAD_SIZE: usize = 16384;

/// 请求头读取超时（防止慢速攻击）
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// 无路由或出站不受支持时丢弃客户端数据用的缓冲区大小
const DRAIN_BUFFER_SIZE: usize = 8192;

/// 逐跳头部，改写请求时去掉
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-authenticate",
    "te",
    "trailer",
    "upgrade",
];

const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/plain\r\nContent-Length: 18\r\nConnection: close\r\n\r\nConnection failed\n";

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// CONNECT 隧道
    Connect,
    /// 普通代理请求
    Proxy,
}

/// 解析后的请求头
#[derive(Debug, Clone)]
struct RequestHead {
    method: Method,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw).context("HTTP request head is not valid UTF-8")?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            bail!("Invalid HTTP request line: {:?}", request_line);
        };
        let version = parts.next().unwrap_or("HTTP/1.1").to_string();
        if !version.starts_with("HTTP/") {
            bail!("Invalid HTTP version: {}", version);
        }

        let method = Method::from_bytes(method.as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", method))?;

        let headers = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method,
            target: target.to_string(),
            version,
            headers,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 入站请求：目标地址和需要先行转发的数据
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub kind: RequestKind,
    pub destination: Destination,
    /// 客户端声明的协议版本，用于 CONNECT 应答
    pub version: String,
    /// 普通代理请求改写后的请求头
    pub forward_head: Option<Bytes>,
}

impl ProxyRequest {
    fn from_head(head: &RequestHead) -> Result<Self> {
        if head.method == Method::CONNECT {
            let destination = connect_destination(&head.target)?;
            return Ok(Self {
                kind: RequestKind::Connect,
                destination,
                version: head.version.clone(),
                forward_head: None,
            });
        }

        let (destination, forward_head) = rewrite_proxy_request(head)?;
        Ok(Self {
            kind: RequestKind::Proxy,
            destination,
            version: head.version.clone(),
            forward_head: Some(forward_head),
        })
    }
}

/// 解析 CONNECT 目标；缺少 scheme 时按 https 处理，默认端口 443
fn connect_destination(target: &str) -> Result<Destination> {
    let uri: Uri = if target.contains("://") {
        target.parse()
    } else {
        format!("https://{}", target).parse()
    }
    .with_context(|| format!("Invalid CONNECT target: {}", target))?;

    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .with_context(|| format!("No host in CONNECT target: {}", target))?;
    Ok(Destination::new(host, uri.port_u16().unwrap_or(443)))
}

/// 把代理请求改写为 origin-form，返回目标地址和新的请求头
fn rewrite_proxy_request(head: &RequestHead) -> Result<(Destination, Bytes)> {
    let absolute = head.target.contains("://");
    let uri: Uri = if absolute {
        head.target.parse()
    } else {
        // origin-form：目标来自 Host 头
        let host = head
            .header("host")
            .with_context(|| format!("Cannot determine target for {}", head.target))?;
        format!("http://{}{}", host, head.target).parse()
    }
    .with_context(|| format!("Invalid request target: {}", head.target))?;

    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .with_context(|| format!("No host in request target: {}", head.target))?;
    let default_port = if uri.scheme_str() == Some("https") {
        443
    } else {
        80
    };
    let destination = Destination::new(host, uri.port_u16().unwrap_or(default_port));

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    // Connection 头中列出的字段同样是逐跳的
    let listed: Vec<String> = head
        .header("connection")
        .map(|value| {
            value
                .split(',')
                .map(|token| token.trim().to_ascii_lowercase())
                .filter(|token| !token.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut out = BytesMut::with_capacity(MAX_HEAD_SIZE);
    out.extend_from_slice(format!("{} {} {}\r\n", head.method, path, head.version).as_bytes());

    if head.header("host").is_none() {
        if let Some(authority) = uri.authority() {
            out.extend_from_slice(format!("Host: {}\r\n", authority.as_str()).as_bytes());
        }
    }

    for (name, value) in &head.headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || listed.contains(&lower) {
            continue;
        }
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");

    Ok((destination, out.freeze()))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// 一个处于 HTTP 解析阶段的客户端连接
///
/// 切换到透明转发通过 `into_opaque` 消耗自身完成，之后不会再解析任何内容
pub struct HttpConnection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(MAX_HEAD_SIZE),
        }
    }

    /// 读取一个完整请求头；请求头之后已读到的字节留在缓冲区中
    ///
    /// 客户端未发送任何数据就关闭时返回 None
    async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        timeout(HEAD_READ_TIMEOUT, self.read_head_unbounded())
            .await
            .map_err(|_| anyhow::anyhow!("HTTP parsing timeout after {:?}", HEAD_READ_TIMEOUT))?
    }

    async fn read_head_unbounded(&mut self) -> Result<Option<RequestHead>> {
        loop {
            if let Some(end) = find_head_end(&self.buffer) {
                let raw = self.buffer.split_to(end);
                return RequestHead::parse(&raw[..end - 4]).map(Some);
            }
            if self.buffer.len() >= MAX_HEAD_SIZE {
                bail!("HTTP request head exceeds {} bytes", MAX_HEAD_SIZE);
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                bail!("Unexpected EOF while reading HTTP request");
            }
        }
    }

    /// 解析请求，失败时回复 400
    pub async fn read_request(&mut self) -> Result<Option<ProxyRequest>> {
        let parsed = match self.read_head().await {
            Ok(Some(head)) => ProxyRequest::from_head(&head).map(Some),
            Ok(None) => return Ok(None),
            Err(e) => Err(e),
        };

        if parsed.is_err() {
            let _ = self.stream.write_all(BAD_REQUEST).await;
            let _ = self.stream.shutdown().await;
        }
        parsed
    }

    async fn respond(&mut self, response: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(response).await?;
        self.stream.flush().await
    }

    /// 回复 502 并关闭
    async fn reject(mut self) {
        if let Err(e) = self.respond(BAD_GATEWAY).await {
            debug!("Failed to send 502 response: {}", e);
        }
        let _ = self.stream.shutdown().await;
    }

    /// 切换到透明转发，返回底层连接和请求头之后缓冲的字节
    fn into_opaque(self) -> (S, Bytes) {
        (self.stream, self.buffer.freeze())
    }

    /// 不回复任何内容，丢弃客户端数据直到客户端关闭或空闲超时
    async fn hold(mut self, idle_timeout: Option<Duration>) {
        self.buffer.clear();
        let mut buf = vec![0u8; DRAIN_BUFFER_SIZE];
        loop {
            let read = self.stream.read(&mut buf);
            let result = match idle_timeout {
                Some(limit) => match timeout(limit, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("Held connection idle for {:?}, closing", limit);
                        break;
                    }
                },
                None => read.await,
            };
            match result {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!("Discarded {} bytes from held connection", n),
            }
        }
    }
}

/// 处理一个入站连接
pub async fn handle_connection<S>(stream: S, context: &InboundContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let inbound = &context.inbound;
    let mut conn = HttpConnection::new(stream);

    let Some(request) = conn.read_request().await? else {
        debug!("Inbound '{}': client closed before sending a request", inbound.tag);
        return Ok(());
    };

    info!(
        "Inbound '{}': {:?} {}",
        inbound.tag, request.kind, request.destination
    );

    let Some(policy) = context.router.resolve_outbound(inbound) else {
        info!(
            "Inbound '{}': no outbound for {}, holding connection",
            inbound.tag, request.destination
        );
        conn.hold(context.idle_timeout).await;
        return Ok(());
    };

    if let OutboundProtocol::Unsupported(name) = &policy.protocol {
        error!(
            "Inbound '{}': outbound '{}' uses unsupported protocol '{}'",
            inbound.tag, policy.tag, name
        );
        conn.hold(context.idle_timeout).await;
        return Ok(());
    }

    let session = match policy
        .connect(&request.destination, context.connect_timeout)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(
                "Inbound '{}': outbound '{}' failed to reach {}: {}",
                inbound.tag, policy.tag, request.destination, e
            );
            conn.reject().await;
            return Ok(());
        }
    };

    let (client, first_chunk) = match request.kind {
        RequestKind::Connect => {
            let ack = format!("{} 200 Connection established\r\n\r\n", request.version);
            conn.respond(ack.as_bytes())
                .await
                .context("Failed to acknowledge CONNECT")?;
            conn.into_opaque()
        }
        RequestKind::Proxy => {
            let head = request.forward_head.unwrap_or_default();
            let (stream, buffered) = conn.into_opaque();
            let mut first = BytesMut::with_capacity(head.len() + buffered.len());
            first.extend_from_slice(&head);
            first.extend_from_slice(&buffered);
            (stream, first.freeze())
        }
    };

    let label = format!("{}/{} -> {}", inbound.tag, policy.tag, request.destination);
    let stats = RelayPair::new(client, session.stream, session.state)
        .with_initial(first_chunk)
        .with_idle_timeout(context.idle_timeout)
        .with_label(label.clone())
        .run()
        .await;

    info!(
        "[{}] closed (up {} bytes, down {} bytes, dropped {} chunks)",
        label, stats.upstream_bytes, stats.downstream_bytes, stats.dropped_chunks
    );
    Ok(())
}
