mod factory;
mod tcp;
mod tls;
mod ws;

pub use factory::{build_tls_connector, create_transport_client};
pub use tcp::TcpTransportClient;
pub use ws::{WsStream, WsTransportClient};

use crate::error::{Result, SurferError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::debug;

/// 传输层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// 原始 TCP
    Tcp,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "tcp"),
            TransportType::Ws => write!(f, "ws"),
            TransportType::Wss => write!(f, "wss"),
        }
    }
}

/// 隧道出站的传输配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportSetting {
    /// 直接 TCP 连接到中继服务器
    Tcp(TcpSetting),
    /// 通过 WebSocket（可选 TLS）连接到中继服务器
    Ws(WsSetting),
}

impl TransportSetting {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportSetting::Tcp(_) => TransportType::Tcp,
            TransportSetting::Ws(ws) if ws.tls => TransportType::Wss,
            TransportSetting::Ws(_) => TransportType::Ws,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSetting {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsSetting {
    /// 服务器主机名
    pub host: String,
    /// 服务器端口（缺省时 ws 为 80，wss 为 443）
    #[serde(default)]
    pub port: Option<u16>,
    /// 升级请求路径
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// 是否先建立 TLS
    #[serde(default)]
    pub tls: bool,
    /// 是否跳过证书验证（默认跳过）
    #[serde(default = "default_skip_verify")]
    pub skip_verify: bool,
    /// TLS SNI（缺省使用 host）
    #[serde(default)]
    pub server_name: Option<String>,
    /// 自定义 CA 证书路径
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

fn default_ws_path() -> String {
    "/".to_string()
}

fn default_skip_verify() -> bool {
    true
}

impl WsSetting {
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "wss"
        } else {
            "ws"
        }
    }

    /// 实际连接端口
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 443 } else { 80 })
    }

    /// 构造握手 URL，例如 `wss://relay.example.com:443/tunnel`
    pub fn url(&self) -> Result<url::Url> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("{}://{}:{}{}", self.scheme(), host, self.effective_port(), path);
        url::Url::parse(&raw)
            .map_err(|e| SurferError::config_error(format!("Invalid WebSocket URL {}: {}", raw, e)))
    }
}

/// 传输层连接抽象
///
/// 统一封装原始 TCP 与 WebSocket 连接
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Pin<Box<dyn Transport>>;

/// 传输层客户端接口
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// 连接到远端并返回可直接收发应用数据的连接
    async fn connect(&self) -> Result<BoxedTransport>;

    /// 获取传输类型
    fn transport_type(&self) -> TransportType;

    /// 远端地址（用于日志）
    fn remote(&self) -> String;
}

/// 在后台发起拨号，结果通过单次通道返回
///
/// 返回的 [`Dial`] 只能被等待一次；丢弃它不会影响后台任务，
/// 拨号完成后连接随任务一起释放
pub fn dial(client: Arc<dyn TransportClient>, connect_timeout: Option<Duration>) -> Dial {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let remote = client.remote();
        let result = match connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, client.connect()).await {
                Ok(result) => result,
                Err(_) => Err(SurferError::timeout(limit)),
            },
            None => client.connect().await,
        };

        if tx.send(result).is_err() {
            debug!("Dial to {} completed but nobody is waiting for it", remote);
        }
    });

    Dial { rx }
}

/// 拨号结果
pub struct Dial {
    rx: oneshot::Receiver<Result<BoxedTransport>>,
}

impl Future for Dial {
    type Output = Result<BoxedTransport>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(SurferError::Other(anyhow::anyhow!(
                    "dial task ended without reporting a result"
                )))
            })
        })
    }
}
