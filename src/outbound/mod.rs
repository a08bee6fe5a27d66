/// 出站适配器
///
/// 配置在加载时转换为封闭的 [`OutboundProtocol`]，每个连接只做一次 match 分发。
/// 拨号成功后返回 [`OutboundSession`]：已就绪的连接加上转发初始状态
/// （直连为 `Relaying`，隧道为 `AwaitingFraming`）。
mod direct;
mod tunnel;

use crate::address::Destination;
use crate::config::OutboundConfig;
use crate::error::{Result, SurferError};
use crate::protocol::TunnelCredential;
use crate::relay::RelayState;
use crate::transport::{self, BoxedTransport, TransportClient};
use anyhow::{bail, Context};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 隧道出站（凭证 + 预先构建好的传输客户端）
pub struct TunnelOutbound {
    credential: TunnelCredential,
    client: Arc<dyn TransportClient>,
}

impl TunnelOutbound {
    pub fn new(credential: TunnelCredential, client: Arc<dyn TransportClient>) -> Self {
        Self { credential, client }
    }

    pub fn credential(&self) -> &TunnelCredential {
        &self.credential
    }

    /// 中继服务器地址（用于日志）
    pub fn remote(&self) -> String {
        self.client.remote()
    }
}

/// 出站协议
pub enum OutboundProtocol {
    /// 直接连接目标
    Direct,
    /// 通过隧道协议连接中继服务器
    Tunnel(TunnelOutbound),
    /// 无法识别的协议名，路由到这里的连接不会发起任何出站
    Unsupported(String),
}

impl OutboundProtocol {
    pub fn name(&self) -> &str {
        match self {
            OutboundProtocol::Direct => "direct",
            OutboundProtocol::Tunnel(_) => "tunnel",
            OutboundProtocol::Unsupported(name) => name,
        }
    }
}

/// 一个出站选择，加载后只读，被所有连接共享
pub struct OutboundPolicy {
    pub tag: String,
    pub protocol: OutboundProtocol,
}

impl fmt::Debug for OutboundPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPolicy")
            .field("tag", &self.tag)
            .field("protocol", &self.protocol.name())
            .finish()
    }
}

impl OutboundPolicy {
    pub fn direct(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            protocol: OutboundProtocol::Direct,
        }
    }

    /// 从原始配置构建；wss 的 TLS 配置在这里创建一次
    pub fn from_config(config: &OutboundConfig) -> anyhow::Result<Self> {
        let protocol = match config.protocol.as_str() {
            "direct" => OutboundProtocol::Direct,
            "tunnel" | "trojan" => {
                let Some(password) = config.password.as_deref() else {
                    bail!("Outbound '{}': tunnel outbound requires a password", config.tag);
                };
                let Some(setting) = config.transport.as_ref() else {
                    bail!("Outbound '{}': tunnel outbound requires a transport", config.tag);
                };

                let connector = transport::build_tls_connector(setting)?;
                let client = transport::create_transport_client(setting, connector)
                    .with_context(|| format!("Outbound '{}': invalid transport", config.tag))?;

                OutboundProtocol::Tunnel(TunnelOutbound::new(TunnelCredential::new(password), client))
            }
            other => OutboundProtocol::Unsupported(other.to_string()),
        };

        Ok(Self {
            tag: config.tag.clone(),
            protocol,
        })
    }

    /// 为目标建立出站连接
    ///
    /// 拨号在后台任务中完成，结果通过单次通道送回
    pub async fn connect(
        &self,
        destination: &Destination,
        connect_timeout: Option<Duration>,
    ) -> Result<OutboundSession> {
        match &self.protocol {
            OutboundProtocol::Direct => direct::connect(destination, connect_timeout).await,
            OutboundProtocol::Tunnel(outbound) => {
                tunnel::connect(outbound, destination, connect_timeout).await
            }
            OutboundProtocol::Unsupported(name) => {
                Err(SurferError::UnsupportedOutbound(name.clone()))
            }
        }
    }
}

/// 拨号成功的出站连接
pub struct OutboundSession {
    pub stream: BoxedTransport,
    pub state: RelayState,
}
