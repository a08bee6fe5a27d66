// 配置管理模块

mod validator;

pub use validator::ConfigValidator;

use crate::transport::TransportSetting;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 运行时参数
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// 入站监听列表
    #[serde(default)]
    pub inbounds: Vec<InboundConfig>,
    /// 出站列表
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,
    /// 路由规则（入站 tag -> 出站 tag）
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 工作线程数（默认为 CPU 核数）
    #[serde(default)]
    pub workers: Option<usize>,
    /// 拨号（含 TLS 与 WebSocket 握手）超时，0 表示不限制
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 转发空闲超时，0 表示不限制
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// 每个入站的最大并发连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    5 * 60
}

fn default_max_connections() -> usize {
    1000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// 实际使用的工作线程数
    pub fn worker_threads(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

/// 入站协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InboundProtocol {
    /// HTTP 代理（普通转发 + CONNECT 隧道）
    #[default]
    Http,
}

/// 入站配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// 入站名称，供路由规则引用
    pub tag: String,
    /// 监听地址（默认 127.0.0.1）
    #[serde(default = "default_listen")]
    pub listen: String,
    /// 监听端口
    pub port: u16,
    /// 入站协议
    #[serde(default)]
    pub protocol: InboundProtocol,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

impl InboundConfig {
    pub fn bind_address(&self) -> String {
        if self.listen.contains(':') {
            format!("[{}]:{}", self.listen, self.port)
        } else {
            format!("{}:{}", self.listen, self.port)
        }
    }
}

/// 出站配置（原始形式，加载后转换为 `OutboundPolicy`）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// 出站名称
    pub tag: String,
    /// 出站协议：direct、tunnel（别名 trojan）
    pub protocol: String,
    /// 隧道密码
    #[serde(default)]
    pub password: Option<String>,
    /// 隧道传输
    #[serde(default)]
    pub transport: Option<TransportSetting>,
}

/// 路由规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// 入站 tag
    pub inbound: String,
    /// 出站 tag
    pub outbound: String,
}

impl AppConfig {
    /// 从 TOML 文本解析并验证
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse configuration")?;
        ConfigValidator::validate_app_config(&config).context("Configuration validation failed")?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn find_outbound(&self, tag: &str) -> Option<&OutboundConfig> {
        self.outbounds.iter().find(|o| o.tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WsSetting;

    const SAMPLE: &str = r#"
[runtime]
workers = 2
connect_timeout_secs = 5

[[inbounds]]
tag = "http-in"
port = 8080

[[outbounds]]
tag = "direct"
protocol = "direct"

[[outbounds]]
tag = "relay"
protocol = "tunnel"
password = "secret"

[outbounds.transport]
type = "ws"
host = "relay.example.com"
path = "/surf"
tls = true

[[routes]]
inbound = "http-in"
outbound = "relay"
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.runtime.worker_threads(), 2);
        assert_eq!(config.runtime.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.runtime.idle_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.runtime.max_connections, 1000);

        let inbound = &config.inbounds[0];
        assert_eq!(inbound.bind_address(), "127.0.0.1:8080");
        assert_eq!(inbound.protocol, InboundProtocol::Http);

        let relay = config.find_outbound("relay").unwrap();
        assert_eq!(relay.password.as_deref(), Some("secret"));
        assert_eq!(
            relay.transport,
            Some(TransportSetting::Ws(WsSetting {
                host: "relay.example.com".to_string(),
                port: None,
                path: "/surf".to_string(),
                tls: true,
                skip_verify: true,
                server_name: None,
                ca_cert_path: None,
            }))
        );
    }

    #[test]
    fn test_zero_timeouts_disable() {
        let runtime = RuntimeConfig {
            connect_timeout_secs: 0,
            idle_timeout_secs: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(runtime.connect_timeout(), None);
        assert_eq!(runtime.idle_timeout(), None);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let inbound = InboundConfig {
            tag: "v6".to_string(),
            listen: "::1".to_string(),
            port: 3128,
            protocol: InboundProtocol::Http,
        };
        assert_eq!(inbound.bind_address(), "[::1]:3128");
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml("[[inbounds]\ntag = ").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse configuration"));
    }
}
