/// 自定义错误类型
///
/// 传输层、隧道编码与转发引擎统一返回 `SurferError`，
/// 调用方可以据此区分拨号失败、握手失败与超时
use std::io;
use thiserror::Error;

/// Surfer 的主要错误类型
#[derive(Error, Debug)]
pub enum SurferError {
    /// 连接失败（连接被拒绝、DNS 解析失败等）
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// WebSocket 握手失败（服务端拒绝升级或握手阶段收到意外消息）
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// TLS 错误
    #[error("TLS error: {0}")]
    TlsError(String),

    /// 协议错误
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// 不支持的出站协议
    #[error("Unsupported outbound protocol: {0}")]
    UnsupportedOutbound(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, SurferError>;

impl SurferError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建握手失败错误
    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// 创建 TLS 错误
    pub fn tls_error(msg: impl Into<String>) -> Self {
        Self::TlsError(msg.into())
    }

    /// 创建协议错误
    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为握手失败
    pub fn is_handshake_failed(&self) -> bool {
        matches!(self, Self::HandshakeFailed(_))
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handshake_error() {
        let err = SurferError::handshake_failed("server answered 403 Forbidden");
        assert!(err.is_handshake_failed());
        assert_eq!(
            err.to_string(),
            "Handshake failed: server answered 403 Forbidden"
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = SurferError::timeout(Duration::from_secs(10));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = SurferError::connection_failed("127.0.0.1:8080", io_err);
        assert!(err.to_string().contains("Failed to connect"));
        assert!(err.to_string().contains("127.0.0.1:8080"));
    }

    #[test]
    fn test_error_is_checks() {
        let handshake_err = SurferError::handshake_failed("test");
        let config_err = SurferError::config_error("test");
        let timeout_err = SurferError::timeout(Duration::from_secs(1));

        assert!(handshake_err.is_handshake_failed());
        assert!(!handshake_err.is_config_error());
        assert!(!handshake_err.is_timeout());

        assert!(config_err.is_config_error());
        assert!(!config_err.is_handshake_failed());

        assert!(timeout_err.is_timeout());
        assert!(!timeout_err.is_config_error());
    }
}
