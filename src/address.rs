/// 目标地址与地址类型分类
use std::fmt;
use std::net::IpAddr;

/// 地址类型标记（与 SOCKS5 的 ATYP 取值一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 0x01,
    Domain = 0x03,
    Ipv6 = 0x04,
}

impl AddressType {
    /// 线上编码使用的单字节标记
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// 判断主机字符串属于 IPv4、IPv6 还是域名
///
/// 带方括号的 IPv6 字面量（如 `[::1]`）同样识别为 IPv6
pub fn classify(host: &str) -> AddressType {
    match strip_brackets(host).parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => AddressType::Ipv4,
        Ok(IpAddr::V6(_)) => AddressType::Ipv6,
        Err(_) => AddressType::Domain,
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// 出站目标（主机 + 端口）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: strip_brackets(host.as_ref()).to_string(),
            port,
        }
    }

    /// 主机名（IPv6 不带方括号）
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address_type(&self) -> AddressType {
        classify(&self.host)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address_type() {
            AddressType::Ipv6 => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
