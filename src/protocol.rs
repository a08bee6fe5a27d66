/// 隧道协议编解码
///
/// 帧格式（与 trojan 协议一致）：
///
/// ```text
/// +-----------------------+---------+----------------+---------+----------+
/// | hex(SHA224(password)) |  CRLF   | Tunnel Request |  CRLF   | Payload  |
/// +-----------------------+---------+----------------+---------+----------+
/// |          56           | X'0D0A' |    Variable    | X'0D0A' | Variable |
/// +-----------------------+---------+----------------+---------+----------+
///
/// Tunnel Request:
/// +-----+------+----------+----------+
/// | CMD | ATYP | DST.ADDR | DST.PORT |
/// +-----+------+----------+----------+
/// |  1  |  1   | Variable |    2     |
/// +-----+------+----------+----------+
/// ```
///
/// 本端只作为隧道客户端，每个连接只在第一个数据块上构造一次帧。
use crate::address::{AddressType, Destination};
use crate::error::{Result, SurferError};
use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha224};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// 凭证摘要长度（SHA-224 的十六进制表示）
pub const DIGEST_LEN: usize = 56;

const CRLF: &[u8] = b"\r\n";

/// 计算共享密钥的凭证摘要：小写十六进制 SHA-224，固定 56 个字符
pub fn credential_digest(secret: &str) -> String {
    hex::encode(Sha224::digest(secret.as_bytes()))
}

/// 隧道凭证，只保存摘要，不保留明文密码
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelCredential {
    digest: String,
}

impl TunnelCredential {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: credential_digest(secret),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Debug for TunnelCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelCredential")
            .field("digest", &format_args!("{}…", &self.digest[..8]))
            .finish()
    }
}

/// 请求命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
}

impl TryFrom<u8> for Command {
    type Error = SurferError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Command::Connect),
            other => Err(SurferError::protocol_error(format!(
                "unsupported tunnel command 0x{:02x}",
                other
            ))),
        }
    }
}

/// 隧道请求：命令 + 目标地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    command: Command,
    address_type: AddressType,
    host: String,
    port: u16,
}

impl TunnelRequest {
    /// 为目标地址创建 CONNECT 请求
    ///
    /// 域名超过 255 字节时无法编码，返回协议错误
    pub fn connect(destination: &Destination) -> Result<Self> {
        let address_type = destination.address_type();
        if address_type == AddressType::Domain {
            let len = destination.host().len();
            if len == 0 || len > u8::MAX as usize {
                return Err(SurferError::protocol_error(format!(
                    "domain name length {} out of range 1..=255",
                    len
                )));
            }
        }

        Ok(Self {
            command: Command::Connect,
            address_type,
            host: destination.host().to_string(),
            port: destination.port(),
        })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 编码后的长度（不含结尾 CRLF）
    fn encoded_len(&self) -> usize {
        let addr_len = match self.address_type {
            AddressType::Ipv4 => 4,
            AddressType::Ipv6 => 16,
            AddressType::Domain => 1 + self.host.len(),
        };
        2 + addr_len + 2
    }

    /// 写入 CMD、ATYP、DST.ADDR、DST.PORT 以及结尾的 CRLF
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.command as u8);
        buf.put_u8(self.address_type.as_byte());

        match (self.address_type, self.host.parse::<IpAddr>()) {
            (AddressType::Ipv4, Ok(IpAddr::V4(ip))) => buf.put_slice(&ip.octets()),
            (AddressType::Ipv6, Ok(IpAddr::V6(ip))) => buf.put_slice(&ip.octets()),
            _ => {
                buf.put_u8(self.host.len() as u8);
                buf.put_slice(self.host.as_bytes());
            }
        }

        buf.put_u16(self.port);
        buf.put_slice(CRLF);
    }
}

/// 一次认证请求的线上表示：凭证摘要 + 请求头 + 负载
///
/// 负载全程保持原始字节，不做十六进制中转
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelFrame {
    digest: String,
    request: TunnelRequest,
    payload: Bytes,
}

impl TunnelFrame {
    pub fn new(credential: &TunnelCredential, request: TunnelRequest, payload: Bytes) -> Self {
        Self {
            digest: credential.digest().to_string(),
            request,
            payload,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn request(&self) -> &TunnelRequest {
        &self.request
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 序列化为线上字节
    pub fn to_bytes(&self) -> Bytes {
        let len = DIGEST_LEN + CRLF.len() + self.request.encoded_len() + CRLF.len() + self.payload.len();
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(self.digest.as_bytes());
        buf.put_slice(CRLF);
        self.request.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// `to_bytes` 的逆过程，供测试及服务端实现对照
    ///
    /// 数据不完整时返回 `Ok(None)`；负载为头部之后的全部剩余字节
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < DIGEST_LEN + CRLF.len() + 2 {
            return Ok(None);
        }

        let digest = &buf[..DIGEST_LEN];
        if !digest
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
        {
            return Err(SurferError::protocol_error("credential digest is not lower-case hex"));
        }
        if &buf[DIGEST_LEN..DIGEST_LEN + 2] != CRLF {
            return Err(SurferError::protocol_error("missing CRLF after credential digest"));
        }

        let mut pos = DIGEST_LEN + 2;
        let command = Command::try_from(buf[pos])?;
        let atyp = buf[pos + 1];
        pos += 2;

        let (address_type, host) = match atyp {
            0x01 => {
                let Some(octets) = buf.get(pos..pos + 4) else {
                    return Ok(None);
                };
                pos += 4;
                let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
                (AddressType::Ipv4, ip.to_string())
            }
            0x04 => {
                let Some(octets) = buf.get(pos..pos + 16) else {
                    return Ok(None);
                };
                pos += 16;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(octets);
                (AddressType::Ipv6, Ipv6Addr::from(raw).to_string())
            }
            0x03 => {
                let Some(&len) = buf.get(pos) else {
                    return Ok(None);
                };
                let Some(name) = buf.get(pos + 1..pos + 1 + len as usize) else {
                    return Ok(None);
                };
                pos += 1 + len as usize;
                let host = std::str::from_utf8(name)
                    .map_err(|_| SurferError::protocol_error("domain name is not valid UTF-8"))?;
                (AddressType::Domain, host.to_string())
            }
            other => {
                return Err(SurferError::protocol_error(format!(
                    "unknown address type 0x{:02x}",
                    other
                )))
            }
        };

        let Some(tail) = buf.get(pos..pos + 4) else {
            return Ok(None);
        };
        let port = u16::from_be_bytes([tail[0], tail[1]]);
        if &tail[2..4] != CRLF {
            return Err(SurferError::protocol_error("missing CRLF after tunnel request"));
        }
        pos += 4;

        Ok(Some(Self {
            digest: String::from_utf8_lossy(digest).into_owned(),
            request: TunnelRequest {
                command,
                address_type,
                host,
                port,
            },
            payload: Bytes::copy_from_slice(&buf[pos..]),
        }))
    }
}

/// 构造帧所需的全部信息；`frame` 消耗自身，因此同一连接只能成帧一次
#[derive(Debug, Clone)]
pub struct TunnelHeader {
    credential: TunnelCredential,
    request: TunnelRequest,
}

impl TunnelHeader {
    pub fn new(credential: TunnelCredential, request: TunnelRequest) -> Self {
        Self {
            credential,
            request,
        }
    }

    pub fn request(&self) -> &TunnelRequest {
        &self.request
    }

    pub fn frame(self, payload: Bytes) -> TunnelFrame {
        TunnelFrame::new(&self.credential, self.request, payload)
    }
}

/// 便捷函数：secret + request + payload -> 帧字节
pub fn encode(secret: &str, request: TunnelRequest, payload: &[u8]) -> Bytes {
    TunnelFrame::new(
        &TunnelCredential::new(secret),
        request,
        Bytes::copy_from_slice(payload),
    )
    .to_bytes()
}
