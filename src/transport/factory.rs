// 传输层工厂 - 根据出站配置创建传输实例

use super::tls;
use crate::error::Result;
use crate::transport::{TcpTransportClient, TransportClient, TransportSetting, WsTransportClient};
use anyhow::Context;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// 为 wss 传输构建 TLS 连接器；其他传输返回 None
///
/// 在加载配置时调用一次，之后由所有连接共享
pub fn build_tls_connector(setting: &TransportSetting) -> anyhow::Result<Option<TlsConnector>> {
    match setting {
        TransportSetting::Ws(ws) if ws.tls => {
            let connector = tls::client_connector(ws)
                .with_context(|| format!("Failed to build TLS config for {}", ws.host))?;
            Ok(Some(connector))
        }
        _ => Ok(None),
    }
}

/// 创建传输层客户端
pub fn create_transport_client(
    setting: &TransportSetting,
    connector: Option<TlsConnector>,
) -> Result<Arc<dyn TransportClient>> {
    let client: Arc<dyn TransportClient> = match setting {
        TransportSetting::Tcp(tcp) => Arc::new(TcpTransportClient::new(&tcp.host, tcp.port)),
        TransportSetting::Ws(ws) => Arc::new(WsTransportClient::new(ws, connector)?),
    };

    Ok(client)
}
