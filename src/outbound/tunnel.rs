use super::{OutboundSession, TunnelOutbound};
use crate::address::Destination;
use crate::error::Result;
use crate::protocol::{TunnelHeader, TunnelRequest};
use crate::relay::RelayState;
use crate::transport;
use std::time::Duration;
use tracing::debug;

/// 连接中继服务器；首个客户端数据块由转发引擎成帧
pub(super) async fn connect(
    outbound: &TunnelOutbound,
    destination: &Destination,
    connect_timeout: Option<Duration>,
) -> Result<OutboundSession> {
    // 目标无法编码时不必拨号
    let request = TunnelRequest::connect(destination)?;

    let stream = transport::dial(outbound.client.clone(), connect_timeout).await?;
    debug!(
        "Tunnel outbound connected to {} for {} ({:?})",
        outbound.remote(),
        destination,
        request.address_type()
    );

    Ok(OutboundSession {
        stream,
        state: RelayState::AwaitingFraming(TunnelHeader::new(
            outbound.credential.clone(),
            request,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use crate::protocol::TunnelCredential;
    use crate::transport::TcpTransportClient;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tunnel_session_awaits_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let outbound = TunnelOutbound::new(
            TunnelCredential::new("secret"),
            Arc::new(TcpTransportClient::new("127.0.0.1", port)),
        );
        let session = connect(&outbound, &Destination::new("host", 9443), None)
            .await
            .unwrap();

        let RelayState::AwaitingFraming(header) = &session.state else {
            panic!("tunnel session must start with framing pending");
        };
        assert_eq!(header.request().address_type(), AddressType::Domain);
        assert_eq!(header.request().host(), "host");
        assert_eq!(header.request().port(), 9443);
    }

    #[tokio::test]
    async fn test_unencodable_destination_skips_dial() {
        // 端口指向无人监听的地址：若真的拨号会得到连接失败而不是协议错误
        let outbound = TunnelOutbound::new(
            TunnelCredential::new("secret"),
            Arc::new(TcpTransportClient::new("127.0.0.1", 1)),
        );
        let long_host = "a".repeat(300);
        let err = match connect(&outbound, &Destination::new(&long_host, 443), None).await {
            Ok(_) => panic!("domain longer than 255 bytes cannot be framed"),
            Err(e) => e,
        };
        assert!(matches!(err, crate::error::SurferError::ProtocolError(_)));
    }
}
