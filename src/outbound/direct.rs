use super::OutboundSession;
use crate::address::Destination;
use crate::error::Result;
use crate::relay::RelayState;
use crate::transport::{self, TcpTransportClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 直连目标，不做任何成帧
pub(super) async fn connect(
    destination: &Destination,
    connect_timeout: Option<Duration>,
) -> Result<OutboundSession> {
    let client = Arc::new(TcpTransportClient::from(destination.clone()));
    let stream = transport::dial(client, connect_timeout).await?;
    debug!("Direct outbound connected to {}", destination);

    Ok(OutboundSession {
        stream,
        state: RelayState::Relaying,
    })
}
