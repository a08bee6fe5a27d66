use super::{BoxedTransport, TransportClient, TransportType};
use crate::address::Destination;
use crate::error::{Result, SurferError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// 原始 TCP 传输客户端，连接建立后不做任何握手
pub struct TcpTransportClient {
    destination: Destination,
}

impl TcpTransportClient {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            destination: Destination::new(host, port),
        }
    }
}

impl From<Destination> for TcpTransportClient {
    fn from(destination: Destination) -> Self {
        Self { destination }
    }
}

#[async_trait]
impl TransportClient for TcpTransportClient {
    async fn connect(&self) -> Result<BoxedTransport> {
        let addr = self.destination.to_string();
        debug!("Connecting to {} via TCP", addr);

        let stream = TcpStream::connect((self.destination.host(), self.destination.port()))
            .await
            .map_err(|e| SurferError::connection_failed(&addr, e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        debug!("TCP connection established to {}", addr);
        Ok(Box::pin(stream))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn remote(&self) -> String {
        self.destination.to_string()
    }
}
