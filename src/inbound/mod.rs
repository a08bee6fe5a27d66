/// 入站监听
mod http;

pub use self::http::{handle_connection, HttpConnection, ProxyRequest, RequestKind};

use crate::config::{InboundConfig, InboundProtocol};
use crate::route::Router;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// 一个入站的所有连接共享的只读上下文
pub struct InboundContext {
    pub inbound: InboundConfig,
    pub router: Arc<dyn Router>,
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_connections: usize,
}

/// 绑定入站地址并运行监听器
pub async fn run_listener(
    context: Arc<InboundContext>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let bind_addr = context.inbound.bind_address();
    info!(
        "Inbound '{}': Binding to {} ({:?})",
        context.inbound.tag, bind_addr, context.inbound.protocol
    );

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind inbound to {}", bind_addr))?;

    serve(listener, context, shutdown_rx).await
}

/// 在已绑定的监听器上接受连接，直到收到关闭信号
pub async fn serve(
    listener: TcpListener,
    context: Arc<InboundContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let tag = context.inbound.tag.clone();
    info!("Inbound '{}': Listening on {}", tag, listener.local_addr()?);

    // 创建信号量限制并发连接数
    let connection_limiter = Arc::new(Semaphore::new(context.max_connections));
    info!(
        "Inbound '{}': Maximum concurrent connections: {}",
        tag, context.max_connections
    );

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY: {}", e);
                        }

                        let permit = match connection_limiter.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!(
                                    "Inbound '{}': Connection limit reached ({}), rejecting connection from {}",
                                    tag, context.max_connections, peer_addr
                                );
                                drop(stream);
                                continue;
                            }
                        };

                        debug!("Inbound '{}': Accepted connection from {}", tag, peer_addr);

                        let context = context.clone();
                        tokio::spawn(async move {
                            // 持有 permit 直到任务结束，自动释放
                            let _permit = permit;
                            let result = match context.inbound.protocol {
                                InboundProtocol::Http => handle_connection(stream, &context).await,
                            };
                            if let Err(e) = result {
                                error!(
                                    "Inbound '{}' connection from {} failed: {:#}",
                                    context.inbound.tag, peer_addr, e
                                );
                            }
                        });
                    }
                    Err(e) => {
                        error!("Inbound '{}': Accept error: {}", tag, e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Inbound '{}': Shutting down", tag);
                break Ok(());
            }
        }
    }
}
