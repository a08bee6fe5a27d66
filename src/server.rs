/// 进程级启动：为每个入站启动监听器，收到关闭信号后统一停止
use crate::config::AppConfig;
use crate::inbound::{self, InboundContext};
use crate::route::{Router, TagRouter};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

pub struct Server {
    contexts: Vec<Arc<InboundContext>>,
}

impl Server {
    /// 构建路由与所有出站（包括 TLS 配置）
    pub fn new(config: &AppConfig) -> Result<Self> {
        let router: Arc<dyn Router> =
            Arc::new(TagRouter::from_config(config).context("Failed to build outbounds")?);

        let contexts = config
            .inbounds
            .iter()
            .map(|inbound| {
                Arc::new(InboundContext {
                    inbound: inbound.clone(),
                    router: router.clone(),
                    connect_timeout: config.runtime.connect_timeout(),
                    idle_timeout: config.runtime.idle_timeout(),
                    max_connections: config.runtime.max_connections,
                })
            })
            .collect();

        Ok(Self { contexts })
    }

    pub fn contexts(&self) -> &[Arc<InboundContext>] {
        &self.contexts
    }

    /// 运行直到 `shutdown` 完成或某个监听器出错
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut listeners = JoinSet::new();

        for context in self.contexts {
            listeners.spawn(inbound::run_listener(context, shutdown_tx.subscribe()));
        }

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping listeners...");
                    break Ok(());
                }
                joined = listeners.join_next() => match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!("Listener failed: {:#}", e);
                        break Err(e);
                    }
                    Some(Err(e)) => break Err(anyhow::anyhow!("Listener task panicked: {}", e)),
                    None => break Ok(()),
                }
            }
        };

        let _ = shutdown_tx.send(());
        while listeners.join_next().await.is_some() {}

        info!("Surfer stopped");
        result
    }
}

/// 运行全部入站，Ctrl+C 停止
pub async fn run_server(config: AppConfig) -> Result<()> {
    let server = Server::new(&config)?;
    info!(
        "Starting {} inbound(s), {} outbound(s) (Press Ctrl+C to stop)",
        config.inbounds.len(),
        config.outbounds.len()
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
