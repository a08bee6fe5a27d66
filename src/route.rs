/// 路由：为入站连接选择出站
use crate::config::{AppConfig, RouteConfig};
use crate::outbound::OutboundPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use crate::config::InboundConfig as InboundPolicy;

/// 路由接口
///
/// 返回 None 表示没有可用的出站，入站不会发起任何连接
pub trait Router: Send + Sync {
    fn resolve_outbound(&self, inbound: &InboundPolicy) -> Option<Arc<OutboundPolicy>>;
}

/// 按入站 tag 查表的路由器
#[derive(Default)]
pub struct TagRouter {
    routes: HashMap<String, Arc<OutboundPolicy>>,
}

impl TagRouter {
    /// 由路由规则和已构建的出站列表创建；同一入站以第一条规则为准
    pub fn new(routes: &[RouteConfig], outbounds: &[Arc<OutboundPolicy>]) -> Self {
        let mut table = HashMap::new();
        for route in routes {
            let Some(outbound) = outbounds.iter().find(|o| o.tag == route.outbound) else {
                debug!(
                    "Route {} -> {} skipped: outbound not found",
                    route.inbound, route.outbound
                );
                continue;
            };
            table
                .entry(route.inbound.clone())
                .or_insert_with(|| outbound.clone());
        }
        Self { routes: table }
    }

    /// 从完整配置构建出站策略与路由表
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let outbounds = config
            .outbounds
            .iter()
            .map(|o| OutboundPolicy::from_config(o).map(Arc::new))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(&config.routes, &outbounds))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for TagRouter {
    fn resolve_outbound(&self, inbound: &InboundPolicy) -> Option<Arc<OutboundPolicy>> {
        self.routes.get(&inbound.tag).cloned()
    }
}
