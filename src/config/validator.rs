use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::warn;

use super::{AppConfig, InboundConfig, OutboundConfig, RouteConfig, RuntimeConfig};
use crate::transport::TransportSetting;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            bail!("{}: port cannot be 0", context);
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证名称不为空
    pub fn validate_name(name: &str, context: &str) -> Result<()> {
        if name.trim().is_empty() {
            bail!("{}: name cannot be empty", context);
        }
        Ok(())
    }

    /// 验证运行时配置
    pub fn validate_runtime_config(config: &RuntimeConfig) -> Result<()> {
        if config.workers == Some(0) {
            bail!("runtime.workers must be greater than 0");
        }
        if config.max_connections == 0 {
            bail!("runtime.max_connections must be greater than 0");
        }
        if config.connect_timeout_secs == 0 {
            warn!("runtime.connect_timeout_secs is 0, outbound dials will never time out");
        }
        Ok(())
    }

    /// 验证入站配置列表
    pub fn validate_inbounds(inbounds: &[InboundConfig]) -> Result<()> {
        if inbounds.is_empty() {
            bail!("No inbound configurations defined");
        }

        let mut seen_tags = HashSet::new();
        let mut seen_binds = HashSet::new();

        for inbound in inbounds {
            Self::validate_name(&inbound.tag, "Inbound tag")?;

            if !seen_tags.insert(&inbound.tag) {
                bail!(
                    "Duplicate inbound tag '{}': each inbound must have a unique tag",
                    inbound.tag
                );
            }

            if !seen_binds.insert((inbound.listen.clone(), inbound.port)) {
                bail!(
                    "Duplicate inbound binding {}:{}: each inbound must use a different listen address/port",
                    inbound.listen,
                    inbound.port
                );
            }

            let context = format!("Inbound '{}'", inbound.tag);
            Self::validate_port(inbound.port, &context)?;
            Self::validate_address(&inbound.listen, &context)?;
            Self::check_inbound_security(&inbound.tag, &inbound.listen);
        }

        Ok(())
    }

    /// 检查入站安全性（监听地址）
    fn check_inbound_security(tag: &str, listen: &str) {
        if listen != "127.0.0.1" && listen != "localhost" && listen != "::1" {
            warn!(
                "Inbound '{}' is listening on '{}', the proxy is reachable from your network. \
                 Use listen = '127.0.0.1' for localhost-only access.",
                tag, listen
            );
        }
    }

    /// 验证出站配置列表
    pub fn validate_outbounds(outbounds: &[OutboundConfig]) -> Result<()> {
        let mut seen_tags = HashSet::new();

        for outbound in outbounds {
            Self::validate_name(&outbound.tag, "Outbound tag")?;

            if !seen_tags.insert(&outbound.tag) {
                bail!(
                    "Duplicate outbound tag '{}': each outbound must have a unique tag",
                    outbound.tag
                );
            }

            match outbound.protocol.as_str() {
                "direct" => {}
                "tunnel" | "trojan" => Self::validate_tunnel_outbound(outbound)?,
                other => warn!(
                    "Outbound '{}' uses unsupported protocol '{}', connections routed to it will be held",
                    outbound.tag, other
                ),
            }
        }

        Ok(())
    }

    /// 验证隧道出站必填项
    fn validate_tunnel_outbound(outbound: &OutboundConfig) -> Result<()> {
        let context = format!("Outbound '{}'", outbound.tag);

        match outbound.password.as_deref() {
            Some(password) if !password.is_empty() => {}
            _ => bail!("{}: tunnel outbound requires a password", context),
        }

        match &outbound.transport {
            Some(TransportSetting::Tcp(tcp)) => {
                Self::validate_address(&tcp.host, &context)?;
                Self::validate_port(tcp.port, &context)?;
            }
            Some(TransportSetting::Ws(ws)) => {
                Self::validate_address(&ws.host, &context)?;
                if let Some(port) = ws.port {
                    Self::validate_port(port, &context)?;
                }
                if ws.tls && ws.skip_verify {
                    warn!(
                        "{}: certificate verification is disabled for {}",
                        context, ws.host
                    );
                }
            }
            None => bail!("{}: tunnel outbound requires a transport", context),
        }

        Ok(())
    }

    /// 验证路由规则
    pub fn validate_routes(
        routes: &[RouteConfig],
        inbounds: &[InboundConfig],
        outbounds: &[OutboundConfig],
    ) -> Result<()> {
        let mut seen_inbounds = HashSet::new();

        for route in routes {
            if !inbounds.iter().any(|i| i.tag == route.inbound) {
                bail!("Route references unknown inbound '{}'", route.inbound);
            }
            if !outbounds.iter().any(|o| o.tag == route.outbound) {
                bail!("Route references unknown outbound '{}'", route.outbound);
            }
            if !seen_inbounds.insert(&route.inbound) {
                warn!(
                    "Inbound '{}' already has a route, route to '{}' is ignored",
                    route.inbound, route.outbound
                );
            }
        }

        for inbound in inbounds {
            if !seen_inbounds.contains(&inbound.tag) {
                warn!(
                    "Inbound '{}' has no route, its connections will be held without a response",
                    inbound.tag
                );
            }
        }

        Ok(())
    }

    /// 验证完整配置
    pub fn validate_app_config(config: &AppConfig) -> Result<()> {
        Self::validate_runtime_config(&config.runtime)?;
        Self::validate_inbounds(&config.inbounds)?;
        Self::validate_outbounds(&config.outbounds)?;
        Self::validate_routes(&config.routes, &config.inbounds, &config.outbounds)?;
        Ok(())
    }
}
