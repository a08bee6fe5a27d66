use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::transport::TransportSetting;

/// 检查配置文件权限（仅Unix系统）
#[cfg(unix)]
pub fn check_config_file_permissions(config_path: &str) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tracing::warn;

    let metadata = fs::metadata(config_path)
        .with_context(|| format!("Failed to read metadata for config file: {}", config_path))?;
    let mode = metadata.permissions().mode();

    // 其他用户或组用户可读（o+r / g+r）
    if mode & 0o044 != 0 {
        warn!(
            "Config file '{}' is readable by group or others (permissions: {:o}), \
             it may contain tunnel passwords. RECOMMENDATION: chmod 600 {}",
            config_path,
            mode & 0o777,
            config_path
        );
    }

    Ok(())
}

/// Windows系统不进行权限检查
#[cfg(not(unix))]
pub fn check_config_file_permissions(_config_path: &str) -> Result<()> {
    Ok(())
}

#[derive(Serialize)]
struct CheckResult {
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    details: serde_json::Value,
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// 汇总配置内容，供 check 命令输出
fn summarize(config: &AppConfig) -> (serde_json::Value, Vec<String>) {
    let mut warnings = Vec::new();

    let inbounds: Vec<_> = config
        .inbounds
        .iter()
        .map(|i| {
            serde_json::json!({
                "tag": i.tag,
                "listen": i.bind_address(),
                "protocol": i.protocol,
            })
        })
        .collect();

    let outbounds: Vec<_> = config
        .outbounds
        .iter()
        .map(|o| {
            let transport = match &o.transport {
                Some(TransportSetting::Tcp(tcp)) => format!("tcp {}:{}", tcp.host, tcp.port),
                Some(TransportSetting::Ws(ws)) => match ws.url() {
                    Ok(url) => url.to_string(),
                    Err(e) => {
                        warnings.push(format!("Outbound '{}': {}", o.tag, e));
                        format!("{}://{}", ws.scheme(), ws.host)
                    }
                },
                None => "-".to_string(),
            };
            if !matches!(o.protocol.as_str(), "direct" | "tunnel" | "trojan") {
                warnings.push(format!(
                    "Outbound '{}' uses unsupported protocol '{}'",
                    o.tag, o.protocol
                ));
            }
            if let Some(TransportSetting::Ws(ws)) = &o.transport {
                if ws.tls && ws.skip_verify {
                    warnings.push(format!(
                        "Outbound '{}' skips certificate verification",
                        o.tag
                    ));
                }
            }
            serde_json::json!({
                "tag": o.tag,
                "protocol": o.protocol,
                "transport": transport,
            })
        })
        .collect();

    for inbound in &config.inbounds {
        if !config.routes.iter().any(|r| r.inbound == inbound.tag) {
            warnings.push(format!("Inbound '{}' has no route", inbound.tag));
        }
    }

    let routes: Vec<_> = config
        .routes
        .iter()
        .map(|r| format!("{} -> {}", r.inbound, r.outbound))
        .collect();

    let details = serde_json::json!({
        "workers": config.runtime.worker_threads(),
        "connect_timeout_secs": config.runtime.connect_timeout_secs,
        "idle_timeout_secs": config.runtime.idle_timeout_secs,
        "max_connections": config.runtime.max_connections,
        "inbounds": inbounds,
        "outbounds": outbounds,
        "routes": routes,
    });

    (details, warnings)
}

/// Check configuration file format
pub fn check_config(config_path: &str, format: &str) -> Result<()> {
    let path = Path::new(config_path);

    if !path.exists() {
        if format == "json" {
            let result = CheckResult {
                valid: false,
                warnings: vec![],
                error: Some(format!("Configuration file not found: {}", config_path)),
                details: serde_json::json!({}),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("✗ Configuration file not found: {}", config_path);
        }
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    if format == "text" {
        println!("Checking configuration file: {}\n", config_path);
    }

    let config = match AppConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            if format == "json" {
                let result = CheckResult {
                    valid: false,
                    warnings: vec![],
                    error: Some(format!("{:#}", e)),
                    details: serde_json::json!({}),
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("✗ {:#}", e);
            }
            return Err(e);
        }
    };

    let (details, warnings) = summarize(&config);

    if format == "json" {
        let result = CheckResult {
            valid: true,
            warnings,
            error: None,
            details,
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("✓ Workers: {}", config.runtime.worker_threads());
    println!(
        "✓ Connect timeout: {}s, idle timeout: {}s (0 = none)",
        config.runtime.connect_timeout_secs, config.runtime.idle_timeout_secs
    );
    for inbound in &config.inbounds {
        println!(
            "✓ Inbound '{}': {} ({:?})",
            inbound.tag,
            inbound.bind_address(),
            inbound.protocol
        );
    }
    if let Some(outbounds) = details["outbounds"].as_array() {
        for outbound in outbounds {
            println!(
                "✓ Outbound '{}': {} via {}",
                outbound["tag"].as_str().unwrap_or_default(),
                outbound["protocol"].as_str().unwrap_or_default(),
                outbound["transport"].as_str().unwrap_or_default()
            );
        }
    }
    for route in &config.routes {
        println!("✓ Route: {} -> {}", route.inbound, route.outbound);
    }
    for warning in &warnings {
        println!("⚠ Warning: {}", warning);
    }

    println!("\n✓ Configuration is valid!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_relative_path() {
        let expanded = expand_path("surfer.toml").unwrap();
        assert!(Path::new(&expanded).is_absolute());
        assert!(expanded.ends_with("surfer.toml"));
    }

    #[test]
    fn test_summarize_warnings() {
        let config = AppConfig::from_toml(
            r#"
[[inbounds]]
tag = "in"
port = 8080

[[inbounds]]
tag = "orphan"
port = 8081

[[outbounds]]
tag = "relay"
protocol = "tunnel"
password = "secret"

[outbounds.transport]
type = "ws"
host = "relay.example.com"
tls = true

[[routes]]
inbound = "in"
outbound = "relay"
"#,
        )
        .unwrap();

        let (details, warnings) = summarize(&config);
        assert_eq!(details["outbounds"][0]["transport"], "wss://relay.example.com/");
        assert_eq!(details["routes"][0], "in -> relay");
        assert!(warnings.iter().any(|w| w.contains("orphan")));
        assert!(warnings.iter().any(|w| w.contains("skips certificate verification")));
    }

    #[test]
    fn test_check_missing_file() {
        assert!(check_config("/nonexistent/surfer.toml", "json").is_err());
    }
}
