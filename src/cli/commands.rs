use anyhow::{Context, Result};
use tracing::info;

use crate::{config::AppConfig, protocol, server};

use super::config::{check_config, check_config_file_permissions, expand_path};
use super::template;

/// Execute CLI commands
pub fn execute_command(cli: &super::Cli) -> Result<()> {
    use super::Commands;

    match &cli.command {
        Commands::Run { config } => run(config)?,
        Commands::Check { config, format } => {
            let config_path = expand_path(config)?;
            check_config(&config_path, format)?;
        }
        Commands::Template { output } => {
            template::generate_config_template(output.as_deref())?;
        }
        Commands::Digest { password } => {
            println!("{}", protocol::credential_digest(password));
        }
    }

    Ok(())
}

/// 加载配置并在多线程运行时上运行所有入站
fn run(config: &str) -> Result<()> {
    let config_path = expand_path(config)?;

    // 检查配置文件权限
    check_config_file_permissions(&config_path)?;

    info!("Loading configuration from: {}", config_path);
    let app_config = AppConfig::load(&config_path)?;

    let workers = app_config.runtime.worker_threads();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("surfer-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    info!("Runtime started with {} worker threads", workers);

    runtime.block_on(server::run_server(app_config))
}
