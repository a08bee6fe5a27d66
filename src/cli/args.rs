use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "surfer")]
#[command(author, version, about = "HTTP proxy with direct and tunnel outbounds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行代理
    Run {
        /// 配置文件路径
        #[arg(short, long, default_value = "surfer.toml")]
        config: String,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,

        /// 输出格式
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// 生成示例配置
    Template {
        /// 输出文件路径（缺省输出到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
    /// 计算隧道密码的凭证摘要
    Digest {
        /// 隧道密码
        password: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["surfer", "run", "-c", "/etc/surfer.toml"]);
        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Commands::Run { config } if config == "/etc/surfer.toml"));
    }

    #[test]
    fn test_parse_global_log_level() {
        let cli = Cli::parse_from(["surfer", "check", "-c", "a.toml", "--log-level", "debug"]);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Check { format, .. } if format == "text"));
    }

    #[test]
    fn test_reject_unknown_format() {
        assert!(Cli::try_parse_from(["surfer", "check", "-c", "a.toml", "-f", "yaml"]).is_err());
    }
}
