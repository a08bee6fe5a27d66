use anyhow::{Context, Result};

/// 示例配置
pub const CONFIG_TEMPLATE: &str = include_str!("../../templates/surfer.toml");

/// Generate configuration template
pub fn generate_config_template(output: Option<&str>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write config template to {}", path))?;
        println!("Generated configuration template: {}", path);
    } else {
        println!("{}", CONFIG_TEMPLATE);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_template_is_valid() {
        let config = AppConfig::from_toml(CONFIG_TEMPLATE).unwrap();
        assert!(!config.inbounds.is_empty());
        assert!(config.find_outbound("direct").is_some());
    }
}
