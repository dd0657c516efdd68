//! 日志初始化

use crate::config::{LogFormat, LoggingConfig};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// 构建日志过滤器：`RUST_LOG` 优先，其次使用配置的级别
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.level, e)),
    }
}

/// 安装全局 tracing 订阅器，重复调用时返回错误
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;
    tracing::debug!("Tracing initialised with level {} ({:?})", config.level, config.format);
    Ok(())
}
