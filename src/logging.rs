// logging.rs - 日誌系統初始化

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogConfig;

/// 建立日誌過濾器，`RUST_LOG` 優先於配置中的級別
pub fn build_filter(log_config: &LogConfig) -> EnvFilter {
    let level = match log_config.level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info", // 默認為INFO
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// 初始化全域日誌訂閱者，只能呼叫一次
pub fn init_logging(log_config: &LogConfig) -> Result<()> {
    let filter = build_filter(log_config);

    let result = if log_config.format.eq_ignore_ascii_case("json") {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    result.map_err(|e| anyhow!("Failed to set up logging: {}", e))?;

    info!("Logging initialized");
    Ok(())
}
