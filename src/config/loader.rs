use config::{Config, ConfigError, Environment as ConfigEnvironment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::types::CommunicationConfig;
use crate::config::validation::Validator;

/// 選擇環境的環境變數
pub const ENV_VAR: &str = "SVCCOM_ENV";
/// 覆蓋配置的環境變數前綴，例如 `SVCCOM__BROKER__HOST`
pub const ENV_PREFIX: &str = "SVCCOM";

/// 環境類型枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// 從環境變數取得當前環境設定
    pub fn from_env() -> Self {
        match env::var(ENV_VAR)
            .unwrap_or_else(|_| "development".into())
            .to_lowercase()
            .as_str()
        {
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// 轉換為配置文件名
    pub fn as_filename(&self) -> &'static str {
        match self {
            Environment::Development => "development.toml",
            Environment::Production => "production.toml",
        }
    }
}

/// 配置加載器，負責根據環境加載適當的配置
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件目錄，可由 `CONFIG_DIR` 指定
    pub fn config_dir() -> PathBuf {
        PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into()))
    }

    /// 載入指定環境的配置
    pub fn load(env: Environment) -> Result<Config, ConfigError> {
        let config_path = Self::config_dir().join(env.as_filename());
        Self::load_file(&config_path)
    }

    /// 載入指定的配置文件，文件不存在時只使用預設值與環境變數
    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let defaults = Config::try_from(&CommunicationConfig::default())?;

        Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false))
            // 從環境變數加載配置（優先級高於文件配置）
            .add_source(
                ConfigEnvironment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
    }

    /// 載入當前環境的配置
    pub fn load_current() -> Result<Config, ConfigError> {
        Self::load(Environment::from_env())
    }
}

/// 配置獲取輔助特性
pub trait ConfigExt {
    /// 從配置中獲取並反序列化指定部分
    fn get_section<'a, T: Deserialize<'a>>(&'a self, section: &str) -> Result<T, ConfigError>;
}

impl ConfigExt for Config {
    fn get_section<'a, T: Deserialize<'a>>(&'a self, section: &str) -> Result<T, ConfigError> {
        self.get(section)
    }
}

impl CommunicationConfig {
    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env = Environment::from_env();
        debug!("Loading configuration for {:?}", env);
        Self::load(env)
    }

    /// 從指定環境加載配置
    pub fn load(env: Environment) -> Result<Self, ConfigError> {
        Self::from_config(ConfigLoader::load(env)?)
    }

    /// 反序列化並驗證配置
    pub fn from_config(source: Config) -> Result<Self, ConfigError> {
        let config: CommunicationConfig = source.try_deserialize()?;

        if let Err(err) = config.validate() {
            warn!("Configuration validation failed: {}", err);
            return Err(ConfigError::Message(err.to_string()));
        }
        debug!("Configuration validated");
        Ok(config)
    }
}
