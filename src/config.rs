//! 配置系统
//! 默认值 + 环境变量（前缀 CARWASH_，层级分隔符 __）

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// 后端地址，例如 "https://api.example.com"
    pub base_url: String,
    /// API 版本前缀
    pub prefix: String,
    /// 单次请求超时时间（秒）
    pub timeout_secs: u64,
    /// 会话失效时跳转的登录路径
    pub login_path: String,
    /// User-Agent
    pub user_agent: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            prefix: "/api/v1".to_string(),
            timeout_secs: 30,
            login_path: "/login".to_string(),
            user_agent: format!("carwash-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 凭证文件路径
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let api = ApiConfig::default();

        let settings = Config::builder()
            .set_default("api.base_url", api.base_url)?
            .set_default("api.prefix", api.prefix)?
            .set_default("api.timeout_secs", api.timeout_secs)?
            .set_default("api.login_path", api.login_path)?
            .set_default("api.user_agent", api.user_agent)?
            .set_default(
                "storage.credentials_path",
                default_credentials_path().to_string_lossy().to_string(),
            )?
            .set_default("logging.level", "warn")?
            .set_default("logging.format", "compact")?
            .add_source(
                Environment::with_prefix("CARWASH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: ClientConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| {
            ConfigError::Message(format!("Invalid api.base_url '{}': {}", self.api.base_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Message(format!(
                "api.base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if !self.api.prefix.is_empty() && !self.api.prefix.starts_with('/') {
            return Err(ConfigError::Message("api.prefix must start with '/'".to_string()));
        }

        if self.api.timeout_secs == 0 || self.api.timeout_secs > 300 {
            return Err(ConfigError::Message(
                "api.timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}

/// 默认凭证文件位置：$HOME/.carwash/credentials.json
fn default_credentials_path() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".carwash")
        .join("credentials.json")
}
