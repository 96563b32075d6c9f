//! 应用配置 / Application settings
//!
//! 通过 `v::ConfigManager` 加载：`config/default.toml`、`config/{V_ENV}.toml`、
//! 可选的 `--config` 文件，最后是 `V__` 前缀环境变量（如 `V__DATABASE__HOST`）。

use anyhow::{anyhow, Result};
use serde::Deserialize;
use v::{ConfigManager, ConfigSource, DbSettings};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DbSettings,
    pub logging: LoggingSettings,
    pub schema: SchemaSettings,
    pub approval: ApprovalSettings,
    pub request: RequestSettings,
    /// 生效的配置源 / applied configuration sources
    #[serde(skip)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// 表描述缓存有效期（秒）/ descriptor cache TTL
    pub descriptor_ttl_secs: u64,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            descriptor_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    pub reminder_interval_hours: i64,
    pub expire_sweep_secs: u64,
    pub remind_sweep_secs: u64,
    /// 0 表示实例不过期 / 0 disables instance expiry
    pub default_expire_hours: i64,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            reminder_interval_hours: 24,
            expire_sweep_secs: 300,
            remind_sweep_secs: 600,
            default_expire_hours: 0,
            default_page_size: 20,
            max_page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub default_timeout_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
        }
    }
}

impl Settings {
    /// 加载配置，`extra` 为额外的 TOML 文件 / load settings with an optional extra TOML file
    pub fn load(extra: Option<&str>) -> Result<Self> {
        let sources = extra
            .map(|path| {
                vec![ConfigSource::File {
                    path: path.to_string(),
                    format: Some(config::FileFormat::Toml),
                    required: true,
                }]
            })
            .unwrap_or_default();
        let manager = ConfigManager::with_sources(sources)?;
        let mut settings: Settings = manager.load()?;
        settings.validate()?;
        settings.sources = manager.loaded_sources().to_vec();
        Ok(settings)
    }

    /// 从 TOML 文本加载（测试与嵌入使用）/ load from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let manager = ConfigManager::with_sources(vec![ConfigSource::String {
            content: content.to_string(),
            format: config::FileFormat::Toml,
        }])?;
        let settings: Settings = manager.load()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.approval.reminder_interval_hours <= 0 {
            return Err(anyhow!("approval.reminder_interval_hours 必须大于 0"));
        }
        if self.approval.default_page_size <= 0
            || self.approval.max_page_size < self.approval.default_page_size
        {
            return Err(anyhow!("approval 分页配置非法"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections 必须大于 0"));
        }
        Ok(())
    }
}
