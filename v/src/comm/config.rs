use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

type Builder = ConfigBuilder<config::builder::DefaultState>;

/// 配置管理器
///
/// 由调用方显式构造并传递，不提供全局单例。
/// Constructed explicitly by the caller and passed down; there is no global instance.
pub struct ConfigManager {
    config: Config,
    loaded: Vec<String>,
}

/// 运行环境名（`V_ENV`，默认 development）/ environment name
pub fn env_name() -> String {
    std::env::var("V_ENV").unwrap_or_else(|_| "development".to_string())
}

impl ConfigManager {
    /// 使用默认配置源创建 / Create with default sources
    pub fn new() -> Result<Self> {
        Self::with_sources(vec![])
    }

    /// 使用额外配置源创建（后添加者优先）
    /// Create with extra sources (later sources win)
    ///
    /// 优先级从低到高 / priority low to high:
    /// `config/default.toml` -> `config/{V_ENV}.toml` -> extra sources -> `V__*` env vars
    pub fn with_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let mut ordered = vec![
            ConfigSource::optional_toml("config/default.toml"),
            ConfigSource::optional_toml(format!("config/{}.toml", env_name())),
        ];
        ordered.extend(sources);
        ordered.push(ConfigSource::Env {
            prefix: "V".to_string(),
            separator: "__",
        });

        let mut builder = Config::builder();
        let mut loaded = Vec::new();
        for source in ordered {
            if let ConfigSource::File { path, required, .. } = &source {
                if !std::path::Path::new(path).exists() {
                    if *required {
                        return Err(anyhow!("必需的配置文件不存在: {}", path));
                    }
                    continue;
                }
            }
            loaded.push(source.describe());
            builder = source.add_to_builder(builder);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("构建配置失败: {}", e))?;
        Ok(Self { config, loaded })
    }

    /// 获取指定 key 的配置值
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config
            .get(key)
            .map_err(|e| anyhow!("获取配置 '{}' 失败: {}", key, e))
    }

    /// 整体反序列化为设置结构 / Deserialize the whole tree into a settings struct
    pub fn load<T: DeserializeOwned>(&self) -> Result<T> {
        self.config
            .clone()
            .try_deserialize::<T>()
            .map_err(|e| anyhow!("解析配置失败: {}", e))
    }

    /// 实际生效的配置源，按优先级从低到高 / sources that were applied, lowest priority first
    pub fn loaded_sources(&self) -> &[String] {
        &self.loaded
    }
}

/// 配置源类型
pub enum ConfigSource {
    /// 文件配置源
    File {
        path: String,
        format: Option<FileFormat>,
        required: bool,
    },
    /// 环境变量配置源
    Env {
        prefix: String,
        separator: &'static str,
    },
    /// 字符串配置源
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    fn optional_toml(path: impl Into<String>) -> Self {
        ConfigSource::File {
            path: path.into(),
            format: Some(FileFormat::Toml),
            required: false,
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfigSource::File { path, .. } => format!("file:{}", path),
            ConfigSource::Env { prefix, separator } => format!("env:{}{}", prefix, separator),
            ConfigSource::String { .. } => "string".to_string(),
        }
    }

    fn add_to_builder(self, builder: Builder) -> Builder {
        match self {
            ConfigSource::File {
                path,
                format,
                required,
            } => {
                let file_source = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                builder.add_source(file_source.required(required))
            }
            ConfigSource::Env { prefix, separator } => builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator(separator)
                    .prefix_separator("__")
                    .try_parsing(true)
                    .ignore_empty(true),
            ),
            ConfigSource::String { content, format } => {
                builder.add_source(File::from_str(&content, format))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigManager, ConfigSource};
    use config::FileFormat;

    fn from_toml(content: &str) -> ConfigManager {
        ConfigManager::with_sources(vec![ConfigSource::String {
            content: content.to_string(),
            format: FileFormat::Toml,
        }])
        .unwrap()
    }

    #[test]
    fn string_source_overrides_files() {
        let manager = from_toml("[database]\nport = 6543");
        assert_eq!(manager.get::<i64>("database.port").unwrap(), 6543);
        assert!(manager.loaded_sources().iter().any(|s| s == "string"));
        assert_eq!(manager.loaded_sources().last().map(String::as_str), Some("env:V__"));
    }

    #[test]
    fn missing_required_file_fails() {
        let source = ConfigSource::File {
            path: "config/definitely-missing.toml".into(),
            format: Some(FileFormat::Toml),
            required: true,
        };
        assert!(ConfigManager::with_sources(vec![source]).is_err());
    }

    #[test]
    fn load_deserializes_sections() {
        #[derive(serde::Deserialize)]
        struct Approval {
            reminder_interval_hours: i64,
        }
        #[derive(serde::Deserialize)]
        struct Root {
            approval: Approval,
        }
        let root: Root = from_toml("[approval]\nreminder_interval_hours = 12")
            .load()
            .unwrap();
        assert_eq!(root.approval.reminder_interval_hours, 12);
    }
}
