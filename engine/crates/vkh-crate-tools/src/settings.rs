use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 用于覆盖日志级别的环境变量
pub const LOG_ENV_VAR: &str = "VKH_LOG";

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

/// handle 核心的全局配置
///
/// 可以从 TOML 文件加载，也可以通过环境变量 [`LOG_ENV_VAR`] 覆盖日志级别。
/// ```toml
/// log_level = "debug"
/// debug_name_type_prefix = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkhSettings {
    /// 日志级别，默认 info
    #[serde(default)]
    pub log_level: LogLevel,

    /// 转发 debug name 时是否加上对象类型前缀，形如 `Buffer::vertices`
    #[serde(default = "default_true")]
    pub debug_name_type_prefix: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VkhSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            debug_name_type_prefix: true,
        }
    }
}

impl VkhSettings {
    /// 从 TOML 文件加载配置，随后应用环境变量覆盖
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

        let settings = Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))?;
        Ok(settings.with_env_overrides())
    }

    /// 从 TOML 字符串解析配置，不读取环境变量
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: VkhSettings = toml::from_str(content)?;
        Ok(settings)
    }

    /// 默认配置 + 环境变量覆盖
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;

        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(LOG_ENV_VAR) {
            match LogLevel::parse(&value) {
                Some(level) => self.log_level = level,
                None => eprintln!("ignore invalid {LOG_ENV_VAR}={value}"),
            }
        }
        self
    }

    /// 转换为 log crate 的过滤级别
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}
