//! vkh 工具集
//!
//! 提供日志初始化与配置加载等通用工具。
//!
//! # VkhSettings
//! 通过 TOML 文件或环境变量配置日志级别与 debug name 的格式。

pub mod init_log;
pub mod settings;
