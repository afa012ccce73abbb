//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use self::constants::{
    DEFAULT_DEPLOY_LOCK_TIMEOUT_SECS, DEFAULT_DEPLOY_TIMEOUT_SECS, DEFAULT_MAX_ARCHIVE_BYTES,
    DEFAULT_MAX_ARCHIVE_ENTRIES, DEFAULT_PORT,
};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 外部记录中心回调 URL
    pub callback_url: Option<String>,
    /// 服务监听端口
    pub port: u16,
    /// 数据根目录（registry、staging、apps 都在这里）
    pub data_dir: PathBuf,
    /// 部署相关配置
    pub deploy: DeployConfig,
    /// 静态资源扩展名白名单（None 表示使用内置列表）
    pub asset_extensions: Option<Vec<String>>,
}

/// 部署配置
#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// 等待同一应用部署锁的最长时间
    pub lock_timeout: Duration,
    /// 部署在发布前的超时时间，超时后取消
    pub timeout: Duration,
    /// 上传归档大小上限（字节）
    pub max_archive_bytes: usize,
    /// 归档条目数上限
    pub max_archive_entries: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(DEFAULT_DEPLOY_LOCK_TIMEOUT_SECS),
            timeout: Duration::from_secs(DEFAULT_DEPLOY_TIMEOUT_SECS),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("STATIC_HOST_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());

        let callback_url = load_with_fallback("RECORD_CENTER_CALLBACK_URL", "CALLBACK_URL");
        if env::var("API_KEY").is_ok() || env::var("CALLBACK_URL").is_ok() {
            warn!("Deprecated environment variables detected. Please use STATIC_HOST_API_KEY and RECORD_CENTER_CALLBACK_URL");
        }

        let port = parse_var("PORT").unwrap_or(DEFAULT_PORT);

        let data_dir = env::var("STATIC_HOST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let deploy = DeployConfig::from_env();

        let asset_extensions = env::var("ASSET_EXTENSIONS")
            .ok()
            .map(|v| parse_extension_list(&v))
            .filter(|list| !list.is_empty());

        Self {
            api_key,
            callback_url,
            port,
            data_dir,
            deploy,
            asset_extensions,
        }
    }
}

impl DeployConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout: parse_var("DEPLOY_LOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            timeout: parse_var("DEPLOY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_archive_bytes: parse_var("MAX_ARCHIVE_BYTES").unwrap_or(defaults.max_archive_bytes),
            max_archive_entries: parse_var("MAX_ARCHIVE_ENTRIES")
                .unwrap_or(defaults.max_archive_entries),
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 解析逗号分隔的扩展名列表（忽略前导点，统一小写）
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 9880;

    /// 部署锁默认等待时间（秒）
    pub const DEFAULT_DEPLOY_LOCK_TIMEOUT_SECS: u64 = 30;

    /// 部署默认超时（秒）
    pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 600;

    /// 归档默认大小上限 256 MiB
    pub const DEFAULT_MAX_ARCHIVE_BYTES: usize = 256 * 1024 * 1024;

    /// 归档默认条目数上限
    pub const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 20_000;

    /// 版本号冲突时的最大重试次数
    pub const MAX_VERSION_ID_ATTEMPTS: usize = 8;

    /// 任务历史最大保存数量
    pub const MAX_TASK_HISTORY: usize = 200;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("TEST_SH_PRIMARY", "primary_value");
        env::set_var("TEST_SH_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("TEST_SH_PRIMARY", "TEST_SH_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("TEST_SH_PRIMARY");
        assert_eq!(
            load_with_fallback("TEST_SH_PRIMARY", "TEST_SH_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("TEST_SH_FALLBACK");
        assert_eq!(load_with_fallback("TEST_SH_PRIMARY", "TEST_SH_FALLBACK"), None);
    }

    #[test]
    fn test_parse_extension_list() {
        assert_eq!(
            parse_extension_list(".JS, css,,  png "),
            vec!["js".to_string(), "css".to_string(), "png".to_string()]
        );
        assert!(parse_extension_list(" , ").is_empty());
    }

    #[test]
    fn test_deploy_config_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert_eq!(config.max_archive_entries, 20_000);
    }
}
