//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::env::EnvConfig;
use crate::error::HostResult;
use crate::infra::RecordCenterClient;
use crate::services::{ArtifactResolver, AssetPolicy, DeployCoordinator, Storage};

use super::registry::{AppRegistry, FileAppRegistry};
use super::task_store::TaskStore;

/// 应用记录文件名
const REGISTRY_FILE: &str = "registry.json";

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 应用与版本 ==========
    /// 应用记录
    pub registry: Arc<dyn AppRegistry>,
    /// 各应用的版本库
    pub storage: Arc<Storage>,
    /// 部署协调器
    pub coordinator: Arc<DeployCoordinator>,
    /// 内容解析器
    pub resolver: Arc<ArtifactResolver>,

    // ========== 任务管理 ==========
    /// 任务存储
    pub task_store: Arc<TaskStore>,
}

impl AppState {
    /// 根据配置创建应用状态，从数据目录加载应用记录
    pub async fn new(config: EnvConfig) -> HostResult<Self> {
        tracing::info!(
            api_key_len = config.api_key.len(),
            callback_url = ?config.callback_url,
            port = config.port,
            data_dir = %config.data_dir.display(),
            lock_timeout_secs = config.deploy.lock_timeout.as_secs(),
            deploy_timeout_secs = config.deploy.timeout.as_secs(),
            "Loaded configuration"
        );

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| crate::error::HostError::storage("-", "creating data directory", e))?;

        let registry: Arc<dyn AppRegistry> =
            Arc::new(FileAppRegistry::load(config.data_dir.join(REGISTRY_FILE)).await);
        Ok(Self::with_registry(config, registry))
    }

    /// 使用给定的应用记录存储创建（测试或嵌入时使用）
    pub fn with_registry(config: EnvConfig, registry: Arc<dyn AppRegistry>) -> Self {
        let storage = Arc::new(Storage::new(&config.data_dir));
        let task_store = Arc::new(TaskStore::new());
        let record_center = Arc::new(RecordCenterClient::new(config.callback_url.clone()));

        let coordinator = Arc::new(DeployCoordinator::new(
            storage.clone(),
            registry.clone(),
            record_center,
            task_store.clone(),
            &config.deploy,
        ));

        let policy = match &config.asset_extensions {
            Some(extensions) => AssetPolicy::from_extensions(extensions),
            None => AssetPolicy::default(),
        };
        let resolver = Arc::new(ArtifactResolver::new(storage.clone(), registry.clone(), policy));

        Self {
            api_key: config.api_key.clone(),
            started_at: Utc::now(),
            registry,
            storage,
            coordinator,
            resolver,
            task_store,
            config,
        }
    }
}
