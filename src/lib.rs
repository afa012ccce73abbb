//! XJP Static Host - 静态前端应用托管
//!
//! 上传的归档被解包为不可变版本，通过原子切换发布指针上线，
//! 解析器按单页应用规则返回入口文档或静态资源。

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::env::constants::VERSION;
use crate::config::EnvConfig;
use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::AppState;

/// 任务历史清理间隔
const TASK_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// 命令行覆盖的运行参数
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT
    pub port_override: Option<u16>,
    /// 覆盖 STATIC_HOST_DATA_DIR
    pub data_dir_override: Option<PathBuf>,
}

/// 加载配置、恢复磁盘状态并启动 HTTP 服务，直到收到关闭信号
pub async fn run(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    if let Some(data_dir) = runtime.data_dir_override {
        config.data_dir = data_dir;
    }
    let port = config.port;

    let state = Arc::new(
        AppState::new(config)
            .await
            .context("failed to initialize application state")?,
    );

    // 启动时还没有部署在运行，可以安全地清理上次遗留的目录
    let cleanup = state
        .coordinator
        .reconcile()
        .await
        .context("startup reconciliation failed")?;
    tracing::info!(
        removed = cleanup.removed.len(),
        warnings = cleanup.warnings.len(),
        "Startup reconciliation finished"
    );

    spawn_task_cleanup(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, version = VERSION, "Static host listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// 定期清理过期的任务历史
fn spawn_task_cleanup(state: Arc<AppState>) {
    let shutdown = get_shutdown_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TASK_CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => state.task_store.cleanup_stale().await,
            }
        }
        tracing::debug!("Task cleanup loop stopped");
    });
}

async fn shutdown_signal() {
    let shutdown = get_shutdown_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => tracing::info!("Shutdown requested"),
    }
    trigger_shutdown();
}
