//! 健康检查 API
//!
//! GET /health

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    /// 已登记的应用数
    apps: usize,
    /// 已发布的应用数
    published_apps: usize,
    active_deploys: usize,
    active_apps: Vec<String>,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// 健康检查
///
/// GET /health
/// 无需认证
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let records = state.registry.list().await;
    let published_apps = records
        .iter()
        .filter(|r| r.published_version.is_some())
        .count();

    let running = state.coordinator.running_deploys().await;
    let mut active_apps: Vec<String> = running.keys().map(|app| app.to_string()).collect();
    active_apps.sort();

    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "ok",
        service: "xjp-static-host",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        apps: records.len(),
        published_apps,
        active_deploys: running.len(),
        active_apps,
    })
}
