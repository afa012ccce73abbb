//! 部署 API
//!
//! 上传归档或文件集合进行部署、重新部署、取消，以及任务查询。
//! 部署在独立的 tokio 任务中执行，客户端断开连接不会中断正在进行的发布。

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::deploy::{DeployReport, DeployTask};
use crate::error::{ApiError, ApiResult, HostResult};
use crate::middleware::RequireApiKey;
use crate::services::deploy::{ArchiveSource, UploadedFile};
use crate::state::AppState;

/// 任务历史查询参数
#[derive(Debug, Deserialize)]
pub struct TaskHistoryQuery {
    /// 返回数量限制（默认 20）
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// 按应用过滤
    pub app: Option<String>,
    /// 按状态过滤（running, success, failed, cancelled）
    pub status: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// 任务历史响应
#[derive(Debug, Serialize)]
pub struct TaskHistoryResponse {
    pub tasks: Vec<DeployTask>,
    pub total: usize,
}

/// 取消响应
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub app: String,
    pub cancelled: bool,
}

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/apps/:name/deploy", post(deploy_archive))
        .route("/api/apps/:name/deploy/files", post(deploy_files))
        .route("/api/apps/:name/redeploy", post(redeploy))
        .route("/api/apps/:name/cancel", post(cancel_deploy))
        .route("/api/tasks/recent", get(get_recent_tasks))
        .route("/api/tasks/:task_id", get(get_task))
}

/// 上传归档并部署
///
/// POST /api/apps/:name/deploy
/// 需要 API Key，请求体为 zip 归档
async fn deploy_archive(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<DeployReport>> {
    tracing::info!(app = %name, bytes = body.len(), "Received archive upload");

    let coordinator = state.coordinator.clone();
    run_detached(async move { coordinator.deploy(&name, ArchiveSource::Bytes(body)).await }).await
}

/// 上传目录中的文件并部署
///
/// POST /api/apps/:name/deploy/files
/// 需要 API Key，multipart 中每个字段的文件名为相对路径
async fn deploy_files(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<DeployReport>> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let relative_path = match field.file_name().or_else(|| field.name()) {
            Some(path) => path.to_string(),
            None => continue,
        };
        let contents = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read '{}': {}", relative_path, e)))?;
        files.push(UploadedFile {
            relative_path,
            contents,
        });
    }

    tracing::info!(app = %name, files = files.len(), "Received file upload");

    let coordinator = state.coordinator.clone();
    run_detached(async move { coordinator.deploy(&name, ArchiveSource::Files(files)).await }).await
}

/// 用已存档的内容重新部署
///
/// POST /api/apps/:name/redeploy
/// 需要 API Key
async fn redeploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DeployReport>> {
    let coordinator = state.coordinator.clone();
    run_detached(async move { coordinator.redeploy(&name).await }).await
}

/// 取消正在进行的部署
///
/// POST /api/apps/:name/cancel
/// 需要 API Key
async fn cancel_deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.coordinator.cancel(&name).await?;
    Ok(Json(CancelResponse {
        app: name,
        cancelled,
    }))
}

/// 获取最近的部署任务
///
/// GET /api/tasks/recent?limit=20&app=xxx&status=failed
/// 无需认证
async fn get_recent_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskHistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.min(100);

    // 运行中的任务排在前面
    let mut tasks: Vec<DeployTask> = state
        .task_store
        .get_all()
        .await
        .into_iter()
        .filter(|task| {
            query.app.as_deref().map_or(true, |a| task.app.as_str() == a)
                && query.status.as_deref().map_or(true, |s| task.status.as_str() == s)
        })
        .collect();
    tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    let history = state
        .task_store
        .get_history(limit, query.app.as_deref(), query.status.as_deref())
        .await;
    tasks.extend(history);
    tasks.truncate(limit);

    let total = state.task_store.history_count().await + state.task_store.active_count().await;
    Json(TaskHistoryResponse { tasks, total })
}

/// 获取部署任务状态
///
/// GET /api/tasks/:task_id
/// 无需认证
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<DeployTask>> {
    state
        .task_store
        .get_any(&task_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Task '{}' not found", task_id)))
}

/// 在独立任务中运行部署并等待结果
async fn run_detached<F>(deploy: F) -> ApiResult<Json<DeployReport>>
where
    F: std::future::Future<Output = HostResult<DeployReport>> + Send + 'static,
{
    let report = tokio::spawn(deploy)
        .await
        .map_err(|e| ApiError::internal(format!("deploy task failed: {}", e)))??;
    Ok(Json(report))
}
