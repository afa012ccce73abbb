//! 应用管理 API
//!
//! 应用记录的增删查，以及版本列表和删除

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::app::AppRecord;
use crate::domain::deploy::{DeployWarning, VersionListing};
use crate::domain::version::VersionId;
use crate::error::{ApiError, ApiResult, HostError};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 创建应用请求
#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub repo_url: Option<String>,
    pub subdomain: Option<String>,
}

/// 应用列表响应
#[derive(Debug, Serialize)]
pub struct AppListResponse {
    pub apps: Vec<AppRecord>,
    pub total: usize,
}

/// 应用详情响应
#[derive(Debug, Serialize)]
pub struct AppDetailResponse {
    #[serde(flatten)]
    pub record: AppRecord,
    pub versions: Vec<VersionId>,
    /// 是否有部署正在进行
    pub deploying: bool,
}

/// 删除版本响应
#[derive(Debug, Serialize)]
pub struct DeleteVersionResponse {
    pub app: String,
    pub version: VersionId,
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<DeployWarning>,
}

/// 创建应用管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/apps", get(list_apps).post(create_app))
        .route("/api/apps/:name", get(get_app).delete(delete_app))
        .route("/api/apps/:name/versions", get(list_versions))
        .route("/api/apps/:name/versions/:version", delete(delete_version))
}

/// 列出应用
///
/// GET /api/apps
/// 无需认证
async fn list_apps(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let apps = state.registry.list().await;
    let total = apps.len();
    Json(AppListResponse { apps, total })
}

/// 创建应用记录
///
/// POST /api/apps
/// 需要 API Key
async fn create_app(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAppRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = HostError::check_name(&request.name)?;

    let mut record = AppRecord::new(name);
    record.repo_url = request.repo_url;
    record.subdomain = request.subdomain;
    let record = state.registry.create(record).await?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// 获取应用详情
///
/// GET /api/apps/:name
/// 无需认证
async fn get_app(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let listing = state.coordinator.list_versions(&name).await?;
    let record = state
        .registry
        .get(&listing.app)
        .await
        .ok_or_else(|| HostError::ApplicationNotFound { app: name.clone() })?;
    let deploying = state
        .coordinator
        .running_deploys()
        .await
        .contains_key(&listing.app);

    Ok(Json(AppDetailResponse {
        record,
        versions: listing.versions,
        deploying,
    }))
}

/// 删除应用（所有版本、归档和记录）
///
/// DELETE /api/apps/:name
/// 需要 API Key
async fn delete_app(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let coordinator = state.coordinator.clone();
    let report = tokio::spawn(async move { coordinator.undeploy(&name).await })
        .await
        .map_err(|e| ApiError::internal(format!("undeploy task failed: {}", e)))??;

    Ok(Json(report))
}

/// 列出版本
///
/// GET /api/apps/:name/versions
/// 无需认证
async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<VersionListing>> {
    Ok(Json(state.coordinator.list_versions(&name).await?))
}

/// 删除一个未发布的版本
///
/// DELETE /api/apps/:name/versions/:version
/// 需要 API Key
async fn delete_version(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let version: VersionId = version
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid version id '{}'", version)))?;

    let cleanup = state.coordinator.delete_version(&name, version).await?;

    Ok(Json(DeleteVersionResponse {
        app: name,
        version,
        removed: cleanup.removed,
        warnings: cleanup.warnings,
    }))
}
