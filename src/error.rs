//! 统一错误处理
//!
//! - `HostError`：核心（解包、版本库、部署、解析）的错误类型，每个变体有稳定的 kind
//! - `ApiError`：HTTP 边界错误，实现 `IntoResponse`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::app::{AppName, NameError};
use crate::domain::version::VersionId;

/// 核心错误
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Invalid application name '{name}': {reason}")]
    InvalidName { name: String, reason: NameError },

    #[error("Invalid archive for application '{app}': {reason}")]
    InvalidArchive { app: String, reason: String },

    #[error("Archive entry '{entry}' for application '{app}' escapes the content root")]
    PathTraversal { app: String, entry: String },

    #[error("Upload for application '{app}' has no index.html at its root")]
    MissingIndex { app: AppName },

    #[error("Another deployment of application '{app}' is in progress")]
    DeployInProgress { app: AppName },

    #[error("Could not allocate a unique version id for application '{app}'")]
    VersionIdCollision { app: AppName },

    #[error("Application '{app}' not found")]
    ApplicationNotFound { app: String },

    #[error("Application '{app}' already exists")]
    ApplicationExists { app: AppName },

    #[error("Application '{app}' has no published version")]
    NoPublishedVersion { app: AppName },

    #[error("Asset '{path}' not found in application '{app}'")]
    AssetNotFound { app: AppName, path: String },

    #[error("Published version of application '{app}' has no index document")]
    IndexMissing { app: AppName },

    #[error("Application '{app}' has no archive to redeploy")]
    NoArchive { app: AppName },

    #[error("Version {version} of application '{app}' not found")]
    VersionNotFound { app: AppName, version: VersionId },

    #[error("Version {version} of application '{app}' is published and cannot be deleted")]
    VersionInUse { app: AppName, version: VersionId },

    #[error("Deployment of application '{app}' was cancelled")]
    Cancelled { app: AppName },

    #[error("Storage error for application '{app}' while {action}: {source}")]
    Storage {
        app: String,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    /// 稳定的错误类型标识
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::InvalidName { .. } => "invalid_name",
            HostError::InvalidArchive { .. } => "invalid_archive",
            HostError::PathTraversal { .. } => "path_traversal",
            HostError::MissingIndex { .. } => "missing_index",
            HostError::DeployInProgress { .. } => "deploy_in_progress",
            HostError::VersionIdCollision { .. } => "version_id_collision",
            HostError::ApplicationNotFound { .. } => "application_not_found",
            HostError::ApplicationExists { .. } => "application_exists",
            HostError::NoPublishedVersion { .. } => "no_published_version",
            HostError::AssetNotFound { .. } => "asset_not_found",
            HostError::IndexMissing { .. } => "index_missing",
            HostError::NoArchive { .. } => "no_archive",
            HostError::VersionNotFound { .. } => "version_not_found",
            HostError::VersionInUse { .. } => "version_in_use",
            HostError::Cancelled { .. } => "cancelled",
            HostError::Storage { .. } => "storage_error",
        }
    }

    /// 便捷构造：存储错误
    pub fn storage(app: impl std::fmt::Display, action: &'static str, source: std::io::Error) -> Self {
        HostError::Storage {
            app: app.to_string(),
            action,
            source,
        }
    }

    /// 校验应用名，失败时转换为 `InvalidName`
    pub fn check_name(raw: &str) -> Result<AppName, HostError> {
        AppName::parse(raw).map_err(|reason| HostError::InvalidName {
            name: raw.to_string(),
            reason,
        })
    }
}

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 401 - 未授权（API Key 无效或缺失）
    Unauthorized,
    /// 404 - 资源未找到
    NotFound { kind: &'static str, message: String },
    /// 400 - 请求无效
    BadRequest { kind: &'static str, message: String },
    /// 409 - 冲突（如：部署已在进行）
    Conflict { kind: &'static str, message: String },
    /// 500 - 内部错误
    Internal(String),
}

impl ApiError {
    /// 创建未授权错误
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    /// 创建请求无效错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            kind: "bad_request",
            message: message.into(),
        }
    }

    /// 创建未找到错误
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "not_found",
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        let kind = err.kind();
        match err {
            HostError::InvalidName { .. }
            | HostError::InvalidArchive { .. }
            | HostError::PathTraversal { .. }
            | HostError::MissingIndex { .. }
            | HostError::NoArchive { .. } => ApiError::BadRequest {
                kind,
                message: err.to_string(),
            },
            HostError::ApplicationNotFound { .. }
            | HostError::NoPublishedVersion { .. }
            | HostError::AssetNotFound { .. }
            | HostError::VersionNotFound { .. } => ApiError::NotFound {
                kind,
                message: err.to_string(),
            },
            // 入口文档缺失属于内部异常，但对外仍表现为 not found，且不暴露路径
            HostError::IndexMissing { .. } => {
                tracing::error!(error = %err, "Published version is missing its index document");
                ApiError::NotFound {
                    kind,
                    message: err.to_string(),
                }
            }
            HostError::DeployInProgress { .. }
            | HostError::ApplicationExists { .. }
            | HostError::VersionInUse { .. }
            | HostError::Cancelled { .. } => ApiError::Conflict {
                kind,
                message: err.to_string(),
            },
            HostError::VersionIdCollision { .. } | HostError::Storage { .. } => {
                tracing::error!(error = %err, "Internal deploy failure");
                ApiError::Internal(format!("internal error ({})", kind))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::NotFound { kind, message } => (StatusCode::NOT_FOUND, kind, message),
            ApiError::BadRequest { kind, message } => (StatusCode::BAD_REQUEST, kind, message),
            ApiError::Conflict { kind, message } => (StatusCode::CONFLICT, kind, message),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound { message, .. } => write!(f, "Not found: {}", message),
            ApiError::BadRequest { message, .. } => write!(f, "Bad request: {}", message),
            ApiError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;

/// 核心操作结果
pub type HostResult<T> = Result<T, HostError>;
