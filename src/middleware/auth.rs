//! API Key 认证
//!
//! 修改类接口（创建应用、部署、删除）需要 `x-api-key`；读取和内容访问不需要

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// 认证 header 名
pub const API_KEY_HEADER: &str = "x-api-key";

/// API Key 认证 Extractor
///
/// ```ignore
/// async fn deploy(
///     _auth: RequireApiKey,
///     State(state): State<Arc<AppState>>,
/// ) -> ApiResult<Json<DeployReport>> { ... }
/// ```
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key).map_err(|e| {
            tracing::warn!(method = %parts.method, path = %parts.uri.path(), "Rejected unauthenticated request");
            e
        })
    }
}

/// 检查 `x-api-key` 是否与配置的 key 一致
pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if !expected_key.is_empty() && key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::debug!("Invalid API key provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::debug!("Missing x-api-key header");
            Err(ApiError::unauthorized())
        }
    }
}
