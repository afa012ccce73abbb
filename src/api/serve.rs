//! 静态内容服务
//!
//! GET /apps/:name/*path，交给解析器决定返回入口文档还是静态资源

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::domain::content::ServableContent;
use crate::error::ApiResult;
use crate::state::AppState;

/// 响应头：本次内容所属的版本
pub const VERSION_HEADER: &str = "x-static-version";

/// 创建内容服务路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/apps/:name", get(serve_root))
        .route("/apps/:name/", get(serve_root))
        .route("/apps/:name/*path", get(serve_path))
}

async fn serve_root(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    serve(&state, &name, "").await
}

async fn serve_path(
    State(state): State<Arc<AppState>>,
    Path((name, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    serve(&state, &name, &path).await
}

async fn serve(state: &AppState, name: &str, requested: &str) -> ApiResult<Response> {
    let content = state.resolver.resolve(name, requested).await?;
    tracing::debug!(
        app = %name,
        path = %requested,
        version = %content.version(),
        index = content.is_index(),
        "Serving content"
    );
    Ok(into_response(content))
}

fn into_response(content: ServableContent) -> Response {
    let version = content.version().to_string();
    let content_type = content.content_type();
    let is_index = content.is_index();
    let body = match content {
        ServableContent::Index { body, .. } | ServableContent::Asset { body, .. } => body,
    };

    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response();

    let headers = response.headers_mut();
    if is_index {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    if let Ok(value) = HeaderValue::from_str(&version) {
        headers.insert(VERSION_HEADER, value);
    }
    response
}
