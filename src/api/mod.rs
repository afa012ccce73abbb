//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod apps;
pub mod deploy;
pub mod health;
pub mod serve;

use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.deploy.max_archive_bytes;

    Router::new()
        // Health
        .merge(health::router())
        // Apps & versions
        .merge(apps::router())
        // Deploy & tasks
        .merge(deploy::router())
        // Content
        .merge(serve::router())
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::http::{header, HeaderMap, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::env::{DeployConfig, EnvConfig};
    use crate::infra::archive::test_support::build_zip;
    use crate::middleware::auth::API_KEY_HEADER;

    const KEY: &str = "test-key";

    struct TestApp {
        _tmp: tempfile::TempDir,
        router: Router,
    }

    impl TestApp {
        async fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let config = EnvConfig {
                api_key: KEY.to_string(),
                callback_url: None,
                port: 0,
                data_dir: tmp.path().to_path_buf(),
                deploy: DeployConfig::default(),
                asset_extensions: None,
            };
            let state = Arc::new(AppState::new(config).await.unwrap());
            Self {
                router: router(state),
                _tmp: tmp,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, headers, body)
        }

        async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
            let (status, _, body) = self.get(uri).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn authed(&self, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header(API_KEY_HEADER, KEY)
                .body(body)
                .unwrap();
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn create_app(&self, name: &str) -> (StatusCode, Value) {
            let request = Request::post("/api/apps")
                .header(API_KEY_HEADER, KEY)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"name":"{}"}}"#, name)))
                .unwrap();
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn deploy(&self, name: &str, entries: &[(&str, &[u8])]) -> (StatusCode, Value) {
            self.authed(
                Method::POST,
                &format!("/api/apps/{}/deploy", name),
                Body::from(build_zip(entries)),
            )
            .await
        }
    }

    fn site() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("index.html", b"<html>app</html>"),
            ("assets/app.js", b"console.log(1)"),
            ("favicon.ico", b"ico"),
        ]
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let (status, body) = app.get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["apps"], 1);
        assert_eq!(body["published_apps"], 0);
        assert_eq!(body["active_deploys"], 0);
    }

    #[tokio::test]
    async fn test_create_app_requires_api_key() {
        let app = TestApp::new().await;

        let request = Request::post("/api/apps")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"app1"}"#))
            .unwrap();
        let (status, _, _) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.create_app("app1").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "app1");
        assert_eq!(body["published_version"], Value::Null);

        let (status, body) = app.create_app("app1").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "application_exists");

        let (status, body) = app.create_app("../etc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_name");

        let (status, body) = app.get_json("/api/apps").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_deploy_and_serve() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let (status, report) = app.deploy("app1", &site()).await;
        assert_eq!(status, StatusCode::OK, "{}", report);
        let version = report["version"].as_u64().unwrap();
        assert_eq!(report["previous"], Value::Null);

        for uri in ["/apps/app1", "/apps/app1/", "/apps/app1/dashboard/settings"] {
            let (status, headers, body) = app.get(uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
            assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
            assert_eq!(headers[serve::VERSION_HEADER], version.to_string().as_str());
            assert_eq!(&body[..], b"<html>app</html>");
        }

        let (status, headers, body) = app.get("/apps/app1/assets/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/javascript");
        assert!(headers.get(header::CACHE_CONTROL).is_none());
        assert_eq!(&body[..], b"console.log(1)");

        let (status, headers, _) = app.get("/apps/app1/favicon.ico").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/x-icon");

        let (status, body) = app.get_json("/apps/app1/missing.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "asset_not_found");

        let (status, body) = app.get_json("/api/apps/app1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["published_version"], version);
        assert_eq!(body["status"], "running");
        assert_eq!(body["deploying"], false);
    }

    #[tokio::test]
    async fn test_deploy_requires_api_key() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let request = Request::post("/api/apps/app1/deploy")
            .body(Body::from(build_zip(&site())))
            .unwrap();
        let (status, _, _) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.get_json("/apps/app1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no_published_version");
    }

    #[tokio::test]
    async fn test_deploy_rejects_bad_uploads() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let (status, body) = app
            .deploy("app1", &[("index.html", b"ok"), ("../../etc/passwd", b"x")])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "path_traversal");

        let (status, body) = app.deploy("app1", &[("build/index.html", b"ok")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_index");

        let (status, body) = app
            .authed(Method::POST, "/api/apps/app1/deploy", Body::from("not a zip"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_archive");

        let (status, body) = app.deploy("ghost", &site()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "application_not_found");
    }

    #[tokio::test]
    async fn test_deploy_files_multipart() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let boundary = "XJPBOUNDARY";
        let mut body = String::new();
        for (path, contents) in [("index.html", "<html>files</html>"), ("assets/app.js", "let a")] {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{p}\"\r\nContent-Type: application/octet-stream\r\n\r\n{c}\r\n",
                b = boundary,
                p = path,
                c = contents
            ));
        }
        body.push_str(&format!("--{}--\r\n", boundary));

        let request = Request::post("/api/apps/app1/deploy/files")
            .header(API_KEY_HEADER, KEY)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _, report) = app.send(request).await;
        assert_eq!(status, StatusCode::OK, "{:?}", report);

        let (_, _, body) = app.get("/apps/app1/anything").await;
        assert_eq!(&body[..], b"<html>files</html>");
        let (_, _, body) = app.get("/apps/app1/assets/app.js").await;
        assert_eq!(&body[..], b"let a");
    }

    #[tokio::test]
    async fn test_versions_and_redeploy() {
        let app = TestApp::new().await;
        app.create_app("app1").await;

        let (_, first) = app.deploy("app1", &site()).await;
        let first = first["version"].as_u64().unwrap();

        let (status, listing) = app.get_json("/api/apps/app1/versions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["published"], first);
        assert_eq!(listing["versions"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .authed(
                Method::DELETE,
                &format!("/api/apps/app1/versions/{}", first),
                Body::empty(),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "version_in_use");

        let (status, _) = app
            .authed(Method::DELETE, "/api/apps/app1/versions/latest", Body::empty())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .authed(Method::DELETE, "/api/apps/app1/versions/1", Body::empty())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "version_not_found");

        let (status, report) = app
            .authed(Method::POST, "/api/apps/app1/redeploy", Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK, "{}", report);
        let second = report["version"].as_u64().unwrap();
        assert!(second > first);
        assert_eq!(report["previous"], first);

        let (_, headers, body) = app.get("/apps/app1").await;
        assert_eq!(headers[serve::VERSION_HEADER], second.to_string().as_str());
        assert_eq!(&body[..], b"<html>app</html>");
    }

    #[tokio::test]
    async fn test_undeploy_removes_app() {
        let app = TestApp::new().await;
        app.create_app("app1").await;
        app.deploy("app1", &site()).await;

        let (status, report) = app
            .authed(Method::DELETE, "/api/apps/app1", Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK, "{}", report);
        assert_eq!(report["app"], "app1");

        let (status, body) = app.get_json("/apps/app1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "application_not_found");

        let (status, _) = app.get_json("/api/apps/app1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tasks_and_cancel() {
        let app = TestApp::new().await;
        app.create_app("app1").await;
        let (_, report) = app.deploy("app1", &site()).await;
        let task_id = report["task_id"].as_str().unwrap().to_string();

        let (status, body) = app.get_json("/api/tasks/recent?app=app1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][0]["id"], task_id.as_str());
        assert_eq!(body["tasks"][0]["status"], "success");

        let (status, body) = app.get_json("/api/tasks/recent?status=failed").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["tasks"].as_array().unwrap().is_empty());

        let (status, body) = app.get_json(&format!("/api/tasks/{}", task_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app"], "app1");

        let (status, _) = app.get_json("/api/tasks/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .authed(Method::POST, "/api/apps/app1/cancel", Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);
    }
}
