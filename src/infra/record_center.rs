//! 记录中心 HTTP Client
//!
//! 发布成功或应用删除后通知外部记录系统，复用连接池

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::app::AppName;
use crate::domain::version::VersionId;

/// 通知最大尝试次数
const NOTIFY_ATTEMPTS: u32 = 3;

/// 记录中心客户端
///
/// 封装与外部记录系统的 HTTP 交互：
/// - 版本发布 (notify_published)
/// - 应用删除 (notify_removed)
#[derive(Clone)]
pub struct RecordCenterClient {
    client: Client,
    callback_url: Option<String>,
    retry_delay: Duration,
}

impl RecordCenterClient {
    /// 创建新的记录中心客户端
    ///
    /// # Arguments
    /// * `callback_url` - 记录中心回调 URL（可选，未配置时所有通知静默跳过）
    pub fn new(callback_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
                Client::new()
            });

        Self {
            client,
            callback_url: callback_url.map(|u| u.trim_end_matches('/').to_string()),
            retry_delay: Duration::from_secs(2),
        }
    }

    /// 检查是否配置了回调 URL
    pub fn has_callback(&self) -> bool {
        self.callback_url.is_some()
    }

    /// 获取回调 URL（如果配置了的话）
    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    /// 通知新版本已发布
    pub async fn notify_published(
        &self,
        app: &AppName,
        version: VersionId,
        archive_sha256: Option<&str>,
    ) -> Result<(), NotifyError> {
        let Some(url) = &self.callback_url else {
            return Ok(());
        };

        let body = NotifyBody {
            event: "published",
            app: app.as_str(),
            version: Some(version),
            archive_sha256,
        };
        self.do_notify(&format!("{}/api/apps/{}/events", url, app), app, &body)
            .await
    }

    /// 通知应用已删除
    pub async fn notify_removed(&self, app: &AppName) -> Result<(), NotifyError> {
        let Some(url) = &self.callback_url else {
            return Ok(());
        };

        let body = NotifyBody {
            event: "removed",
            app: app.as_str(),
            version: None,
            archive_sha256: None,
        };
        self.do_notify(&format!("{}/api/apps/{}/events", url, app), app, &body)
            .await
    }

    /// 执行通知（带重试）
    async fn do_notify<T: Serialize>(
        &self,
        url: &str,
        app: &AppName,
        body: &T,
    ) -> Result<(), NotifyError> {
        let mut last_error = None;

        for attempt in 1..=NOTIFY_ATTEMPTS {
            match self
                .client
                .post(url)
                .timeout(Duration::from_secs(10))
                .json(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    info!(app = %app, attempt = attempt, "Notified record center");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        app = %app,
                        status = %resp.status(),
                        attempt = attempt,
                        "Record center returned non-success status"
                    );
                }
                Err(e) => {
                    warn!(
                        app = %app,
                        error = %e,
                        attempt = attempt,
                        "Failed to notify record center, will retry"
                    );
                    last_error = Some(e);
                }
            }

            // 重试前等待
            if attempt < NOTIFY_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        error!(
            app = %app,
            "Failed to notify record center after {} attempts", NOTIFY_ATTEMPTS
        );

        match last_error {
            Some(e) => Err(NotifyError::Network(e)),
            None => Err(NotifyError::NonSuccessStatus),
        }
    }
}

/// 通知错误类型
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// 网络错误
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    /// 服务端返回非成功状态码
    #[error("Server returned non-success status")]
    NonSuccessStatus,
}

/// 通知请求体
#[derive(Serialize)]
struct NotifyBody<'a> {
    event: &'a str,
    app: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive_sha256: Option<&'a str>,
}
