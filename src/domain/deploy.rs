//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::app::AppName;
use super::version::VersionId;

/// 部署任务状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
            DeployStatus::Cancelled => "cancelled",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeployStatus::Running)
    }
}

/// 部署操作类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployKind {
    Deploy,
    Redeploy,
    Undeploy,
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "extract", "publish", "cleanup")
    pub name: String,
    /// 显示名称
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 部署任务信息
#[derive(Clone, Debug, Serialize)]
pub struct DeployTask {
    pub id: String,
    pub app: AppName,
    pub kind: DeployKind,
    pub status: DeployStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 新发布的版本（成功时）
    pub version: Option<VersionId>,
    /// 失败时的错误类型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<DeployWarning>,
    /// 部署阶段详情
    pub stages: Vec<DeployStage>,
}

impl DeployTask {
    /// 创建新任务
    pub fn new(id: String, app: AppName, kind: DeployKind) -> Self {
        Self {
            id,
            app,
            kind,
            status: DeployStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            version: None,
            error_kind: None,
            error: None,
            warnings: Vec::new(),
            stages: Vec::new(),
        }
    }
}

/// 部署成功但需要关注的问题
///
/// 新版本已上线，这些问题只是资源泄漏或记录不同步，不会回滚部署
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployWarning {
    /// 旧版本目录或归档删除失败
    CleanupFailed { path: PathBuf, reason: String },
    /// 应用记录同步失败
    RecordSyncFailed { reason: String },
}

impl DeployWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            DeployWarning::CleanupFailed { .. } => "cleanup_failed",
            DeployWarning::RecordSyncFailed { .. } => "record_sync_failed",
        }
    }
}

/// 一次成功部署的结果
#[derive(Clone, Debug, Serialize)]
pub struct DeployReport {
    pub task_id: String,
    pub app: AppName,
    pub version: VersionId,
    /// 被替换掉的版本
    pub previous: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    pub warnings: Vec<DeployWarning>,
}

/// 删除应用的结果
#[derive(Clone, Debug, Serialize)]
pub struct UndeployReport {
    pub task_id: String,
    pub app: AppName,
    /// 删除的路径数
    pub removed: usize,
    pub warnings: Vec<DeployWarning>,
}

/// 应用的版本列表
#[derive(Clone, Debug, Serialize)]
pub struct VersionListing {
    pub app: AppName,
    pub published: Option<VersionId>,
    /// 升序
    pub versions: Vec<VersionId>,
}
