//! 部署上下文
//!
//! 一次 deploy / redeploy / undeploy 的执行上下文：任务记录、阶段进度和取消令牌

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::app::AppName;
use crate::domain::deploy::{
    DeployKind, DeployStage, DeployStatus, DeployTask, DeployWarning, StageStatus,
};
use crate::domain::version::VersionId;
use crate::error::{HostError, HostResult};
use crate::state::task_store::{TaskOutcome, TaskStore};

/// 各操作的阶段列表
fn stages_for(kind: DeployKind) -> Vec<DeployStage> {
    match kind {
        DeployKind::Deploy | DeployKind::Redeploy => vec![
            DeployStage::new("stage", "Stage Upload"),
            DeployStage::new("extract", "Extract Archive"),
            DeployStage::new("validate", "Validate Content"),
            DeployStage::new("promote", "Create Version"),
            DeployStage::new("publish", "Publish"),
            DeployStage::new("cleanup", "Clean Up"),
        ],
        DeployKind::Undeploy => vec![
            DeployStage::new("unregister", "Remove Record"),
            DeployStage::new("remove", "Remove Content"),
        ],
    }
}

/// 部署执行上下文
pub struct DeployContext {
    /// 任务 ID
    pub task_id: String,
    pub app: AppName,
    pub kind: DeployKind,
    /// 取消令牌（cancel 接口和超时保护共用）
    pub cancel_token: CancellationToken,
    task_store: Arc<TaskStore>,
    stages: Mutex<Vec<DeployStage>>,
}

impl DeployContext {
    /// 创建任务记录并返回上下文
    pub async fn begin(
        task_store: Arc<TaskStore>,
        app: AppName,
        kind: DeployKind,
        cancel_token: CancellationToken,
    ) -> Self {
        let task_id = uuid::Uuid::new_v4().to_string();
        let stages = stages_for(kind);

        let mut task = DeployTask::new(task_id.clone(), app.clone(), kind);
        task.stages = stages.clone();
        task_store.create(task).await;

        info!(task_id = %task_id, app = %app, kind = ?kind, "Task started");

        Self {
            task_id,
            app,
            kind,
            cancel_token,
            task_store,
            stages: Mutex::new(stages),
        }
    }

    /// 开始一个阶段
    pub async fn start_stage(&self, name: &str) {
        self.update_stage(name, |stage| stage.start()).await;
    }

    /// 阶段成功结束
    pub async fn end_stage(&self, name: &str, message: Option<String>) {
        self.update_stage(name, |stage| stage.finish(true, message)).await;
    }

    /// 跳过阶段
    pub async fn skip_stage(&self, name: &str, reason: &str) {
        let reason = reason.to_string();
        self.update_stage(name, |stage| stage.skip(Some(reason))).await;
    }

    async fn update_stage(&self, name: &str, apply: impl FnOnce(&mut DeployStage)) {
        let snapshot = {
            let mut stages = self.stages.lock().await;
            if let Some(stage) = stages.iter_mut().find(|s| s.name == name) {
                apply(stage);
            }
            stages.clone()
        };
        self.task_store.update_stages(&self.task_id, snapshot).await;
    }

    /// 发布前的取消检查点
    pub fn ensure_not_cancelled(&self) -> HostResult<()> {
        if self.cancel_token.is_cancelled() {
            warn!(task_id = %self.task_id, app = %self.app, "Deployment cancelled before publish");
            return Err(HostError::Cancelled {
                app: self.app.clone(),
            });
        }
        Ok(())
    }

    /// 任务成功
    pub async fn succeed(&self, version: Option<VersionId>, warnings: Vec<DeployWarning>) {
        info!(
            task_id = %self.task_id,
            app = %self.app,
            version = ?version,
            warnings = warnings.len(),
            "Task completed"
        );
        self.finish(TaskOutcome {
            status: DeployStatus::Success,
            version,
            error_kind: None,
            error: None,
            warnings,
        })
        .await;
    }

    /// 任务失败：正在执行的阶段标记为失败，后续阶段标记为跳过
    pub async fn fail(&self, err: &HostError) {
        let status = match err {
            HostError::Cancelled { .. } => DeployStatus::Cancelled,
            _ => DeployStatus::Failed,
        };

        {
            let mut stages = self.stages.lock().await;
            for stage in stages.iter_mut() {
                match stage.status {
                    StageStatus::Running => stage.finish(false, Some(err.to_string())),
                    StageStatus::Pending => stage.skip(None),
                    _ => {}
                }
            }
        }

        warn!(
            task_id = %self.task_id,
            app = %self.app,
            kind = err.kind(),
            error = %err,
            "Task failed"
        );
        self.finish(TaskOutcome {
            status,
            version: None,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
            warnings: Vec::new(),
        })
        .await;
    }

    async fn finish(&self, outcome: TaskOutcome) {
        let stages = self.stages.lock().await.clone();
        self.task_store.update_stages(&self.task_id, stages).await;
        self.task_store.finish(&self.task_id, outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn context(store: Arc<TaskStore>, kind: DeployKind) -> DeployContext {
        DeployContext::begin(
            store,
            AppName::parse("app1").unwrap(),
            kind,
            CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_success_records_version_and_stages() {
        let store = Arc::new(TaskStore::new());
        let ctx = context(store.clone(), DeployKind::Deploy).await;

        ctx.start_stage("stage").await;
        ctx.end_stage("stage", None).await;
        assert_eq!(
            store.get(&ctx.task_id).await.unwrap().stages[0].status,
            StageStatus::Success
        );

        ctx.succeed(Some(VersionId::from_raw(3)), Vec::new()).await;
        let task = store.get_any(&ctx.task_id).await.unwrap();
        assert_eq!(task.status, DeployStatus::Success);
        assert_eq!(task.version, Some(VersionId::from_raw(3)));
    }

    #[tokio::test]
    async fn test_failure_marks_running_and_pending_stages() {
        let store = Arc::new(TaskStore::new());
        let ctx = context(store.clone(), DeployKind::Deploy).await;

        ctx.start_stage("stage").await;
        ctx.end_stage("stage", None).await;
        ctx.start_stage("extract").await;
        ctx.fail(&HostError::InvalidArchive {
            app: "app1".to_string(),
            reason: "bad".to_string(),
        })
        .await;

        let task = store.get_any(&ctx.task_id).await.unwrap();
        assert_eq!(task.status, DeployStatus::Failed);
        assert_eq!(task.error_kind, Some("invalid_archive"));
        assert_eq!(task.stages[1].status, StageStatus::Failed);
        assert_eq!(task.stages[5].status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancelled_token_is_reported() {
        let store = Arc::new(TaskStore::new());
        let ctx = context(store.clone(), DeployKind::Redeploy).await;
        assert!(ctx.ensure_not_cancelled().is_ok());

        ctx.cancel_token.cancel();
        let err = ctx.ensure_not_cancelled().unwrap_err();
        ctx.fail(&err).await;

        let task = store.get_any(&ctx.task_id).await.unwrap();
        assert_eq!(task.status, DeployStatus::Cancelled);
    }
}
