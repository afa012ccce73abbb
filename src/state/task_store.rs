//! 任务存储
//!
//! 记录部署 / 重新部署 / 删除任务，完成后移入历史记录，自动清理过期任务

use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::config::env::constants::MAX_TASK_HISTORY;
use crate::domain::deploy::{DeployStage, DeployStatus, DeployTask, DeployWarning};
use crate::domain::version::VersionId;

/// 任务结束时的结果
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: DeployStatus,
    pub version: Option<VersionId>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
    pub warnings: Vec<DeployWarning>,
}

/// 任务存储
///
/// 管理活跃任务和历史记录，提供清理策略
pub struct TaskStore {
    /// 活跃任务
    tasks: RwLock<HashMap<String, DeployTask>>,
    /// 历史记录
    history: RwLock<VecDeque<DeployTask>>,
    /// 最大历史记录数
    max_history: usize,
    /// 任务保留时间
    retention: Duration,
}

impl TaskStore {
    /// 创建新的任务存储
    pub fn new() -> Self {
        Self::with_config(MAX_TASK_HISTORY, 24)
    }

    /// 使用自定义配置创建
    pub fn with_config(max_history: usize, retention_hours: i64) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
            retention: Duration::hours(retention_hours),
        }
    }

    /// 创建新任务
    pub async fn create(&self, task: DeployTask) -> String {
        let task_id = task.id.clone();
        let mut tasks = self.tasks.write().await;
        tasks.insert(task_id.clone(), task);
        task_id
    }

    /// 获取活跃任务
    pub async fn get(&self, task_id: &str) -> Option<DeployTask> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).cloned()
    }

    /// 获取任务（优先活跃任务，然后查历史记录）
    pub async fn get_any(&self, task_id: &str) -> Option<DeployTask> {
        if let Some(task) = self.get(task_id).await {
            return Some(task);
        }
        let history = self.history.read().await;
        history.iter().find(|t| t.id == task_id).cloned()
    }

    /// 获取所有活跃任务
    pub async fn get_all(&self) -> Vec<DeployTask> {
        let tasks = self.tasks.read().await;
        tasks.values().cloned().collect()
    }

    /// 更新任务阶段
    pub async fn update_stages(&self, task_id: &str, stages: Vec<DeployStage>) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.stages = stages;
        }
    }

    /// 完成任务并移到历史记录
    pub async fn finish(&self, task_id: &str, outcome: TaskOutcome) {
        let task = {
            let mut tasks = self.tasks.write().await;
            tasks.remove(task_id).map(|mut task| {
                task.status = outcome.status;
                task.version = outcome.version;
                task.error_kind = outcome.error_kind;
                task.error = outcome.error;
                task.warnings = outcome.warnings;
                task.finished_at = Some(Utc::now());
                task
            })
        };

        if let Some(task) = task {
            self.add_to_history(task).await;
        }
    }

    /// 添加任务到历史记录
    pub async fn add_to_history(&self, task: DeployTask) {
        let mut history = self.history.write().await;
        history.push_front(task);

        while history.len() > self.max_history {
            history.pop_back();
        }
    }

    /// 获取历史记录
    pub async fn get_history(
        &self,
        limit: usize,
        app: Option<&str>,
        status: Option<&str>,
    ) -> Vec<DeployTask> {
        let history = self.history.read().await;

        history
            .iter()
            .filter(|task| {
                let app_match = app.map_or(true, |a| task.app.as_str() == a);
                let status_match = status.map_or(true, |s| task.status.as_str() == s);
                app_match && status_match
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// 获取历史记录总数
    pub async fn history_count(&self) -> usize {
        let history = self.history.read().await;
        history.len()
    }

    /// 清理过期的历史记录
    pub async fn cleanup_stale(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut history = self.history.write().await;
        history.retain(|task| task.finished_at.map_or(true, |t| t > cutoff));
    }

    /// 获取活跃任务数量
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.len()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
