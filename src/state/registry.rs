//! 应用记录
//!
//! `AppRegistry` 是外部记录方的抽象：核心在部署前读取应用记录，发布成功后写回
//! published_version / archive_location。默认实现把记录持久化到本地 JSON 文件。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::app::{AppName, AppRecord};
use crate::error::{HostError, HostResult};
use crate::infra::fs::write_atomic;

/// 应用记录存储
#[async_trait]
pub trait AppRegistry: Send + Sync {
    async fn get(&self, name: &AppName) -> Option<AppRecord>;

    async fn list(&self) -> Vec<AppRecord>;

    /// 新建记录，同名记录已存在时返回 `ApplicationExists`
    async fn create(&self, record: AppRecord) -> HostResult<AppRecord>;

    /// 覆盖已有记录，不存在时返回 `ApplicationNotFound`
    async fn update(&self, record: AppRecord) -> HostResult<()>;

    /// 删除记录，返回被删除的记录
    async fn remove(&self, name: &AppName) -> HostResult<Option<AppRecord>>;
}

/// 持久化格式
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedRegistry {
    /// 版本号（用于未来格式升级）
    version: u32,
    apps: Vec<AppRecord>,
    saved_at: DateTime<Utc>,
}

/// 基于 JSON 文件的应用记录存储
///
/// 每次修改都先在副本上完成并原子写盘，成功后才替换内存中的记录
pub struct FileAppRegistry {
    path: Option<PathBuf>,
    records: RwLock<BTreeMap<AppName, AppRecord>>,
}

impl FileAppRegistry {
    /// 仅内存（测试用或不需要持久化时）
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// 从文件加载；文件不存在或无法解析时从空记录开始
    pub async fn load(path: PathBuf) -> Self {
        let mut records = BTreeMap::new();

        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<PersistedRegistry>(&content) {
                Ok(persisted) => {
                    info!(
                        path = %path.display(),
                        apps = persisted.apps.len(),
                        saved_at = %persisted.saved_at,
                        "Loaded application registry"
                    );
                    for record in persisted.apps {
                        records.insert(record.name.clone(), record);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse application registry, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read application registry, starting empty");
            }
        }

        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    async fn persist(&self, app: &AppName, records: &BTreeMap<AppName, AppRecord>) -> HostResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let persisted = PersistedRegistry {
            version: 1,
            apps: records.values().cloned().collect(),
            saved_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&persisted).map_err(|e| {
            HostError::storage(app, "serializing registry", std::io::Error::other(e))
        })?;

        write_atomic(path, &content)
            .await
            .map_err(|e| HostError::storage(app, "saving registry", e))
    }
}

#[async_trait]
impl AppRegistry for FileAppRegistry {
    async fn get(&self, name: &AppName) -> Option<AppRecord> {
        self.records.read().await.get(name).cloned()
    }

    async fn list(&self) -> Vec<AppRecord> {
        self.records.read().await.values().cloned().collect()
    }

    async fn create(&self, record: AppRecord) -> HostResult<AppRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.name) {
            return Err(HostError::ApplicationExists {
                app: record.name.clone(),
            });
        }

        let mut next = records.clone();
        next.insert(record.name.clone(), record.clone());
        self.persist(&record.name, &next).await?;
        *records = next;

        info!(app = %record.name, "Registered application");
        Ok(record)
    }

    async fn update(&self, record: AppRecord) -> HostResult<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.name) {
            return Err(HostError::ApplicationNotFound {
                app: record.name.to_string(),
            });
        }

        let mut next = records.clone();
        next.insert(record.name.clone(), record.clone());
        self.persist(&record.name, &next).await?;
        *records = next;
        Ok(())
    }

    async fn remove(&self, name: &AppName) -> HostResult<Option<AppRecord>> {
        let mut records = self.records.write().await;
        if !records.contains_key(name) {
            return Ok(None);
        }

        let mut next = records.clone();
        let removed = next.remove(name);
        self.persist(name, &next).await?;
        *records = next;

        info!(app = %name, "Removed application record");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::version::VersionId;

    fn name(raw: &str) -> AppName {
        AppName::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = FileAppRegistry::in_memory();
        registry.create(AppRecord::new(name("app1"))).await.unwrap();

        let err = registry.create(AppRecord::new(name("app1"))).await.unwrap_err();
        assert_eq!(err.kind(), "application_exists");

        assert!(registry.get(&name("app1")).await.is_some());
        assert_eq!(registry.list().await.len(), 1);

        let removed = registry.remove(&name("app1")).await.unwrap();
        assert!(removed.is_some());
        assert!(registry.get(&name("app1")).await.is_none());
        assert!(registry.remove(&name("app1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let registry = FileAppRegistry::in_memory();
        let err = registry.update(AppRecord::new(name("ghost"))).await.unwrap_err();
        assert_eq!(err.kind(), "application_not_found");
    }

    #[tokio::test]
    async fn test_records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = FileAppRegistry::load(path.clone()).await;
            let mut record = registry.create(AppRecord::new(name("app1"))).await.unwrap();
            record.mark_published(VersionId::from_raw(99), Some(PathBuf::from("a.zip")), None);
            registry.update(record).await.unwrap();
        }

        let registry = FileAppRegistry::load(path).await;
        let record = registry.get(&name("app1")).await.unwrap();
        assert_eq!(record.published_version, Some(VersionId::from_raw(99)));
        assert_eq!(record.build_number, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{not json").await.unwrap();

        let registry = FileAppRegistry::load(path).await;
        assert!(registry.list().await.is_empty());
    }
}
