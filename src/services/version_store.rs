//! 版本库
//!
//! 每个应用一个 `VersionStore`，磁盘布局：
//!
//! ```text
//! apps/<name>/
//!     PUBLISHED                  当前发布的版本号（原子写入）
//!     versions/<version_id>/     各版本的内容根目录
//!     archives/<version_id>.zip  属于该版本的归档
//! ```
//!
//! 发布是一次原子的指针切换：先原子写 PUBLISHED，再替换内存中的 `Arc<PublishedVersion>`。
//! 读者只会拿到完整的旧版本或完整的新版本。

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::config::env::constants::MAX_VERSION_ID_ATTEMPTS;
use crate::domain::app::AppName;
use crate::domain::version::{VersionId, VersionIdGenerator};
use crate::error::{HostError, HostResult};
use crate::infra::fs::write_atomic;

use super::retention::Cleanup;

/// 发布指针文件名
pub const PUBLISHED_FILE: &str = "PUBLISHED";
const VERSIONS_DIR: &str = "versions";
const ARCHIVES_DIR: &str = "archives";

/// 已发布的版本
///
/// 带一个读租约：回收旧版本前会独占租约并把它标记为 retired，
/// 保证正在读取的请求读完之前内容根目录不会被删除。
#[derive(Debug)]
pub struct PublishedVersion {
    pub id: VersionId,
    pub content_root: PathBuf,
    retired: RwLock<bool>,
}

impl PublishedVersion {
    fn new(id: VersionId, content_root: PathBuf) -> Self {
        Self {
            id,
            content_root,
            retired: RwLock::new(false),
        }
    }

    /// 获取读租约；版本已退役时返回 None，调用方应重新读取发布指针
    pub async fn lease(&self) -> Option<RwLockReadGuard<'_, bool>> {
        let guard = self.retired.read().await;
        if *guard {
            None
        } else {
            Some(guard)
        }
    }

    /// 等待所有读者离开后标记为退役
    async fn retire(&self) {
        *self.retired.write().await = true;
    }
}

/// 单个应用的版本库
pub struct VersionStore {
    app: AppName,
    root: PathBuf,
    ids: Arc<VersionIdGenerator>,
    published: RwLock<Option<Arc<PublishedVersion>>>,
}

impl VersionStore {
    /// 打开（必要时创建）应用的版本库，并加载发布指针
    pub async fn open(
        app: AppName,
        root: PathBuf,
        ids: Arc<VersionIdGenerator>,
    ) -> HostResult<Self> {
        for dir in [root.join(VERSIONS_DIR), root.join(ARCHIVES_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| HostError::storage(&app, "creating version store", e))?;
        }
        Self::load(app, root, ids).await
    }

    /// 只读加载：不创建目录，目录不存在时得到一个没有版本的空库
    async fn load(app: AppName, root: PathBuf, ids: Arc<VersionIdGenerator>) -> HostResult<Self> {
        let store = Self {
            app,
            root,
            ids,
            published: RwLock::new(None),
        };

        for id in store.list_versions().await? {
            store.ids.observe(id);
        }

        if let Some(id) = store.read_pointer().await {
            let content_root = store.version_dir(id);
            if fs::try_exists(&content_root).await.unwrap_or(false) {
                *store.published.write().await =
                    Some(Arc::new(PublishedVersion::new(id, content_root)));
            } else {
                warn!(
                    app = %store.app,
                    version = %id,
                    "Published pointer refers to a missing content root, treating as unpublished"
                );
            }
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 版本内容根目录
    pub fn version_dir(&self, id: VersionId) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(id.to_string())
    }

    /// 版本对应的归档路径
    pub fn archive_path(&self, id: VersionId, extension: &str) -> PathBuf {
        self.root
            .join(ARCHIVES_DIR)
            .join(format!("{}.{}", id, extension))
    }

    async fn read_pointer(&self) -> Option<VersionId> {
        let raw = fs::read_to_string(self.root.join(PUBLISHED_FILE)).await.ok()?;
        match raw.trim().parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(app = %self.app, error = %e, "Ignoring malformed published pointer");
                None
            }
        }
    }

    /// 把 staging 目录移入版本库，分配新的版本号
    ///
    /// 版本号冲突时重试，超过上限返回 `VersionIdCollision`，绝不覆盖已有版本
    pub async fn create_version(&self, staged: &Path) -> HostResult<VersionId> {
        for attempt in 1..=MAX_VERSION_ID_ATTEMPTS {
            let id = self.ids.next();
            let target = self.version_dir(id);

            if fs::try_exists(&target).await.unwrap_or(true) {
                warn!(app = %self.app, version = %id, attempt = attempt, "Version id already taken, retrying");
                continue;
            }

            match fs::rename(staged, &target).await {
                Ok(()) => {
                    info!(app = %self.app, version = %id, "Created version");
                    return Ok(id);
                }
                Err(_) if fs::try_exists(&target).await.unwrap_or(false) => {
                    warn!(app = %self.app, version = %id, attempt = attempt, "Version directory appeared concurrently, retrying");
                    continue;
                }
                Err(e) => return Err(HostError::storage(&self.app, "promoting staged content", e)),
            }
        }

        Err(HostError::VersionIdCollision {
            app: self.app.clone(),
        })
    }

    /// 把归档移到版本对应的位置
    pub async fn store_archive(
        &self,
        id: VersionId,
        archive: &Path,
        extension: &str,
    ) -> HostResult<PathBuf> {
        let target = self.archive_path(id, extension);
        fs::rename(archive, &target)
            .await
            .map_err(|e| HostError::storage(&self.app, "storing archive", e))?;
        Ok(target)
    }

    /// 原子切换发布指针，返回被替换的版本
    pub async fn publish(&self, id: VersionId) -> HostResult<Option<Arc<PublishedVersion>>> {
        let content_root = self.version_dir(id);
        if !fs::try_exists(&content_root).await.unwrap_or(false) {
            return Err(HostError::VersionNotFound {
                app: self.app.clone(),
                version: id,
            });
        }

        // 持有写锁期间写指针文件，保证磁盘与内存的切换顺序一致
        let mut published = self.published.write().await;
        write_atomic(&self.root.join(PUBLISHED_FILE), id.to_string().as_bytes())
            .await
            .map_err(|e| HostError::storage(&self.app, "writing published pointer", e))?;

        let previous = published.replace(Arc::new(PublishedVersion::new(id, content_root)));
        info!(
            app = %self.app,
            version = %id,
            previous = ?previous.as_ref().map(|p| p.id),
            "Published version"
        );
        Ok(previous)
    }

    /// 当前发布的版本（带内容根目录）
    pub async fn published(&self) -> Option<Arc<PublishedVersion>> {
        self.published.read().await.clone()
    }

    /// 当前发布的版本号
    pub async fn get_published(&self) -> Option<VersionId> {
        self.published.read().await.as_ref().map(|p| p.id)
    }

    /// 列出磁盘上的所有版本（升序）
    pub async fn list_versions(&self) -> HostResult<Vec<VersionId>> {
        let mut versions = Vec::new();
        let mut entries = match fs::read_dir(self.root.join(VERSIONS_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(HostError::storage(&self.app, "listing versions", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HostError::storage(&self.app, "listing versions", e))?
        {
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                versions.push(id);
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// 查找版本对应的归档文件
    pub async fn archive_for(&self, id: VersionId) -> Option<PathBuf> {
        let wanted = id.to_string();
        self.archives()
            .await
            .into_iter()
            .find(|path| path.file_stem().and_then(|s| s.to_str()) == Some(wanted.as_str()))
    }

    async fn archives(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(mut entries) = fs::read_dir(self.root.join(ARCHIVES_DIR)).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                paths.push(entry.path());
            }
        }
        paths
    }

    /// 删除一个未发布的版本
    ///
    /// 删除当前发布版本会被拒绝（`VersionInUse`）；只有删除整个应用时才会删除发布版本
    pub async fn delete_version(&self, id: VersionId) -> HostResult<Cleanup> {
        if self.get_published().await == Some(id) {
            return Err(HostError::VersionInUse {
                app: self.app.clone(),
                version: id,
            });
        }

        let dir = self.version_dir(id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(HostError::VersionNotFound {
                app: self.app.clone(),
                version: id,
            });
        }

        let mut cleanup = Cleanup::new();
        cleanup.remove(&dir).await;
        if let Some(archive) = self.archive_for(id).await {
            cleanup.remove(&archive).await;
        }
        info!(app = %self.app, version = %id, clean = cleanup.is_clean(), "Deleted version");
        Ok(cleanup)
    }

    /// 回收被替换下来的版本：等待读者离开后删除内容根目录和归档
    pub async fn retire(&self, previous: Arc<PublishedVersion>) -> Cleanup {
        previous.retire().await;

        let mut cleanup = Cleanup::new();
        cleanup.remove(&previous.content_root).await;
        if let Some(archive) = self.archive_for(previous.id).await {
            cleanup.remove(&archive).await;
        }
        info!(
            app = %self.app,
            version = %previous.id,
            clean = cleanup.is_clean(),
            "Retired superseded version"
        );
        cleanup
    }

    /// 删除整个应用：取消发布，删除所有版本和归档
    pub async fn delete_application(&self) -> Cleanup {
        let previous = self.published.write().await.take();

        let mut cleanup = Cleanup::new();
        if let Some(previous) = previous {
            previous.retire().await;
        }
        cleanup.remove(&self.root).await;
        info!(app = %self.app, clean = cleanup.is_clean(), "Deleted application content");
        cleanup
    }

    /// 清理残留：删除非发布版本的目录和不属于发布版本的归档
    pub async fn reconcile(&self) -> HostResult<Cleanup> {
        let published = self.get_published().await;
        let mut cleanup = Cleanup::new();

        for id in self.list_versions().await? {
            if Some(id) != published {
                cleanup.remove(&self.version_dir(id)).await;
            }
        }

        let keep = published.map(|id| id.to_string());
        for archive in self.archives().await {
            let stem = archive.file_stem().and_then(|s| s.to_str());
            if stem.is_none() || stem != keep.as_deref() {
                cleanup.remove(&archive).await;
            }
        }

        if !cleanup.removed.is_empty() {
            info!(app = %self.app, removed = cleanup.removed.len(), "Reconciled stale artifacts");
        }
        Ok(cleanup)
    }
}

/// 所有应用的版本库
///
/// 数据目录布局：`staging/`（进行中的部署）和 `apps/`（各应用版本库），位于同一文件系统，
/// 保证从 staging 到版本库的移动是 rename
pub struct Storage {
    apps_dir: PathBuf,
    staging_dir: PathBuf,
    ids: Arc<VersionIdGenerator>,
    stores: RwLock<HashMap<AppName, Arc<VersionStore>>>,
}

impl Storage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            apps_dir: data_dir.join("apps"),
            staging_dir: data_dir.join("staging"),
            ids: Arc::new(VersionIdGenerator::new()),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// 获取（必要时打开）应用的版本库
    pub async fn store(&self, app: &AppName) -> HostResult<Arc<VersionStore>> {
        if let Some(store) = self.stores.read().await.get(app) {
            return Ok(store.clone());
        }

        // 在锁外打开，避免磁盘 I/O 阻塞其它应用的查找；并发打开时保留先插入的那个
        let opened = Arc::new(
            VersionStore::open(app.clone(), self.app_root(app), self.ids.clone()).await?,
        );
        let mut stores = self.stores.write().await;
        Ok(stores.entry(app.clone()).or_insert(opened).clone())
    }

    /// 只读查找应用的版本库，从不创建目录
    ///
    /// 未缓存时从磁盘加载但不放入缓存；应用目录不存在时返回 None
    pub async fn existing_store(&self, app: &AppName) -> HostResult<Option<Arc<VersionStore>>> {
        if let Some(store) = self.stores.read().await.get(app) {
            return Ok(Some(store.clone()));
        }

        let root = self.app_root(app);
        if !fs::try_exists(&root).await.unwrap_or(false) {
            return Ok(None);
        }
        let store = VersionStore::load(app.clone(), root, self.ids.clone()).await?;
        Ok(Some(Arc::new(store)))
    }

    /// 应用目录 `apps/<name>`
    pub fn app_root(&self, app: &AppName) -> PathBuf {
        self.apps_dir.join(app.as_str())
    }

    /// 从内存中移除应用的版本库（删除应用后调用）
    pub async fn forget(&self, app: &AppName) {
        self.stores.write().await.remove(app);
    }

    /// 启动时清理：清空 staging，回收各应用残留，删除未登记应用的目录
    pub async fn reconcile(&self, known: &[AppName]) -> HostResult<Cleanup> {
        let mut cleanup = Cleanup::new();

        if let Ok(mut entries) = fs::read_dir(&self.staging_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                cleanup.remove(&entry.path()).await;
            }
        }

        for app in known {
            let store = self.store(app).await?;
            cleanup.merge(store.reconcile().await?);
        }

        if let Ok(mut entries) = fs::read_dir(&self.apps_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let orphan = entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !known.iter().any(|app| app.as_str() == name));
                if orphan {
                    warn!(path = %entry.path().display(), "Removing content of unregistered application");
                    cleanup.remove(&entry.path()).await;
                }
            }
        }

        Ok(cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> AppName {
        AppName::parse(name).unwrap()
    }

    async fn stage(root: &Path, name: &str, index: &str) -> PathBuf {
        let dir = root.join("staging").join(name);
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("index.html"), index).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_create_and_publish() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        assert!(store.get_published().await.is_none());

        let staged = stage(tmp.path(), "a", "v1").await;
        let id = store.create_version(&staged).await.unwrap();
        assert!(!staged.exists());
        assert!(store.get_published().await.is_none());

        let previous = store.publish(id).await.unwrap();
        assert!(previous.is_none());
        assert_eq!(store.get_published().await, Some(id));

        let pointer = fs::read_to_string(store.root().join(PUBLISHED_FILE)).await.unwrap();
        assert_eq!(pointer, id.to_string());
    }

    /// 把生成器推进到远未来的固定值，之后的版本号依次为 base+1、base+2 ...
    fn seed_ids(store: &VersionStore) -> u64 {
        let base = u64::MAX / 2;
        store.ids.observe(VersionId::from_raw(base));
        base
    }

    async fn occupy(store: &VersionStore, raw: u64) -> PathBuf {
        let dir = store.version_dir(VersionId::from_raw(raw));
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("index.html"), "taken").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_create_version_skips_taken_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        let base = seed_ids(&store);

        let mut taken = Vec::new();
        for offset in 1..=2 {
            taken.push(occupy(&store, base + offset).await);
        }

        let staged = stage(tmp.path(), "a", "fresh").await;
        let id = store.create_version(&staged).await.unwrap();

        assert_eq!(id.as_u64(), base + 3);
        assert_eq!(
            fs::read_to_string(store.version_dir(id).join("index.html")).await.unwrap(),
            "fresh"
        );
        for dir in taken {
            assert_eq!(fs::read_to_string(dir.join("index.html")).await.unwrap(), "taken");
        }
    }

    #[tokio::test]
    async fn test_create_version_gives_up_without_overwriting() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        let base = seed_ids(&store);

        let mut taken = Vec::new();
        for offset in 1..=MAX_VERSION_ID_ATTEMPTS as u64 {
            taken.push(occupy(&store, base + offset).await);
        }

        let staged = stage(tmp.path(), "a", "fresh").await;
        let err = store.create_version(&staged).await.unwrap_err();

        assert_eq!(err.kind(), "version_id_collision");
        assert!(staged.join("index.html").exists());
        for dir in &taken {
            assert_eq!(fs::read_to_string(dir.join("index.html")).await.unwrap(), "taken");
        }
        assert_eq!(store.list_versions().await.unwrap().len(), taken.len());
    }

    #[tokio::test]
    async fn test_existing_store_never_creates() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());

        assert!(storage.existing_store(&app("app1")).await.unwrap().is_none());
        assert!(!tmp.path().join("apps").exists());

        // 磁盘上已有内容但尚未缓存：只读加载，不进缓存
        {
            let other = Storage::new(tmp.path());
            let store = other.store(&app("app2")).await.unwrap();
            let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
            store.publish(v1).await.unwrap();
        }
        let loaded = storage.existing_store(&app("app2")).await.unwrap().unwrap();
        assert!(loaded.get_published().await.is_some());
        assert!(storage.stores.read().await.get(&app("app2")).is_none());
    }

    #[tokio::test]
    async fn test_publish_returns_previous_and_retire_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app4")).await.unwrap();

        let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
        store.publish(v1).await.unwrap();
        let archive = tmp.path().join("upload.zip");
        fs::write(&archive, "zip").await.unwrap();
        let stored = store.store_archive(v1, &archive, "zip").await.unwrap();

        let v2 = store.create_version(&stage(tmp.path(), "b", "v2").await).await.unwrap();
        assert!(v2 > v1);
        let previous = store.publish(v2).await.unwrap().unwrap();
        assert_eq!(previous.id, v1);

        let cleanup = store.retire(previous.clone()).await;
        assert!(cleanup.is_clean());
        assert!(!store.version_dir(v1).exists());
        assert!(!stored.exists());
        assert!(previous.lease().await.is_none());
        assert_eq!(store.list_versions().await.unwrap(), vec![v2]);
    }

    #[tokio::test]
    async fn test_publish_unknown_version() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        let err = store.publish(VersionId::from_raw(7)).await.unwrap_err();
        assert_eq!(err.kind(), "version_not_found");
    }

    #[tokio::test]
    async fn test_delete_version_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();

        let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
        let v2 = store.create_version(&stage(tmp.path(), "b", "v2").await).await.unwrap();
        store.publish(v2).await.unwrap();

        let err = store.delete_version(v2).await.unwrap_err();
        assert_eq!(err.kind(), "version_in_use");

        let err = store.delete_version(VersionId::from_raw(1)).await.unwrap_err();
        assert_eq!(err.kind(), "version_not_found");

        let cleanup = store.delete_version(v1).await.unwrap();
        assert!(cleanup.is_clean());
        assert_eq!(store.list_versions().await.unwrap(), vec![v2]);
    }

    #[tokio::test]
    async fn test_delete_application_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();

        let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
        store.publish(v1).await.unwrap();
        let published = store.published().await.unwrap();

        let cleanup = store.delete_application().await;

        assert!(cleanup.is_clean());
        assert!(!store.root().exists());
        assert!(store.get_published().await.is_none());
        assert!(published.lease().await.is_none());
    }

    #[tokio::test]
    async fn test_reopen_restores_pointer_and_advances_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let v1 = {
            let storage = Storage::new(tmp.path());
            let store = storage.store(&app("app1")).await.unwrap();
            let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
            store.publish(v1).await.unwrap();
            v1
        };

        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        assert_eq!(store.get_published().await, Some(v1));

        let v2 = store.create_version(&stage(tmp.path(), "b", "v2").await).await.unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn test_dangling_pointer_is_unpublished() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("apps").join("app1");
        fs::create_dir_all(&root).await.unwrap();
        fs::write(root.join(PUBLISHED_FILE), "12345").await.unwrap();

        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        assert!(store.get_published().await.is_none());
    }

    #[tokio::test]
    async fn test_lease_blocks_retire_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();
        let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
        store.publish(v1).await.unwrap();
        let v2 = store.create_version(&stage(tmp.path(), "b", "v2").await).await.unwrap();

        let reader = store.published().await.unwrap();
        let lease = reader.lease().await.unwrap();

        let previous = store.publish(v2).await.unwrap().unwrap();
        let store_clone = store.clone();
        let retire = tokio::spawn(async move { store_clone.retire(previous).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // 读者仍持有租约，旧内容必须还在
        assert!(reader.content_root.join("index.html").exists());
        drop(lease);

        let cleanup = retire.await.unwrap();
        assert!(cleanup.is_clean());
        assert!(!reader.content_root.exists());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_published_only() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let store = storage.store(&app("app1")).await.unwrap();

        let v1 = store.create_version(&stage(tmp.path(), "a", "v1").await).await.unwrap();
        let v2 = store.create_version(&stage(tmp.path(), "b", "v2").await).await.unwrap();
        store.publish(v2).await.unwrap();
        fs::write(store.archive_path(v1, "zip"), "old").await.unwrap();
        fs::write(store.archive_path(v2, "zip"), "new").await.unwrap();

        let leftover = storage.staging_dir().join("dead-deploy");
        fs::create_dir_all(&leftover).await.unwrap();
        let orphan_app = tmp.path().join("apps").join("ghost");
        fs::create_dir_all(&orphan_app).await.unwrap();

        let cleanup = storage.reconcile(&[app("app1")]).await.unwrap();

        assert!(cleanup.is_clean());
        assert_eq!(store.list_versions().await.unwrap(), vec![v2]);
        assert!(store.archive_path(v2, "zip").exists());
        assert!(!store.archive_path(v1, "zip").exists());
        assert!(!leftover.exists());
        assert!(!orphan_app.exists());
    }
}
