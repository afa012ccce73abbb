//! 部署协调
//!
//! 一次部署的流程：暂存上传 → 解包 → 校验 index.html → 创建版本 → 原子发布 → 回收旧版本。
//! 同一应用的 deploy / redeploy / undeploy 串行执行，不同应用并行。
//! 发布之前的任何失败都只丢弃暂存区，读者看不到任何变化。

pub mod context;
pub mod lock;
pub mod staging;

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::domain::app::{AppName, AppRecord, AppStatus};
use crate::domain::deploy::{
    DeployKind, DeployReport, DeployWarning, UndeployReport, VersionListing,
};
use crate::domain::version::VersionId;
use crate::error::{HostError, HostResult};
use crate::infra::archive::{
    ArchiveFormat, ExtractError, ExtractLimits, ExtractedTree, Extractors, INDEX_FILE,
};
use crate::infra::fs::{copy_tree, sha256_file};
use crate::infra::record_center::RecordCenterClient;
use crate::services::retention::Cleanup;
use crate::services::version_store::{PublishedVersion, Storage, VersionStore};
use crate::state::registry::AppRegistry;
use crate::state::task_store::TaskStore;

pub use context::DeployContext;
pub use lock::{DeployGuard, DeployLocks};
pub use staging::{ArchiveSource, StagingArea, UploadedFile};

/// 正在运行的部署
#[derive(Clone, Debug)]
pub struct RunningDeploy {
    pub task_id: String,
    pub kind: DeployKind,
    pub cancel_token: CancellationToken,
}

/// 部署内容的来源
enum Intake {
    /// 新上传的归档或文件集合
    Upload(ArchiveSource),
    /// 重新发布当前内容
    Redeploy(AppRecord),
}

/// 已暂存、等待归入版本库的归档
struct StagedArchive {
    path: PathBuf,
    extension: String,
    sha256: String,
}

/// 部署协调器
pub struct DeployCoordinator {
    storage: Arc<Storage>,
    registry: Arc<dyn AppRegistry>,
    extractors: Extractors,
    locks: DeployLocks,
    record_center: Arc<RecordCenterClient>,
    task_store: Arc<TaskStore>,
    /// 运行中的部署（按应用）
    running: RwLock<HashMap<AppName, RunningDeploy>>,
    timeout: Duration,
}

impl DeployCoordinator {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<dyn AppRegistry>,
        record_center: Arc<RecordCenterClient>,
        task_store: Arc<TaskStore>,
        config: &DeployConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            extractors: Extractors::new(ExtractLimits {
                max_entries: config.max_archive_entries,
            }),
            locks: DeployLocks::new(config.lock_timeout),
            record_center,
            task_store,
            running: RwLock::new(HashMap::new()),
            timeout: config.timeout,
        }
    }

    /// 部署上传的归档或文件集合，返回新发布的版本
    pub async fn deploy(&self, name: &str, source: ArchiveSource) -> HostResult<DeployReport> {
        let app = HostError::check_name(name)?;
        let _guard = self.locks.acquire(&app).await?;
        self.require_record(&app).await?;

        let (ctx, watchdog) = self.begin(&app, DeployKind::Deploy).await;
        let result = self.run(&ctx, Intake::Upload(source)).await;
        self.complete(ctx, watchdog, result).await
    }

    /// 重新发布当前内容，生成新的版本号
    ///
    /// 优先复制当前发布版本的内容；发布内容缺少 index.html 时改为重新解包记录的归档
    pub async fn redeploy(&self, name: &str) -> HostResult<DeployReport> {
        let app = HostError::check_name(name)?;
        let _guard = self.locks.acquire(&app).await?;
        let record = self.require_record(&app).await?;

        let (ctx, watchdog) = self.begin(&app, DeployKind::Redeploy).await;
        let result = self.run(&ctx, Intake::Redeploy(record)).await;
        self.complete(ctx, watchdog, result).await
    }

    /// 删除应用：所有版本、归档和应用记录
    pub async fn undeploy(&self, name: &str) -> HostResult<UndeployReport> {
        let app = HostError::check_name(name)?;
        let _guard = self.locks.acquire(&app).await?;
        self.require_record(&app).await?;

        let ctx = DeployContext::begin(
            self.task_store.clone(),
            app.clone(),
            DeployKind::Undeploy,
            CancellationToken::new(),
        )
        .await;

        // 先删除记录，读者从此得到 ApplicationNotFound，再删除内容
        ctx.start_stage("unregister").await;
        if let Err(e) = self.registry.remove(&app).await {
            ctx.fail(&e).await;
            return Err(e);
        }
        ctx.end_stage("unregister", None).await;

        ctx.start_stage("remove").await;
        let cleanup = match self.storage.existing_store(&app).await {
            Ok(Some(store)) => store.delete_application().await,
            Ok(None) => Cleanup::new(),
            Err(e) => {
                warn!(app = %app, error = %e, "Failed to open version store, removing application directory directly");
                let mut cleanup = Cleanup::new();
                cleanup.remove(&self.storage.app_root(&app)).await;
                cleanup
            }
        };
        self.storage.forget(&app).await;
        ctx.end_stage("remove", Some(format!("{} paths removed", cleanup.removed.len())))
            .await;
        let warnings = cleanup.warnings;

        if self.record_center.has_callback() {
            let record_center = self.record_center.clone();
            let app = app.clone();
            tokio::spawn(async move {
                let _ = record_center.notify_removed(&app).await;
            });
        }

        ctx.succeed(None, warnings.clone()).await;
        info!(app = %app, removed = cleanup.removed.len(), warnings = warnings.len(), "Application undeployed");

        Ok(UndeployReport {
            task_id: ctx.task_id.clone(),
            app,
            removed: cleanup.removed.len(),
            warnings,
        })
    }

    /// 删除一个未发布的版本
    pub async fn delete_version(&self, name: &str, version: VersionId) -> HostResult<Cleanup> {
        let app = HostError::check_name(name)?;
        let _guard = self.locks.acquire(&app).await?;
        self.require_record(&app).await?;

        let store = self.storage.store(&app).await?;
        store.delete_version(version).await
    }

    /// 列出应用的版本
    pub async fn list_versions(&self, name: &str) -> HostResult<VersionListing> {
        let app = HostError::check_name(name)?;
        self.require_record(&app).await?;

        let Some(store) = self.storage.existing_store(&app).await? else {
            return Ok(VersionListing {
                published: None,
                versions: Vec::new(),
                app,
            });
        };
        Ok(VersionListing {
            published: store.get_published().await,
            versions: store.list_versions().await?,
            app,
        })
    }

    /// 取消应用正在进行的部署，返回是否有部署被取消
    ///
    /// 已经发布的部署不受影响
    pub async fn cancel(&self, name: &str) -> HostResult<bool> {
        let app = HostError::check_name(name)?;
        let running = self.running.read().await;
        match running.get(&app) {
            Some(deploy) => {
                info!(app = %app, task_id = %deploy.task_id, "Cancelling deployment");
                deploy.cancel_token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 运行中的部署
    pub async fn running_deploys(&self) -> HashMap<AppName, RunningDeploy> {
        self.running.read().await.clone()
    }

    /// 运行中的部署数量
    pub async fn active_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// 启动时清理残留，并让应用记录与磁盘上的发布指针保持一致
    ///
    /// 只能在没有部署运行时调用
    pub async fn reconcile(&self) -> HostResult<Cleanup> {
        let records = self.registry.list().await;
        let known: Vec<AppName> = records.iter().map(|r| r.name.clone()).collect();
        let cleanup = self.storage.reconcile(&known).await?;

        for record in records {
            let store = self.storage.store(&record.name).await?;
            let published = store.get_published().await;
            if published == record.published_version {
                continue;
            }

            warn!(
                app = %record.name,
                on_disk = ?published,
                recorded = ?record.published_version,
                "Application record disagrees with the published pointer, syncing record"
            );
            let mut updated = record;
            updated.published_version = published;
            updated.archive_location = match published {
                Some(id) => store.archive_for(id).await,
                None => None,
            };
            if published.is_none() && updated.status == AppStatus::Running {
                updated.status = AppStatus::Pending;
            }
            updated.updated_at = Utc::now();
            if let Err(e) = self.registry.update(updated).await {
                warn!(error = %e, "Failed to sync application record");
            }
        }

        info!(
            removed = cleanup.removed.len(),
            warnings = cleanup.warnings.len(),
            "Startup reconcile finished"
        );
        Ok(cleanup)
    }

    async fn require_record(&self, app: &AppName) -> HostResult<AppRecord> {
        self.registry
            .get(app)
            .await
            .ok_or_else(|| HostError::ApplicationNotFound {
                app: app.to_string(),
            })
    }

    /// 创建任务、登记取消令牌并启动超时保护
    async fn begin(&self, app: &AppName, kind: DeployKind) -> (DeployContext, JoinHandle<()>) {
        let cancel_token = CancellationToken::new();
        let ctx = DeployContext::begin(
            self.task_store.clone(),
            app.clone(),
            kind,
            cancel_token.clone(),
        )
        .await;

        self.running.write().await.insert(
            app.clone(),
            RunningDeploy {
                task_id: ctx.task_id.clone(),
                kind,
                cancel_token: cancel_token.clone(),
            },
        );
        self.set_unpublished_status(app, AppStatus::Deploying).await;

        let watchdog = spawn_timeout(ctx.task_id.clone(), app.clone(), cancel_token, self.timeout);
        (ctx, watchdog)
    }

    async fn complete(
        &self,
        ctx: DeployContext,
        watchdog: JoinHandle<()>,
        result: HostResult<DeployReport>,
    ) -> HostResult<DeployReport> {
        watchdog.abort();
        self.running.write().await.remove(&ctx.app);

        match &result {
            Ok(report) => ctx.succeed(Some(report.version), report.warnings.clone()).await,
            Err(err) => {
                ctx.fail(err).await;
                self.set_unpublished_status(&ctx.app, AppStatus::Failed).await;
            }
        }
        result
    }

    /// 只有从未发布过的应用才改写状态，已上线的应用保持 running
    async fn set_unpublished_status(&self, app: &AppName, status: AppStatus) {
        let Some(mut record) = self.registry.get(app).await else {
            return;
        };
        if record.published_version.is_some() || record.status == status {
            return;
        }

        record.status = status;
        record.updated_at = Utc::now();
        if let Err(e) = self.registry.update(record).await {
            warn!(app = %app, error = %e, "Failed to update application status");
        }
    }

    /// 在独占的暂存区内执行一次部署，结束后删除暂存区
    async fn run(&self, ctx: &DeployContext, intake: Intake) -> HostResult<DeployReport> {
        let store = self.storage.store(&ctx.app).await?;

        ctx.start_stage("stage").await;
        let staging = StagingArea::create(self.storage.staging_dir(), &ctx.app).await?;
        let result = self.stage_and_promote(ctx, &store, &staging, intake).await;
        let cleanup = staging.discard().await;

        result.map(|mut report| {
            report.warnings.extend(cleanup.warnings);
            report
        })
    }

    async fn stage_and_promote(
        &self,
        ctx: &DeployContext,
        store: &VersionStore,
        staging: &StagingArea,
        intake: Intake,
    ) -> HostResult<DeployReport> {
        let (tree, archive) = match intake {
            Intake::Upload(ArchiveSource::Files(files)) => {
                let written = staging.receive_files(&files).await?;
                ctx.end_stage("stage", Some(format!("{} files", written))).await;
                ctx.skip_stage("extract", "expanded file set uploaded").await;
                (ExtractedTree::scan(&staging.content_dir(), written), None)
            }
            Intake::Upload(source) => {
                let archive = staging.receive_archive(&source).await?;
                ctx.end_stage("stage", None).await;
                self.extract_staged(ctx, staging, archive).await?
            }
            Intake::Redeploy(record) => self.restage(ctx, store, staging, &record).await?,
        };

        ctx.ensure_not_cancelled()?;
        self.promote(ctx, store, staging, tree, archive).await
    }

    /// 准备 redeploy 的内容
    async fn restage(
        &self,
        ctx: &DeployContext,
        store: &VersionStore,
        staging: &StagingArea,
        record: &AppRecord,
    ) -> HostResult<(ExtractedTree, Option<StagedArchive>)> {
        // 持有部署锁期间发布版本不会被回收
        if let Some(published) = store.published().await {
            let has_index = fs::try_exists(published.content_root.join(INDEX_FILE))
                .await
                .unwrap_or(false);
            if has_index {
                let src = published.content_root.clone();
                let dest = staging.content_dir();
                let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
                    .await
                    .map_err(|e| {
                        HostError::storage(&ctx.app, "copying published content", std::io::Error::other(e))
                    })?
                    .map_err(|e| HostError::storage(&ctx.app, "copying published content", e))?;
                ctx.end_stage("stage", Some(format!("copied version {}", published.id)))
                    .await;
                ctx.skip_stage("extract", "reused published content").await;

                let archive = match store.archive_for(published.id).await {
                    Some(path) => Some(self.restage_archive(ctx, staging, path).await?),
                    None => None,
                };
                return Ok((
                    ExtractedTree::scan(&staging.content_dir(), copied as usize),
                    archive,
                ));
            }

            warn!(
                app = %ctx.app,
                version = %published.id,
                "Published content has no index document, re-extracting the archive"
            );
        }

        let archive = self
            .recorded_archive(store, record)
            .await
            .ok_or_else(|| HostError::NoArchive {
                app: ctx.app.clone(),
            })?;
        let staged = staging.receive_archive(&ArchiveSource::Path(archive)).await?;
        ctx.end_stage("stage", None).await;
        self.extract_staged(ctx, staging, staged).await
    }

    /// 记录中的归档，找不到时退回到发布版本的归档
    async fn recorded_archive(&self, store: &VersionStore, record: &AppRecord) -> Option<PathBuf> {
        if let Some(location) = &record.archive_location {
            if fs::try_exists(location).await.unwrap_or(false) {
                return Some(location.clone());
            }
        }
        match store.get_published().await {
            Some(id) => store.archive_for(id).await,
            None => None,
        }
    }

    /// 复制现有归档到暂存区，使新版本拥有自己的归档
    async fn restage_archive(
        &self,
        ctx: &DeployContext,
        staging: &StagingArea,
        archive: PathBuf,
    ) -> HostResult<StagedArchive> {
        let extension = archive
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(ArchiveFormat::Zip.extension())
            .to_string();
        let path = staging.receive_archive(&ArchiveSource::Path(archive)).await?;
        let sha256 = sha256_file(&path)
            .await
            .map_err(|e| HostError::storage(&ctx.app, "hashing archive", e))?;

        Ok(StagedArchive {
            path,
            extension,
            sha256,
        })
    }

    async fn extract_staged(
        &self,
        ctx: &DeployContext,
        staging: &StagingArea,
        archive: PathBuf,
    ) -> HostResult<(ExtractedTree, Option<StagedArchive>)> {
        ctx.start_stage("extract").await;
        let tree = self
            .extract(&ctx.app, archive.clone(), staging.content_dir())
            .await?;
        let sha256 = sha256_file(&archive)
            .await
            .map_err(|e| HostError::storage(&ctx.app, "hashing archive", e))?;

        info!(
            task_id = %ctx.task_id,
            app = %ctx.app,
            files = tree.files,
            "Archive extracted"
        );
        ctx.end_stage("extract", Some(format!("{} files", tree.files)))
            .await;

        let extension = tree
            .format
            .unwrap_or(ArchiveFormat::Zip)
            .extension()
            .to_string();
        Ok((
            tree,
            Some(StagedArchive {
                path: archive,
                extension,
                sha256,
            }),
        ))
    }

    /// 在阻塞线程上解包
    async fn extract(
        &self,
        app: &AppName,
        archive: PathBuf,
        dest: PathBuf,
    ) -> HostResult<ExtractedTree> {
        let extractors = self.extractors.clone();
        let result = tokio::task::spawn_blocking(move || extractors.extract(&archive, &dest))
            .await
            .map_err(|e| HostError::storage(app, "extracting archive", std::io::Error::other(e)))?;

        result.map_err(|e| match e {
            ExtractError::Invalid(reason) => HostError::InvalidArchive {
                app: app.to_string(),
                reason,
            },
            ExtractError::Traversal(entry) => HostError::PathTraversal {
                app: app.to_string(),
                entry,
            },
            ExtractError::Io(e) => HostError::storage(app, "extracting archive", e),
        })
    }

    /// 校验、创建版本、发布，然后回收被替换的版本
    async fn promote(
        &self,
        ctx: &DeployContext,
        store: &VersionStore,
        staging: &StagingArea,
        tree: ExtractedTree,
        archive: Option<StagedArchive>,
    ) -> HostResult<DeployReport> {
        ctx.start_stage("validate").await;
        if tree.index_path.is_none() {
            return Err(HostError::MissingIndex {
                app: ctx.app.clone(),
            });
        }
        ctx.end_stage("validate", None).await;

        ctx.start_stage("promote").await;
        let version = store.create_version(&staging.content_dir()).await?;
        let (archive_location, previous) =
            match self.publish_version(ctx, store, version, archive.as_ref()).await {
                Ok(published) => published,
                Err(e) => {
                    // 未发布的版本对读者不可见，直接删除
                    if let Ok(cleanup) = store.delete_version(version).await {
                        if !cleanup.is_clean() {
                            warn!(app = %ctx.app, version = %version, "Abandoned version was not fully removed");
                        }
                    }
                    return Err(e);
                }
            };

        let archive_sha256 = archive.map(|a| a.sha256);
        let mut warnings = Vec::new();
        if let Err(e) = self
            .sync_record(&ctx.app, version, archive_location, archive_sha256.clone())
            .await
        {
            warn!(
                app = %ctx.app,
                version = %version,
                error = %e,
                kind = "record_sync_failed",
                "Failed to update application record after publish"
            );
            warnings.push(DeployWarning::RecordSyncFailed {
                reason: e.to_string(),
            });
        }

        ctx.start_stage("cleanup").await;
        let previous_id = previous.as_ref().map(|p| p.id);
        if let Some(previous) = previous {
            let cleanup = store.retire(previous).await;
            warnings.extend(cleanup.warnings);
        }
        ctx.end_stage("cleanup", None).await;

        if self.record_center.has_callback() {
            let record_center = self.record_center.clone();
            let app = ctx.app.clone();
            let sha = archive_sha256.clone();
            tokio::spawn(async move {
                let _ = record_center
                    .notify_published(&app, version, sha.as_deref())
                    .await;
            });
        }

        info!(
            task_id = %ctx.task_id,
            app = %ctx.app,
            version = %version,
            previous = ?previous_id,
            warnings = warnings.len(),
            "Deployment published"
        );

        Ok(DeployReport {
            task_id: ctx.task_id.clone(),
            app: ctx.app.clone(),
            version,
            previous: previous_id,
            archive_sha256,
            warnings,
        })
    }

    /// 归档入库、最后一次取消检查、切换发布指针
    async fn publish_version(
        &self,
        ctx: &DeployContext,
        store: &VersionStore,
        version: VersionId,
        archive: Option<&StagedArchive>,
    ) -> HostResult<(Option<PathBuf>, Option<Arc<PublishedVersion>>)> {
        let archive_location = match archive {
            Some(archive) => Some(
                store
                    .store_archive(version, &archive.path, &archive.extension)
                    .await?,
            ),
            None => None,
        };
        ctx.end_stage("promote", Some(format!("version {}", version)))
            .await;

        ctx.ensure_not_cancelled()?;

        ctx.start_stage("publish").await;
        let previous = store.publish(version).await?;
        ctx.end_stage("publish", None).await;
        Ok((archive_location, previous))
    }

    async fn sync_record(
        &self,
        app: &AppName,
        version: VersionId,
        archive_location: Option<PathBuf>,
        archive_sha256: Option<String>,
    ) -> HostResult<()> {
        let mut record = self.require_record(app).await?;
        record.mark_published(version, archive_location, archive_sha256);
        self.registry.update(record).await
    }
}

/// 启动超时保护任务
fn spawn_timeout(
    task_id: String,
    app: AppName,
    cancel_token: CancellationToken,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel_token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                error!(
                    task_id = %task_id,
                    app = %app,
                    "Deployment timed out after {} seconds",
                    timeout.as_secs()
                );
                cancel_token.cancel();
            }
        }
    })
}
