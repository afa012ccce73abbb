//! 部署暂存区与上传接收
//!
//! 每次部署独占一个 `staging/<app>-<uuid>/` 目录：
//! `archive` 存放上传的归档，`content/` 是解包目标。提升为版本后暂存区被删除；
//! 失败时整个目录被丢弃，不会留下对读者可见的状态。

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::app::{safe_relative_path, AppName};
use crate::error::{HostError, HostResult};

use super::super::retention::Cleanup;

/// 单个上传文件（已展开目录树的一部分）
#[derive(Clone, Debug)]
pub struct UploadedFile {
    /// 相对路径，如 `static/js/main.js`
    pub relative_path: String,
    pub contents: Bytes,
}

/// 部署来源
#[derive(Clone, Debug)]
pub enum ArchiveSource {
    /// 内存中的归档字节
    Bytes(Bytes),
    /// 磁盘上的归档文件（会被复制，原文件不动）
    Path(PathBuf),
    /// 已展开的文件集合，绕过解包器直接写入暂存区
    Files(Vec<UploadedFile>),
}

/// 暂存区
pub struct StagingArea {
    app: AppName,
    root: PathBuf,
    discarded: bool,
}

impl StagingArea {
    /// 在 staging 根目录下创建新的暂存区
    pub async fn create(staging_dir: &Path, app: &AppName) -> HostResult<Self> {
        let root = staging_dir.join(format!("{}-{}", app, uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("content"))
            .await
            .map_err(|e| HostError::storage(app, "creating staging area", e))?;
        debug!(app = %app, path = %root.display(), "Created staging area");

        Ok(Self {
            app: app.clone(),
            root,
            discarded: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解包目标目录
    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    /// 暂存的归档文件
    pub fn archive_path(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// 把归档来源写入暂存区，返回归档路径
    pub async fn receive_archive(&self, source: &ArchiveSource) -> HostResult<PathBuf> {
        let target = self.archive_path();
        match source {
            ArchiveSource::Bytes(bytes) => fs::write(&target, bytes)
                .await
                .map_err(|e| HostError::storage(&self.app, "writing uploaded archive", e))?,
            ArchiveSource::Path(path) => {
                fs::copy(path, &target).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        HostError::InvalidArchive {
                            app: self.app.to_string(),
                            reason: "archive file does not exist".to_string(),
                        }
                    } else {
                        HostError::storage(&self.app, "copying archive", e)
                    }
                })?;
            }
            ArchiveSource::Files(_) => {
                return Err(HostError::InvalidArchive {
                    app: self.app.to_string(),
                    reason: "file set is not an archive".to_string(),
                })
            }
        }
        Ok(target)
    }

    /// 按相对路径把文件集合写入 content 目录
    ///
    /// 路径先全部校验，任何一个越界都直接拒绝（`PathTraversal`）
    pub async fn receive_files(&self, files: &[UploadedFile]) -> HostResult<usize> {
        let mut planned = Vec::with_capacity(files.len());
        for file in files {
            let relative = safe_relative_path(&file.relative_path).ok_or_else(|| {
                HostError::PathTraversal {
                    app: self.app.to_string(),
                    entry: file.relative_path.clone(),
                }
            })?;
            planned.push((relative, &file.contents));
        }

        let content = self.content_dir();
        for (relative, contents) in &planned {
            let target = content.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HostError::storage(&self.app, "writing uploaded files", e))?;
            }
            fs::write(&target, contents)
                .await
                .map_err(|e| HostError::storage(&self.app, "writing uploaded files", e))?;
        }

        Ok(planned.len())
    }

    /// 删除暂存区
    pub async fn discard(mut self) -> Cleanup {
        self.discarded = true;
        let mut cleanup = Cleanup::new();
        cleanup.remove(&self.root).await;
        cleanup
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        // 部署 future 被中途丢弃时的兜底清理
        if !self.discarded {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(app = %self.app, path = %self.root.display(), error = %e, "Failed to drop staging area");
                }
            }
        }
    }
}
