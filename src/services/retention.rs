//! 旧版本回收
//!
//! 所有删除都是尽力而为且幂等的：路径不存在不算错误；
//! 路径存在但删不掉时记录 warn 日志并返回 `CleanupFailed` 警告，不中断调用方。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::deploy::DeployWarning;

/// 一次回收的结果
#[derive(Debug, Default, Clone)]
pub struct Cleanup {
    /// 实际删除的路径
    pub removed: Vec<PathBuf>,
    /// 删除失败的警告
    pub warnings: Vec<DeployWarning>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// 删除一个文件或目录并记录结果
    pub async fn remove(&mut self, path: &Path) {
        match remove_path(path).await {
            Ok(true) => self.removed.push(path.to_path_buf()),
            Ok(false) => {}
            Err(warning) => self.warnings.push(warning),
        }
    }

    pub fn merge(&mut self, other: Cleanup) {
        self.removed.extend(other.removed);
        self.warnings.extend(other.warnings);
    }
}

/// 尽力删除路径
///
/// 返回 `Ok(true)` 表示删除了内容，`Ok(false)` 表示路径本来就不存在
pub async fn remove_path(path: &Path) -> Result<bool, DeployWarning> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(cleanup_failed(path, e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => {
            debug!(path = %path.display(), "Removed");
            Ok(true)
        }
        // 并发删除时可能已被别人删掉
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(cleanup_failed(path, e)),
    }
}

fn cleanup_failed(path: &Path, e: io::Error) -> DeployWarning {
    warn!(
        path = %path.display(),
        error = %e,
        kind = "cleanup_failed",
        "Failed to remove stale artifact, leaving it for reconcile"
    );
    DeployWarning::CleanupFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
