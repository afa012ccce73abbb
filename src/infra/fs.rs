//! 文件系统工具
//!
//! 原子写入、目录树复制、文件摘要

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

/// 原子写入文件：先写临时文件，再 rename 覆盖目标
///
/// 读者只会看到旧内容或新内容，不会看到写了一半的文件
pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

/// 复制目录树（阻塞，只复制普通文件和目录，忽略符号链接）
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut copied = 0;
    std::fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// 计算文件的 SHA-256（十六进制小写）
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let contents = fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}
