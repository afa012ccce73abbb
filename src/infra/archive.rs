//! 归档解包
//!
//! 校验并把上传的归档解包到目标目录。目前只支持 zip，
//! 其它格式实现 `ArchiveExtractor` 后加入 `Extractors::new` 的列表即可。

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::app::safe_relative_path;

/// 入口文档文件名（区分大小写）
pub const INDEX_FILE: &str = "index.html";

/// 支持的归档格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// 解包结果
#[derive(Debug, Clone)]
pub struct ExtractedTree {
    /// 树根下的 index.html（不存在时为 None，由调用方决定如何处理）
    pub index_path: Option<PathBuf>,
    /// 解包根目录
    pub asset_root: PathBuf,
    /// 写入的文件数
    pub files: usize,
    /// 来源归档格式（直接上传文件集合时为 None）
    pub format: Option<ArchiveFormat>,
}

impl ExtractedTree {
    /// 根据已填充好的目录构造结果
    pub fn scan(root: &Path, files: usize) -> Self {
        let index = root.join(INDEX_FILE);
        Self {
            index_path: index.is_file().then_some(index),
            asset_root: root.to_path_buf(),
            files,
            format: None,
        }
    }
}

/// 解包错误
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{0}")]
    Invalid(String),
    #[error("entry '{0}' escapes the destination directory")]
    Traversal(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 解包限制
#[derive(Clone, Copy, Debug)]
pub struct ExtractLimits {
    pub max_entries: usize,
}

/// 归档解包器
///
/// 实现必须把副作用限制在 `dest` 内
pub trait ArchiveExtractor: Send + Sync {
    fn format(&self) -> ArchiveFormat;

    /// 根据文件头判断是否为本格式
    fn sniff(&self, header: &[u8]) -> bool;

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        limits: &ExtractLimits,
    ) -> Result<ExtractedTree, ExtractError>;
}

/// zip 解包器
pub struct ZipExtractor;

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

impl ArchiveExtractor for ZipExtractor {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.starts_with(ZIP_LOCAL_HEADER) || header.starts_with(ZIP_EMPTY_ARCHIVE)
    }

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        limits: &ExtractLimits,
    ) -> Result<ExtractedTree, ExtractError> {
        let file = File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| ExtractError::Invalid(format!("not a valid zip archive: {}", e)))?;

        if zip.len() > limits.max_entries {
            return Err(ExtractError::Invalid(format!(
                "archive has {} entries (max {})",
                zip.len(),
                limits.max_entries
            )));
        }

        // 先校验所有条目，再写任何文件
        let mut plan = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip
                .by_index_raw(i)
                .map_err(|e| ExtractError::Invalid(format!("unreadable entry #{}: {}", i, e)))?;
            let name = entry.name().to_string();

            if entry
                .unix_mode()
                .map_or(false, |mode| mode & S_IFMT == S_IFLNK)
            {
                return Err(ExtractError::Invalid(format!(
                    "entry '{}' is a symbolic link",
                    name
                )));
            }

            match safe_relative_path(&name) {
                Some(relative) => plan.push((i, relative, entry.is_dir())),
                // 纯 "./" 之类的目录条目没有实际路径段，直接跳过
                None if entry.is_dir() && !name.contains("..") && !name.starts_with('/') => {}
                None => return Err(ExtractError::Traversal(name)),
            }
        }

        check_file_dir_conflicts(&plan)?;

        std::fs::create_dir_all(dest)?;

        let mut files = 0;
        let mut buf = vec![0u8; 64 * 1024];
        for (i, relative, is_dir) in plan {
            let target = dest.join(&relative);
            if is_dir {
                std::fs::create_dir_all(&target)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut entry = zip
                .by_index(i)
                .map_err(|e| ExtractError::Invalid(format!("unreadable entry #{}: {}", i, e)))?;
            let mut out = File::create(&target)?;
            loop {
                // 读失败说明归档损坏，写失败是本地 I/O 问题
                let n = entry.read(&mut buf).map_err(|e| {
                    ExtractError::Invalid(format!("corrupt entry '{}': {}", relative.display(), e))
                })?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            files += 1;
        }

        Ok(ExtractedTree::scan(dest, files))
    }
}

/// 同一路径既是文件又是目录（如 `a` 和 `a/b`）的归档无法解包
fn check_file_dir_conflicts(plan: &[(usize, PathBuf, bool)]) -> Result<(), ExtractError> {
    let mut dirs = HashSet::new();
    for (_, relative, is_dir) in plan {
        if *is_dir {
            dirs.insert(relative.as_path());
        }
        dirs.extend(
            relative
                .ancestors()
                .skip(1)
                .filter(|p| !p.as_os_str().is_empty()),
        );
    }

    match plan
        .iter()
        .find(|(_, relative, is_dir)| !is_dir && dirs.contains(relative.as_path()))
    {
        Some((_, relative, _)) => Err(ExtractError::Invalid(format!(
            "entry '{}' is both a file and a directory",
            relative.display()
        ))),
        None => Ok(()),
    }
}

/// 解包器注册表，按文件头选择格式
#[derive(Clone)]
pub struct Extractors {
    extractors: Vec<Arc<dyn ArchiveExtractor>>,
    limits: ExtractLimits,
}

impl Extractors {
    /// 默认注册 zip
    pub fn new(limits: ExtractLimits) -> Self {
        Self {
            extractors: vec![Arc::new(ZipExtractor)],
            limits,
        }
    }

    /// 识别归档格式
    pub fn detect(&self, archive: &Path) -> Result<Arc<dyn ArchiveExtractor>, ExtractError> {
        let mut header = [0u8; 8];
        let mut file = File::open(archive)?;
        let mut read = 0;
        while read < header.len() {
            let n = file.read(&mut header[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }

        self.extractors
            .iter()
            .find(|e| e.sniff(&header[..read]))
            .cloned()
            .ok_or_else(|| ExtractError::Invalid("unsupported archive format".to_string()))
    }

    /// 解包到目标目录（阻塞调用）
    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractedTree, ExtractError> {
        let extractor = self.detect(archive)?;
        tracing::debug!(
            format = ?extractor.format(),
            archive = %archive.display(),
            "Extracting archive"
        );
        let mut tree = extractor.extract(archive, dest, &self.limits)?;
        tree.format = Some(extractor.format());
        Ok(tree)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    /// 在内存中构造 zip，`entries` 中以 `/` 结尾的名称视为目录
    pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }
}
