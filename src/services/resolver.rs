//! 内容解析
//!
//! 把 `(应用名, 请求路径)` 解析为要输出的内容：
//! - 空路径 → 发布版本的 index.html
//! - 白名单扩展名 → 发布版本下的静态文件，不存在就是 `AssetNotFound`，不做回退
//! - 其它路径 → index.html（单页应用的前端路由）
//!
//! 解析只读发布指针，从不等待部署锁，也不会创建任何目录。读取期间持有版本租约，旧版本回收会等读取完成。

use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::domain::app::{safe_segments, AppName};
use crate::domain::content::ServableContent;
use crate::error::{HostError, HostResult};
use crate::infra::archive::INDEX_FILE;
use crate::services::version_store::Storage;
use crate::state::registry::AppRegistry;

/// 发布指针在读取期间被切换时的重试次数
const MAX_LEASE_ATTEMPTS: usize = 3;

/// 未知扩展名（通过配置加入白名单的）的 content type
const OCTET_STREAM: &str = "application/octet-stream";

/// 默认的静态资源白名单（html 不在其中，访问 *.html 会回退到入口文档）
const DEFAULT_ASSET_TYPES: &[(&str, &str)] = &[
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("webmanifest", "application/manifest+json"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "application/xml"),
    ("ico", "image/x-icon"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("pdf", "application/pdf"),
];

/// 静态资源白名单：扩展名（小写）→ content type
#[derive(Clone, Debug)]
pub struct AssetPolicy {
    types: HashMap<String, &'static str>,
}

impl AssetPolicy {
    /// 使用配置的扩展名列表替换默认白名单
    pub fn from_extensions(extensions: &[String]) -> Self {
        let types = extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                let content_type = DEFAULT_ASSET_TYPES
                    .iter()
                    .find(|(known, _)| *known == ext)
                    .map_or(OCTET_STREAM, |(_, ct)| *ct);
                (ext, content_type)
            })
            .collect();
        Self { types }
    }

    /// 路径最后一段的扩展名在白名单中时返回 content type
    pub fn content_type(&self, file_name: &str) -> Option<&'static str> {
        let ext = Path::new(file_name).extension()?.to_str()?;
        self.types.get(&ext.to_ascii_lowercase()).copied()
    }
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            types: DEFAULT_ASSET_TYPES
                .iter()
                .map(|(ext, ct)| (ext.to_string(), *ct))
                .collect(),
        }
    }
}

/// 请求路径的分类
enum Target<'a> {
    Index,
    Asset {
        segments: Vec<&'a str>,
        content_type: &'static str,
    },
}

/// 内容解析器
pub struct ArtifactResolver {
    storage: Arc<Storage>,
    registry: Arc<dyn AppRegistry>,
    policy: AssetPolicy,
}

impl ArtifactResolver {
    pub fn new(storage: Arc<Storage>, registry: Arc<dyn AppRegistry>, policy: AssetPolicy) -> Self {
        Self {
            storage,
            registry,
            policy,
        }
    }

    /// 解析请求路径
    ///
    /// `requested` 不含查询字符串；首尾的 `/` 会被忽略
    pub async fn resolve(&self, name: &str, requested: &str) -> HostResult<ServableContent> {
        let app = AppName::parse(name).map_err(|_| HostError::ApplicationNotFound {
            app: name.to_string(),
        })?;
        if self.registry.get(&app).await.is_none() {
            return Err(HostError::ApplicationNotFound {
                app: name.to_string(),
            });
        }

        let requested = requested.split('?').next().unwrap_or_default();
        let trimmed = requested.trim_matches('/');
        let target = self.classify(&app, trimmed)?;

        let Some(store) = self.storage.existing_store(&app).await? else {
            return Err(HostError::NoPublishedVersion { app });
        };
        for _ in 0..MAX_LEASE_ATTEMPTS {
            let Some(published) = store.published().await else {
                return Err(HostError::NoPublishedVersion { app });
            };
            let Some(_lease) = published.lease().await else {
                debug!(app = %app, version = %published.id, "Published version retired during lookup, retrying");
                continue;
            };

            return match &target {
                Target::Index => {
                    let body = read(&published.content_root.join(INDEX_FILE))
                        .await
                        .map_err(|e| match e.kind() {
                            io::ErrorKind::NotFound => HostError::IndexMissing { app: app.clone() },
                            _ => HostError::storage(&app, "reading index document", e),
                        })?;
                    Ok(ServableContent::Index {
                        version: published.id,
                        body,
                    })
                }
                Target::Asset {
                    segments,
                    content_type,
                } => {
                    let path: PathBuf = segments
                        .iter()
                        .fold(published.content_root.clone(), |path, s| path.join(s));
                    let body = read(&path).await.map_err(|e| match e.kind() {
                        io::ErrorKind::NotFound => HostError::AssetNotFound {
                            app: app.clone(),
                            path: trimmed.to_string(),
                        },
                        _ => HostError::storage(&app, "reading asset", e),
                    })?;
                    Ok(ServableContent::Asset {
                        version: published.id,
                        content_type: *content_type,
                        body,
                    })
                }
            };
        }

        Err(HostError::NoPublishedVersion { app })
    }

    fn classify<'a>(&self, app: &AppName, requested: &'a str) -> HostResult<Target<'a>> {
        let segments = safe_segments(requested).ok_or_else(|| HostError::AssetNotFound {
            app: app.clone(),
            path: requested.to_string(),
        })?;

        let content_type = segments
            .last()
            .and_then(|last| self.policy.content_type(last));
        Ok(match content_type {
            Some(content_type) => Target::Asset {
                segments,
                content_type,
            },
            None => Target::Index,
        })
    }
}

/// 读取普通文件；目录视为不存在
///
/// 父路径中某一段是普通文件（ENOTDIR）等查找失败同样视为不存在，只有权限错误原样返回
async fn read(path: &Path) -> io::Result<Bytes> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return Err(e),
        Err(_) => return Err(io::Error::from(io::ErrorKind::NotFound)),
    };
    if !metadata.is_file() {
        return Err(io::Error::from(io::ErrorKind::NotFound));
    }
    Ok(Bytes::from(fs::read(path).await?))
}
