//! 可服务内容

use bytes::Bytes;

use super::version::VersionId;

/// 入口文档的 content type
pub const INDEX_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// 解析结果：渲染入口文档，或按指定 content type 输出静态资源
#[derive(Clone, Debug)]
pub enum ServableContent {
    Index {
        version: VersionId,
        body: Bytes,
    },
    Asset {
        version: VersionId,
        content_type: &'static str,
        body: Bytes,
    },
}

impl ServableContent {
    pub fn version(&self) -> VersionId {
        match self {
            ServableContent::Index { version, .. } | ServableContent::Asset { version, .. } => {
                *version
            }
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ServableContent::Index { .. } => INDEX_CONTENT_TYPE,
            ServableContent::Asset { content_type, .. } => content_type,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            ServableContent::Index { body, .. } | ServableContent::Asset { body, .. } => body,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, ServableContent::Index { .. })
    }
}
