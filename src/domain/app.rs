//! 应用相关领域模型
//!
//! 应用名同时作为文件系统路径段和 URL 路径段使用，必须经过校验

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::version::VersionId;

/// 应用名最大长度
pub const MAX_APP_NAME_LEN: usize = 100;

/// 经过校验的应用名
///
/// 只允许 ASCII 字母数字、`-`、`_`、`.`，且不能以 `.` 开头
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    /// 校验并创建应用名
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        if raw.is_empty() {
            return Err(NameError::Empty);
        }
        if raw.len() > MAX_APP_NAME_LEN {
            return Err(NameError::TooLong(raw.len()));
        }
        if raw.starts_with('.') {
            return Err(NameError::LeadingDot);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(NameError::InvalidChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AppName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

/// 应用名校验失败原因
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name is {0} characters long (max {MAX_APP_NAME_LEN})")]
    TooLong(usize),
    #[error("name may not start with '.'")]
    LeadingDot,
    #[error("name contains unsupported character {0:?}")]
    InvalidChar(char),
}

/// 把相对路径拆成安全的路径段
///
/// 同时接受 `/` 和 `\` 作为分隔符；空段和 `.` 被忽略。
/// 绝对路径、盘符前缀、`..` 段和 NUL 字节都会被拒绝（返回 None），不做静默修正。
pub fn safe_segments(raw: &str) -> Option<Vec<&str>> {
    if raw.contains('\0') || raw.starts_with('/') || raw.starts_with('\\') {
        return None;
    }

    let mut segments = Vec::new();
    for (i, segment) in raw.split(['/', '\\']).enumerate() {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if i == 0 && s.len() >= 2 && s.as_bytes()[1] == b':' => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// 把相对路径转换为 PathBuf（仅包含安全的路径段）
pub fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let segments = safe_segments(raw)?;
    if segments.is_empty() {
        return None;
    }
    Some(segments.iter().collect())
}

/// 应用状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// 尚未成功发布过
    Pending,
    /// 正在部署
    Deploying,
    /// 已发布，可以访问
    Running,
    /// 最近一次部署失败且从未发布过
    Failed,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Deploying => "deploying",
            AppStatus::Running => "running",
            AppStatus::Failed => "failed",
        }
    }
}

/// 应用记录
///
/// 由外部记录方创建；核心只读写 published_version / archive_location 等部署相关字段
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: AppName,
    /// 当前发布的版本（首次部署前为空）
    pub published_version: Option<VersionId>,
    /// 最近一次上传的归档存放位置
    pub archive_location: Option<PathBuf>,
    /// 归档的 SHA-256
    #[serde(default)]
    pub archive_sha256: Option<String>,
    pub status: AppStatus,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    /// 成功发布次数
    #[serde(default)]
    pub build_number: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_deployed_at: Option<DateTime<Utc>>,
}

impl AppRecord {
    /// 创建新的应用记录
    pub fn new(name: AppName) -> Self {
        let now = Utc::now();
        Self {
            name,
            published_version: None,
            archive_location: None,
            archive_sha256: None,
            status: AppStatus::Pending,
            repo_url: None,
            subdomain: None,
            build_number: 0,
            created_at: now,
            updated_at: now,
            last_deployed_at: None,
        }
    }

    /// 记录一次成功发布
    pub fn mark_published(
        &mut self,
        version: VersionId,
        archive_location: Option<PathBuf>,
        archive_sha256: Option<String>,
    ) {
        let now = Utc::now();
        self.published_version = Some(version);
        self.archive_location = archive_location;
        self.archive_sha256 = archive_sha256;
        self.status = AppStatus::Running;
        self.build_number += 1;
        self.updated_at = now;
        self.last_deployed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_name_accepts_plain_names() {
        assert!(AppName::parse("app1").is_ok());
        assert!(AppName::parse("my-app_v2.prod").is_ok());
    }

    #[test]
    fn test_app_name_rejects_traversal() {
        assert_eq!(AppName::parse(""), Err(NameError::Empty));
        assert_eq!(AppName::parse(".."), Err(NameError::LeadingDot));
        assert_eq!(AppName::parse(".hidden"), Err(NameError::LeadingDot));
        assert_eq!(AppName::parse("a/b"), Err(NameError::InvalidChar('/')));
        assert_eq!(AppName::parse("a\\b"), Err(NameError::InvalidChar('\\')));
        assert_eq!(AppName::parse("a b"), Err(NameError::InvalidChar(' ')));
        assert!(matches!(
            AppName::parse(&"x".repeat(101)),
            Err(NameError::TooLong(101))
        ));
    }

    #[test]
    fn test_app_name_deserialize_validates() {
        let ok: Result<AppName, _> = serde_json::from_str("\"app1\"");
        assert!(ok.is_ok());
        let bad: Result<AppName, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_safe_segments() {
        assert_eq!(safe_segments("static/js/main.js"), Some(vec!["static", "js", "main.js"]));
        assert_eq!(safe_segments("./a//b/"), Some(vec!["a", "b"]));
        assert_eq!(safe_segments("a\\b.css"), Some(vec!["a", "b.css"]));
        assert_eq!(safe_segments("../../etc/passwd"), None);
        assert_eq!(safe_segments("a/../b"), None);
        assert_eq!(safe_segments("/etc/passwd"), None);
        assert_eq!(safe_segments("\\windows"), None);
        assert_eq!(safe_segments("C:/windows"), None);
        assert_eq!(safe_segments("a\0b"), None);
    }

    #[test]
    fn test_safe_relative_path_requires_a_segment() {
        assert!(safe_relative_path("").is_none());
        assert!(safe_relative_path("./").is_none());
        assert_eq!(
            safe_relative_path("img/logo.png"),
            Some(PathBuf::from("img").join("logo.png"))
        );
    }

    #[test]
    fn test_mark_published_bumps_build_number() {
        let mut record = AppRecord::new(AppName::parse("app1").unwrap());
        assert_eq!(record.status, AppStatus::Pending);

        record.mark_published(VersionId::from_raw(42), None, None);
        assert_eq!(record.status, AppStatus::Running);
        assert_eq!(record.build_number, 1);
        assert_eq!(record.published_version, Some(VersionId::from_raw(42)));
        assert!(record.last_deployed_at.is_some());
    }
}
