//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod app;
pub mod content;
pub mod deploy;
pub mod version;

// Re-exports for convenience
pub use app::{AppName, AppRecord, AppStatus};
pub use content::ServableContent;
pub use deploy::{DeployReport, DeployStage, DeployStatus, DeployTask, DeployWarning, StageStatus};
pub use version::VersionId;
