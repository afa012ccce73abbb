//! 服务层模块
//!
//! 包含核心业务逻辑：版本库、部署协调、内容解析和旧版本回收

pub mod deploy;
pub mod resolver;
pub mod retention;
pub mod version_store;

pub use deploy::DeployCoordinator;
pub use resolver::{ArtifactResolver, AssetPolicy};
pub use version_store::Storage;
