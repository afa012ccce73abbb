//! 基础设施模块
//!
//! 封装外部依赖（归档格式、文件系统、HTTP client）

pub mod archive;
pub mod fs;
pub mod record_center;

pub use archive::{ArchiveExtractor, ExtractError, ExtractLimits, ExtractedTree, Extractors};
pub use record_center::RecordCenterClient;
