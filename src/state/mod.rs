//! 运行时状态模块
//!
//! 管理应用状态、应用记录和任务存储

pub mod app_state;
pub mod registry;
pub mod task_store;

pub use app_state::AppState;
pub use registry::{AppRegistry, FileAppRegistry};
pub use task_store::TaskStore;
