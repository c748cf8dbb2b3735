//! 配置模块
//!
//! 提供探测调度参数与探测目标的数据结构和验证功能

pub mod types;

// 重新导出主要类型
pub use types::{
    validate_probe_spec, validate_worker_config, ProbeSpec, ProbeTarget, WorkerConfig,
};
