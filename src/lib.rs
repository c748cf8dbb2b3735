//! Service Probe - 服务健康探测库
//!
//! 为长期运行的服务提供周期性的健康探测，支持：
//! - TCP连接探测
//! - HTTP/HTTPS GET探测（限制重定向、截断响应体）
//! - 外部命令探测
//! - 带成功/失败阈值的迟滞状态机与状态变化回调
//! - 结构化日志记录

pub mod config;
pub mod error;
pub mod health;
pub mod logging;

// 重新导出主要类型
pub use config::{ProbeSpec, ProbeTarget, WorkerConfig};
pub use error::{ConfigError, ProbeError};
pub use health::{Manager, ProbeOutput, ProbeResult, Prober, Worker};

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
