//! 健康探测模块
//!
//! 提供TCP、HTTP GET与外部命令三种探测策略、探测器工厂，
//! 以及负责周期调度和迟滞状态机的探测 Worker

pub mod checker;
pub mod clock;
pub mod exec;
pub mod http;
pub mod manager;
pub mod result;
pub mod tcp;
pub mod worker;

// 重新导出主要类型
pub use checker::{ProbeFunc, Prober};
pub use clock::{Clock, TokioClock};
pub use exec::ExecProber;
pub use http::HttpGetProber;
pub use manager::Manager;
pub use result::{ProbeOutcome, ProbeOutput, ProbeResult};
pub use tcp::TcpSocketProber;
pub use worker::{ResultTracker, Worker};
