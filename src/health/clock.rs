//! 时钟抽象
//!
//! Worker 的所有等待（初始延迟、周期、单次探测截止时间）都通过 [`Clock`] 完成，
//! 便于在测试中替换时间源。

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::Instant;

/// 时钟trait
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> Instant;

    /// 等待指定时长
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// 基于 tokio 定时器的默认时钟
///
/// 在 `#[tokio::test(start_paused = true)]` 下会随 tokio 的暂停时钟自动推进。
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
