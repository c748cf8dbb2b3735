//! 探测器接口定义
//!
//! 定义所有探测策略共享的 [`Prober`] trait，以及把闭包包装成探测器的 [`ProbeFunc`]

use crate::health::result::ProbeOutcome;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 探测器trait，定义单次探测接口
#[async_trait]
pub trait Prober: Send + Sync {
    /// 执行一次探测
    ///
    /// # 参数
    /// * `token` - 取消令牌，被取消后必须尽快返回
    ///
    /// # 返回
    /// * `ProbeOutcome` - 探测结果，`Err` 表示探测本身失灵
    async fn probe(&self, token: CancellationToken) -> ProbeOutcome;
}

type BoxedProbeFn = dyn Fn(CancellationToken) -> BoxFuture<'static, ProbeOutcome> + Send + Sync;

/// 已绑定目标的探测闭包
///
/// 由 [`Manager`](crate::health::Manager) 构建，也可以直接包装任意异步闭包。
#[derive(Clone)]
pub struct ProbeFunc {
    inner: Arc<BoxedProbeFn>,
}

impl ProbeFunc {
    /// 用异步闭包创建探测器
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeOutcome> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |token| Box::pin(f(token))),
        }
    }
}

impl std::fmt::Debug for ProbeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeFunc").finish_non_exhaustive()
    }
}

#[async_trait]
impl Prober for ProbeFunc {
    async fn probe(&self, token: CancellationToken) -> ProbeOutcome {
        (self.inner)(token).await
    }
}

#[async_trait]
impl<P: Prober + ?Sized> Prober for Arc<P> {
    async fn probe(&self, token: CancellationToken) -> ProbeOutcome {
        (**self).probe(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::health::result::{ProbeOutput, ProbeResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_probe_func_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let prober = ProbeFunc::new(move |_token| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProbeOutput::success("ok"))
            }
        });

        let first = prober.probe(CancellationToken::new()).await.unwrap();
        let second = prober.clone().probe(CancellationToken::new()).await.unwrap();

        assert_eq!(first.result, ProbeResult::Success);
        assert_eq!(second.output, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_func_observes_token() {
        let prober = ProbeFunc::new(|token: CancellationToken| async move {
            token.cancelled().await;
            Err(ProbeError::Aborted)
        });

        let token = CancellationToken::new();
        token.cancel();
        let outcome = prober.probe(token).await;
        assert!(matches!(outcome, Err(ProbeError::Aborted)));
    }

    #[tokio::test]
    async fn test_arc_dyn_prober() {
        let prober: Arc<dyn Prober> =
            Arc::new(ProbeFunc::new(|_| async { Ok(ProbeOutput::warning("redirect")) }));
        let output = prober.probe(CancellationToken::new()).await.unwrap();
        assert_eq!(output.result, ProbeResult::Warning);
    }
}
