//! 探测 Worker
//!
//! 负责单个探测目标的周期调度、超时控制、迟滞状态机以及状态变化通知。
//!
//! ```text
//! run(parent)
//!   → 初始延迟
//!   → loop {
//!         do_probe: 探测任务 ─┬─ 结果先到     → handle_result
//!                             ├─ 超时先到     → 作为 Failure 处理
//!                             └─ 父令牌取消   → 丢弃本次探测
//!         等待下一个周期或取消
//!     }
//! ```

use crate::config::types::{validate_worker_config, WorkerConfig};
use crate::error::{ConfigError, ProbeError};
use crate::health::checker::Prober;
use crate::health::clock::{Clock, TokioClock};
use crate::health::result::{ProbeOutcome, ProbeResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// 状态变化回调，参数为新状态和触发变化的探测输出
pub type StatusChangeCallback = Arc<dyn Fn(ProbeResult, &str) + Send + Sync>;

/// 每次探测结果回调
///
/// 参数依次为：本次结果、是否引起状态变化、输出、探测错误（如果有）。
/// 被丢弃的探测以 `ProbeResult::Unknown` 报告。
pub type ProbeResultCallback =
    Arc<dyn Fn(ProbeResult, bool, &str, Option<&ProbeError>) + Send + Sync>;

/// 连续结果计数器
///
/// 记录最近一次原始结果及其连续出现的次数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultTracker {
    last_result: ProbeResult,
    result_run: u32,
}

impl ResultTracker {
    /// 创建新的计数器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次结果，返回该结果当前的连续次数
    pub fn record(&mut self, result: ProbeResult) -> u32 {
        if self.last_result == result {
            self.result_run = self.result_run.saturating_add(1);
        } else {
            self.last_result = result;
            self.result_run = 1;
        }
        self.result_run
    }

    /// 最近一次记录的结果
    pub fn last_result(&self) -> ProbeResult {
        self.last_result
    }

    /// 最近一次结果的连续次数
    pub fn result_run(&self) -> u32 {
        self.result_run
    }
}

/// 受锁保护的运行状态
#[derive(Debug, Default)]
struct WorkerState {
    /// 运行中时存在；停止后被取消
    liveness: Option<CancellationToken>,
    /// 每次 run 递增，用来识别过期的运行循环
    generation: u64,
    /// 对外报告的状态
    status: ProbeResult,
}

impl WorkerState {
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation
            && self
                .liveness
                .as_ref()
                .is_some_and(|token| !token.is_cancelled())
    }
}

/// 探测 Worker
///
/// 一个 Worker 可以被多次 run/stop 复用。通常包装在 `Arc` 中，
/// 一个任务执行 [`Worker::run`]，其他任务调用 [`Worker::status`] 或 [`Worker::stop`]。
pub struct Worker {
    /// 名称，作为日志 span 的 `worker` 字段
    name: String,
    /// 实际执行探测的逻辑
    prober: Arc<dyn Prober>,
    /// 时间源
    clock: Arc<dyn Clock>,
    /// 调度配置
    config: WorkerConfig,
    /// 状态变化回调
    on_status_change: Option<StatusChangeCallback>,
    /// 每次探测结果回调
    on_probe_result: Option<ProbeResultCallback>,
    /// 运行状态
    state: Mutex<WorkerState>,
}

impl Worker {
    /// 使用默认配置创建 Worker
    ///
    /// # 参数
    /// * `prober` - 探测器
    ///
    /// # 返回
    /// * `Self` - Worker 实例
    pub fn new<P: Prober + 'static>(prober: P) -> Self {
        Self::from_arc(Arc::new(prober))
    }

    /// 使用共享的探测器创建 Worker
    pub fn from_arc(prober: Arc<dyn Prober>) -> Self {
        Self {
            name: "probe".to_string(),
            prober,
            clock: Arc::new(TokioClock),
            config: WorkerConfig::default(),
            on_status_change: None,
            on_probe_result: None,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// 使用经过验证的配置创建 Worker
    ///
    /// # 参数
    /// * `prober` - 探测器
    /// * `config` - 调度配置
    ///
    /// # 返回
    /// * `Result<Self, ConfigError>` - Worker 实例或配置错误
    pub fn with_validated_config<P: Prober + 'static>(
        prober: P,
        config: WorkerConfig,
    ) -> Result<Self, ConfigError> {
        validate_worker_config(&config)?;
        Ok(Self::new(prober).with_config(config))
    }

    /// 设置名称，运行期间的日志都带有该名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置全部调度配置（不做验证）
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置探测周期
    pub fn with_period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    /// 设置单次探测超时时间，超时视为失败
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// 设置首次探测前的等待时间；等待期间状态为 Failure
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    /// 设置转为健康所需的连续成功次数
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// 设置转为失败所需的连续失败次数
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// 替换时间源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 设置状态变化回调，每次真实的状态变化只触发一次
    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProbeResult, &str) + Send + Sync + 'static,
    {
        self.on_status_change = Some(Arc::new(callback));
        self
    }

    /// 设置每次探测结果回调，无论是否引起状态变化
    pub fn on_probe_result<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProbeResult, bool, &str, Option<&ProbeError>) + Send + Sync + 'static,
    {
        self.on_probe_result = Some(Arc::new(callback));
        self
    }

    /// 当前调度配置
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Worker 名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 周期执行探测直到被停止
    ///
    /// 父令牌被取消或调用 [`Worker::stop`] 后返回。
    ///
    /// # Panics
    ///
    /// Worker 已在运行时再次调用会 panic。
    pub async fn run(&self, parent: CancellationToken) {
        let span = info_span!("probe_worker", worker = %self.name);
        self.run_loop(parent).instrument(span).await
    }

    async fn run_loop(&self, parent: CancellationToken) {
        let (token, generation) = self.start(&parent);
        let mut tracker = ResultTracker::new();

        if self.wait(self.config.initial_delay, &token).await {
            let period = self.config.period;
            let mut next_tick = self.clock.now();

            loop {
                self.do_probe(&token, generation, &mut tracker).await;

                next_tick += period;
                let now = self.clock.now();
                // 跳过已错过的周期，不补发
                while !period.is_zero() && next_tick <= now {
                    next_tick += period;
                }

                let remaining = next_tick.saturating_duration_since(now);
                if !self.wait(remaining, &token).await {
                    break;
                }
            }
        }

        let mut state = self.lock_state();
        if state.generation == generation {
            state.liveness = None;
            state.status = ProbeResult::Unknown;
        }
        debug!("探测 Worker 已退出");
    }

    /// 请求停止，可以重复调用，也可以在 run 之前或之后调用
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if let Some(token) = &state.liveness {
            token.cancel();
        }
        state.status = ProbeResult::Unknown;
    }

    /// 当前状态；未运行或已停止时总是 `Unknown`
    pub fn status(&self) -> ProbeResult {
        self.lock_state().status
    }

    /// 是否正在运行
    pub fn is_running(&self) -> bool {
        let state = self.lock_state();
        state.is_live(state.generation)
    }

    /// 安装新的存活令牌并重置状态
    fn start(&self, parent: &CancellationToken) -> (CancellationToken, u64) {
        let mut state = self.lock_state();
        if state.is_live(state.generation) {
            drop(state);
            panic!("probe worker is already running");
        }

        let token = parent.child_token();
        state.generation = state.generation.wrapping_add(1);
        state.liveness = Some(token.clone());
        state.status = ProbeResult::Failure;

        info!(
            "启动探测 Worker: 周期 {:?}, 超时 {:?}, 初始延迟 {:?}",
            self.config.period, self.config.timeout, self.config.initial_delay
        );
        (token, state.generation)
    }

    /// 等待指定时长；被取消时返回 false
    async fn wait(&self, duration: Duration, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = self.clock.sleep(duration) => true,
        }
    }

    /// 执行一次有时限的探测
    async fn do_probe(
        &self,
        token: &CancellationToken,
        generation: u64,
        tracker: &mut ResultTracker,
    ) {
        let tick_token = token.child_token();
        // 本次探测结束后取消探测任务，让被放弃的探测尽快退出
        let _tick_guard = tick_token.clone().drop_guard();

        let (tx, rx) = oneshot::channel();
        let prober = Arc::clone(&self.prober);
        tokio::spawn(
            async move {
                let outcome = prober.probe(tick_token).await;
                let _ = tx.send(outcome);
            }
            .in_current_span(),
        );

        let timeout = self.config.timeout;
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("探测 Worker 已停止，丢弃本次探测");
                return;
            }
            received = rx => match received {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("探测任务未返回结果即退出");
                    Err(ProbeError::Aborted)
                }
            },
            _ = self.clock.sleep(timeout) => Err(ProbeError::DeadlineExceeded(timeout)),
        };

        self.handle_result(outcome, generation, tracker);
    }

    /// 根据探测结果更新内部状态
    fn handle_result(&self, outcome: ProbeOutcome, generation: u64, tracker: &mut ResultTracker) {
        let (result, output, error) = match outcome {
            Ok(output) if output.result != ProbeResult::Unknown => {
                (output.result, output.output, None)
            }
            Ok(output) => {
                debug!("探测返回未知结果，本次结果被忽略");
                self.notify_probe_result(ProbeResult::Unknown, false, &output.output, None);
                return;
            }
            Err(e) if e.is_deadline_exceeded() => (ProbeResult::Failure, String::new(), Some(e)),
            Err(e) => {
                debug!("探测返回错误，本次结果被忽略: {}", e);
                self.notify_probe_result(ProbeResult::Unknown, false, "", Some(&e));
                return;
            }
        };

        let result_run = tracker.record(result);
        let threshold = if result.is_healthy() {
            self.config.success_threshold
        } else {
            self.config.failure_threshold
        };

        let mut status_changed = false;
        if result_run >= threshold {
            let mut state = self.lock_state();
            if state.is_live(generation) && state.status != result {
                let previous = state.status;
                state.status = result;
                status_changed = true;
                drop(state);

                info!("探测状态变化: {} -> {}", previous, result);
                if let Some(callback) = &self.on_status_change {
                    callback(result, &output);
                }
            }
        }

        self.notify_probe_result(result, status_changed, &output, error.as_ref());
    }

    fn notify_probe_result(
        &self,
        result: ProbeResult,
        status_changed: bool,
        output: &str,
        error: Option<&ProbeError>,
    ) {
        if let Some(callback) = &self.on_probe_result {
            callback(result, status_changed, output, error);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::checker::ProbeFunc;
    use crate::health::result::ProbeOutput;

    type Recorded = Arc<Mutex<Vec<(ProbeResult, String)>>>;

    fn idle_worker() -> Worker {
        Worker::new(ProbeFunc::new(|_| async { Ok(ProbeOutput::success("")) }))
    }

    /// 构造一个处于运行状态的 Worker，直接驱动 handle_result
    fn running_worker(success_threshold: u32, failure_threshold: u32) -> (Worker, u64, Recorded) {
        let changes: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let worker = idle_worker()
            .with_success_threshold(success_threshold)
            .with_failure_threshold(failure_threshold)
            .on_status_change(move |result, output| {
                sink.lock().unwrap().push((result, output.to_string()));
            });
        let (_token, generation) = worker.start(&CancellationToken::new());
        (worker, generation, changes)
    }

    fn feed(worker: &Worker, generation: u64, tracker: &mut ResultTracker, outcome: ProbeOutcome) {
        worker.handle_result(outcome, generation, tracker);
    }

    #[test]
    fn test_result_tracker_run_length() {
        let mut tracker = ResultTracker::new();
        assert_eq!(tracker.last_result(), ProbeResult::Unknown);
        assert_eq!(tracker.result_run(), 0);

        assert_eq!(tracker.record(ProbeResult::Failure), 1);
        assert_eq!(tracker.record(ProbeResult::Failure), 2);
        assert_eq!(tracker.record(ProbeResult::Success), 1);
        assert_eq!(tracker.last_result(), ProbeResult::Success);
        assert_eq!(tracker.record(ProbeResult::Warning), 1);
        assert_eq!(tracker.record(ProbeResult::Warning), 2);
    }

    #[test]
    fn test_status_before_run_is_unknown() {
        let worker = idle_worker();
        assert_eq!(worker.status(), ProbeResult::Unknown);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_start_is_pessimistic() {
        let (worker, _, _) = running_worker(1, 3);
        assert_eq!(worker.status(), ProbeResult::Failure);
        assert!(worker.is_running());
    }

    #[test]
    fn test_failure_threshold_hysteresis() {
        let (worker, generation, changes) = running_worker(1, 3);
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("up")));
        assert_eq!(worker.status(), ProbeResult::Success);

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("f1")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("f2")));
        assert_eq!(worker.status(), ProbeResult::Success);

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("f3")));
        assert_eq!(worker.status(), ProbeResult::Failure);

        let changes = changes.lock().unwrap();
        assert_eq!(
            *changes,
            vec![
                (ProbeResult::Success, "up".to_string()),
                (ProbeResult::Failure, "f3".to_string()),
            ]
        );
    }

    #[test]
    fn test_interleaved_success_resets_failure_run() {
        let (worker, generation, _) = running_worker(1, 3);
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        assert_eq!(worker.status(), ProbeResult::Success);

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        assert_eq!(worker.status(), ProbeResult::Failure);
    }

    #[test]
    fn test_probe_error_is_discarded() {
        let (worker, generation, changes) = running_worker(1, 3);
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        feed(&worker, generation, &mut tracker, Err(ProbeError::Aborted));
        assert_eq!(tracker.last_result(), ProbeResult::Failure);
        assert_eq!(tracker.result_run(), 1);

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::new(ProbeResult::Unknown, "")));
        assert_eq!(tracker.result_run(), 1);

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        assert_eq!(worker.status(), ProbeResult::Success);
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        assert_eq!(worker.status(), ProbeResult::Failure);
        assert_eq!(changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_deadline_counts_as_failure() {
        let (worker, generation, _) = running_worker(1, 1);
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        feed(
            &worker,
            generation,
            &mut tracker,
            Err(ProbeError::DeadlineExceeded(Duration::from_secs(1))),
        );

        assert_eq!(worker.status(), ProbeResult::Failure);
        assert_eq!(tracker.last_result(), ProbeResult::Failure);
    }

    #[test]
    fn test_success_threshold() {
        let (worker, generation, changes) = running_worker(2, 3);
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        assert_eq!(worker.status(), ProbeResult::Failure);
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::warning("")));
        assert_eq!(worker.status(), ProbeResult::Failure);
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::warning("redirect")));
        assert_eq!(worker.status(), ProbeResult::Warning);
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::warning("redirect")));

        assert_eq!(
            *changes.lock().unwrap(),
            vec![(ProbeResult::Warning, "redirect".to_string())]
        );
    }

    #[test]
    fn test_same_status_does_not_notify() {
        let (worker, generation, changes) = running_worker(1, 1);
        let mut tracker = ResultTracker::new();

        // 初始状态即为 Failure
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::failure("")));
        assert_eq!(worker.status(), ProbeResult::Failure);
        assert!(changes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (worker, generation, changes) = running_worker(1, 3);
        let mut tracker = ResultTracker::new();

        worker.stop();
        worker.stop();
        worker.stop();
        assert_eq!(worker.status(), ProbeResult::Unknown);
        assert!(!worker.is_running());

        // 停止后的结果不会改变状态
        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        assert_eq!(worker.status(), ProbeResult::Unknown);
        assert!(changes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_before_run() {
        let worker = idle_worker();
        worker.stop();
        worker.stop();
        assert_eq!(worker.status(), ProbeResult::Unknown);
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn test_start_twice_panics() {
        let (worker, _, _) = running_worker(1, 3);
        let _ = worker.start(&CancellationToken::new());
    }

    #[test]
    fn test_probe_result_callback() {
        let seen: Arc<Mutex<Vec<(ProbeResult, bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = idle_worker()
            .with_failure_threshold(1)
            .on_probe_result(move |result, changed, _output, error| {
                sink.lock().unwrap().push((result, changed, error.is_some()));
            });
        let (_token, generation) = worker.start(&CancellationToken::new());
        let mut tracker = ResultTracker::new();

        feed(&worker, generation, &mut tracker, Ok(ProbeOutput::success("")));
        feed(&worker, generation, &mut tracker, Err(ProbeError::Aborted));
        feed(
            &worker,
            generation,
            &mut tracker,
            Err(ProbeError::DeadlineExceeded(Duration::from_secs(1))),
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ProbeResult::Success, true, false),
                (ProbeResult::Unknown, false, true),
                (ProbeResult::Failure, true, true),
            ]
        );
    }

    #[test]
    fn test_with_validated_config() {
        let prober = ProbeFunc::new(|_| async { Ok(ProbeOutput::success("")) });
        let config = WorkerConfig {
            success_threshold: 0,
            ..WorkerConfig::default()
        };
        assert!(Worker::with_validated_config(prober.clone(), config).is_err());

        let config = WorkerConfig {
            period: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        let worker = Worker::with_validated_config(prober, config).unwrap();
        assert_eq!(worker.config().period, Duration::from_secs(5));
    }

    #[test]
    fn test_with_name() {
        assert_eq!(idle_worker().name(), "probe");

        let worker = idle_worker().with_name("redis 127.0.0.1:6379");
        assert_eq!(worker.name(), "redis 127.0.0.1:6379");
        assert!(format!("{worker:?}").contains("redis 127.0.0.1:6379"));
    }
}
