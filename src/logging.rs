//! 日志配置
//!
//! 库内只通过 `tracing` 宏输出日志。每个 Worker 运行期间的日志都处在
//! `probe_worker` span 中，`worker` 字段为 Worker 名称（见 [`crate::Worker::with_name`]）。
//!
//! 是否安装 subscriber 由调用方决定。这里提供的组装函数把探测日志、
//! 底层 HTTP/TLS 库的日志级别以及控制台/文件输出整合在一起。

use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// 探测相关日志的 target 前缀
pub const HEALTH_TARGET: &str = "service_probe::health";

/// 探测请求经过的底层库，默认只输出警告
const TRANSPORT_TARGETS: [&str; 3] = ["hyper", "hyper_util", "rustls"];

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 全局默认级别
    pub level: LevelFilter,
    /// `service_probe::health` 下探测日志的级别
    pub probe_level: LevelFilter,
    /// 额外的模块级别，例如 `hyper_util` → Debug
    pub module_levels: BTreeMap<String, LevelFilter>,
    /// 是否输出到标准输出
    pub console: bool,
    /// 日志文件路径（可选），以追加方式写入
    pub file_path: Option<PathBuf>,
    /// 是否使用JSON格式
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            probe_level: LevelFilter::INFO,
            module_levels: BTreeMap::new(),
            console: true,
            file_path: None,
            json_format: false,
        }
    }
}

fn level_name(level: LevelFilter) -> String {
    level.to_string().to_ascii_lowercase()
}

/// 生成按 target 划分的过滤指令
///
/// 顺序为：探测日志、底层传输库、`module_levels`。后出现的指令覆盖前面同名 target 的级别。
pub fn default_directives(config: &LogConfig) -> Vec<String> {
    let mut directives = vec![format!("{HEALTH_TARGET}={}", level_name(config.probe_level))];
    directives.extend(
        TRANSPORT_TARGETS
            .iter()
            .map(|target| format!("{target}=warn")),
    );
    directives.extend(
        config
            .module_levels
            .iter()
            .map(|(module, level)| format!("{module}={}", level_name(*level))),
    );
    directives
}

/// 构建过滤器
///
/// `RUST_LOG` 中的指令先生效，配置中的指令再覆盖同名 target。
///
/// # 参数
/// * `config` - 日志配置
///
/// # 返回
/// * `anyhow::Result<EnvFilter>` - 模块名无法解析时返回错误
pub fn env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    for raw in default_directives(config) {
        let directive: Directive = raw
            .parse()
            .with_context(|| format!("日志级别指令无效: {raw}"))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// 构建格式化输出层
///
/// JSON 格式下当前 span（包括 `worker` 字段）写入 `span` 字段。
pub fn fmt_layer<S, W>(json: bool, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true);

    if json {
        layer
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        layer.with_ansi(ansi).with_target(true).boxed()
    }
}

/// 按配置组装 subscriber，但不安装
///
/// 控制台和文件可以同时启用，两者使用同一个过滤器。
pub fn subscriber(config: &LogConfig) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = env_filter(config)?;

    let console = config
        .console
        .then(|| fmt_layer(config.json_format, true, std::io::stdout));

    let file = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("打开日志文件失败: {}", path.display()))?;
            Some(fmt_layer(config.json_format, false, Mutex::new(file)))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file))
}

/// 安装全局 subscriber
///
/// 进程内已经安装过 subscriber 时直接返回成功。
///
/// # 参数
/// * `config` - 日志配置
///
/// # 返回
/// * `anyhow::Result<()>` - 过滤指令无效或日志文件无法打开时返回错误
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    match subscriber(config)?.try_init() {
        Ok(()) => {
            tracing::info!("日志系统初始化完成");
            tracing::debug!("日志配置: {:?}", config);
            Ok(())
        }
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("a global default trace dispatcher has already been set")
                || error_msg.contains(
                    "attempted to set a logger after the logging system was already initialized",
                )
            {
                tracing::debug!("日志系统已经初始化过了");
                Ok(())
            } else {
                Err(anyhow::anyhow!("tracing subscriber初始化失败: {}", error_msg))
            }
        }
    }
}
