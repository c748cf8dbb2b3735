//! 配置数据结构定义
//!
//! 定义探测 Worker 的调度参数、探测目标描述以及验证逻辑

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 探测调度配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    /// 探测周期
    #[serde(
        rename = "period_ms",
        default = "default_period",
        with = "duration_serde"
    )]
    pub period: Duration,
    /// 单次探测超时时间
    #[serde(
        rename = "timeout_ms",
        default = "default_timeout",
        with = "duration_serde"
    )]
    pub timeout: Duration,
    /// 启动后首次探测前的等待时间
    #[serde(
        rename = "initial_delay_ms",
        default = "default_initial_delay",
        with = "duration_serde"
    )]
    pub initial_delay: Duration,
    /// 失败后转为健康所需的连续成功次数
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// 健康后转为失败所需的连续失败次数
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            timeout: default_timeout(),
            initial_delay: default_initial_delay(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// 探测目标描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeTarget {
    /// HTTP GET 探测
    HttpGet {
        /// 探测地址
        url: String,
        /// 附加请求头
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// TCP 连接探测
    TcpSocket {
        /// 目标主机
        host: String,
        /// 目标端口
        port: u16,
    },
    /// 外部命令探测
    Exec {
        /// 可执行文件
        command: String,
        /// 命令参数
        #[serde(default)]
        args: Vec<String>,
    },
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeTarget::HttpGet { url, .. } => write!(f, "http_get {url}"),
            ProbeTarget::TcpSocket { host, port } => write!(f, "tcp_socket {host}:{port}"),
            ProbeTarget::Exec { command, args } => {
                write!(f, "exec {command}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// 完整的探测描述：调度参数加探测目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeSpec {
    /// 调度参数
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 探测目标
    pub target: ProbeTarget,
}

impl ProbeSpec {
    /// 从TOML字符串解析并验证探测描述
    ///
    /// # 参数
    /// * `content` - TOML内容
    ///
    /// # 返回
    /// * `Result<Self, ConfigError>` - 解析的探测描述或错误
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let spec: ProbeSpec = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {e}")))?;
        validate_probe_spec(&spec)?;
        Ok(spec)
    }
}

// 默认值函数
fn default_period() -> Duration {
    Duration::from_secs(10)
}
fn default_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_initial_delay() -> Duration {
    Duration::ZERO
}
fn default_success_threshold() -> u32 {
    1
}
fn default_failure_threshold() -> u32 {
    3
}

/// 调度配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), ConfigError>` - 验证结果
pub fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.period.is_zero() {
        return Err(ConfigError::ValidationError("探测周期不能为0".to_string()));
    }

    if config.timeout.is_zero() {
        return Err(ConfigError::ValidationError("探测超时时间不能为0".to_string()));
    }

    if config.success_threshold == 0 {
        return Err(ConfigError::ValidationError("成功阈值不能为0".to_string()));
    }

    if config.failure_threshold == 0 {
        return Err(ConfigError::ValidationError("失败阈值不能为0".to_string()));
    }

    Ok(())
}

/// 探测描述验证函数
///
/// 只做不依赖网络的检查；URL与请求头的语法在构建探测器时校验。
pub fn validate_probe_spec(spec: &ProbeSpec) -> Result<(), ConfigError> {
    validate_worker_config(&spec.worker)?;

    match &spec.target {
        ProbeTarget::HttpGet { url, .. } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "探测URL格式无效: {url}"
                )));
            }
        }
        ProbeTarget::TcpSocket { host, port } => {
            if host.trim().is_empty() {
                return Err(ConfigError::ValidationError("TCP探测主机不能为空".to_string()));
            }
            if *port == 0 {
                return Err(ConfigError::ValidationError("TCP探测端口不能为0".to_string()));
            }
        }
        ProbeTarget::Exec { command, .. } => {
            if command.trim().is_empty() {
                return Err(ConfigError::ValidationError("探测命令不能为空".to_string()));
            }
        }
    }

    Ok(())
}

/// Duration序列化模块（毫秒）
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
