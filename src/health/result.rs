//! 探测结果数据结构
//!
//! 定义单次探测的结果类型和状态枚举

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};

/// 探测结果枚举
///
/// `Success` 和 `Warning` 视为健康，`Failure` 视为不健康，
/// `Unknown` 表示探测本身失灵，结果必须被丢弃而不计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeResult {
    /// 状态未知
    #[default]
    Unknown,
    /// 探测成功
    Success,
    /// 探测成功但有告警（例如重定向被终止）
    Warning,
    /// 探测失败
    Failure,
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeResult::Unknown => write!(f, "unknown"),
            ProbeResult::Success => write!(f, "success"),
            ProbeResult::Warning => write!(f, "warning"),
            ProbeResult::Failure => write!(f, "failure"),
        }
    }
}

impl ProbeResult {
    /// 判断结果是否为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Success | ProbeResult::Warning)
    }
}

/// 一次成功执行的探测所产生的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    /// 探测结果
    pub result: ProbeResult,
    /// 自由格式的输出（响应体、命令输出或错误文本）
    pub output: String,
}

impl ProbeOutput {
    /// 创建新的探测输出
    pub fn new(result: ProbeResult, output: impl Into<String>) -> Self {
        Self {
            result,
            output: output.into(),
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new(ProbeResult::Success, output)
    }

    pub fn warning(output: impl Into<String>) -> Self {
        Self::new(ProbeResult::Warning, output)
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self::new(ProbeResult::Failure, output)
    }
}

/// 单次探测的完整结果
///
/// `Err` 等价于 "Unknown + error"：除 [`ProbeError::DeadlineExceeded`] 以外都会被丢弃。
pub type ProbeOutcome = std::result::Result<ProbeOutput, ProbeError>;
