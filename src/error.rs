//! 错误处理模块
//!
//! 定义探测子系统的统一错误类型

use std::time::Duration;
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置解析错误
    #[error("配置解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 探测目标无效（URL、请求头等）
    #[error("探测目标无效: {0}")]
    InvalidTarget(String),
}

/// 探测错误类型
///
/// 只表示探测本身出了问题。目标不健康（连接被拒、非2xx/3xx、非零退出码）
/// 永远通过 [`ProbeResult`](crate::health::ProbeResult) 表达，而不是错误。
#[derive(Error, Debug)]
pub enum ProbeError {
    /// 单次探测超过了截止时间，Worker 会把它当作 Failure 计数
    #[error("探测超时: 超过 {0:?}")]
    DeadlineExceeded(Duration),

    /// 命令无法启动
    #[error("命令启动失败 `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 读取命令输出或等待进程失败
    #[error("读取命令输出失败: {0}")]
    Output(#[source] std::io::Error),

    /// HTTP请求无法构建
    #[error("HTTP请求构建失败: {0}")]
    Request(#[source] hyper::http::Error),

    /// 读取响应体失败
    #[error("读取响应体失败: {0}")]
    Body(#[source] hyper::Error),

    /// TLS配置无法建立
    #[error("TLS配置失败: {0}")]
    Tls(#[source] rustls::Error),

    /// 探测任务在返回结果前退出（通常是 panic）
    #[error("探测任务未返回结果即退出")]
    Aborted,
}

impl ProbeError {
    /// 是否为截止时间超时
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ProbeError::DeadlineExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_detection() {
        assert!(ProbeError::DeadlineExceeded(Duration::from_secs(1)).is_deadline_exceeded());
        assert!(!ProbeError::Aborted.is_deadline_exceeded());

        let launch = ProbeError::Launch {
            command: "nope".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!launch.is_deadline_exceeded());
        assert!(launch.to_string().contains("nope"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidTarget("http://[::1".to_string());
        assert!(err.to_string().contains("探测目标无效"));
        assert!(err.to_string().contains("http://[::1"));
    }
}
