//! 探测器工厂
//!
//! 每种探测策略只持有一个共享实例，构建出绑定了固定目标的 [`ProbeFunc`]。

use crate::config::types::{validate_probe_spec, ProbeSpec, ProbeTarget};
use crate::error::{ConfigError, ProbeError};
use crate::health::checker::ProbeFunc;
use crate::health::exec::ExecProber;
use crate::health::http::{HttpGetProber, ProbeClient};
use crate::health::tcp::TcpSocketProber;
use crate::health::worker::Worker;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// 探测器工厂
///
/// 克隆开销很小，克隆后共享同一个HTTP客户端。
#[derive(Debug, Clone)]
pub struct Manager {
    http: Arc<HttpGetProber>,
    tcp: TcpSocketProber,
    exec: ExecProber,
}

impl Manager {
    /// 创建新的探测器工厂
    ///
    /// # 返回
    /// * `Result<Self, ProbeError>` - HTTP客户端初始化失败时返回错误
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self::with_http_prober(HttpGetProber::new()?))
    }

    /// 使用外部提供的HTTP客户端创建工厂
    pub fn with_http_client(client: ProbeClient) -> Self {
        Self::with_http_prober(HttpGetProber::with_client(client))
    }

    fn with_http_prober(http: HttpGetProber) -> Self {
        Self {
            http: Arc::new(http),
            tcp: TcpSocketProber::new(),
            exec: ExecProber::new(),
        }
    }

    /// 构建HTTP GET探测
    ///
    /// # 参数
    /// * `url` - 探测地址
    /// * `headers` - 附加请求头
    ///
    /// # 返回
    /// * `ProbeFunc` - 每次调用都对同一地址发起请求
    pub fn http_get(&self, url: Url, headers: HeaderMap) -> ProbeFunc {
        let http = Arc::clone(&self.http);
        let url = Arc::new(url);
        let headers = Arc::new(headers);
        ProbeFunc::new(move |token| {
            let http = Arc::clone(&http);
            let url = Arc::clone(&url);
            let headers = Arc::clone(&headers);
            async move { http.probe(token, &url, &headers).await }
        })
    }

    /// 构建TCP连接探测
    pub fn tcp_socket(&self, host: impl Into<String>, port: u16) -> ProbeFunc {
        let tcp = self.tcp;
        let host: Arc<str> = Arc::from(host.into());
        ProbeFunc::new(move |token| {
            let host = Arc::clone(&host);
            async move { tcp.probe(token, &host, port).await }
        })
    }

    /// 构建外部命令探测
    ///
    /// # 参数
    /// * `program` - 可执行文件
    /// * `args` - 命令参数
    pub fn exec(&self, program: impl Into<String>, args: Vec<String>) -> ProbeFunc {
        let exec = self.exec;
        let program: Arc<str> = Arc::from(program.into());
        let args = Arc::new(args);
        ProbeFunc::new(move |token| {
            let program = Arc::clone(&program);
            let args = Arc::clone(&args);
            async move { exec.probe(token, &program, &args).await }
        })
    }

    /// 根据声明式的探测目标构建探测器
    ///
    /// URL和请求头的语法在这里校验，无效时返回 [`ConfigError::InvalidTarget`]。
    pub fn prober_for(&self, target: &ProbeTarget) -> Result<ProbeFunc, ConfigError> {
        match target {
            ProbeTarget::HttpGet { url, headers } => {
                let url = Url::parse(url)
                    .map_err(|e| ConfigError::InvalidTarget(format!("探测URL无效 {url}: {e}")))?;
                Ok(self.http_get(url, parse_headers(headers)?))
            }
            ProbeTarget::TcpSocket { host, port } => Ok(self.tcp_socket(host.clone(), *port)),
            ProbeTarget::Exec { command, args } => Ok(self.exec(command.clone(), args.clone())),
        }
    }

    /// 根据完整的探测描述构建 Worker
    ///
    /// # 参数
    /// * `spec` - 探测描述
    ///
    /// # 返回
    /// * `Result<Worker, ConfigError>` - 配置好调度参数的 Worker
    pub fn worker_from_spec(&self, spec: &ProbeSpec) -> Result<Worker, ConfigError> {
        validate_probe_spec(spec)?;
        let prober = self.prober_for(&spec.target)?;
        Ok(Worker::new(prober)
            .with_name(spec.target.to_string())
            .with_config(spec.worker.clone()))
    }
}

/// 把字符串键值对转换为请求头
fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::InvalidTarget(format!("请求头名称无效 {name}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::InvalidTarget(format!("请求头 {name} 的值无效: {e}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
