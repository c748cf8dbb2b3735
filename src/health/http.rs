//! HTTP GET探测器实现
//!
//! 提供HTTP健康检测功能：补全请求头、限制重定向、截断响应体并按状态码分类。
//! 请求直接经由 hyper 客户端发送，除本模块补全的请求头外不会附加任何默认头。

use crate::error::ProbeError;
use crate::health::result::{ProbeOutcome, ProbeOutput};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, ACCEPT, HOST, LOCATION, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::error::Error as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// 响应体最大读取长度（10KB）
pub const MAX_RESPONSE_BODY_LENGTH: usize = 10 * 1024;

/// 同一主机内允许发出的最大请求数（含首个请求）
pub const MAX_REDIRECTS: usize = 10;

/// 探测请求默认携带的 User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// 探测使用的HTTP客户端类型
pub type ProbeClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// HTTP GET探测器
///
/// 内部持有一个共享的 [`ProbeClient`]，可以被多个 Worker 并发使用。
#[derive(Clone)]
pub struct HttpGetProber {
    /// HTTP客户端
    client: ProbeClient,
}

impl std::fmt::Debug for HttpGetProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGetProber").finish_non_exhaustive()
    }
}

impl HttpGetProber {
    /// 使用默认客户端创建HTTP探测器
    ///
    /// # 返回
    /// * `Result<Self, ProbeError>` - TLS配置无法建立时返回错误
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self::with_client(Self::default_client()?))
    }

    /// 使用外部提供的客户端创建探测器
    pub fn with_client(client: ProbeClient) -> Self {
        Self { client }
    }

    /// 构建默认的探测客户端
    ///
    /// 不校验TLS证书、不走代理、不复用连接、只使用 HTTP/1.1；
    /// 不做内容压缩协商，因此不会发送 `Accept-Encoding`。
    pub fn default_client() -> Result<ProbeClient, ProbeError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(insecure_tls_config()?)
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector))
    }

    /// 对 `url` 执行一次GET探测
    ///
    /// # 参数
    /// * `token` - 取消令牌
    /// * `url` - 探测地址
    /// * `headers` - 附加请求头，其中的 `Host` 作为请求主机发送
    ///
    /// # 返回
    /// * `ProbeOutcome` - 2xx为Success，3xx为Warning，其余与传输错误均为Failure
    pub async fn probe(
        &self,
        token: CancellationToken,
        url: &Url,
        headers: &HeaderMap,
    ) -> ProbeOutcome {
        let headers = prepare_headers(headers);

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                Ok(ProbeOutput::failure(format!("Request cancelled: GET {url}")))
            }
            outcome = self.follow_redirects(url, headers) => outcome,
        }
    }

    /// 发送请求并在同一主机内跟随重定向
    async fn follow_redirects(&self, origin: &Url, mut headers: HeaderMap) -> ProbeOutcome {
        let mut current = origin.clone();
        let mut requests_made = 0;

        loop {
            let request = build_request(&current, &headers)?;
            let response = match self.client.request(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("HTTP探测请求失败 {}: {}", current, e);
                    return Ok(ProbeOutput::failure(format_request_error(&e)));
                }
            };
            requests_made += 1;

            match next_action(origin, &current, response.status(), response.headers(), requests_made) {
                RedirectAction::Done => return read_response(origin, response).await,
                RedirectAction::Fail(message) => {
                    debug!("HTTP探测重定向失败 {}: {}", origin, message);
                    return Ok(ProbeOutput::failure(format!("Redirect error: {message}")));
                }
                RedirectAction::Follow(next) => {
                    // 指定的 Host 只在端口不变时继续沿用
                    if next.port_or_known_default() != origin.port_or_known_default() {
                        headers.remove(HOST);
                    }
                    debug!("HTTP探测跟随重定向 {} -> {}", current, next);
                    current = next;
                }
            }
        }
    }
}

/// 构建单次GET请求
fn build_request(url: &Url, headers: &HeaderMap) -> Result<Request<Empty<Bytes>>, ProbeError> {
    let mut target = url.clone();
    target.set_fragment(None);

    let mut request = Request::builder()
        .method(Method::GET)
        .uri(target.as_str())
        .body(Empty::new())
        .map_err(ProbeError::Request)?;
    *request.headers_mut() = headers.clone();
    Ok(request)
}

/// 读取响应体并分类
async fn read_response(url: &Url, response: Response<Incoming>) -> ProbeOutcome {
    let status_code = response.status().as_u16();
    let (body, truncated) = read_at_most(response.into_body(), MAX_RESPONSE_BODY_LENGTH)
        .await
        .map_err(ProbeError::Body)?;
    if truncated {
        debug!(
            "响应体被截断 {}: 状态码 {}, 保留前 {} 字节",
            url, status_code, MAX_RESPONSE_BODY_LENGTH
        );
    }
    let body = String::from_utf8_lossy(&body).into_owned();

    Ok(classify_response(url, status_code, body))
}

/// 按状态码分类响应
fn classify_response(url: &Url, status_code: u16, body: String) -> ProbeOutput {
    match status_code {
        200..=299 => {
            debug!("HTTP探测成功 {}: {}", url, status_code);
            ProbeOutput::success(body)
        }
        300..=399 => {
            // 重定向到其他主机时不跟随，最后一个响应即为结果
            debug!("HTTP探测终止于重定向 {}: {}", url, status_code);
            ProbeOutput::warning(body)
        }
        _ => {
            debug!("HTTP探测失败 {}: {}, 响应体: {}", url, status_code, body);
            ProbeOutput::failure(format!(
                "HTTP probe failed with statuscode: {status_code}"
            ))
        }
    }
}

/// 补全探测请求头
///
/// * 未设置 `User-Agent` 时使用 [`DEFAULT_USER_AGENT`]
/// * 未设置 `Accept` 时使用 `*/*`；设置为空值表示显式不发送，直接移除
pub fn prepare_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }

    let accept_is_empty = headers.get(ACCEPT).map(HeaderValue::is_empty);
    match accept_is_empty {
        None => {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        Some(true) => {
            headers.remove(ACCEPT);
        }
        Some(false) => {}
    }

    headers
}

/// 收到响应后的下一步
#[derive(Debug, PartialEq, Eq)]
enum RedirectAction {
    /// 当前响应即为最终结果
    Done,
    /// 继续请求同一主机上的新地址
    Follow(Url),
    /// 重定向无法继续
    Fail(String),
}

/// 探测专用的重定向策略
///
/// 主机名变化时停止并返回重定向响应本身；同一主机内发出 [`MAX_REDIRECTS`] 个请求后
/// 仍需重定向视为错误。
fn next_action(
    origin: &Url,
    current: &Url,
    status: StatusCode,
    headers: &HeaderMap,
    requests_made: usize,
) -> RedirectAction {
    // 301、302、303、307、308 之外的 3xx 不跟随
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return RedirectAction::Done;
    }

    let Some(location) = headers.get(LOCATION) else {
        return RedirectAction::Done;
    };
    let next = match location.to_str().ok().and_then(|l| current.join(l).ok()) {
        Some(next) => next,
        None => {
            return RedirectAction::Fail(format!("failed to parse Location header {location:?}"));
        }
    };

    if next.host_str() != origin.host_str() {
        RedirectAction::Done
    } else if requests_made >= MAX_REDIRECTS {
        RedirectAction::Fail(format!("GET {next}: stopped after {MAX_REDIRECTS} redirects"))
    } else {
        RedirectAction::Follow(next)
    }
}

/// 读取至多 `limit` 字节的响应体，返回内容以及是否达到上限
async fn read_at_most(mut body: Incoming, limit: usize) -> Result<(Vec<u8>, bool), hyper::Error> {
    let mut buf = Vec::new();
    while let Some(frame) = body.frame().await {
        let Ok(chunk) = frame?.into_data() else {
            continue;
        };
        let remaining = limit - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}

/// 格式化请求错误信息，保留完整的错误链
fn format_request_error(error: &hyper_util::client::legacy::Error) -> String {
    let category = if error.is_connect() {
        "Connection failed"
    } else {
        "Request failed"
    };

    let mut message = format!("{category}: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// 不校验证书的TLS配置，握手签名仍按加密套件校验
fn insecure_tls_config() -> Result<rustls::ClientConfig, ProbeError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(ProbeError::Tls)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(config)
}

/// 接受任意服务端证书
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
