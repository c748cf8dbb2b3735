//! TCP连接探测器实现

use crate::health::result::{ProbeOutcome, ProbeOutput};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// TCP连接探测器
///
/// 能建立连接即为 Success；连接被拒绝、超时等都作为 Failure 返回，
/// 错误文本放在输出中，从不返回 `Err`。
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketProber;

impl TcpSocketProber {
    /// 创建新的TCP探测器
    pub fn new() -> Self {
        Self
    }

    /// 尝试连接 `host:port`
    ///
    /// # 参数
    /// * `token` - 取消令牌
    /// * `host` - 目标主机
    /// * `port` - 目标端口
    ///
    /// # 返回
    /// * `ProbeOutcome` - Success 或带错误文本的 Failure
    pub async fn probe(&self, token: CancellationToken, host: &str, port: u16) -> ProbeOutcome {
        let connect = TcpStream::connect((host, port));

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                Ok(ProbeOutput::failure(format!("dial tcp {host}:{port}: connection attempt cancelled")))
            }
            connected = connect => match connected {
                Ok(stream) => {
                    drop(stream);
                    Ok(ProbeOutput::success(""))
                }
                Err(e) => {
                    debug!("TCP探测失败 {}:{}: {}", host, port, e);
                    Ok(ProbeOutput::failure(format!("dial tcp {host}:{port}: {e}")))
                }
            },
        }
    }
}
