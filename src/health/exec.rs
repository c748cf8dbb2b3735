//! 外部命令探测器实现

use crate::error::ProbeError;
use crate::health::result::{ProbeOutcome, ProbeOutput};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 外部命令探测器
///
/// 退出码为0即 Success，非零退出或被信号终止为 Failure；
/// 只有命令无法启动时才返回 `Err`，该次探测会被丢弃。
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecProber;

impl ExecProber {
    /// 创建新的命令探测器
    pub fn new() -> Self {
        Self
    }

    /// 运行命令并根据退出码分类
    ///
    /// # 参数
    /// * `token` - 取消令牌，取消后子进程会被杀死
    /// * `program` - 可执行文件（不经过shell）
    /// * `args` - 命令参数
    ///
    /// # 返回
    /// * `ProbeOutcome` - 输出为按到达顺序合并的 stdout/stderr
    pub async fn probe(
        &self,
        token: CancellationToken,
        program: &str,
        args: &[String],
    ) -> ProbeOutcome {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Launch {
                command: program.to_string(),
                source,
            })?;

        let finished = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            finished = wait_with_combined_output(&mut child) => Some(finished),
        };

        match finished {
            Some(Ok((status, output))) => Ok(classify_exit(program, status, output)),
            Some(Err(e)) => Err(ProbeError::Output(e)),
            None => {
                if let Err(e) = child.start_kill() {
                    debug!("终止探测命令失败 {}: {}", program, e);
                }
                Ok(ProbeOutput::failure(format!(
                    "command `{program}` cancelled before completion"
                )))
            }
        }
    }
}

/// 按退出状态分类命令结果
fn classify_exit(program: &str, status: ExitStatus, output: Vec<u8>) -> ProbeOutput {
    let output = String::from_utf8_lossy(&output).into_owned();
    if status.success() {
        ProbeOutput::success(output)
    } else {
        debug!("探测命令执行失败 {}: {}", program, status);
        ProbeOutput::failure(output)
    }
}

/// 等待子进程退出，同时按到达顺序收集 stdout 与 stderr
async fn wait_with_combined_output(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut output = Vec::new();
    let mut stdout_buf = [0u8; 4096];
    let mut stderr_buf = [0u8; 4096];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                match read? {
                    0 => stdout = None,
                    n => output.extend_from_slice(&stdout_buf[..n]),
                }
            }
            read = read_chunk(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                match read? {
                    0 => stderr = None,
                    n => output.extend_from_slice(&stderr_buf[..n]),
                }
            }
        }
    }

    let status = child.wait().await?;
    Ok((status, output))
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
